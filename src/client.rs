//! 클라이언트 전송 엔진
//!
//! 한 번의 전송은 네 단계로 진행된다:
//! 1. REQ 전송 후 META 대기 (타임아웃마다 재전송)
//! 2. 초기 블라스트 수신 (EOF 또는 유휴 감지까지)
//! 3. NACK 라운드 (누락 세그먼트 재요청)
//! 4. 조립, SHA-256 검증, 파일 기록
//!
//! 취소 신호는 단계 경계와 읽기 반복마다 확인한다.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::chunk::{sha256_hex, Accept, DataHeader, ReceiveBuffer, DATA_HEADER_SIZE};
use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::message::{is_ctrl, Ctrl, Meta};
use crate::sock::{bind_udp, resolve, wildcard_for};
use crate::stats::Progress;
use crate::{CHUNK_SIZE, CTRL_BUFFER_SIZE};

/// 전송 이벤트
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// META 수신
    Meta(Meta),

    /// 누적 진행 (검증을 통과한 바이트/세그먼트)
    Progress { bytes: u64, segments: u64 },

    /// 로그 한 줄
    Log(String),

    /// 종료 보고. 실패 시 path는 None
    Done { path: Option<PathBuf>, sha_ok: bool },
}

/// 전송 이벤트 송신 채널
pub type EventSink = mpsc::UnboundedSender<TransferEvent>;

/// 전송 결과
#[derive(Debug, Clone)]
pub struct Outcome {
    /// 기록된 파일 경로
    pub path: PathBuf,

    /// SHA-256 일치 여부
    pub sha_ok: bool,
}

/// 한 세션 동안의 수신 상태
struct Session {
    socket: UdpSocket,
    cfg: TransferConfig,
    events: EventSink,
    buffer: ReceiveBuffer,
    progress: Arc<Progress>,
}

impl Session {
    fn emit_log(&self, line: String) {
        let _ = self.events.send(TransferEvent::Log(line));
    }

    fn check_cancel(&self) -> Result<()> {
        if let Some(cancel) = &self.cfg.cancel {
            if cancel.load(Ordering::SeqCst) {
                return Err(Error::Canceled);
            }
        }
        Ok(())
    }

    /// 1단계: REQ를 보내고 META 또는 ERR를 기다린다
    async fn request_meta(&mut self) -> Result<Meta> {
        let attempts = self.cfg.effective_retries();
        self.emit_log(format!("META 요청 (최대 {attempts}회 시도)"));
        let req = Ctrl::Req {
            path: self.cfg.path.clone(),
        }
        .encode();
        let mut buf = vec![0u8; CTRL_BUFFER_SIZE];

        for attempt in 1..=attempts {
            self.check_cancel()?;
            self.socket.send(&req).await?;
            let deadline = Instant::now() + self.cfg.timeout;
            loop {
                self.check_cancel()?;
                let n = match timeout_at(deadline, self.socket.recv(&mut buf)).await {
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => {
                        warn!("META 대기 타임아웃 (시도 {}/{})", attempt, attempts);
                        break;
                    }
                };
                // DATA나 잡음은 무시하고 META를 계속 기다린다
                if !is_ctrl(&buf[..n]) {
                    continue;
                }
                match Ctrl::decode(&buf[..n]) {
                    Ok(Ctrl::Meta(meta)) => {
                        let _ = self.events.send(TransferEvent::Meta(meta.clone()));
                        return Ok(meta);
                    }
                    Ok(Ctrl::Err { message }) => return Err(Error::ServerError(message)),
                    _ => continue,
                }
            }
        }
        Err(Error::MetaTimeout)
    }

    /// 2단계: 초기 블라스트 수신
    ///
    /// EOF가 오면 끝낸다. 데이터를 받은 뒤 연속 타임아웃이 유휴
    /// 한계에 도달하면 NACK 단계로 넘어가고, 아무 것도 받지 못한
    /// 채 한계에 도달하면 실패한다.
    async fn receive_blast(&mut self) -> Result<()> {
        self.emit_log("초기 데이터 수신 중".into());
        let max_idle = self.cfg.effective_retries() * 3;
        let mut idle = 0usize;
        let mut buf = vec![0u8; DATA_HEADER_SIZE + CHUNK_SIZE];

        loop {
            self.check_cancel()?;
            let n = match timeout(self.cfg.timeout, self.socket.recv(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    idle += 1;
                    if idle % 5 == 0 {
                        debug!("초기 수신 타임아웃 {}/{}", idle, max_idle);
                    }
                    if idle >= max_idle {
                        if self.buffer.is_empty() {
                            return Err(Error::NoDataReceived);
                        }
                        self.emit_log("유휴 감지; NACK 단계 진입".into());
                        return Ok(());
                    }
                    continue;
                }
            };
            idle = 0;
            if self.process_packet(&buf[..n]) {
                return Ok(());
            }
        }
    }

    /// 수신 데이터그램 처리. EOF 제어 프레임이면 true
    ///
    /// 복구 가능한 결함(형식 오류, 길이/CRC 불일치, 중복, 드롭)은
    /// 로그만 남기고 버린다. NACK 재전송으로 메워진다.
    fn process_packet(&mut self, b: &[u8]) -> bool {
        if is_ctrl(b) {
            return matches!(Ctrl::decode(b), Ok(Ctrl::Eof));
        }
        let Ok(header) = DataHeader::unpack(b) else {
            return false;
        };
        let Some(payload) = b.get(DATA_HEADER_SIZE..DATA_HEADER_SIZE + header.size as usize)
        else {
            self.emit_log(format!(
                "버퍼 부족 seq={} (len={} size={})",
                header.seq,
                b.len(),
                header.size
            ));
            return false;
        };
        if let Some(policy) = self.cfg.drop.as_mut() {
            if policy.should_drop(header.seq) {
                let _ = self
                    .events
                    .send(TransferEvent::Log(format!("DROP seq={}", header.seq)));
                return false;
            }
        }
        match self.buffer.accept(&header, payload) {
            Accept::Stored => {
                if header.seq % 500 == 0 {
                    self.emit_log(format!(
                        "진행 seq={}/{}",
                        header.seq,
                        header.total.saturating_sub(1)
                    ));
                }
                let _ = self.events.send(TransferEvent::Progress {
                    bytes: self.progress.bytes(),
                    segments: self.progress.segments(),
                });
            }
            Accept::CrcMismatch => self.emit_log(format!("CRC32 불일치 seq={}", header.seq)),
            Accept::SizeMismatch => {
                self.emit_log(format!("페이로드 길이 불일치 seq={}", header.seq))
            }
            Accept::Duplicate => {}
        }
        false
    }

    /// 3단계: NACK 라운드
    ///
    /// 라운드마다 누락 목록을 보내고 연장된 마감까지 재전송을
    /// 받는다. 라운드 예산이 다하면 실패한다.
    async fn nack_rounds(&mut self, meta: &Meta) -> Result<()> {
        let max_rounds = self.cfg.effective_retries();
        let mut buf = vec![0u8; DATA_HEADER_SIZE + CHUNK_SIZE];
        let mut rounds = 0usize;

        loop {
            self.check_cancel()?;
            let missing = self.buffer.missing(meta.total);
            if missing.is_empty() {
                return Ok(());
            }
            if rounds >= max_rounds {
                self.emit_log(format!("NACK 재시도 소진; 누락 {}개", missing.len()));
                return Err(Error::IncompleteTransfer {
                    missing: missing.len(),
                });
            }
            rounds += 1;
            let before = missing.len();
            self.emit_log(format!("NACK 라운드 {rounds}; 누락 {before}개"));
            self.socket.send(&Ctrl::Nack { missing }.encode()).await?;

            // 누락이 많을수록 라운드 마감을 늘린다 (최대 5배)
            let multiplier = (1 + before / 100).min(5) as u32;
            let round_deadline = Instant::now() + self.cfg.timeout * multiplier;
            let inner = self.cfg.timeout / 4;
            while Instant::now() < round_deadline {
                self.check_cancel()?;
                match timeout(inner, self.socket.recv(&mut buf)).await {
                    // 라운드 안에서는 EOF도 그냥 지나친다
                    Ok(Ok(n)) => {
                        self.process_packet(&buf[..n]);
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => continue,
                }
            }

            let after = self.buffer.missing(meta.total).len();
            if before > after {
                self.emit_log(format!(
                    "NACK 라운드 {rounds}: {}개 복구, {after}개 남음",
                    before - after
                ));
            } else {
                self.emit_log(format!("NACK 라운드 {rounds}: 재전송 없음"));
            }
        }
    }

    /// 4단계: 조립과 검증
    ///
    /// 완전한 시퀀스를 기록하고 SHA-256을 비교한다. 불일치면
    /// `<경로>.corrupt`로 보존하고 실패를 반환한다.
    async fn assemble_and_verify(self, meta: &Meta) -> Result<Outcome> {
        let Session {
            cfg,
            events,
            buffer,
            ..
        } = self;

        let missing = buffer.missing(meta.total).len();
        if missing > 0 {
            return Err(Error::IncompleteTransfer { missing });
        }
        let chunks = buffer.assemble(meta.total).unwrap_or_default();
        let computed = sha256_hex(&chunks);
        let sha_ok = computed == meta.sha256;

        let base = resolve_output(cfg.output_path.as_deref(), &meta.filename);
        if let Some(parent) = base.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let final_path = if sha_ok {
            base
        } else {
            let mut os = base.into_os_string();
            os.push(".corrupt");
            PathBuf::from(os)
        };

        let mut data = Vec::with_capacity(meta.size.max(0) as usize);
        for chunk in &chunks {
            data.extend_from_slice(chunk);
        }
        tokio::fs::write(&final_path, &data).await?;

        if sha_ok {
            let _ = events.send(TransferEvent::Log(format!(
                "파일 저장: {} ({} bytes) 검증 통과",
                final_path.display(),
                data.len()
            )));
            Ok(Outcome {
                path: final_path,
                sha_ok: true,
            })
        } else {
            Err(Error::IntegrityMismatch {
                expected: meta.sha256.clone(),
                got: computed,
                saved_as: final_path,
            })
        }
    }
}

/// 한 번의 전송을 끝까지 수행한다
///
/// 이벤트 싱크로 META/진행/로그를 흘려보내고, 성공이든 실패든
/// 마지막에 Done 이벤트를 보낸다.
pub async fn run_transfer(cfg: TransferConfig, events: EventSink) -> Result<Outcome> {
    let done = events.clone();
    match transfer_once(cfg, events).await {
        Ok(outcome) => {
            let _ = done.send(TransferEvent::Done {
                path: Some(outcome.path.clone()),
                sha_ok: outcome.sha_ok,
            });
            Ok(outcome)
        }
        Err(Error::IntegrityMismatch {
            expected,
            got,
            saved_as,
        }) => {
            let _ = done.send(TransferEvent::Log(format!(
                "SHA-256 불일치: expected {expected} got {got}"
            )));
            let _ = done.send(TransferEvent::Done {
                path: Some(saved_as.clone()),
                sha_ok: false,
            });
            Err(Error::IntegrityMismatch {
                expected,
                got,
                saved_as,
            })
        }
        Err(e) => {
            let _ = done.send(TransferEvent::Log(format!("에러: {e}")));
            let _ = done.send(TransferEvent::Done {
                path: None,
                sha_ok: false,
            });
            Err(e)
        }
    }
}

async fn transfer_once(cfg: TransferConfig, events: EventSink) -> Result<Outcome> {
    let server = resolve(&cfg.host, cfg.port).await?;
    let socket = bind_udp(wildcard_for(server))?;
    socket.connect(server).await?;

    let progress = Arc::new(Progress::new());
    let mut session = Session {
        socket,
        cfg,
        events,
        buffer: ReceiveBuffer::new(Arc::clone(&progress)),
        progress,
    };

    let meta = session.request_meta().await?;
    session.receive_blast().await?;
    session.nack_rounds(&meta).await?;
    session.assemble_and_verify(&meta).await
}

/// 서버의 파일 목록 요청 (비재귀)
pub async fn list_files(host: &str, port: u16, wait: Duration) -> Result<Vec<String>> {
    let server = resolve(host, port).await?;
    let socket = bind_udp(wildcard_for(server))?;
    socket.connect(server).await?;
    socket.send(&Ctrl::List.encode()).await?;

    let mut buf = vec![0u8; CTRL_BUFFER_SIZE];
    let n = timeout(wait, socket.recv(&mut buf))
        .await
        .map_err(|_| Error::Io(io::Error::from(io::ErrorKind::TimedOut)))??;
    if !is_ctrl(&buf[..n]) {
        return Err(Error::UnexpectedResponse);
    }
    match Ctrl::decode(&buf[..n])? {
        Ctrl::Lst { names } => Ok(names),
        _ => Err(Error::UnexpectedResponse),
    }
}

/// 출력 경로 결정
///
/// - 지정 없음: recv_<filename>
/// - 기존 디렉터리: <dir>/recv_<filename>
/// - 그 외: 지정 경로 그대로
fn resolve_output(output: Option<&Path>, filename: &str) -> PathBuf {
    let basename = Path::new(filename)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".into());
    let default_name = format!("recv_{basename}");
    match output {
        None => PathBuf::from(default_name),
        Some(p) if p.as_os_str().is_empty() => PathBuf::from(default_name),
        Some(p) if p.is_dir() => p.join(default_name),
        Some(p) => p.to_path_buf(),
    }
}
