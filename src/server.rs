//! 서버 세션 엔진
//!
//! - REQ: 경로 검증, 파일 적재, META/DATA/EOF 블라스트
//! - NACK: 누락 세그먼트 재전송
//! - LIST: 기준 디렉터리 목록 응답
//!
//! 수신 루프는 하나이고, REQ/NACK 처리는 각각 별도 태스크로
//! 돌아서 느린 전송이 다른 피어를 막지 않는다.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chunk::{DataHeader, FileChunks};
use crate::error::Result;
use crate::message::{is_ctrl, Ctrl};
use crate::sock::{bind_udp, resolve};
use crate::stats::{MetricsSnapshot, ServerMetrics};
use crate::CTRL_BUFFER_SIZE;

/// 세션 로그 싱크. start에 넘기면 세션 단위 로그가 전달된다
pub type LogSink = mpsc::UnboundedSender<String>;

/// DATA 전송 간 간격. 루프백에서도 수신 버퍼가 넘치지 않게 한다
const SEND_PACING: Duration = Duration::from_millis(1);

/// UDP 파일 서버
///
/// 활성 전송 테이블과 메트릭을 값으로 소유하므로 한 프로세스에
/// 여러 인스턴스를 띄울 수 있다.
pub struct Server {
    /// 서비스 기준 디렉터리
    base_dir: RwLock<PathBuf>,

    /// 피어 주소별 활성 전송. 같은 피어의 새 REQ가 이전 항목을 덮는다
    transfers: DashMap<SocketAddr, Arc<FileChunks>>,

    /// 집계 카운터
    metrics: ServerMetrics,

    /// 실행 플래그
    running: AtomicBool,

    /// 수신 루프 태스크
    loop_task: Mutex<Option<JoinHandle<()>>>,

    /// 바인드된 로컬 주소
    local_addr: Mutex<Option<SocketAddr>>,

    /// 세션 로그 싱크
    log: Mutex<Option<LogSink>>,
}

impl Server {
    /// 새 서버 생성
    pub fn new(base_dir: impl Into<PathBuf>) -> Arc<Server> {
        Arc::new(Server {
            base_dir: RwLock::new(base_dir.into()),
            transfers: DashMap::new(),
            metrics: ServerMetrics::default(),
            running: AtomicBool::new(false),
            loop_task: Mutex::new(None),
            local_addr: Mutex::new(None),
            log: Mutex::new(None),
        })
    }

    /// 서비스할 기준 디렉터리 변경. 비어 있으면 "."
    pub fn set_base_dir(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        *self.base_dir.write() = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir
        };
    }

    /// 현재 메트릭 사본
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 바인드된 로컬 주소 (start 이후 유효)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 서버 시작: 소켓 바인드 후 수신 루프 태스크 기동
    ///
    /// 이미 실행 중이면 아무 것도 하지 않는다.
    pub async fn start(self: &Arc<Self>, host: &str, port: u16, log: Option<LogSink>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let addr = match resolve(host, port).await {
            Ok(a) => a,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let socket = match bind_udp(addr) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let local = socket.local_addr()?;
        *self.local_addr.lock() = Some(local);
        *self.log.lock() = log;
        info!("RUFT server listening on {}", local);

        let server = Arc::clone(self);
        let handle = tokio::spawn(async move {
            server.packet_loop(socket).await;
        });
        *self.loop_task.lock() = Some(handle);
        Ok(())
    }

    /// 서버 정지: 수신 루프 중단, 소켓 해제
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.loop_task.lock().take() {
            handle.abort();
        }
        *self.local_addr.lock() = None;
    }

    fn log_line(&self, line: String) {
        if let Some(tx) = self.log.lock().as_ref() {
            let _ = tx.send(line);
        }
    }

    /// 데이터그램 수신 루프
    async fn packet_loop(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; CTRL_BUFFER_SIZE];
        while self.running.load(Ordering::SeqCst) {
            let (n, addr) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("수신 에러: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };
            // 제어 프레임이 아니면 조용히 버린다
            if !is_ctrl(&buf[..n]) {
                continue;
            }
            let frame = match Ctrl::decode(&buf[..n]) {
                Ok(f) => f,
                Err(_) => continue,
            };
            self.dispatch(frame, addr, &socket);
        }
    }

    /// 제어 프레임 분기. 핸들러는 수신 루프를 막지 않도록 태스크로 돌린다
    fn dispatch(self: &Arc<Self>, frame: Ctrl, addr: SocketAddr, socket: &Arc<UdpSocket>) {
        match frame {
            Ctrl::Req { path } => {
                let server = Arc::clone(self);
                let socket = Arc::clone(socket);
                tokio::spawn(async move {
                    server.handle_req(&socket, addr, path).await;
                });
            }
            Ctrl::Nack { missing } => {
                self.log_line(format!("NACK <- client={} missing={}", addr, missing.len()));
                let server = Arc::clone(self);
                let socket = Arc::clone(socket);
                tokio::spawn(async move {
                    server.handle_nack(&socket, addr, missing).await;
                });
            }
            Ctrl::List => {
                let server = Arc::clone(self);
                let socket = Arc::clone(socket);
                tokio::spawn(async move {
                    server.handle_list(&socket, addr).await;
                });
            }
            // 나머지는 서버가 보내는 타입. 수신하면 무시
            _ => {}
        }
    }

    /// REQ 처리: 경로 검증, 파일 적재, 세션 등록, 블라스트
    async fn handle_req(&self, socket: &UdpSocket, addr: SocketAddr, path: String) {
        let Some(safe) = sanitize_path(&path) else {
            debug!("경로 거부: {:?} ({})", path, addr);
            let err = Ctrl::Err {
                message: "caminho inválido".into(),
            };
            let _ = socket.send_to(&err.encode(), addr).await;
            return;
        };
        let target = self.base_dir.read().join(safe);
        let file = match FileChunks::load(&target).await {
            Ok(f) => Arc::new(f),
            Err(_) => {
                let err = Ctrl::Err {
                    message: "arquivo não encontrado".into(),
                };
                let _ = socket.send_to(&err.encode(), addr).await;
                return;
            }
        };
        self.transfers.insert(addr, Arc::clone(&file));
        self.metrics.client_started();
        self.send_blast(socket, addr, &file).await;
        self.metrics.client_finished();
    }

    /// 초기 블라스트: META, 시퀀스 순 DATA, EOF
    async fn send_blast(&self, socket: &UdpSocket, addr: SocketAddr, file: &FileChunks) {
        let _ = socket
            .send_to(&Ctrl::Meta(file.meta.clone()).encode(), addr)
            .await;
        self.log_line(format!(
            "META -> client={} total={} size={}",
            addr, file.meta.total, file.meta.size
        ));

        let total = file.chunks.len() as u32;
        for (seq, chunk) in file.chunks.iter().enumerate() {
            let pkt = DataHeader::frame(seq as u32, total, chunk);
            if let Ok(n) = socket.send_to(&pkt, addr).await {
                self.metrics.add_bytes_sent(n as u64);
                self.metrics.add_segment_sent();
            }
            tokio::time::sleep(SEND_PACING).await;
        }

        let _ = socket.send_to(&Ctrl::Eof.encode(), addr).await;
        self.log_line(format!(
            "EOF -> client={} segments={}",
            addr,
            file.chunks.len()
        ));
    }

    /// NACK 처리: 범위 안의 누락 세그먼트만 재전송
    async fn handle_nack(&self, socket: &UdpSocket, addr: SocketAddr, missing: Vec<u32>) {
        self.metrics.add_nack();
        let Some(file) = self.transfers.get(&addr).map(|e| Arc::clone(e.value())) else {
            return;
        };
        let total = file.chunks.len() as u32;
        for seq in missing {
            // 범위 밖 시퀀스는 무시
            let Some(chunk) = file.chunks.get(seq as usize) else {
                continue;
            };
            let pkt = DataHeader::frame(seq, total, chunk);
            if let Ok(n) = socket.send_to(&pkt, addr).await {
                self.metrics.add_bytes_sent(n as u64);
                self.metrics.add_retransmission();
            }
            tokio::task::yield_now().await;
        }
    }

    /// LIST 처리: 기준 디렉터리의 일반 파일 이름 목록 (비재귀)
    async fn handle_list(&self, socket: &UdpSocket, addr: SocketAddr) {
        let dir = self.base_dir.read().clone();
        let mut names = Vec::new();
        if let Ok(mut entries) = tokio::fs::read_dir(&dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                match entry.file_type().await {
                    Ok(t) if !t.is_dir() => {
                        names.push(entry.file_name().to_string_lossy().into_owned());
                    }
                    _ => {}
                }
            }
        }
        let _ = socket.send_to(&Ctrl::Lst { names }.encode(), addr).await;
    }
}

/// 요청 경로를 어휘적으로 정리한다
///
/// ".", "..", 기준 디렉터리를 벗어나는 경로는 None. 절대 경로
/// 구성요소는 떼어내서 항상 기준 디렉터리 아래로 해석되게 한다.
fn sanitize_path(path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for comp in Path::new(path).components() {
        match comp {
            Component::Normal(c) => out.push(c),
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    if out.as_os_str().is_empty() {
        return None;
    }
    Some(out)
}
