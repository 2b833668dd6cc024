//! RUFT 클라이언트 - Reliable UDP File Transfer
//!
//! 서버에서 파일 하나를 받아 CRC32/SHA-256으로 검증한다.
//! 손실 시뮬레이션(드롭 정책)으로 NACK 복구 경로를 재현할 수 있다.
//!
//! 사용법:
//!   cargo run --release --bin ruft_client -- [OPTIONS]
//!
//! 예시:
//!   # 파일 수신
//!   cargo run --release --bin ruft_client -- -t 127.0.0.1:19000/test.bin
//!
//!   # 5% 손실 시뮬레이션 + 출력 경로 지정
//!   cargo run --release --bin ruft_client -- -t @127.0.0.1:19000/test.bin --drop-rate 0.05 -o out.bin
//!
//!   # 서버 파일 목록
//!   cargo run --release --bin ruft_client -- --list -t 127.0.0.1:19000/

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use ruft::{list_files, parse_target, run_transfer, DropPolicy, TransferConfig, TransferEvent};

/// 클라이언트 실행 설정
struct ClientArgs {
    target: Option<String>,
    list: bool,
    drop_rate: f64,
    seed: Option<u64>,
    timeout_secs: f64,
    retries: usize,
    output: Option<PathBuf>,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            target: None,
            list: false,
            drop_rate: 0.0,
            seed: None,
            timeout_secs: 2.0,
            retries: 5,
            output: None,
        }
    }
}

fn parse_args() -> ClientArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--target" | "-t" => {
                if i + 1 < args.len() {
                    config.target = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--list" => {
                config.list = true;
            }
            "--drop-rate" => {
                if i + 1 < args.len() {
                    config.drop_rate = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--seed" => {
                if i + 1 < args.len() {
                    config.seed = Some(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--timeout" => {
                if i + 1 < args.len() {
                    config.timeout_secs = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--retries" => {
                if i + 1 < args.len() {
                    config.retries = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    config.output = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"RUFT Client - Reliable UDP File Transfer 클라이언트

NACK 재전송 기반 UDP 파일 전송 프로토콜 클라이언트
- 초기 블라스트 수신 후 누락 세그먼트만 NACK으로 재요청
- 세그먼트 CRC32 + 파일 전체 SHA-256 검증
- single-shot 드롭 정책으로 손실 재현

사용법:
  cargo run --release --bin ruft_client -- [OPTIONS]

옵션:
  -t, --target <TARGET>  대상: IP:PORT/경로 또는 @IP:PORT/경로
  --list                 서버의 파일 목록 출력
  --drop-rate <RATE>     수신 드롭 확률 0.0~1.0, 시퀀스당 최대 1회 (기본: 0)
  --seed <N>             드롭 정책 시드 (기본: 무작위)
  --timeout <SEC>        읽기 타임아웃 초 (기본: 2)
  --retries <N>          META 시도 + NACK 라운드 횟수 (기본: 5)
  -o, --output <PATH>    출력 경로 (기본: recv_<파일명>)
  -h, --help             이 도움말 출력

예시:
  # 파일 수신
  cargo run --release --bin ruft_client -- -t 127.0.0.1:19000/test.bin

  # 5% 손실 시뮬레이션
  cargo run --release --bin ruft_client -- -t 127.0.0.1:19000/test.bin --drop-rate 0.05 --seed 42
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();
    let Some(target) = args.target.as_deref() else {
        eprintln!("대상이 필요합니다: -t IP:PORT/경로 (--help 참고)");
        std::process::exit(2);
    };
    let timeout = Duration::from_secs_f64(args.timeout_secs);

    if args.list {
        let (host, port) = match parse_target(target) {
            Ok((host, port, _)) => (host, port),
            Err(e) => {
                eprintln!("대상 파싱 실패: {e}");
                std::process::exit(1);
            }
        };
        let names = match list_files(&host, port, timeout).await {
            Ok(names) => names,
            Err(e) => {
                eprintln!("목록 요청 실패: {e}");
                std::process::exit(1);
            }
        };
        println!("Available files on {host}:{port}:");
        if names.is_empty() {
            println!("  (no files)");
        } else {
            for name in names {
                println!("  {name}");
            }
        }
        return Ok(());
    }

    let (host, port, path) = match parse_target(target) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("대상 파싱 실패: {e}");
            std::process::exit(1);
        }
    };

    let mut cfg = TransferConfig::new(host, port, path);
    cfg.drop = DropPolicy::new(args.drop_rate, args.seed.unwrap_or_else(rand::random));
    cfg.timeout = timeout;
    cfg.retries = args.retries;
    cfg.output_path = args.output;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let mut total: u64 = 0;
        let mut last_bytes = 0u64;
        let mut last_tick = tokio::time::Instant::now();
        while let Some(event) = rx.recv().await {
            match event {
                TransferEvent::Meta(m) => {
                    total = m.size.max(0) as u64;
                    println!(
                        "META: file={} size={} total={} chunk={} sha256={}",
                        m.filename, m.size, m.total, m.chunk, m.sha256
                    );
                }
                TransferEvent::Progress { bytes, segments } => {
                    let now = tokio::time::Instant::now();
                    if now.duration_since(last_tick) >= Duration::from_secs(1) || segments == 1 {
                        let rate = (bytes - last_bytes) as f64
                            / now.duration_since(last_tick).as_secs_f64();
                        if total > 0 {
                            println!(
                                "PROG: {:.1}% bytes={} segs={} rate={:.0} B/s",
                                bytes as f64 * 100.0 / total as f64,
                                bytes,
                                segments,
                                rate
                            );
                        } else {
                            println!("PROG: bytes={bytes} segs={segments} rate={rate:.0} B/s");
                        }
                        last_bytes = bytes;
                        last_tick = now;
                    }
                }
                TransferEvent::Log(line) => println!("{line}"),
                TransferEvent::Done { path, sha_ok } => {
                    let shown = path
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "(no file)".into());
                    println!("DONE: out={shown} sha_ok={sha_ok}");
                }
            }
        }
    });

    let result = run_transfer(cfg, tx).await;
    let _ = printer.await;
    if result.is_err() {
        std::process::exit(1);
    }
    Ok(())
}
