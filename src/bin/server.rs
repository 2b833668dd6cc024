//! RUFT 서버 - Reliable UDP File Transfer
//!
//! REQ/NACK/LIST 제어 프레임을 처리하고 파일을 세그먼트로
//! 블라스트하는 UDP 파일 서버
//!
//! 사용법:
//!   cargo run --release --bin ruft_server -- [OPTIONS]
//!
//! 예시:
//!   # 현재 디렉터리 서비스
//!   cargo run --release --bin ruft_server -- --bind 0.0.0.0:19000
//!
//!   # 특정 디렉터리 + 메트릭 주기 출력
//!   cargo run --release --bin ruft_server -- -b 127.0.0.1:19000 -d ./files --metrics-interval 10

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ruft::Server;

/// 서버 실행 설정
struct ServerArgs {
    bind: SocketAddr,
    base_dir: PathBuf,
    metrics_interval: u64,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:19000".parse().unwrap(),
            base_dir: PathBuf::from("."),
            metrics_interval: 0,
        }
    }
}

fn parse_args() -> ServerArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--dir" | "-d" => {
                if i + 1 < args.len() {
                    config.base_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--metrics-interval" => {
                if i + 1 < args.len() {
                    config.metrics_interval = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"RUFT Server - Reliable UDP File Transfer 서버

NACK 재전송 기반 UDP 파일 전송 프로토콜 서버
- REQ 수신 시 META/DATA/EOF 블라스트
- NACK 수신 시 누락 세그먼트만 재전송
- LIST 수신 시 디렉터리 목록 응답

사용법:
  cargo run --release --bin ruft_server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>         바인드 주소 (기본: 0.0.0.0:19000)
  -d, --dir <PATH>          서비스할 기준 디렉터리 (기본: .)
  --metrics-interval <SEC>  메트릭 요약 출력 주기, 0이면 끔 (기본: 0)
  -h, --help                이 도움말 출력

예시:
  # 현재 디렉터리 서비스
  cargo run --release --bin ruft_server -- --bind 0.0.0.0:19000

  # ./files 서비스 + 10초마다 메트릭
  cargo run --release --bin ruft_server -- -d ./files --metrics-interval 10
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
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args();

    info!("RUFT Server starting...");
    info!("Bind address: {}", args.bind);
    info!("Base directory: {}", args.base_dir.display());

    let server = Server::new(args.base_dir);
    let (log_tx, mut log_rx) = mpsc::unbounded_channel();
    server
        .start(&args.bind.ip().to_string(), args.bind.port(), Some(log_tx))
        .await?;

    // 세션 로그 출력 태스크
    tokio::spawn(async move {
        while let Some(line) = log_rx.recv().await {
            info!("{line}");
        }
    });

    // 메트릭 주기 출력 태스크
    if args.metrics_interval > 0 {
        let metrics_server = Arc::clone(&server);
        let interval = Duration::from_secs(args.metrics_interval);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                info!("{}", metrics_server.metrics().summary());
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Stopping...");
    info!("{}", server.metrics().summary());
    server.stop();
    Ok(())
}
