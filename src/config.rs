//! 전송 설정과 대상 문자열 파싱

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::drop::DropPolicy;
use crate::error::{Error, Result};

/// 기본 읽기 타임아웃
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// 기본 재시도 횟수 (META 시도와 NACK 라운드 공용)
pub const DEFAULT_RETRIES: usize = 5;

/// 재시도 내부 하한
pub(crate) const MIN_RETRIES: usize = 3;

/// 한 번의 전송을 정의하는 설정
pub struct TransferConfig {
    /// 서버 호스트
    pub host: String,

    /// 서버 포트
    pub port: u16,

    /// 서버에 요청할 상대 경로
    pub path: String,

    /// 손실 시뮬레이션 정책. None이면 드롭 없음
    pub drop: Option<DropPolicy>,

    /// 읽기 타임아웃 단위
    pub timeout: Duration,

    /// 재시도 횟수 (META 시도 + NACK 라운드, 하한 3)
    pub retries: usize,

    /// 출력 경로. None이면 recv_<filename>
    pub output_path: Option<PathBuf>,

    /// 취소 신호. 모든 단계 경계와 읽기 반복에서 확인된다
    pub cancel: Option<Arc<AtomicBool>>,
}

impl TransferConfig {
    /// 기본값이 채워진 새 설정
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            drop: None,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            output_path: None,
            cancel: None,
        }
    }

    /// 하한이 적용된 재시도 횟수
    pub(crate) fn effective_retries(&self) -> usize {
        self.retries.max(MIN_RETRIES)
    }
}

/// "IP:PORT/경로" 또는 "@IP:PORT/경로" 형식의 대상 문자열 파싱
pub fn parse_target(target: &str) -> Result<(String, u16, String)> {
    let target = target.strip_prefix('@').unwrap_or(target);
    let (endpoint, path) = target
        .split_once('/')
        .ok_or_else(|| Error::TargetInvalid("형식은 IP:PORT/경로 또는 @IP:PORT/경로".into()))?;
    let (host, port) = endpoint
        .split_once(':')
        .ok_or_else(|| Error::TargetInvalid("포트가 없음".into()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| Error::TargetInvalid("포트는 숫자여야 함".into()))?;
    Ok((host.to_string(), port, path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let (host, port, path) = parse_target("127.0.0.1:19000/data/test.bin").unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 19000);
        assert_eq!(path, "data/test.bin");
    }

    #[test]
    fn test_parse_target_at_prefix() {
        let (host, port, path) = parse_target("@10.0.0.2:9000/file.bin").unwrap();
        assert_eq!(host, "10.0.0.2");
        assert_eq!(port, 9000);
        assert_eq!(path, "file.bin");
    }

    #[test]
    fn test_parse_target_invalid() {
        assert!(matches!(
            parse_target("127.0.0.1:19000"),
            Err(Error::TargetInvalid(_))
        ));
        assert!(matches!(
            parse_target("127.0.0.1/file.bin"),
            Err(Error::TargetInvalid(_))
        ));
        assert!(matches!(
            parse_target("host:abc/file.bin"),
            Err(Error::TargetInvalid(_))
        ));
    }

    #[test]
    fn test_effective_retries_floor() {
        let mut cfg = TransferConfig::new("h", 1, "p");
        cfg.retries = 0;
        assert_eq!(cfg.effective_retries(), MIN_RETRIES);
        cfg.retries = 10;
        assert_eq!(cfg.effective_retries(), 10);
    }
}
