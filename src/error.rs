//! 에러 타입 정의

use std::path::PathBuf;

use thiserror::Error;

/// RUFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("프레임 형식 오류 (magic/version/length)")]
    FormatInvalid,

    #[error("유효하지 않은 대상: {0}")]
    TargetInvalid(String),

    #[error("META 수신 실패: 재시도 소진")]
    MetaTimeout,

    #[error("초기 데이터 미수신: 유휴 한계 초과")]
    NoDataReceived,

    #[error("전송 미완료: {missing}개 세그먼트 누락")]
    IncompleteTransfer { missing: usize },

    #[error("전송 취소됨")]
    Canceled,

    #[error("서버 오류 응답: {0}")]
    ServerError(String),

    #[error("예상하지 못한 응답")]
    UnexpectedResponse,

    #[error("SHA-256 불일치: expected {expected}, got {got} (저장: {})", .saved_as.display())]
    IntegrityMismatch {
        expected: String,
        got: String,
        saved_as: PathBuf,
    },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
