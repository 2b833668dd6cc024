//! 전송 통계
//!
//! 서버 카운터는 원자적으로 갱신되고 스냅샷으로 읽힌다.
//! 클라이언트 진행 카운터는 수신 루프가 더하고 관찰자가
//! 원자적 load로만 읽는다.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// 서버 전역 카운터
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// 전송한 총 바이트 (헤더 포함)
    bytes_sent: AtomicU64,

    /// 초기 블라스트로 전송한 세그먼트 수
    segments_sent: AtomicU64,

    /// 수신한 NACK 수
    nacks_received: AtomicU64,

    /// 재전송 세그먼트 수
    retransmissions: AtomicU64,

    /// 블라스트 진행 중인 클라이언트 수
    active_clients: AtomicI64,
}

impl ServerMetrics {
    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_segment_sent(&self) {
        self.segments_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_nack(&self) {
        self.nacks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_started(&self) {
        self.active_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_finished(&self) {
        self.active_clients.fetch_sub(1, Ordering::Relaxed);
    }

    /// 현재 시점의 카운터 사본
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            segments_sent: self.segments_sent.load(Ordering::Relaxed),
            nacks_received: self.nacks_received.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            active_clients: self.active_clients.load(Ordering::Relaxed),
        }
    }
}

/// 특정 시점의 서버 메트릭
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub bytes_sent: u64,
    pub segments_sent: u64,
    pub nacks_received: u64,
    pub retransmissions: u64,
    pub active_clients: i64,
}

impl MetricsSnapshot {
    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Bytes: {} | Segments: {} | NACKs: {} | Retransmissions: {} | Active: {}",
            self.bytes_sent,
            self.segments_sent,
            self.nacks_received,
            self.retransmissions,
            self.active_clients,
        )
    }
}

/// 수신 진행 카운터
#[derive(Debug, Default)]
pub struct Progress {
    bytes: AtomicU64,
    segments: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// 검증을 통과한 세그먼트 하나를 누적
    pub fn add(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.segments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn segments(&self) -> u64 {
        self.segments.load(Ordering::Relaxed)
    }
}
