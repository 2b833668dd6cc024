//! 손실 시뮬레이션 (single-shot 드롭 정책)
//!
//! 각 시퀀스는 세션당 최대 한 번만 드롭된다. 같은 시퀀스의
//! 재전송은 항상 통과하므로, 시드와 비율이 같으면 세션은
//! 유한한 NACK 라운드 안에 결정적으로 수렴한다.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 수신 세그먼트 드롭 정책
pub struct DropPolicy {
    /// 드롭 확률 (0..1)
    rate: f64,

    /// 시드 고정 의사난수 생성기
    rng: StdRng,

    /// 이미 드롭한 시퀀스
    dropped: HashSet<u32>,

    /// 지정 시퀀스만 드롭하는 모드 (테스트 주입용)
    forced: Option<HashSet<u32>>,
}

impl DropPolicy {
    /// 확률 기반 정책 생성. rate <= 0이면 None (드롭 없음)
    pub fn new(rate: f64, seed: u64) -> Option<DropPolicy> {
        if rate <= 0.0 {
            return None;
        }
        Some(DropPolicy {
            rate,
            rng: StdRng::seed_from_u64(seed),
            dropped: HashSet::new(),
            forced: None,
        })
    }

    /// 지정한 시퀀스를 정확히 한 번씩 드롭하는 정책
    pub fn forced<I: IntoIterator<Item = u32>>(seqs: I) -> DropPolicy {
        DropPolicy {
            rate: 1.0,
            rng: StdRng::seed_from_u64(0),
            dropped: HashSet::new(),
            forced: Some(seqs.into_iter().collect()),
        }
    }

    /// 이 시퀀스를 드롭할지 결정
    ///
    /// 이미 드롭한 시퀀스는 항상 통과한다 (single-shot 불변식).
    pub fn should_drop(&mut self, seq: u32) -> bool {
        if self.dropped.contains(&seq) {
            return false;
        }
        let hit = match &self.forced {
            Some(only) => only.contains(&seq),
            None => self.rng.gen::<f64>() < self.rate,
        };
        if hit {
            self.dropped.insert(seq);
        }
        hit
    }
}
