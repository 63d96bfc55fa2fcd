use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 抖动来源
///
/// 实际触发时间 = 基准时间 + `[0, jitter]` 秒内的偏移。基准时间本身不受抖动影响，
/// 下一次计算总是从上一次的基准时间出发，因此抖动不会累积。
pub trait JitterSource: Send {
    /// 返回 `[0, jitter]` 范围内的偏移秒数
    fn offset_seconds(&mut self, jitter: u64) -> u64;

    fn apply(&mut self, base: DateTime<Utc>, jitter: u64) -> DateTime<Utc> {
        if jitter == 0 {
            return base;
        }
        let offset = self.offset_seconds(jitter).min(jitter);
        i64::try_from(offset)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|delta| base.checked_add_signed(delta))
            .unwrap_or(base)
    }
}

/// 均匀分布的随机抖动
pub struct RandomJitter {
    rng: StdRng,
}

impl RandomJitter {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// 固定种子，便于复现
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomJitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterSource for RandomJitter {
    fn offset_seconds(&mut self, jitter: u64) -> u64 {
        if jitter == 0 {
            return 0;
        }
        self.rng.random_range(0..=jitter)
    }
}

/// 不加抖动
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn offset_seconds(&mut self, _jitter: u64) -> u64 {
        0
    }
}
