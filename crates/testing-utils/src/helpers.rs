//! Common helpers for time-based tests

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .unwrap_or_else(|| panic!("invalid test timestamp {year}-{month}-{day} {hour}:{minute}:{second}"))
}

/// 测试中常用的起始时间
pub fn t0() -> DateTime<Utc> {
    utc(2025, 6, 1, 12, 0, 0)
}

pub struct TestEnv;

impl TestEnv {
    /// 轮询直到条件成立或超时
    ///
    /// 在暂停时钟的测试中，`sleep` 会自动推进 tokio 时间。
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if condition().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition().await
    }

    /// 让出执行权若干次，使其他任务处理完已排队的消息
    pub async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }
}
