//! # Periodic Testing Utils
//!
//! 调度引擎各 crate 共用的测试替身与夹具，只作为 dev-dependency 使用。
//!
//! - **Recording doubles**: 记录调用的 `ExecutionTrigger` 与 `MessageBus`
//! - **Jitter**: 固定偏移与按脚本返回偏移的抖动
//! - **Builders**: 周期任务定义夹具
//!
//! ```toml
//! [dev-dependencies]
//! periodic-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
