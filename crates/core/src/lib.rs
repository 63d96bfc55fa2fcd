//! 周期任务调度引擎的公共基础
//!
//! 包含错误类型、跨进程消息、状态快照模型以及调度核心依赖的外部协作者接口。

pub mod clock;
pub mod config;
pub mod errors;
pub mod identity;
pub mod models;
pub mod traits;

pub use clock::{Clock, MonotonicClock, SystemClock};
pub use config::{AppConfig, LogFormat, LoggingConfig, MetricsConfig, SchedulerSettings, WorkerConfig};
pub use errors::*;
pub use identity::ProcessIdentity;
pub use models::{
    GetSchedulerStatusCommand, ProcessScheduledEvent, ProcessStartedEvent, SchedulerMessage,
    SchedulerStatus, WorkerId, WorkerStatusEntry,
};
pub use traits::{ChannelMessageBus, MessageBus, StatusQuery};

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
