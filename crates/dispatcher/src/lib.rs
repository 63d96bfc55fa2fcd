//! 监督进程内的调度引擎
//!
//! 定时器引擎与状态监听器各自运行在一个 tokio 任务中，二者只通过消息通道通信。

pub mod controller;
pub mod metrics;
pub mod scheduler;
pub mod state_listener;
pub mod status;
pub mod timer_wheel;

pub use controller::{ControllerOptions, SchedulerController};
pub use metrics::SchedulerMetrics;
pub use scheduler::{SchedulerCore, SchedulerHandle, TimerState};
pub use state_listener::{StatusHandle, StatusListener};
pub use status::StatusAggregator;
pub use timer_wheel::TimerWheel;
