//! # 数据模型
//!
//! 周期任务调度引擎在进程之间传递的数据结构。
//!
//! ## 核心模型
//!
//! ### SchedulerMessage - 跨进程事件
//! 调度器发出的 `ProcessScheduledEvent` 与周期任务进程发出的
//! `ProcessStartedEvent`，通过消息总线送达监督进程。
//!
//! ### SchedulerStatus - 状态快照
//! 状态聚合器对外提供的不可变快照，按注册顺序列出所有周期任务。
//!
//! 所有时间字段使用 `DateTime<Utc>`，所有模型都支持 JSON 序列化以便跨越进程边界。

pub mod message;
pub mod status;

pub use message::*;
pub use status::*;

/// 周期任务的唯一标识，按注册顺序单调分配
pub type WorkerId = u32;
