//! 周期任务领域模型
//!
//! 调度表达式解析、抖动计算以及周期任务定义注册表。

pub mod jitter;
pub mod registry;
pub mod schedule;

pub use periodic_core::{SchedulerError, SchedulerResult};

pub use jitter::{JitterSource, NoJitter, RandomJitter};
pub use registry::{
    ExecutionTrigger, IdAllocator, OnStartHandler, ProcessContext, WorkerDefinition,
    WorkerDefinitionBuilder, WorkerRegistry,
};
pub use schedule::{Notation, ScheduleExpression, NOTATION_PRECEDENCE};
