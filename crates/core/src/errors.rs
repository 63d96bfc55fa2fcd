use thiserror::Error;

use crate::models::WorkerId;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("无效的调度表达式: {schedule} - {message}")]
    InvalidSchedule { schedule: String, message: String },

    #[error("调度表达式在搜索窗口内无法满足: {schedule}")]
    ScheduleUnsatisfiable { schedule: String },

    #[error("周期任务 {worker_id} 启动进程失败: {message}")]
    SpawnFailure { worker_id: WorkerId, message: String },

    #[error("切换进程身份失败: {0}")]
    IdentityResolution(String),

    #[error("周期任务未找到: {id}")]
    WorkerNotFound { id: WorkerId },

    #[error("消息总线错误: {0}")]
    MessageBus(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("调度器已停止")]
    SchedulerStopped,

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn invalid_schedule(schedule: &str, message: impl Into<String>) -> Self {
        SchedulerError::InvalidSchedule {
            schedule: schedule.to_string(),
            message: message.into(),
        }
    }

    /// 调度表达式相关的错误只影响单个周期任务
    pub fn is_schedule_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidSchedule { .. } | SchedulerError::ScheduleUnsatisfiable { .. }
        )
    }
}

impl From<config::ConfigError> for SchedulerError {
    fn from(err: config::ConfigError) -> Self {
        SchedulerError::Configuration(err.to_string())
    }
}
