use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkerId;

/// 跨进程边界传递的调度事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SchedulerMessage {
    ProcessScheduled(ProcessScheduledEvent),
    ProcessStarted(ProcessStartedEvent),
}

/// 调度器为周期任务计算出下一次运行时间
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessScheduledEvent {
    pub id: WorkerId,
    pub next_run_date: DateTime<Utc>,
}

/// 周期任务进程已启动，即将执行 on-start 回调
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStartedEvent {
    pub id: WorkerId,
}

/// 查询调度器状态的命令，应答为 [`SchedulerStatus`](super::SchedulerStatus)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSchedulerStatusCommand;

impl SchedulerMessage {
    pub fn process_scheduled(id: WorkerId, next_run_date: DateTime<Utc>) -> Self {
        SchedulerMessage::ProcessScheduled(ProcessScheduledEvent { id, next_run_date })
    }

    pub fn process_started(id: WorkerId) -> Self {
        SchedulerMessage::ProcessStarted(ProcessStartedEvent { id })
    }

    pub fn worker_id(&self) -> WorkerId {
        match self {
            SchedulerMessage::ProcessScheduled(event) => event.id,
            SchedulerMessage::ProcessStarted(event) => event.id,
        }
    }

    pub fn message_type_str(&self) -> &'static str {
        match self {
            SchedulerMessage::ProcessScheduled(_) => "process_scheduled",
            SchedulerMessage::ProcessStarted(_) => "process_started",
        }
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn deserialize(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// 解析子进程标准输出中的一行，非协议内容返回 `None`
    pub fn from_output_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        Self::deserialize(line).ok()
    }
}
