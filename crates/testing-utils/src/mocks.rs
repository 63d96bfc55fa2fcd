//! Recording test doubles for the scheduler's collaborators

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use periodic_core::{MessageBus, SchedulerError, SchedulerMessage, SchedulerResult, WorkerId};
use periodic_domain::{ExecutionTrigger, JitterSource, WorkerDefinition};

/// 记录每次 spawn 调用的触发器，可配置为始终失败
#[derive(Debug, Clone, Default)]
pub struct RecordingTrigger {
    spawned: Arc<Mutex<Vec<WorkerId>>>,
    fail: bool,
}

impl RecordingTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            spawned: Arc::default(),
            fail: true,
        }
    }

    /// 按调用顺序返回被触发的 worker id（失败的调用同样记录）
    pub fn spawned(&self) -> Vec<WorkerId> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn spawn_count(&self, worker_id: WorkerId) -> usize {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .filter(|id| **id == worker_id)
            .count()
    }
}

impl ExecutionTrigger for RecordingTrigger {
    fn spawn(&self, definition: Arc<WorkerDefinition>) -> SchedulerResult<()> {
        self.spawned.lock().unwrap().push(definition.id);
        if self.fail {
            return Err(SchedulerError::SpawnFailure {
                worker_id: definition.id,
                message: "recording trigger configured to fail".to_string(),
            });
        }
        Ok(())
    }
}

/// 记录所有发布的消息
#[derive(Debug, Clone, Default)]
pub struct RecordingBus {
    messages: Arc<Mutex<Vec<SchedulerMessage>>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<SchedulerMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// 某个 worker 收到的全部 `ProcessScheduledEvent` 时间
    pub fn scheduled_for(&self, worker_id: WorkerId) -> Vec<DateTime<Utc>> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|message| match message {
                SchedulerMessage::ProcessScheduled(event) if event.id == worker_id => {
                    Some(event.next_run_date)
                }
                _ => None,
            })
            .collect()
    }

    pub fn started_count(&self) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|message| matches!(message, SchedulerMessage::ProcessStarted(_)))
            .count()
    }
}

impl MessageBus for RecordingBus {
    fn publish(&self, message: SchedulerMessage) -> SchedulerResult<()> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

/// 总是返回固定偏移的抖动，偏移仍受 jitter 上限约束
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub u64);

impl JitterSource for FixedJitter {
    fn offset_seconds(&mut self, jitter: u64) -> u64 {
        self.0.min(jitter)
    }
}

/// 按脚本依次返回偏移，脚本用完后重复最后一个值
#[derive(Debug, Clone)]
pub struct ScriptedJitter {
    offsets: Vec<u64>,
    position: usize,
}

impl ScriptedJitter {
    pub fn new(offsets: impl Into<Vec<u64>>) -> Self {
        Self {
            offsets: offsets.into(),
            position: 0,
        }
    }
}

impl JitterSource for ScriptedJitter {
    fn offset_seconds(&mut self, jitter: u64) -> u64 {
        let index = self.position.min(self.offsets.len().saturating_sub(1));
        self.position += 1;
        self.offsets.get(index).copied().unwrap_or(0).min(jitter)
    }
}
