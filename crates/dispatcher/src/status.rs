use std::collections::BTreeMap;

use tracing::debug;

use periodic_core::{SchedulerMessage, SchedulerStatus, WorkerId, WorkerStatusEntry};

/// 状态聚合器
///
/// 纯事件溯源的归约器：条目在注册时创建，之后只被 `ProcessScheduledEvent` 修改。
/// id 按注册顺序分配，因此按 id 排序即为注册顺序。
#[derive(Debug, Default)]
pub struct StatusAggregator {
    entries: BTreeMap<WorkerId, WorkerStatusEntry>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 重复注册同一 id 时保留原条目
    pub fn register(&mut self, entry: WorkerStatusEntry) -> bool {
        if self.entries.contains_key(&entry.id) {
            debug!(worker_id = entry.id, "状态条目已存在，忽略重复注册");
            return false;
        }
        self.entries.insert(entry.id, entry);
        true
    }

    /// 折叠一条事件，返回状态是否发生变化
    pub fn apply(&mut self, message: &SchedulerMessage) -> bool {
        match message {
            SchedulerMessage::ProcessScheduled(event) => match self.entries.get_mut(&event.id) {
                Some(entry) => {
                    entry.next_run_at = Some(event.next_run_date);
                    true
                }
                None => {
                    debug!(worker_id = event.id, "收到未知周期任务的调度事件，忽略");
                    false
                }
            },
            SchedulerMessage::ProcessStarted(_) => false,
        }
    }

    pub fn snapshot(&self) -> SchedulerStatus {
        SchedulerStatus::new(self.entries.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
