use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkerId;
use crate::identity::ProcessIdentity;

/// 状态快照中下一次运行时间的显示格式
pub const NEXT_RUN_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 单个周期任务的状态条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatusEntry {
    pub id: WorkerId,
    pub identity: ProcessIdentity,
    pub name: String,
    pub schedule: String,
    /// `None` 表示调度表达式无法给出未来的运行时间
    pub next_run_at: Option<DateTime<Utc>>,
}

impl WorkerStatusEntry {
    pub fn new(id: WorkerId, identity: ProcessIdentity, name: String, schedule: String) -> Self {
        Self {
            id,
            identity,
            name,
            schedule,
            next_run_at: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.next_run_at.is_some()
    }

    pub fn is_privileged(&self) -> bool {
        self.identity.is_root()
    }

    pub fn schedule_display(&self) -> &str {
        if self.schedule.is_empty() {
            "-"
        } else {
            &self.schedule
        }
    }

    pub fn next_run_display(&self) -> String {
        self.next_run_at
            .map(|at| at.format(NEXT_RUN_FORMAT).to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    pub fn status_label(&self) -> &'static str {
        if self.is_healthy() {
            "OK"
        } else {
            "ERROR"
        }
    }
}

/// 调度器状态快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub periodic_tasks_count: usize,
    /// 按注册顺序排列
    pub periodic_workers: Vec<WorkerStatusEntry>,
}

impl SchedulerStatus {
    pub fn new(periodic_workers: Vec<WorkerStatusEntry>) -> Self {
        Self {
            periodic_tasks_count: periodic_workers.len(),
            periodic_workers,
        }
    }

    pub fn worker(&self, id: WorkerId) -> Option<&WorkerStatusEntry> {
        self.periodic_workers.iter().find(|entry| entry.id == id)
    }

    pub fn failing_workers(&self) -> impl Iterator<Item = &WorkerStatusEntry> {
        self.periodic_workers.iter().filter(|entry| !entry.is_healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(schedule: &str, next_run_at: Option<DateTime<Utc>>) -> WorkerStatusEntry {
        WorkerStatusEntry {
            id: 1,
            identity: ProcessIdentity::new("root", "root"),
            name: "cleanup".to_string(),
            schedule: schedule.to_string(),
            next_run_at,
        }
    }

    #[test]
    fn test_entry_display_helpers() {
        let at = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 5).unwrap();
        let ok = entry("*/5 * * * *", Some(at));
        assert_eq!(ok.schedule_display(), "*/5 * * * *");
        assert_eq!(ok.next_run_display(), "2025-06-02 00:00:05");
        assert_eq!(ok.status_label(), "OK");
        assert!(ok.is_privileged());

        let failed = entry("", None);
        assert_eq!(failed.schedule_display(), "-");
        assert_eq!(failed.next_run_display(), "-");
        assert_eq!(failed.status_label(), "ERROR");
    }

    #[test]
    fn test_snapshot_lookup() {
        let mut second = entry("5", None);
        second.id = 2;
        let status = SchedulerStatus::new(vec![entry("5", Some(Utc::now())), second]);

        assert_eq!(status.periodic_tasks_count, 2);
        assert_eq!(status.worker(2).map(|w| w.id), Some(2));
        assert!(status.worker(3).is_none());
        assert_eq!(status.failing_workers().count(), 1);
    }
}
