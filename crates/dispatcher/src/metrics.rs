//! 调度器指标
//!
//! 未安装全局 recorder 时所有句柄都是空操作。

use metrics::{counter, describe_counter, describe_gauge, gauge, Counter, Gauge};
use tracing::debug;

use periodic_core::WorkerId;

pub const TASKS_TOTAL: &str = "scheduler_tasks_total";
pub const TASK_RUNS_TOTAL: &str = "scheduler_task_runs_total";

pub struct SchedulerMetrics {
    tasks_total: Gauge,
    task_runs_total: Counter,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        describe_gauge!(TASKS_TOTAL, "已注册的周期任务数量");
        describe_counter!(TASK_RUNS_TOTAL, "周期任务进程启动次数");

        Self {
            tasks_total: gauge!(TASKS_TOTAL),
            task_runs_total: counter!(TASK_RUNS_TOTAL),
        }
    }

    pub fn set_registered_workers(&self, count: usize) {
        self.tasks_total.set(count as f64);
    }

    pub fn record_process_started(&self, worker_id: WorkerId) {
        self.task_runs_total.increment(1);
        debug!(worker_id, "记录周期任务进程启动");
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
