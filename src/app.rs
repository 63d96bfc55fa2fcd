use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{info, warn};

use periodic_core::{
    AppConfig, SchedulerError, SchedulerStatus, StatusQuery, SystemClock, WorkerId,
    WorkerStatusEntry,
};
use periodic_dispatcher::{ControllerOptions, SchedulerController, SchedulerMetrics};
use periodic_domain::{
    ExecutionTrigger, RandomJitter, ScheduleExpression, WorkerDefinitionBuilder, WorkerRegistry,
};
use periodic_worker::{CommandHandler, CommandTrigger, PeriodicProcess, StdoutMessageBus};

/// 主应用程序
pub struct Application {
    config: AppConfig,
    config_path: Option<PathBuf>,
}

impl Application {
    pub fn new(config: AppConfig, config_path: Option<PathBuf>) -> Self {
        Self {
            config,
            config_path,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 按配置声明顺序构建注册表
    ///
    /// 监督进程和周期任务进程都从同一份配置构建，因此同一任务在两侧得到相同的 id。
    pub fn build_registry(&self) -> Result<WorkerRegistry> {
        let mut registry = WorkerRegistry::new();
        for worker in &self.config.workers {
            let handler = CommandHandler::from_config(worker)
                .with_context(|| format!("周期任务 {} 的命令无效", worker.name))?;
            registry.register(handler.attach(WorkerDefinitionBuilder::from_config(worker), 0));
        }
        Ok(registry)
    }

    /// 监督进程：启动调度器并运行到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let program = self
            .config
            .scheduler
            .worker_program()
            .context("无法确定周期任务进程的可执行文件")?;
        info!("周期任务进程可执行文件: {}", program.display());

        let options = ControllerOptions {
            clock: Arc::new(SystemClock),
            jitter: Box::new(RandomJitter::new()),
            status_timeout: Duration::from_millis(self.config.scheduler.status_timeout_ms),
            metrics: Arc::new(SchedulerMetrics::new()),
        };
        let config_path = self.config_path.clone();
        let controller = SchedulerController::start(options, move |bus| {
            let mut trigger = CommandTrigger::new(program, bus);
            if let Some(path) = config_path {
                trigger = trigger.with_config_path(path);
            }
            Arc::new(trigger) as Arc<dyn ExecutionTrigger>
        });

        let registry = self.build_registry()?;
        if registry.is_empty() {
            warn!("配置中没有声明周期任务");
        }
        controller.register_all(&registry).await;

        match controller.get_status().await {
            Ok(status) => log_status(&status),
            Err(e) => warn!("获取调度器状态失败: {}", e),
        }

        let _ = shutdown_rx.recv().await;
        info!("调度器收到关闭信号");
        controller.stop().await?;
        Ok(())
    }

    /// 周期任务进程：执行一次 on-start 回调并返回退出码
    pub async fn run_worker(&self, id: WorkerId) -> Result<i32> {
        let registry = self.build_registry()?;
        let definition = registry
            .get(id)
            .ok_or(SchedulerError::WorkerNotFound { id })?;

        let bus = Arc::new(StdoutMessageBus::new());
        Ok(PeriodicProcess::new(definition, bus).run().await)
    }

    /// 不启动调度器，直接根据注册表推算每个任务的下一次运行时间
    pub fn preview_status(&self, now: DateTime<Utc>) -> Result<SchedulerStatus> {
        let registry = self.build_registry()?;
        let entries = registry
            .iter()
            .map(|definition| {
                let mut entry = WorkerStatusEntry::new(
                    definition.id,
                    definition.identity.clone(),
                    definition.name.clone(),
                    definition.schedule.clone(),
                );
                entry.next_run_at = ScheduleExpression::parse(&definition.schedule)
                    .and_then(|expression| expression.anchored(now).next(now))
                    .ok()
                    .flatten();
                entry
            })
            .collect();
        Ok(SchedulerStatus::new(entries))
    }
}

fn log_status(status: &SchedulerStatus) {
    for entry in &status.periodic_workers {
        info!(
            worker_id = entry.id,
            worker_name = %entry.name,
            identity = %entry.identity,
            schedule = entry.schedule_display(),
            next_run = %entry.next_run_display(),
            status = entry.status_label(),
            "周期任务状态"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use periodic_testing_utils::utc;

    const CONFIG: &str = r#"
[[workers]]
name = "heartbeat"
schedule = "5"
command = ["/bin/true"]

[[workers]]
schedule = "not-a-schedule"
command = ["/bin/true"]

[[workers]]
name = "nightly"
schedule = "0 0 * * *"
user = "nobody"
command = ["/bin/true"]
"#;

    fn app() -> Application {
        Application::new(AppConfig::from_toml_str(CONFIG).unwrap(), None)
    }

    #[test]
    fn test_registry_follows_config_order() {
        let registry = app().build_registry().unwrap();
        let names: Vec<String> = registry.iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["heartbeat", "periodic_worker_2", "nightly"]);
        assert_eq!(registry.get(3).unwrap().identity.user, "nobody");
        assert_eq!(registry.get(1).unwrap().on_start_handlers().len(), 1);
    }

    #[test]
    fn test_preview_status() {
        let now = utc(2025, 6, 1, 23, 59, 0);
        let status = app().preview_status(now).unwrap();

        assert_eq!(status.periodic_tasks_count, 3);
        assert_eq!(status.worker(1).unwrap().next_run_display(), "2025-06-01 23:59:05");
        assert_eq!(status.worker(2).unwrap().status_label(), "ERROR");
        assert_eq!(status.worker(3).unwrap().next_run_display(), "2025-06-02 00:00:00");
    }

    #[tokio::test]
    async fn test_unknown_worker_id() {
        let err = app().run_worker(42).await.unwrap_err();
        assert!(err.to_string().contains("42"));
    }
}
