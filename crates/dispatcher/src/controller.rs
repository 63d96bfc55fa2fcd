use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use periodic_core::{
    ChannelMessageBus, Clock, MessageBus, SchedulerResult, SchedulerStatus, StatusQuery,
    SystemClock, WorkerId, WorkerStatusEntry,
};
use periodic_domain::{
    ExecutionTrigger, JitterSource, RandomJitter, WorkerDefinition, WorkerRegistry,
};

use crate::metrics::SchedulerMetrics;
use crate::scheduler::{SchedulerCore, SchedulerHandle, TimerState};
use crate::state_listener::{StatusHandle, StatusListener};

pub struct ControllerOptions {
    pub clock: Arc<dyn Clock>,
    pub jitter: Box<dyn JitterSource>,
    pub status_timeout: Duration,
    pub metrics: Arc<SchedulerMetrics>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            jitter: Box::new(RandomJitter::new()),
            status_timeout: Duration::from_millis(5000),
            metrics: Arc::new(SchedulerMetrics::new()),
        }
    }
}

/// 调度插件的生命周期入口
///
/// 创建进程内消息总线，启动状态监听器和调度器两个任务，并把注册请求分发给二者。
pub struct SchedulerController {
    bus: ChannelMessageBus,
    status: StatusHandle,
    scheduler: SchedulerHandle,
}

impl SchedulerController {
    /// `make_trigger` 拿到消息总线，用于把子进程发出的事件转发回监督进程
    pub fn start<F>(options: ControllerOptions, make_trigger: F) -> Self
    where
        F: FnOnce(Arc<dyn MessageBus>) -> Arc<dyn ExecutionTrigger>,
    {
        let (bus, events) = ChannelMessageBus::new();
        let status = StatusListener::spawn(events, options.metrics, options.status_timeout);

        let shared_bus: Arc<dyn MessageBus> = Arc::new(bus.clone());
        let trigger = make_trigger(Arc::clone(&shared_bus));
        let core = SchedulerCore::new(trigger, shared_bus, options.jitter);
        let scheduler = SchedulerHandle::spawn(core, options.clock);

        info!("调度控制器已启动");
        Self {
            bus,
            status,
            scheduler,
        }
    }

    /// 注册单个周期任务；调度表达式错误时状态条目仍然保留，下一次运行时间为空
    pub async fn add_worker(&self, definition: Arc<WorkerDefinition>) -> SchedulerResult<()> {
        self.status.register(WorkerStatusEntry::new(
            definition.id,
            definition.identity.clone(),
            definition.name.clone(),
            definition.schedule.clone(),
        ))?;
        self.scheduler.add_worker(definition).await
    }

    /// 按注册顺序注册全部周期任务，返回注册失败的数量
    pub async fn register_all(&self, registry: &WorkerRegistry) -> usize {
        let mut failures = 0;
        for definition in registry.iter() {
            match self.add_worker(Arc::clone(definition)).await {
                Ok(()) => {}
                // 调度表达式错误只影响该任务，状态中显示为 ERROR
                Err(e) if e.is_schedule_error() => {
                    warn!(
                        worker_id = definition.id,
                        worker_name = %definition.name,
                        "周期任务无法调度: {}", e
                    );
                    failures += 1;
                }
                Err(e) => {
                    error!(
                        worker_id = definition.id,
                        worker_name = %definition.name,
                        "周期任务注册失败: {}", e
                    );
                    failures += 1;
                }
            }
        }
        info!(
            "已注册 {} 个周期任务，其中 {} 个无法调度",
            registry.len(),
            failures
        );
        failures
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn message_bus(&self) -> ChannelMessageBus {
        self.bus.clone()
    }

    pub async fn timer_states(&self) -> SchedulerResult<Vec<(WorkerId, TimerState)>> {
        self.scheduler.timer_states().await
    }

    pub async fn stop(&self) -> SchedulerResult<()> {
        self.scheduler.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }
}

#[async_trait::async_trait]
impl StatusQuery for SchedulerController {
    async fn get_status(&self) -> SchedulerResult<SchedulerStatus> {
        self.status.get_status().await
    }
}
