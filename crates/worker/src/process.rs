use std::sync::Arc;

use tracing::{debug, error, info, warn};

use periodic_core::{MessageBus, SchedulerMessage};
use periodic_domain::{ProcessContext, WorkerDefinition};

use crate::privileges::switch_identity;

/// 周期任务进程的运行时
///
/// 每个进程实例只运行一次：切换身份，发布 `ProcessStartedEvent`，
/// 按顺序执行 on-start 回调，最后返回进程退出码。
pub struct PeriodicProcess {
    definition: Arc<WorkerDefinition>,
    bus: Arc<dyn MessageBus>,
    switch_identity: bool,
}

impl PeriodicProcess {
    pub fn new(definition: Arc<WorkerDefinition>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            definition,
            bus,
            switch_identity: true,
        }
    }

    /// 不切换身份，直接以当前身份运行
    pub fn without_identity_switch(mut self) -> Self {
        self.switch_identity = false;
        self
    }

    pub async fn run(self) -> i32 {
        let definition = &self.definition;
        info!(
            worker_id = definition.id,
            worker_name = %definition.name,
            identity = %definition.identity,
            "周期任务进程启动"
        );

        if self.switch_identity {
            match switch_identity(&definition.identity) {
                Ok(true) => debug!(identity = %definition.identity, "已切换进程身份"),
                Ok(false) => {}
                Err(e) => warn!(
                    worker_id = definition.id,
                    "无法切换到 {}，以当前身份继续运行: {}", definition.identity, e
                ),
            }
        }

        if let Err(e) = self
            .bus
            .publish(SchedulerMessage::process_started(definition.id))
        {
            warn!(worker_id = definition.id, "发布 ProcessStartedEvent 失败: {}", e);
        }

        let context = ProcessContext::new(definition, Arc::clone(&self.bus));
        for handler in definition.on_start_handlers() {
            if let Err(e) = handler.invoke(context.clone()).await {
                error!(
                    worker_id = definition.id,
                    priority = handler.priority,
                    "on-start 回调执行失败: {}", e
                );
                context.set_exit_code(1);
            }
        }

        let exit_code = context.exit_code();
        info!(worker_id = definition.id, exit_code, "周期任务进程结束");
        exit_code
    }
}
