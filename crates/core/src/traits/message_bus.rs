use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::{SchedulerMessage, SchedulerStatus};
use crate::{SchedulerError, SchedulerResult};

/// 消息总线：跨进程传递调度事件
///
/// 发布是非阻塞的，失败只影响本次调用，不会中断调度引擎。
pub trait MessageBus: Send + Sync {
    fn publish(&self, message: SchedulerMessage) -> SchedulerResult<()>;
}

/// 状态查询接口，对应 `GetSchedulerStatusCommand`
#[async_trait]
pub trait StatusQuery: Send + Sync {
    async fn get_status(&self) -> SchedulerResult<SchedulerStatus>;
}

/// 进程内消息总线
///
/// 基于无界 channel，监督进程内的调度器与转发子进程消息的触发器共用一个发送端。
#[derive(Debug, Clone)]
pub struct ChannelMessageBus {
    sender: mpsc::UnboundedSender<SchedulerMessage>,
}

impl ChannelMessageBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SchedulerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl MessageBus for ChannelMessageBus {
    fn publish(&self, message: SchedulerMessage) -> SchedulerResult<()> {
        self.sender
            .send(message)
            .map_err(|e| SchedulerError::MessageBus(format!("消息总线已关闭: {:?}", e.0)))
    }
}
