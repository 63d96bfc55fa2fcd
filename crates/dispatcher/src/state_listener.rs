use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use periodic_core::{
    SchedulerError, SchedulerMessage, SchedulerResult, SchedulerStatus, StatusQuery,
    WorkerStatusEntry,
};

use crate::metrics::SchedulerMetrics;
use crate::status::StatusAggregator;

enum StatusRequest {
    Register(WorkerStatusEntry),
    GetStatus {
        reply: oneshot::Sender<SchedulerStatus>,
    },
}

/// 状态监听器
///
/// 独占 [`StatusAggregator`]，在单个任务中依次折叠事件和应答查询。
/// 请求通道优先于事件通道，保证条目总是先于它的第一条调度事件完成注册。
pub struct StatusListener {
    aggregator: StatusAggregator,
    metrics: Arc<SchedulerMetrics>,
    requests: mpsc::UnboundedReceiver<StatusRequest>,
    events: mpsc::UnboundedReceiver<SchedulerMessage>,
}

impl StatusListener {
    pub fn spawn(
        events: mpsc::UnboundedReceiver<SchedulerMessage>,
        metrics: Arc<SchedulerMetrics>,
        query_timeout: Duration,
    ) -> StatusHandle {
        let (sender, requests) = mpsc::unbounded_channel();
        let listener = Self {
            aggregator: StatusAggregator::new(),
            metrics,
            requests,
            events,
        };
        tokio::spawn(listener.run());
        StatusHandle {
            sender,
            query_timeout,
        }
    }

    async fn run(mut self) {
        let mut events_open = true;
        loop {
            tokio::select! {
                biased;
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        debug!("事件通道已关闭，仅继续应答状态查询");
                        events_open = false;
                    }
                },
            }
        }
        debug!("状态监听器退出");
    }

    fn handle_request(&mut self, request: StatusRequest) {
        match request {
            StatusRequest::Register(entry) => {
                if self.aggregator.register(entry) {
                    self.metrics.set_registered_workers(self.aggregator.len());
                }
            }
            StatusRequest::GetStatus { reply } => {
                let _ = reply.send(self.aggregator.snapshot());
            }
        }
    }

    fn handle_event(&mut self, event: SchedulerMessage) {
        debug!(
            worker_id = event.worker_id(),
            message_type = event.message_type_str(),
            "处理调度事件"
        );
        if let SchedulerMessage::ProcessStarted(started) = &event {
            info!(worker_id = started.id, "周期任务进程已启动");
            self.metrics.record_process_started(started.id);
        }
        self.aggregator.apply(&event);
    }
}

/// 状态监听器的句柄，实现 `GetSchedulerStatusCommand` 查询
#[derive(Clone)]
pub struct StatusHandle {
    sender: mpsc::UnboundedSender<StatusRequest>,
    query_timeout: Duration,
}

impl StatusHandle {
    pub fn register(&self, entry: WorkerStatusEntry) -> SchedulerResult<()> {
        self.sender
            .send(StatusRequest::Register(entry))
            .map_err(|_| SchedulerError::MessageBus("状态监听器已退出".to_string()))
    }
}

#[async_trait]
impl StatusQuery for StatusHandle {
    async fn get_status(&self) -> SchedulerResult<SchedulerStatus> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(StatusRequest::GetStatus { reply })
            .map_err(|_| SchedulerError::MessageBus("状态监听器已退出".to_string()))?;

        match tokio::time::timeout(self.query_timeout, response).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(_)) => Err(SchedulerError::MessageBus("状态监听器未应答".to_string())),
            Err(_) => Err(SchedulerError::MessageBus(format!(
                "状态查询超时: {}ms",
                self.query_timeout.as_millis()
            ))),
        }
    }
}
