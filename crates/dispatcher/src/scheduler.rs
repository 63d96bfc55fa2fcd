//! 定时器引擎
//!
//! [`SchedulerCore`] 是纯同步的状态机，独占定时器集合；[`SchedulerHandle`] 把它放进
//! 一个 tokio 任务里驱动，所有修改都经由命令通道到达。
//!
//! 时钟跳跃（例如宿主机长时间挂起后恢复）时不会跳过错过的运行：每个错过的锚点都会
//! 依次触发一次，间隔为 `1` 的任务挂起一小时后会连续启动约 3600 个进程，直到锚点追上
//! 当前时间。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use periodic_core::{
    Clock, MessageBus, SchedulerError, SchedulerMessage, SchedulerResult, WorkerId,
};
use periodic_domain::{ExecutionTrigger, JitterSource, ScheduleExpression, WorkerDefinition};

use crate::timer_wheel::TimerWheel;

/// 单个 worker 的定时器状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerState {
    Armed {
        /// 未加抖动的锚点，下一次运行时间总是从这里推算
        base_at: DateTime<Utc>,
        fire_at: DateTime<Utc>,
    },
    /// 不会再触发：表达式无效、无法满足或一次性时间点已经过去
    Exhausted,
    /// 调度器已停止
    Cancelled,
}

impl TimerState {
    pub fn is_armed(&self) -> bool {
        matches!(self, TimerState::Armed { .. })
    }
}

struct ScheduledWorker {
    definition: Arc<WorkerDefinition>,
    expression: Option<ScheduleExpression>,
    state: TimerState,
}

pub struct SchedulerCore {
    workers: BTreeMap<WorkerId, ScheduledWorker>,
    timers: TimerWheel,
    trigger: Arc<dyn ExecutionTrigger>,
    bus: Arc<dyn MessageBus>,
    jitter: Box<dyn JitterSource>,
    stopped: bool,
}

impl SchedulerCore {
    pub fn new(
        trigger: Arc<dyn ExecutionTrigger>,
        bus: Arc<dyn MessageBus>,
        jitter: Box<dyn JitterSource>,
    ) -> Self {
        Self {
            workers: BTreeMap::new(),
            timers: TimerWheel::new(),
            trigger,
            bus,
            jitter,
            stopped: false,
        }
    }

    /// 注册 worker 并装填第一个定时器
    ///
    /// 表达式错误只影响该 worker：它被标记为 `Exhausted` 并返回错误，其他 worker 照常调度。
    pub fn add_worker(
        &mut self,
        definition: Arc<WorkerDefinition>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        if self.stopped {
            return Err(SchedulerError::SchedulerStopped);
        }
        let id = definition.id;
        if self.workers.contains_key(&id) {
            return Err(SchedulerError::Internal(format!("周期任务 {id} 已注册")));
        }

        let expression = match ScheduleExpression::parse(&definition.schedule) {
            Ok(expression) => expression.anchored(now),
            Err(e) => {
                warn!(
                    worker_id = id,
                    worker_name = %definition.name,
                    "调度表达式无效，任务不会被触发: {}", e
                );
                self.workers.insert(
                    id,
                    ScheduledWorker {
                        definition,
                        expression: None,
                        state: TimerState::Exhausted,
                    },
                );
                return Err(e);
            }
        };

        let first = expression.next(now);
        self.workers.insert(
            id,
            ScheduledWorker {
                definition,
                expression: Some(expression),
                state: TimerState::Exhausted,
            },
        );

        match first {
            Ok(Some(base_at)) => {
                self.arm(id, base_at);
                Ok(())
            }
            Ok(None) => {
                warn!(worker_id = id, "调度表达式没有未来的运行时间");
                Ok(())
            }
            Err(e) => {
                warn!(worker_id = id, "无法计算下一次运行时间: {}", e);
                Err(e)
            }
        }
    }

    /// 触发所有已到期的定时器，返回本轮触发的数量
    ///
    /// 每个到期定时器本轮只触发一次；若推算出的下一次时间仍已过去，会在下一轮继续追赶。
    pub fn fire_due(&mut self, now: DateTime<Utc>) -> usize {
        if self.stopped {
            return 0;
        }
        let due: Vec<WorkerId> = std::iter::from_fn(|| self.timers.pop_due(now)).collect();
        for id in &due {
            self.fire(*id);
        }
        due.len()
    }

    fn fire(&mut self, id: WorkerId) {
        let Some(worker) = self.workers.get(&id) else {
            return;
        };
        let TimerState::Armed { base_at, fire_at } = worker.state else {
            return;
        };
        let definition = Arc::clone(&worker.definition);

        info!(
            worker_id = id,
            worker_name = %definition.name,
            fire_at = %fire_at,
            "触发周期任务"
        );
        // 启动失败由触发器记录，不影响后续调度
        if let Err(e) = self.trigger.spawn(Arc::clone(&definition)) {
            debug!(worker_id = id, "周期任务进程启动失败: {}", e);
        }

        let next = match worker.expression.as_ref() {
            Some(expression) => expression.next(base_at),
            None => Ok(None),
        };
        match next {
            Ok(Some(next_base)) => self.arm(id, next_base),
            Ok(None) => {
                info!(worker_id = id, "一次性周期任务已完成，不再调度");
                self.set_state(id, TimerState::Exhausted);
            }
            Err(e) => {
                warn!(worker_id = id, "无法计算下一次运行时间，停止调度: {}", e);
                self.set_state(id, TimerState::Exhausted);
            }
        }
    }

    fn arm(&mut self, id: WorkerId, base_at: DateTime<Utc>) {
        let Some(worker) = self.workers.get(&id) else {
            return;
        };
        let jitter = worker.definition.jitter_seconds;
        let previous_fire = match worker.state {
            TimerState::Armed { fire_at, .. } => Some(fire_at),
            _ => None,
        };

        let mut fire_at = self.jitter.apply(base_at, jitter);
        // 同一 worker 的运行时间严格递增；锚点至少前进一秒，因此不会越过 base_at + jitter
        if let Some(previous) = previous_fire {
            fire_at = fire_at.max(previous + Duration::seconds(1));
        }

        self.timers.arm(id, fire_at);
        self.set_state(id, TimerState::Armed { base_at, fire_at });
        debug!(worker_id = id, base_at = %base_at, next_run = %fire_at, "装填定时器");

        if let Err(e) = self.bus.publish(SchedulerMessage::process_scheduled(id, fire_at)) {
            warn!(worker_id = id, "发布 ProcessScheduledEvent 失败: {}", e);
        }
    }

    fn set_state(&mut self, id: WorkerId, state: TimerState) {
        if let Some(worker) = self.workers.get_mut(&id) {
            worker.state = state;
        }
    }

    /// 解除所有定时器，重复调用无副作用
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.timers.clear();
        for worker in self.workers.values_mut() {
            if worker.state.is_armed() {
                worker.state = TimerState::Cancelled;
            }
        }
        info!("调度器已停止，所有定时器已解除");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        self.timers.next_deadline()
    }

    pub fn state(&self, id: WorkerId) -> Option<&TimerState> {
        self.workers.get(&id).map(|worker| &worker.state)
    }

    pub fn states(&self) -> Vec<(WorkerId, TimerState)> {
        self.workers
            .iter()
            .map(|(id, worker)| (*id, worker.state.clone()))
            .collect()
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }
}

enum SchedulerCommand {
    AddWorker {
        definition: Arc<WorkerDefinition>,
        reply: oneshot::Sender<SchedulerResult<()>>,
    },
    States {
        reply: oneshot::Sender<Vec<(WorkerId, TimerState)>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// 在独立 tokio 任务中运行的调度器
pub struct SchedulerHandle {
    sender: mpsc::UnboundedSender<SchedulerCommand>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn spawn(core: SchedulerCore, clock: Arc<dyn Clock>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_scheduler(core, clock, receiver));
        Self { sender, task }
    }

    pub async fn add_worker(&self, definition: Arc<WorkerDefinition>) -> SchedulerResult<()> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::AddWorker { definition, reply })
            .map_err(|_| SchedulerError::SchedulerStopped)?;
        response.await.map_err(|_| SchedulerError::SchedulerStopped)?
    }

    pub async fn timer_states(&self) -> SchedulerResult<Vec<(WorkerId, TimerState)>> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::States { reply })
            .map_err(|_| SchedulerError::SchedulerStopped)?;
        response.await.map_err(|_| SchedulerError::SchedulerStopped)
    }

    /// 停止调度器并等待所有定时器解除；已停止时直接返回
    pub async fn stop(&self) -> SchedulerResult<()> {
        let (reply, response) = oneshot::channel();
        if self.sender.send(SchedulerCommand::Stop { reply }).is_err() {
            return Ok(());
        }
        let _ = response.await;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

async fn run_scheduler(
    mut core: SchedulerCore,
    clock: Arc<dyn Clock>,
    mut commands: mpsc::UnboundedReceiver<SchedulerCommand>,
) {
    info!("调度器启动");
    loop {
        let wait = core
            .next_deadline()
            .map(|deadline| (deadline - clock.now()).to_std().unwrap_or(StdDuration::ZERO));

        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(SchedulerCommand::AddWorker { definition, reply }) => {
                        let result = core.add_worker(definition, clock.now());
                        let _ = reply.send(result);
                    }
                    Some(SchedulerCommand::States { reply }) => {
                        let _ = reply.send(core.states());
                    }
                    Some(SchedulerCommand::Stop { reply }) => {
                        core.stop();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        core.stop();
                        break;
                    }
                }
            }
            _ = sleep_for(wait) => {
                let fired = core.fire_due(clock.now());
                if fired == 0 {
                    debug!("定时器提前唤醒，重新等待");
                }
            }
        }
    }

    if !core.is_stopped() {
        error!("调度器意外退出");
    }
}

async fn sleep_for(wait: Option<StdDuration>) {
    match wait {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::TimeZone;
    use periodic_core::{ChannelMessageBus, ProcessIdentity};
    use periodic_domain::NoJitter;

    #[derive(Default)]
    struct Spawns(Mutex<Vec<WorkerId>>);

    impl ExecutionTrigger for Spawns {
        fn spawn(&self, definition: Arc<WorkerDefinition>) -> SchedulerResult<()> {
            self.0.lock().unwrap().push(definition.id);
            Ok(())
        }
    }

    struct FailingTrigger;

    impl ExecutionTrigger for FailingTrigger {
        fn spawn(&self, definition: Arc<WorkerDefinition>) -> SchedulerResult<()> {
            Err(SchedulerError::SpawnFailure {
                worker_id: definition.id,
                message: "fork failed".to_string(),
            })
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn definition(id: WorkerId, schedule: &str) -> Arc<WorkerDefinition> {
        Arc::new(
            WorkerDefinition::builder()
                .schedule(schedule)
                .identity(ProcessIdentity::new("app", "app"))
                .build(id),
        )
    }

    fn scheduled(
        rx: &mut mpsc::UnboundedReceiver<SchedulerMessage>,
    ) -> Vec<(WorkerId, DateTime<Utc>)> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let SchedulerMessage::ProcessScheduled(event) = message {
                out.push((event.id, event.next_run_date));
            }
        }
        out
    }

    #[test]
    fn test_interval_rearms_from_previous_base() {
        let trigger = Arc::new(Spawns::default());
        let (bus, mut rx) = ChannelMessageBus::new();
        let mut core = SchedulerCore::new(trigger.clone(), Arc::new(bus), Box::new(NoJitter));

        core.add_worker(definition(1, "5"), t0()).unwrap();
        assert_eq!(scheduled(&mut rx), vec![(1, t0() + Duration::seconds(5))]);

        // 事件循环延迟 2 秒，下一次仍然从原锚点推算
        let late = t0() + Duration::seconds(7);
        assert_eq!(core.fire_due(late), 1);
        assert_eq!(*trigger.0.lock().unwrap(), vec![1]);
        assert_eq!(scheduled(&mut rx), vec![(1, t0() + Duration::seconds(10))]);
        assert_eq!(
            core.state(1),
            Some(&TimerState::Armed {
                base_at: t0() + Duration::seconds(10),
                fire_at: t0() + Duration::seconds(10),
            })
        );
    }

    #[test]
    fn test_no_drift_after_many_firings() {
        let trigger = Arc::new(Spawns::default());
        let (bus, _rx) = ChannelMessageBus::new();
        let mut core = SchedulerCore::new(trigger.clone(), Arc::new(bus), Box::new(NoJitter));
        core.add_worker(definition(1, "60"), t0()).unwrap();

        for k in 1..=100i64 {
            // 每次都晚 3 秒处理
            core.fire_due(t0() + Duration::seconds(60 * k + 3));
        }
        assert_eq!(trigger.0.lock().unwrap().len(), 100);
        match core.state(1) {
            Some(TimerState::Armed { base_at, .. }) => {
                assert_eq!(*base_at, t0() + Duration::seconds(60 * 101));
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_invalid_schedule_is_contained() {
        let trigger = Arc::new(Spawns::default());
        let (bus, mut rx) = ChannelMessageBus::new();
        let mut core = SchedulerCore::new(trigger.clone(), Arc::new(bus), Box::new(NoJitter));

        core.add_worker(definition(1, "5"), t0()).unwrap();
        let err = core.add_worker(definition(2, "not-a-schedule"), t0()).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
        assert_eq!(core.state(2), Some(&TimerState::Exhausted));
        assert_eq!(core.armed_count(), 1);

        core.fire_due(t0() + Duration::seconds(5));
        assert_eq!(*trigger.0.lock().unwrap(), vec![1]);
        let events = scheduled(&mut rx);
        assert!(events.iter().all(|(id, _)| *id == 1));
    }

    #[test]
    fn test_one_shot_exhausts_after_firing() {
        let trigger = Arc::new(Spawns::default());
        let (bus, _rx) = ChannelMessageBus::new();
        let mut core = SchedulerCore::new(trigger.clone(), Arc::new(bus), Box::new(NoJitter));

        core.add_worker(definition(1, "2025-06-01T12:30:00Z"), t0()).unwrap();
        core.add_worker(definition(2, "2020-01-01T00:00:00Z"), t0()).unwrap();
        assert_eq!(core.state(2), Some(&TimerState::Exhausted));

        core.fire_due(t0() + Duration::hours(1));
        assert_eq!(core.state(1), Some(&TimerState::Exhausted));
        assert_eq!(core.armed_count(), 0);
        assert_eq!(*trigger.0.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_unsatisfiable_cron_exhausts() {
        let (bus, _rx) = ChannelMessageBus::new();
        let mut core = SchedulerCore::new(
            Arc::new(Spawns::default()),
            Arc::new(bus),
            Box::new(NoJitter),
        );
        let err = core.add_worker(definition(1, "0 0 30 2 *"), t0()).unwrap_err();
        assert!(matches!(err, SchedulerError::ScheduleUnsatisfiable { .. }));
        assert_eq!(core.state(1), Some(&TimerState::Exhausted));
    }

    #[test]
    fn test_spawn_failure_keeps_schedule() {
        let (bus, mut rx) = ChannelMessageBus::new();
        let mut core = SchedulerCore::new(Arc::new(FailingTrigger), Arc::new(bus), Box::new(NoJitter));
        core.add_worker(definition(1, "10"), t0()).unwrap();

        core.fire_due(t0() + Duration::seconds(10));
        core.fire_due(t0() + Duration::seconds(20));
        assert_eq!(
            scheduled(&mut rx),
            vec![
                (1, t0() + Duration::seconds(10)),
                (1, t0() + Duration::seconds(20)),
                (1, t0() + Duration::seconds(30)),
            ]
        );
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (bus, _rx) = ChannelMessageBus::new();
        let mut core = SchedulerCore::new(
            Arc::new(Spawns::default()),
            Arc::new(bus),
            Box::new(NoJitter),
        );
        core.add_worker(definition(1, "5"), t0()).unwrap();
        core.stop();
        core.stop();

        assert_eq!(core.armed_count(), 0);
        assert_eq!(core.next_deadline(), None);
        assert_eq!(core.state(1), Some(&TimerState::Cancelled));
        assert_eq!(core.fire_due(t0() + Duration::hours(1)), 0);
        assert!(matches!(
            core.add_worker(definition(2, "5"), t0()),
            Err(SchedulerError::SchedulerStopped)
        ));
    }

    #[test]
    fn test_catch_up_fires_missed_occurrences() {
        let trigger = Arc::new(Spawns::default());
        let (bus, _rx) = ChannelMessageBus::new();
        let mut core = SchedulerCore::new(trigger.clone(), Arc::new(bus), Box::new(NoJitter));
        core.add_worker(definition(1, "10"), t0()).unwrap();

        let now = t0() + Duration::seconds(35);
        let mut passes = 0;
        while core.fire_due(now) > 0 {
            passes += 1;
        }
        assert_eq!(passes, 3);
        assert_eq!(core.next_deadline(), Some(t0() + Duration::seconds(40)));
    }
}
