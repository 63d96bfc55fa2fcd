//! 周期任务定义注册表
//!
//! 定义在注册时创建并保持不可变，`id` 由 [`IdAllocator`] 按注册顺序分配，
//! 是注册表、定时器和状态条目之间的关联键。

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use periodic_core::config::DEFAULT_SCHEDULE;
use periodic_core::{
    MessageBus, ProcessIdentity, SchedulerMessage, SchedulerResult, WorkerConfig, WorkerId,
};

/// on-start 回调的运行上下文，仅在周期任务进程内构造
#[derive(Clone)]
pub struct ProcessContext {
    pub worker_id: WorkerId,
    pub name: String,
    pub identity: ProcessIdentity,
    bus: Arc<dyn MessageBus>,
    exit_code: Arc<AtomicI32>,
}

impl ProcessContext {
    pub fn new(definition: &WorkerDefinition, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            worker_id: definition.id,
            name: definition.name.clone(),
            identity: definition.identity.clone(),
            bus,
            exit_code: Arc::new(AtomicI32::new(0)),
        }
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    pub fn publish(&self, message: SchedulerMessage) -> SchedulerResult<()> {
        self.bus.publish(message)
    }
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("worker_id", &self.worker_id)
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

type HandlerFn = Arc<dyn Fn(ProcessContext) -> BoxFuture<'static, SchedulerResult<()>> + Send + Sync>;

/// on-start 回调，按 `(priority, sequence)` 升序执行
#[derive(Clone)]
pub struct OnStartHandler {
    pub priority: i32,
    /// 注册顺序，仅用于同优先级时的确定性排序
    pub sequence: u64,
    handler: HandlerFn,
}

impl OnStartHandler {
    pub fn invoke(&self, context: ProcessContext) -> BoxFuture<'static, SchedulerResult<()>> {
        (self.handler)(context)
    }

    fn sort_key(&self) -> (i32, u64) {
        (self.priority, self.sequence)
    }
}

impl fmt::Debug for OnStartHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnStartHandler")
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// 已注册的周期任务定义
#[derive(Clone)]
pub struct WorkerDefinition {
    pub id: WorkerId,
    pub name: String,
    /// 声明时的原始调度文本
    pub schedule: String,
    pub jitter_seconds: u64,
    pub identity: ProcessIdentity,
    on_start: Vec<OnStartHandler>,
}

impl WorkerDefinition {
    pub fn builder() -> WorkerDefinitionBuilder {
        WorkerDefinitionBuilder::default()
    }

    pub fn default_name(id: WorkerId) -> String {
        format!("periodic_worker_{id}")
    }

    /// 已按执行顺序排好的回调
    pub fn on_start_handlers(&self) -> &[OnStartHandler] {
        &self.on_start
    }
}

impl fmt::Debug for WorkerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("jitter_seconds", &self.jitter_seconds)
            .field("identity", &self.identity)
            .field("on_start", &self.on_start.len())
            .finish()
    }
}

pub struct WorkerDefinitionBuilder {
    name: String,
    schedule: String,
    jitter_seconds: u64,
    user: Option<String>,
    group: Option<String>,
    identity: Option<ProcessIdentity>,
    handlers: Vec<(i32, HandlerFn)>,
}

impl Default for WorkerDefinitionBuilder {
    fn default() -> Self {
        Self {
            name: String::new(),
            schedule: DEFAULT_SCHEDULE.to_string(),
            jitter_seconds: 0,
            user: None,
            group: None,
            identity: None,
            handlers: Vec::new(),
        }
    }
}

impl WorkerDefinitionBuilder {
    /// 按配置文件中的声明初始化，不包含回调
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            name: config.name.clone(),
            schedule: config.schedule.clone(),
            jitter_seconds: config.jitter,
            user: config.user.clone(),
            group: config.group.clone(),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    pub fn jitter(mut self, seconds: u64) -> Self {
        self.jitter_seconds = seconds;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// 直接指定身份，跳过系统用户解析
    pub fn identity(mut self, identity: ProcessIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn on_start<F, Fut>(mut self, priority: i32, handler: F) -> Self
    where
        F: Fn(ProcessContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SchedulerResult<()>> + Send + 'static,
    {
        self.handlers
            .push((priority, Arc::new(move |context| handler(context).boxed())));
        self
    }

    pub fn build(self, id: WorkerId) -> WorkerDefinition {
        let name = if self.name.trim().is_empty() {
            WorkerDefinition::default_name(id)
        } else {
            self.name
        };
        let identity = self.identity.unwrap_or_else(|| {
            ProcessIdentity::resolve(self.user.as_deref(), self.group.as_deref())
        });

        let mut on_start: Vec<OnStartHandler> = self
            .handlers
            .into_iter()
            .enumerate()
            .map(|(sequence, (priority, handler))| OnStartHandler {
                priority,
                sequence: sequence as u64,
                handler,
            })
            .collect();
        on_start.sort_by_key(OnStartHandler::sort_key);

        WorkerDefinition {
            id,
            name,
            schedule: self.schedule,
            jitter_seconds: self.jitter_seconds,
            identity,
            on_start,
        }
    }
}

/// 按注册顺序分配 id，从 1 开始
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: WorkerId,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn allocate(&mut self) -> WorkerId {
        let id = self.next;
        self.next += 1;
        id
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    allocator: IdAllocator,
    definitions: Vec<Arc<WorkerDefinition>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, builder: WorkerDefinitionBuilder) -> Arc<WorkerDefinition> {
        let definition = Arc::new(builder.build(self.allocator.allocate()));
        tracing::debug!(
            worker_id = definition.id,
            worker_name = %definition.name,
            schedule = %definition.schedule,
            "注册周期任务定义"
        );
        self.definitions.push(Arc::clone(&definition));
        definition
    }

    pub fn get(&self, id: WorkerId) -> Option<Arc<WorkerDefinition>> {
        self.definitions.iter().find(|d| d.id == id).cloned()
    }

    /// 按注册顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &Arc<WorkerDefinition>> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// 执行触发器：为周期任务定义启动一个进程实例
///
/// 调用方不等待进程结束；启动失败由实现方记录日志并返回 `SpawnFailure`，
/// 不影响该任务后续的定时触发。
pub trait ExecutionTrigger: Send + Sync {
    fn spawn(&self, definition: Arc<WorkerDefinition>) -> SchedulerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use periodic_core::{ChannelMessageBus, SchedulerError};

    fn identity() -> ProcessIdentity {
        ProcessIdentity::new("app", "app")
    }

    #[test]
    fn test_ids_follow_registration_order() {
        let mut registry = WorkerRegistry::new();
        let first = registry.register(WorkerDefinition::builder().identity(identity()));
        let second = registry.register(WorkerDefinition::builder().identity(identity()));

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(2).unwrap().name, "periodic_worker_2");
        assert!(registry.get(3).is_none());
    }

    #[test]
    fn test_defaults() {
        let definition = WorkerDefinition::builder().identity(identity()).build(9);
        assert_eq!(definition.name, "periodic_worker_9");
        assert_eq!(definition.schedule, "1 minute");
        assert_eq!(definition.jitter_seconds, 0);
        assert!(definition.on_start_handlers().is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = WorkerConfig {
            name: "cleanup".to_string(),
            schedule: "*/5 * * * *".to_string(),
            jitter: 15,
            user: Some("nobody".to_string()),
            group: Some("nogroup".to_string()),
            command: vec!["/bin/true".to_string()],
            working_dir: None,
            env: Default::default(),
        };
        let definition = WorkerDefinitionBuilder::from_config(&config).build(1);
        assert_eq!(definition.name, "cleanup");
        assert_eq!(definition.schedule, "*/5 * * * *");
        assert_eq!(definition.jitter_seconds, 15);
        assert_eq!(definition.identity, ProcessIdentity::new("nobody", "nogroup"));
    }

    #[tokio::test]
    async fn test_handlers_run_by_priority_then_registration() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let record = |label: &'static str| {
            let order = Arc::clone(&order);
            move |_ctx: ProcessContext| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().unwrap().push(label);
                    Ok(())
                }
            }
        };

        let definition = WorkerDefinition::builder()
            .identity(identity())
            .on_start(10, record("late"))
            .on_start(0, record("first"))
            .on_start(10, record("later"))
            .on_start(-5, record("earliest"))
            .build(1);

        let (bus, _rx) = ChannelMessageBus::new();
        let context = ProcessContext::new(&definition, Arc::new(bus));
        for handler in definition.on_start_handlers() {
            handler.invoke(context.clone()).await.unwrap();
        }

        assert_eq!(
            *order.lock().unwrap(),
            vec!["earliest", "first", "late", "later"]
        );
    }

    #[tokio::test]
    async fn test_context_exit_code_is_shared() {
        let definition = WorkerDefinition::builder()
            .identity(identity())
            .on_start(0, |ctx: ProcessContext| async move {
                ctx.set_exit_code(3);
                Err(SchedulerError::Internal("boom".to_string()))
            })
            .build(1);

        let (bus, _rx) = ChannelMessageBus::new();
        let context = ProcessContext::new(&definition, Arc::new(bus));
        let result = definition.on_start_handlers()[0]
            .invoke(context.clone())
            .await;

        assert!(result.is_err());
        assert_eq!(context.exit_code(), 3);
    }
}
