//! Fixtures for worker definitions and registries

use std::sync::Arc;

use periodic_core::{ProcessIdentity, WorkerId};
use periodic_domain::{WorkerDefinition, WorkerDefinitionBuilder, WorkerRegistry};

/// 固定身份，避免测试依赖运行环境的用户名
pub fn test_identity() -> ProcessIdentity {
    ProcessIdentity::new("app", "app")
}

/// 带测试身份的定义构建器
pub fn worker_builder(schedule: &str) -> WorkerDefinitionBuilder {
    WorkerDefinition::builder()
        .schedule(schedule)
        .identity(test_identity())
}

pub fn worker(id: WorkerId, schedule: &str) -> Arc<WorkerDefinition> {
    Arc::new(worker_builder(schedule).build(id))
}

pub fn jittered_worker(id: WorkerId, schedule: &str, jitter: u64) -> Arc<WorkerDefinition> {
    Arc::new(worker_builder(schedule).jitter(jitter).build(id))
}

/// 按给定顺序注册一组调度表达式，id 从 1 开始
pub fn registry_with(schedules: &[&str]) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    for schedule in schedules {
        registry.register(worker_builder(schedule));
    }
    registry
}
