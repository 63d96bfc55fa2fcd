use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use periodic_core::{MessageBus, SchedulerError, SchedulerMessage, SchedulerResult, WorkerId};
use periodic_domain::{ExecutionTrigger, WorkerDefinition};

/// 默认的执行触发器：为每次触发启动一个 `<program> worker --id <id>` 子进程
///
/// 子进程标准输出中的协议消息被转发到监督进程的消息总线，其余输出写入日志。
/// 不等待子进程结束，也不做重启或资源限制。
pub struct CommandTrigger {
    program: PathBuf,
    config_path: Option<PathBuf>,
    bus: Arc<dyn MessageBus>,
}

impl CommandTrigger {
    pub fn new(program: impl Into<PathBuf>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            program: program.into(),
            config_path: None,
            bus,
        }
    }

    /// 子进程使用同一份配置文件，保证按相同顺序分配 id
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn command_args(&self, worker_id: WorkerId) -> Vec<String> {
        let mut args = vec![
            "worker".to_string(),
            "--id".to_string(),
            worker_id.to_string(),
        ];
        if let Some(path) = &self.config_path {
            args.push("--config".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        args
    }

    fn start_child(&self, worker_id: WorkerId) -> SchedulerResult<Child> {
        Command::new(&self.program)
            .args(self.command_args(worker_id))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| SchedulerError::SpawnFailure {
                worker_id,
                message: format!("启动 {} 失败: {e}", self.program.display()),
            })
    }
}

impl ExecutionTrigger for CommandTrigger {
    fn spawn(&self, definition: Arc<WorkerDefinition>) -> SchedulerResult<()> {
        let worker_id = definition.id;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::Internal(format!("没有可用的 tokio 运行时: {e}")))?;

        let child = match self.start_child(worker_id) {
            Ok(child) => child,
            Err(e) => {
                error!(worker_id, worker_name = %definition.name, "周期任务进程启动失败: {}", e);
                return Err(e);
            }
        };
        debug!(worker_id, pid = child.id(), "周期任务进程已创建");

        runtime.spawn(supervise_child(child, definition, Arc::clone(&self.bus)));
        Ok(())
    }
}

async fn supervise_child(mut child: Child, definition: Arc<WorkerDefinition>, bus: Arc<dyn MessageBus>) {
    let worker_id = definition.id;

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => forward_line(worker_id, &line, bus.as_ref()),
                Ok(None) => break,
                Err(e) => {
                    warn!(worker_id, "读取子进程输出失败: {}", e);
                    break;
                }
            }
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => {
            info!(worker_id, worker_name = %definition.name, "周期任务进程正常退出");
        }
        Ok(status) => {
            warn!(
                worker_id,
                worker_name = %definition.name,
                "周期任务进程异常退出: {:?}", status.code()
            );
        }
        Err(e) => error!(worker_id, "等待周期任务进程结束失败: {}", e),
    }
}

fn forward_line(worker_id: WorkerId, line: &str, bus: &dyn MessageBus) {
    match SchedulerMessage::from_output_line(line) {
        Some(message) => {
            if message.worker_id() != worker_id {
                warn!(
                    worker_id,
                    reported_id = message.worker_id(),
                    "子进程上报的 id 与触发的任务不一致"
                );
            }
            if let Err(e) = bus.publish(message) {
                warn!(worker_id, "转发子进程消息失败: {}", e);
            }
        }
        None if line.trim().is_empty() => {}
        None => info!(worker_id, "子进程输出: {}", line),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    use periodic_testing_utils::{worker, RecordingBus, TestEnv};

    /// 生成一个模拟 worker 子命令的脚本：先发出协议消息，再输出普通文本
    fn fake_worker(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("fake-worker.sh");
        let script = concat!(
            "#!/bin/sh\n",
            "echo \"{\\\"type\\\":\\\"ProcessStarted\\\",\\\"id\\\":$3}\"\n",
            "echo plain output\n",
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_command_args() {
        let trigger = CommandTrigger::new("/usr/bin/periodic", Arc::new(RecordingBus::new()));
        assert_eq!(trigger.command_args(3), vec!["worker", "--id", "3"]);

        let trigger = trigger.with_config_path("/etc/periodic/config.toml");
        assert_eq!(
            trigger.command_args(3),
            vec!["worker", "--id", "3", "--config", "/etc/periodic/config.toml"]
        );
    }

    #[tokio::test]
    async fn test_forwards_protocol_lines_from_child() {
        let dir = tempfile::tempdir().unwrap();
        let bus = RecordingBus::new();
        let trigger = CommandTrigger::new(fake_worker(&dir), Arc::new(bus.clone()));

        trigger.spawn(worker(5, "60")).unwrap();

        let forwarded = TestEnv::wait_for(
            || {
                let bus = bus.clone();
                async move { bus.started_count() == 1 }
            },
            Duration::from_secs(10),
        )
        .await;
        assert!(forwarded);
        assert_eq!(bus.messages(), vec![SchedulerMessage::process_started(5)]);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let trigger = CommandTrigger::new("/definitely/not/a/program", Arc::new(RecordingBus::new()));
        let err = trigger.spawn(worker(2, "60")).unwrap_err();
        assert!(matches!(err, SchedulerError::SpawnFailure { worker_id: 2, .. }));
    }

    #[test]
    fn test_spawn_outside_runtime_fails_cleanly() {
        let trigger = CommandTrigger::new("/bin/true", Arc::new(RecordingBus::new()));
        assert!(matches!(
            trigger.spawn(worker(1, "60")),
            Err(SchedulerError::Internal(_))
        ));
    }
}
