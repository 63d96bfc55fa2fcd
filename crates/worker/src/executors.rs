use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use periodic_core::{SchedulerError, SchedulerResult, WorkerConfig};
use periodic_domain::{ProcessContext, WorkerDefinitionBuilder};

/// 配置文件中声明的 on-start 命令
///
/// 命令的标准输出按行写入日志，不会混入进程的协议输出；非零退出码成为周期任务进程的退出码。
#[derive(Debug, Clone, PartialEq)]
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
    working_dir: Option<String>,
    env: HashMap<String, String>,
}

impl CommandHandler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            env: HashMap::new(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> SchedulerResult<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| SchedulerError::Configuration("周期任务缺少 command".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
        })
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// 以给定优先级注册为 on-start 回调
    pub fn attach(self, builder: WorkerDefinitionBuilder, priority: i32) -> WorkerDefinitionBuilder {
        let handler = Arc::new(self);
        builder.on_start(priority, move |context| {
            let handler = Arc::clone(&handler);
            async move { handler.run(context).await }
        })
    }

    pub async fn run(&self, context: ProcessContext) -> SchedulerResult<()> {
        let start_time = Instant::now();
        info!(
            worker_id = context.worker_id,
            "执行命令: {} {:?}", self.program, self.args
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .env("PERIODIC_WORKER_ID", context.worker_id.to_string())
            .env("PERIODIC_WORKER_NAME", &context.name);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| SchedulerError::SpawnFailure {
            worker_id: context.worker_id,
            message: format!("启动命令 {} 失败: {e}", self.program),
        })?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                info!(worker_id = context.worker_id, "{}", line);
            }
        }

        let status = child.wait().await?;
        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        match status.code() {
            Some(0) => {
                info!(worker_id = context.worker_id, elapsed_ms, "命令执行完成");
            }
            Some(code) => {
                warn!(worker_id = context.worker_id, elapsed_ms, "命令执行失败，退出码: {}", code);
                context.set_exit_code(code);
            }
            None => {
                warn!(worker_id = context.worker_id, elapsed_ms, "命令被信号终止");
                context.set_exit_code(1);
            }
        }
        Ok(())
    }
}
