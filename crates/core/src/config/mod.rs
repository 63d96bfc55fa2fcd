//! 应用配置
//!
//! 加载顺序：内置默认值 → TOML 配置文件 → `PERIODIC__*` 环境变量。
//! 调度表达式不在加载阶段校验，无效表达式只会让对应任务在状态中显示为 ERROR。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

pub const DEFAULT_SCHEDULE: &str = "1 minute";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub scheduler: SchedulerSettings,
    pub workers: Vec<WorkerConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(SchedulerError::Configuration(format!(
                "不支持的日志格式: {s}，可选值: json, pretty, compact"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// 状态查询超时（毫秒）
    pub status_timeout_ms: u64,
    /// 周期任务进程的可执行文件，为空时使用当前可执行文件
    pub worker_program: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            status_timeout_ms: 5000,
            worker_program: String::new(),
        }
    }
}

impl SchedulerSettings {
    pub fn worker_program(&self) -> SchedulerResult<PathBuf> {
        if self.worker_program.trim().is_empty() {
            Ok(std::env::current_exe()?)
        } else {
            Ok(PathBuf::from(self.worker_program.trim()))
        }
    }
}

/// 配置文件中声明的周期任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default)]
    pub jitter: u64,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    /// 进程启动后执行的命令，第一个元素为程序
    pub command: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_schedule() -> String {
    DEFAULT_SCHEDULE.to_string()
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> SchedulerResult<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(SchedulerError::Configuration(format!(
                    "配置文件不存在: {path}"
                )));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/periodic.toml", "periodic.toml", "/etc/periodic/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("PERIODIC")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> SchedulerResult<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| SchedulerError::Configuration(format!("解析TOML配置失败: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(SchedulerError::Configuration(format!(
                    "不支持的日志级别: {other}"
                )))
            }
        }

        if self.metrics.enabled && self.metrics.listen_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(SchedulerError::Configuration(format!(
                "无效的指标监听地址: {}",
                self.metrics.listen_address
            )));
        }

        if self.scheduler.status_timeout_ms == 0 {
            return Err(SchedulerError::Configuration(
                "status_timeout_ms 必须大于0".to_string(),
            ));
        }

        for (index, worker) in self.workers.iter().enumerate() {
            if worker.command.is_empty() || worker.command[0].trim().is_empty() {
                return Err(SchedulerError::Configuration(format!(
                    "第 {} 个周期任务缺少 command",
                    index + 1
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[logging]
level = "debug"
format = "json"

[scheduler]
status_timeout_ms = 1500

[[workers]]
name = "cleanup"
schedule = "*/5 * * * *"
jitter = 10
user = "nobody"
command = ["/bin/sh", "-c", "echo cleanup"]

[[workers]]
command = ["/bin/true"]
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.scheduler.status_timeout_ms, 1500);
        assert!(!config.metrics.enabled);
        assert_eq!(config.workers.len(), 2);

        let cleanup = &config.workers[0];
        assert_eq!(cleanup.name, "cleanup");
        assert_eq!(cleanup.jitter, 10);
        assert_eq!(cleanup.user.as_deref(), Some("nobody"));
        assert!(cleanup.group.is_none());

        let defaulted = &config.workers[1];
        assert_eq!(defaulted.name, "");
        assert_eq!(defaulted.schedule, DEFAULT_SCHEDULE);
        assert_eq!(defaulted.jitter, 0);
    }

    #[test]
    fn test_invalid_schedule_is_not_a_config_error() {
        let config = AppConfig::from_toml_str(
            r#"
[[workers]]
schedule = "not-a-schedule"
command = ["/bin/true"]
"#,
        );
        assert!(config.is_ok());
    }

    #[test]
    fn test_validation_failures() {
        assert!(AppConfig::from_toml_str("[[workers]]\ncommand = []\n").is_err());
        assert!(AppConfig::from_toml_str("[logging]\nlevel = \"loud\"\n").is_err());
        assert!(AppConfig::from_toml_str("[metrics]\nenabled = true\nlisten_address = \"nowhere\"\n").is_err());
        assert!(AppConfig::from_toml_str("[scheduler]\nstatus_timeout_ms = 0\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.workers.len(), 2);
        assert_eq!(config.workers[0].command[0], "/bin/sh");
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Some("/definitely/missing/periodic.toml")).unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
