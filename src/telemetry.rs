use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use periodic_core::{LogFormat, LoggingConfig, MetricsConfig};

/// 日志输出位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    /// 周期任务进程的标准输出留给协议消息
    Stderr,
}

/// 初始化日志系统，`RUST_LOG` 优先于配置中的级别
pub fn init_logging(config: &LoggingConfig, output: LogOutput) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(env_filter);
    let writer = || match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
    };

    match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer()))
            .try_init()
            .context("初始化JSON日志格式失败")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(writer()))
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(writer()))
            .try_init()
            .context("初始化Compact日志格式失败")?,
    }

    Ok(())
}

/// 启用时安装 Prometheus 导出器并监听 HTTP 端口
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let address: SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {}", config.listen_address))?;

    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .context("安装Prometheus导出器失败")?;

    info!("Prometheus 指标导出器已启动: {address}");
    Ok(())
}
