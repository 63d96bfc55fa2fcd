use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{value_parser, Arg, ArgMatches, Command};
use tracing::{error, info, warn};

use periodic_core::{AppConfig, LogFormat, SchedulerStatus};
use periodic_scheduler::app::Application;
use periodic_scheduler::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use periodic_scheduler::telemetry::{init_logging, init_metrics, LogOutput};

fn cli() -> Command {
    Command::new("periodic-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("周期任务调度引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty", "compact"])
                .global(true),
        )
        .subcommand(Command::new("run").about("启动监督进程并按调度表达式触发周期任务（默认）"))
        .subcommand(
            Command::new("worker")
                .about("作为周期任务进程运行一次 on-start 回调")
                .arg(
                    Arg::new("id")
                        .long("id")
                        .value_name("ID")
                        .help("周期任务 id，按配置声明顺序从 1 开始")
                        .value_parser(value_parser!(u32))
                        .required(true),
                ),
        )
        .subcommand(Command::new("status").about("打印每个周期任务的下一次运行时间"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").cloned();
    let mut config = AppConfig::load(config_path.as_deref())
        .with_context(|| format!("加载配置失败: {}", config_path.as_deref().unwrap_or("<默认路径>")))?;
    apply_overrides(&mut config, &matches)?;

    match matches.subcommand() {
        Some(("worker", sub)) => {
            let id = *sub
                .get_one::<u32>("id")
                .context("缺少 --id 参数")?;
            // 标准输出留给协议消息
            init_logging(&config.logging, LogOutput::Stderr)?;
            let app = Application::new(config, config_path.map(PathBuf::from));
            let code = app.run_worker(id).await?;
            std::process::exit(code);
        }
        Some(("status", _)) => {
            init_logging(&config.logging, LogOutput::Stderr)?;
            let app = Application::new(config, config_path.map(PathBuf::from));
            print_status(&app.preview_status(Utc::now())?);
            Ok(())
        }
        _ => {
            init_logging(&config.logging, LogOutput::Stdout)?;
            init_metrics(&config.metrics)?;
            info!("启动周期任务调度引擎");
            info!("配置文件: {}", config_path.as_deref().unwrap_or("<默认路径>"));
            run_supervisor(Application::new(config, config_path.map(PathBuf::from))).await
        }
    }
}

fn apply_overrides(config: &mut AppConfig, matches: &ArgMatches) -> Result<()> {
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.logging.format = format.parse::<LogFormat>()?;
    }
    Ok(())
}

async fn run_supervisor(app: Application) -> Result<()> {
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::new(app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("调度器运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("调度器已优雅关闭"),
        Ok(Err(e)) => error!("调度器关闭时发生错误: {e}"),
        Err(_) => warn!("调度器关闭超时，强制退出"),
    }
    Ok(())
}

fn print_status(status: &SchedulerStatus) {
    println!("周期任务数量: {}", status.periodic_tasks_count);
    for entry in &status.periodic_workers {
        println!(
            "{:>4}  {:<24} {:<16} {:<24} {:<20} {}",
            entry.id,
            entry.name,
            entry.identity.to_string(),
            entry.schedule_display(),
            entry.next_run_display(),
            entry.status_label()
        );
    }
}
