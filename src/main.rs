use anyhow::{Context, Result};
use throttle_gate::{
    cli::{Cli, Commands},
    config::{self, ServerConfig},
    infra::metrics,
    logging, ThrottleHttpServer,
};
use std::fs;
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        match command {
            Commands::GenerateConfig { path } => {
                return generate_config(path);
            }
            Commands::ValidateConfig { path } => {
                return validate_config(path);
            }
            Commands::ShowConfig => {
                return show_config(&cli);
            }
        }
    }

    // 快速读取 config.toml 的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > config.toml > 默认值）
    let log_level = cli
        .get_log_level()
        .or(early_log.level)
        .unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format().or(early_log.format);
    let log_file = cli.log_file.as_deref().or(early_log.file.as_deref());

    let _log_guard = logging::init_logging(&log_level, log_format.as_deref(), log_file, cli.quiet)?;

    tracing::info!("🚀 Throttle Gate starting...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = ServerConfig::load(&cli).context("加载配置失败")?;

    if cli.dev {
        tracing::info!("🔧 开发模式已启用");
    }

    // 显示配置信息
    tracing::info!("📊 Server Configuration:");
    tracing::info!("  - Listen: {}", config.bind_address());
    tracing::info!("  - Limit: {}", config.throttle.limit);
    tracing::info!("  - Backlog Limit: {}", config.throttle.backlog_limit);
    tracing::info!("  - Backlog Timeout: {:?}", config.throttle.backlog_timeout());
    tracing::info!("  - Reject Status: {}", config.throttle.status_code);
    tracing::info!("  - Request Timeout: {:?}", config.request_timeout());
    tracing::info!("  - Work Delay: {:?}", config.work_delay());
    tracing::info!("  - Metrics: {}", config.enable_metrics);
    tracing::info!("  - Log Level: {}", config.log_level);
    tracing::info!(
        "  - Log Format: {:?}",
        log_format.as_deref().unwrap_or("compact")
    );
    if let Some(f) = log_file {
        tracing::info!("  - Log File: {}", f);
    }

    if config.enable_metrics {
        if let Err(e) = metrics::init() {
            tracing::warn!("⚠️ 指标初始化失败: {}", e);
        }
    }

    // 限流参数不合法属于配置错误，直接退出
    let server = match ThrottleHttpServer::new(&config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("❌ 服务器初始化失败: {}", e);
            tracing::error!("💡 请检查 [throttle] 配置后重试");
            process::exit(1);
        }
    };

    // 运行服务器
    if let Err(e) = server.start().await {
        tracing::error!("❌ 服务器运行失败: {}", e);
        tracing::error!("💡 服务器将退出");
        process::exit(1);
    }

    Ok(())
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    let default_config = r#"# Throttle Gate 配置文件
# 此文件由 throttle-gate generate-config 生成

[server]
host = "0.0.0.0"
port = 8080
# 整个请求的截止时间，超时返回 504
# request_timeout_ms = 30000
work_delay_ms = 100
enable_metrics = false
stats_interval_secs = 15

[throttle]
# 同时执行的最大请求数（必须大于 0）
limit = 64
# 允许排队的请求数（0 表示不排队）
backlog_limit = 128
# 排队最长等待时间（0 表示不等待）
backlog_timeout_ms = 5000
unbounded_backlog_wait = false
# 拒绝时返回的状态码（0 表示默认 429）
status_code = 429
# retry_after_secs = 1
# retry_after_cancelled_secs = 5

[logging]
level = "info"
format = "compact"
# file = "./logs/throttle-gate.log"
"#;

    fs::write(path, default_config).with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = ServerConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - Listen: {}", config.bind_address());
    println!("  - Limit: {}", config.throttle.limit);
    println!("  - Backlog Limit: {}", config.throttle.backlog_limit);
    println!("  - Backlog Timeout: {:?}", config.throttle.backlog_timeout());

    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    // 初始化基本日志（用于显示配置）
    let _log_guard = logging::init_logging("info", None, None, false)?;

    let config = ServerConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}
