use std::time::Duration;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use serde::{Deserialize, Serialize};
use anyhow::{Result, Context};
use axum::http::StatusCode;

use crate::error::ThrottleError;
use crate::throttle::{BacklogTimeout, ThrottleOpts, DEFAULT_STATUS_CODE};

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 服务器监听地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
    /// 外层请求截止时间（毫秒，None = 不设截止时间）
    pub request_timeout_ms: Option<u64>,
    /// 演示路由的处理耗时（毫秒）
    pub work_delay_ms: u64,
    /// 是否启用 Prometheus 指标
    pub enable_metrics: bool,
    /// 指标上报间隔（秒）
    pub stats_interval_secs: u64,
    /// 日志级别
    pub log_level: String,
    /// 限流配置
    pub throttle: ThrottleConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_ms: None,
            work_delay_ms: 100,
            enable_metrics: false,
            stats_interval_secs: 15,
            log_level: "info".to_string(),
            throttle: ThrottleConfig::default(),
        }
    }
}

impl ServerConfig {
    /// 创建新的服务器配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 外层请求截止时间
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// 演示路由的处理耗时
    pub fn work_delay(&self) -> Duration {
        Duration::from_millis(self.work_delay_ms)
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;

        Self::from_toml_str(&content)
    }

    /// 从 TOML 文本加载配置，并校验限流参数
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| "配置文件格式错误")?;

        let config: Self = toml_config.into();
        config.throttle.to_opts().context("限流配置无效")?;
        Ok(config)
    }

    /// 从环境变量加载配置（THROTTLE_ 前缀）
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(host) = env::var("THROTTLE_HOST") {
            self.host = host;
        }
        if let Some(port) = parse_env("THROTTLE_PORT") {
            self.port = port;
        }
        if let Some(timeout) = parse_env("THROTTLE_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = Some(timeout);
        }
        if let Ok(log_level) = env::var("THROTTLE_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // 限流参数
        if let Some(limit) = parse_env("THROTTLE_LIMIT") {
            self.throttle.limit = limit;
        }
        if let Some(backlog_limit) = parse_env("THROTTLE_BACKLOG_LIMIT") {
            self.throttle.backlog_limit = backlog_limit;
        }
        if let Some(timeout) = parse_env("THROTTLE_BACKLOG_TIMEOUT_MS") {
            self.throttle.backlog_timeout_ms = timeout;
        }
        if let Some(unbounded) = parse_env("THROTTLE_UNBOUNDED_BACKLOG_WAIT") {
            self.throttle.unbounded_backlog_wait = unbounded;
        }
        if let Some(status_code) = parse_env("THROTTLE_STATUS_CODE") {
            self.throttle.status_code = status_code;
        }
        if let Some(retry_after) = parse_env("THROTTLE_RETRY_AFTER_SECS") {
            self.throttle.retry_after_secs = Some(retry_after);
        }
        if let Some(retry_after) = parse_env("THROTTLE_RETRY_AFTER_CANCELLED_SECS") {
            self.throttle.retry_after_cancelled_secs = Some(retry_after);
        }

        Ok(())
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(timeout) = cli.request_timeout_ms {
            self.request_timeout_ms = Some(timeout);
        }
        if let Some(delay) = cli.work_delay_ms {
            self.work_delay_ms = delay;
        }
        if cli.enable_metrics {
            self.enable_metrics = true;
        }
        if let Some(limit) = cli.limit {
            self.throttle.limit = limit;
        }
        if let Some(backlog_limit) = cli.backlog_limit {
            self.throttle.backlog_limit = backlog_limit;
        }
        if let Some(timeout) = cli.backlog_timeout_ms {
            self.throttle.backlog_timeout_ms = timeout;
        }
        if cli.unbounded_backlog_wait {
            self.throttle.unbounded_backlog_wait = true;
        }
        if let Some(status_code) = cli.status_code {
            self.throttle.status_code = status_code;
        }
        if let Some(retry_after) = cli.retry_after_secs {
            self.throttle.retry_after_secs = Some(retry_after);
        }
        if let Some(retry_after) = cli.retry_after_cancelled_secs {
            self.throttle.retry_after_cancelled_secs = Some(retry_after);
        }
        if let Some(log_level) = cli.get_log_level() {
            self.log_level = log_level;
        }
    }

    /// 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    pub fn load(cli: &crate::cli::Cli) -> Result<Self> {
        // 1. 从默认配置开始
        let mut config = Self::new();

        // 2. 从配置文件加载（如果指定）
        if let Some(config_file) = &cli.config_file {
            if Path::new(config_file).exists() {
                info!("📄 从配置文件加载: {}", config_file);
                config = Self::from_toml_file(config_file)?;
            } else {
                warn!("⚠️ 配置文件不存在: {}", config_file);
            }
        } else if Path::new("config.toml").exists() {
            info!("📄 从默认配置文件加载: config.toml");
            config = Self::from_toml_file("config.toml")?;
        }

        // 3. 从环境变量合并（优先级高于配置文件）
        config.merge_from_env()?;

        // 4. 从命令行参数合并（最高优先级）
        config.merge_from_cli(cli);

        // 5. 合并后再校验一次限流参数
        config.throttle.to_opts().context("限流配置无效")?;

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = env::var(key).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("环境变量 {} 的值无效，已忽略: {}", key, value);
            None
        }
    }
}

/// 限流配置（外部输入，构造闸门前校验）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// 同时执行的最大请求数（必须 > 0）
    pub limit: i64,
    /// 允许排队的请求数（必须 >= 0）
    pub backlog_limit: i64,
    /// 积压超时（毫秒，0 = 不等待）
    pub backlog_timeout_ms: u64,
    /// 忽略积压超时，一直等到执行槽释放或请求被外层取消
    pub unbounded_backlog_wait: bool,
    /// 拒绝状态码（0 = 默认 429）
    pub status_code: u16,
    /// 闸门拒绝时建议的重试间隔（秒）
    pub retry_after_secs: Option<u64>,
    /// 请求被外层取消时建议的重试间隔（秒，缺省沿用 retry_after_secs）
    pub retry_after_cancelled_secs: Option<u64>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            limit: 64,
            backlog_limit: 128,
            backlog_timeout_ms: 5_000,
            unbounded_backlog_wait: false,
            status_code: DEFAULT_STATUS_CODE.as_u16(),
            retry_after_secs: None,
            retry_after_cancelled_secs: None,
        }
    }
}

impl ThrottleConfig {
    /// 排队等待策略
    pub fn backlog_timeout(&self) -> BacklogTimeout {
        if self.unbounded_backlog_wait {
            BacklogTimeout::Unbounded
        } else {
            BacklogTimeout::After(Duration::from_millis(self.backlog_timeout_ms))
        }
    }

    /// 转换为闸门配置
    pub fn to_opts(&self) -> std::result::Result<ThrottleOpts, ThrottleError> {
        let mut opts =
            ThrottleOpts::try_new(self.limit, self.backlog_limit, self.backlog_timeout())?;

        if self.status_code != 0 {
            let status_code = StatusCode::from_u16(self.status_code).map_err(|_| {
                ThrottleError::InvalidConfiguration(format!(
                    "invalid status code {}",
                    self.status_code
                ))
            })?;
            opts = opts.with_status_code(status_code);
        }

        if let Some(retry_after) = self.retry_after_secs {
            let on_gate = Duration::from_secs(retry_after);
            let on_cancel =
                Duration::from_secs(self.retry_after_cancelled_secs.unwrap_or(retry_after));
            opts.retry_after = Some(Arc::new(move |ambient_cancel| {
                if ambient_cancel {
                    on_cancel
                } else {
                    on_gate
                }
            }));
        }

        Ok(opts)
    }
}

/// TOML 配置文件结构（用于反序列化）
#[derive(Debug, Deserialize)]
struct TomlConfig {
    server: Option<TomlServerConfig>,
    throttle: Option<TomlThrottleConfig>,
    logging: Option<TomlLoggingConfig>,
}

#[derive(Debug, Deserialize)]
struct TomlServerConfig {
    host: Option<String>,
    port: Option<u16>,
    request_timeout_ms: Option<u64>,
    work_delay_ms: Option<u64>,
    enable_metrics: Option<bool>,
    stats_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlThrottleConfig {
    limit: Option<i64>,
    backlog_limit: Option<i64>,
    backlog_timeout_ms: Option<u64>,
    unbounded_backlog_wait: Option<bool>,
    status_code: Option<u16>,
    retry_after_secs: Option<u64>,
    retry_after_cancelled_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TomlLoggingConfig {
    level: Option<String>,
    format: Option<String>,
    file: Option<String>,
}

impl From<TomlConfig> for ServerConfig {
    fn from(toml: TomlConfig) -> Self {
        let mut config = Self::default();

        if let Some(server) = toml.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
            if let Some(timeout) = server.request_timeout_ms {
                config.request_timeout_ms = Some(timeout);
            }
            if let Some(delay) = server.work_delay_ms {
                config.work_delay_ms = delay;
            }
            if let Some(enable) = server.enable_metrics {
                config.enable_metrics = enable;
            }
            if let Some(interval) = server.stats_interval_secs {
                config.stats_interval_secs = interval;
            }
        }

        if let Some(throttle) = toml.throttle {
            if let Some(limit) = throttle.limit {
                config.throttle.limit = limit;
            }
            if let Some(backlog_limit) = throttle.backlog_limit {
                config.throttle.backlog_limit = backlog_limit;
            }
            if let Some(timeout) = throttle.backlog_timeout_ms {
                config.throttle.backlog_timeout_ms = timeout;
            }
            if let Some(unbounded) = throttle.unbounded_backlog_wait {
                config.throttle.unbounded_backlog_wait = unbounded;
            }
            if let Some(status_code) = throttle.status_code {
                config.throttle.status_code = status_code;
            }
            config.throttle.retry_after_secs = throttle.retry_after_secs;
            config.throttle.retry_after_cancelled_secs = throttle.retry_after_cancelled_secs;
        }

        if let Some(level) = toml.logging.and_then(|logging| logging.level) {
            config.log_level = level;
        }

        config
    }
}

/// 启动早期使用的日志配置（只读 [logging] 段）
#[derive(Debug, Default)]
pub struct EarlyLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EarlyToml {
    logging: Option<TomlLoggingConfig>,
}

/// 快速读取 config.toml 的 [logging] 段（不加载完整配置，读取失败时返回空配置）
pub fn load_early_logging_config(config_file: Option<&str>) -> EarlyLoggingConfig {
    let path = config_file.unwrap_or("config.toml");
    let Ok(content) = fs::read_to_string(path) else {
        return EarlyLoggingConfig::default();
    };

    match toml::from_str::<EarlyToml>(&content) {
        Ok(EarlyToml { logging: Some(logging) }) => EarlyLoggingConfig {
            level: logging.level,
            format: logging.format,
            file: logging.file,
        },
        _ => EarlyLoggingConfig::default(),
    }
}
