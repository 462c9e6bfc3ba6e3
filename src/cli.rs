use clap::{Parser, Subcommand};

// 确保 Parser trait 被使用
impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// Throttle Gate - 带积压队列的 HTTP 并发准入控制
#[derive(Parser, Debug)]
#[command(name = "throttle-gate")]
#[command(version)]
#[command(about = "限制同时执行的请求数，超出部分排队或直接拒绝", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// 服务器监听地址
    #[arg(long, value_name = "ADDRESS", help = "服务器监听地址")]
    pub host: Option<String>,

    /// HTTP 端口
    #[arg(long, value_name = "PORT", help = "HTTP 监听端口")]
    pub port: Option<u16>,

    /// 同时执行的最大请求数
    #[arg(long, value_name = "NUM", allow_negative_numbers = true, help = "并发上限（必须大于 0）")]
    pub limit: Option<i64>,

    /// 积压队列长度
    #[arg(long, value_name = "NUM", allow_negative_numbers = true, help = "允许排队的请求数（0 表示不排队）")]
    pub backlog_limit: Option<i64>,

    /// 积压超时（毫秒）
    #[arg(long, value_name = "MS", help = "排队最长等待时间（0 表示不等待）")]
    pub backlog_timeout_ms: Option<u64>,

    /// 无限期排队
    #[arg(long, help = "排队请求一直等到执行槽释放或请求被取消")]
    pub unbounded_backlog_wait: bool,

    /// 拒绝状态码
    #[arg(long, value_name = "CODE", help = "拒绝时返回的 HTTP 状态码（默认 429）")]
    pub status_code: Option<u16>,

    /// Retry-After（秒）
    #[arg(long, value_name = "SECS", help = "拒绝响应携带的 Retry-After 秒数")]
    pub retry_after_secs: Option<u64>,

    /// 取消时的 Retry-After（秒）
    #[arg(long, value_name = "SECS", help = "请求被取消或超过截止时间时的 Retry-After 秒数（默认同 --retry-after-secs）")]
    pub retry_after_cancelled_secs: Option<u64>,

    /// 外层请求截止时间（毫秒）
    #[arg(long, value_name = "MS", help = "整个请求的截止时间，超时返回 504")]
    pub request_timeout_ms: Option<u64>,

    /// 演示路由耗时（毫秒）
    #[arg(long, value_name = "MS", help = "演示路由每个请求的处理耗时")]
    pub work_delay_ms: Option<u64>,

    /// 日志级别
    #[arg(
        long,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error"
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: pretty, json, compact")]
    pub log_format: Option<String>,

    /// 日志文件路径
    #[arg(long, value_name = "PATH", help = "日志输出文件路径")]
    pub log_file: Option<String>,

    /// 启用监控指标
    #[arg(long, help = "启用 Prometheus 监控指标")]
    pub enable_metrics: bool,

    /// 详细输出（可重复使用：-v, -vv, -vvv）
    #[arg(short, action = clap::ArgAction::Count, help = "详细输出级别")]
    pub verbose: u8,

    /// 静默模式
    #[arg(long, short = 'q', help = "静默模式（不输出日志）")]
    pub quiet: bool,

    /// 开发模式（等同于 --log-level debug --log-format pretty）
    #[arg(long, help = "启用开发模式")]
    pub dev: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 验证配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 显示最终配置（合并后的配置）
    ShowConfig,
}

impl Cli {
    /// 获取日志级别（考虑 verbose 和 quiet）
    pub fn get_log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }

        if self.dev {
            return Some("debug".to_string());
        }

        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }

        // 根据 verbose 级别设置
        match self.verbose {
            0 => None, // 使用默认或配置文件
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// 获取日志格式
    pub fn get_log_format(&self) -> Option<String> {
        if self.dev {
            return Some("pretty".to_string());
        }
        self.log_format.clone()
    }
}
