//! # 配置管理模块 - 核心配置类型
//!
//! 所有组件共用一份启动时构建的不可变配置，构造函数显式接收，
//! 不在组件内部各自读取环境变量

use crate::error::{GuardError, GuardResult};
use crate::types::serde_helpers::duration_ms;
use rat_logger::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 数据库配置（组合根使用的完整配置）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库文件路径，`:memory:` 表示内存数据库
    pub path: PathBuf,
    /// 文件不存在时是否创建
    pub create_if_missing: bool,
    /// 连接池配置
    pub pool: PoolConfig,
    /// 熔断器配置
    pub circuit: CircuitBreakerConfig,
    /// 引擎 PRAGMA 调优
    pub engine: EngineTuning,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 连接池配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// 最大连接数
    pub max_connections: u32,
    /// 获取连接的最长等待时间
    #[serde(with = "duration_ms")]
    pub connection_timeout: Duration,
    /// 空闲连接回收阈值
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
    /// 默认重试次数（含首次执行）
    pub retry_attempts: u32,
    /// 重试基础延迟
    #[serde(with = "duration_ms")]
    pub retry_base_delay: Duration,
    /// 巡检间隔
    #[serde(with = "duration_ms")]
    pub monitor_interval: Duration,
    /// 连接持续占用超过该时长时告警
    #[serde(with = "duration_ms")]
    pub long_running_threshold: Duration,
    /// 等待队列长度超过该值时告警
    pub queue_alert_threshold: usize,
    /// 利用率超过该比例时告警（0.0 - 1.0）
    pub utilization_alert_threshold: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            retry_attempts: 5,
            retry_base_delay: Duration::from_millis(500),
            monitor_interval: Duration::from_secs(60),
            long_running_threshold: Duration::from_secs(300),
            queue_alert_threshold: 5,
            utilization_alert_threshold: 0.9,
        }
    }
}

impl PoolConfig {
    /// 校验配置
    pub fn validate(&self) -> GuardResult<()> {
        if self.max_connections == 0 {
            return Err(crate::quick_error!(config, "最大连接数必须大于零"));
        }
        if self.connection_timeout.is_zero() {
            return Err(crate::quick_error!(config, "连接超时时间不能为零"));
        }
        if self.idle_timeout.is_zero() {
            return Err(crate::quick_error!(config, "空闲连接超时时间不能为零"));
        }
        if self.retry_attempts == 0 {
            return Err(crate::quick_error!(config, "重试次数至少为1"));
        }
        if self.monitor_interval.is_zero() {
            return Err(crate::quick_error!(config, "巡检间隔不能为零"));
        }
        if !(0.0..=1.0).contains(&self.utilization_alert_threshold) {
            return Err(crate::quick_error!(config, "利用率告警阈值必须在0到1之间"));
        }
        Ok(())
    }
}

/// 熔断器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后打开
    pub failure_threshold: u32,
    /// 打开后多久允许进入半开探测
    #[serde(with = "duration_ms")]
    pub recovery_timeout: Duration,
    /// 半开状态下连续成功多少次后关闭
    pub success_threshold: u32,
    /// 严重错误累计多少次后立即打开
    pub critical_error_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
            critical_error_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// 校验配置
    pub fn validate(&self) -> GuardResult<()> {
        if self.failure_threshold == 0
            || self.success_threshold == 0
            || self.critical_error_threshold == 0
        {
            return Err(crate::quick_error!(config, "熔断器阈值必须大于零"));
        }
        Ok(())
    }
}

/// 新连接上执行的 PRAGMA 调优
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTuning {
    /// journal_mode
    pub journal_mode: String,
    /// synchronous
    pub synchronous: String,
    /// cache_size（负数表示 KiB）
    pub cache_size: i64,
    /// busy_timeout
    #[serde(with = "duration_ms")]
    pub busy_timeout: Duration,
    /// 是否启用外键约束
    pub foreign_keys: bool,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
            cache_size: -64000,
            busy_timeout: Duration::from_secs(30),
            foreign_keys: true,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,
    /// 是否输出到控制台
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: true,
        }
    }
}

impl LoggingConfig {
    /// 创建日志配置构建器
    pub fn builder() -> super::builders::LoggingConfigBuilder {
        super::builders::LoggingConfigBuilder::new()
    }

    /// 安装终端日志器
    ///
    /// 库本身不会主动初始化日志，由二进制入口或测试按需调用；
    /// 重复初始化时 rat_logger 返回的错误会被忽略
    pub fn init_logger(&self) {
        if !self.console {
            return;
        }
        let _ = rat_logger::LoggerBuilder::new()
            .with_level(self.level.to_level_filter())
            .add_terminal_with_config(rat_logger::handler::term::TermConfig::default())
            .init();
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 错误级别
    Error,
    /// 警告级别
    Warn,
    /// 信息级别
    Info,
    /// 调试级别
    Debug,
    /// 跟踪级别
    Trace,
}

impl LogLevel {
    /// 转换为 rat_logger 的级别过滤器
    pub fn to_level_filter(self) -> rat_logger::LevelFilter {
        match self {
            LogLevel::Error => rat_logger::LevelFilter::Error,
            LogLevel::Warn => rat_logger::LevelFilter::Warn,
            LogLevel::Info => rat_logger::LevelFilter::Info,
            LogLevel::Debug => rat_logger::LevelFilter::Debug,
            LogLevel::Trace => rat_logger::LevelFilter::Trace,
        }
    }

    /// 从字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

impl DatabaseConfig {
    /// 创建数据库配置构建器
    pub fn builder() -> super::builders::DatabaseConfigBuilder {
        super::builders::DatabaseConfigBuilder::new()
    }

    /// 使用默认参数为指定路径创建配置
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create_if_missing: true,
            pool: PoolConfig::default(),
            circuit: CircuitBreakerConfig::default(),
            engine: EngineTuning::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// 是否为内存数据库
    pub fn is_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }

    /// 校验整体配置
    pub fn validate(&self) -> GuardResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(crate::quick_error!(config, "数据库路径不能为空"));
        }
        self.pool.validate()?;
        self.circuit.validate()?;
        Ok(())
    }

    /// 从环境变量构建配置（启动时调用一次）
    pub fn from_env() -> GuardResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源构建配置
    ///
    /// 支持的键：`DATABASE_PATH`、`DB_MAX_CONNECTIONS`、`DB_CONNECTION_TIMEOUT_MS`、
    /// `DB_IDLE_TIMEOUT_MS`、`DB_RETRY_ATTEMPTS`、`DB_RETRY_BASE_DELAY_MS`、
    /// `DB_CIRCUIT_FAILURE_THRESHOLD`、`DB_CIRCUIT_RECOVERY_TIMEOUT_MS`、
    /// `DB_CIRCUIT_SUCCESS_THRESHOLD`、`DB_CIRCUIT_CRITICAL_THRESHOLD`、`DB_LOG_LEVEL`
    pub fn from_lookup<F>(lookup: F) -> GuardResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = lookup("DATABASE_PATH").unwrap_or_else(|| "./data/app.db".to_string());
        let mut config = Self::new(path);

        if let Some(v) = parse_var::<u32>(&lookup, "DB_MAX_CONNECTIONS")? {
            config.pool.max_connections = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "DB_CONNECTION_TIMEOUT_MS")? {
            config.pool.connection_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "DB_IDLE_TIMEOUT_MS")? {
            config.pool.idle_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u32>(&lookup, "DB_RETRY_ATTEMPTS")? {
            config.pool.retry_attempts = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "DB_RETRY_BASE_DELAY_MS")? {
            config.pool.retry_base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u32>(&lookup, "DB_CIRCUIT_FAILURE_THRESHOLD")? {
            config.circuit.failure_threshold = v;
        }
        if let Some(v) = parse_var::<u64>(&lookup, "DB_CIRCUIT_RECOVERY_TIMEOUT_MS")? {
            config.circuit.recovery_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u32>(&lookup, "DB_CIRCUIT_SUCCESS_THRESHOLD")? {
            config.circuit.success_threshold = v;
        }
        if let Some(v) = parse_var::<u32>(&lookup, "DB_CIRCUIT_CRITICAL_THRESHOLD")? {
            config.circuit.critical_error_threshold = v;
        }
        if let Some(level) = lookup("DB_LOG_LEVEL") {
            config.logging.level = LogLevel::parse(&level).ok_or_else(|| {
                crate::quick_error!(config, format!("无法识别的日志级别: {}", level))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// 从配置文件加载配置
    ///
    /// 扩展名为 `toml` 时按 TOML 解析，否则按 JSON 解析
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> GuardResult<Self> {
        let content = std::fs::read_to_string(config_path.as_ref()).map_err(GuardError::IoError)?;

        let config: DatabaseConfig = if is_toml(config_path.as_ref()) {
            toml::from_str(&content).map_err(|e| {
                crate::quick_error!(config, format!("解析TOML配置文件失败: {}", e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                crate::quick_error!(config, format!("解析JSON配置文件失败: {}", e))
            })?
        };

        config.validate()?;
        info!("从文件加载配置: {:?}", config_path.as_ref());
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, config_path: P) -> GuardResult<()> {
        let content = if is_toml(config_path.as_ref()) {
            toml::to_string_pretty(self).map_err(|e| {
                crate::quick_error!(config, format!("序列化TOML配置失败: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| {
                crate::quick_error!(config, format!("序列化JSON配置失败: {}", e))
            })?
        };

        std::fs::write(config_path.as_ref(), content).map_err(GuardError::IoError)?;

        info!("保存配置到文件: {:?}", config_path.as_ref());
        Ok(())
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("toml")
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> GuardResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            crate::quick_error!(config, format!("环境变量 {} 的值 '{}' 无效: {}", key, raw, e))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_documented_surface() {
        let pool = PoolConfig::default();
        assert_eq!(pool.connection_timeout, Duration::from_secs(30));
        assert_eq!(pool.idle_timeout, Duration::from_secs(300));
        assert_eq!(pool.retry_attempts, 5);
        assert_eq!(pool.retry_base_delay, Duration::from_millis(500));

        let circuit = CircuitBreakerConfig::default();
        assert_eq!(circuit.failure_threshold, 5);
        assert_eq!(circuit.recovery_timeout, Duration::from_secs(60));
        assert_eq!(circuit.success_threshold, 2);
        assert_eq!(circuit.critical_error_threshold, 2);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("DATABASE_PATH", "/tmp/x.db"),
            ("DB_MAX_CONNECTIONS", "3"),
            ("DB_RETRY_BASE_DELAY_MS", "100"),
            ("DB_CIRCUIT_FAILURE_THRESHOLD", "7"),
            ("DB_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let config =
            DatabaseConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.pool.max_connections, 3);
        assert_eq!(config.pool.retry_base_delay, Duration::from_millis(100));
        assert_eq!(config.circuit.failure_threshold, 7);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = DatabaseConfig::from_lookup(|k| {
            (k == "DB_MAX_CONNECTIONS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(GuardError::ConfigError { .. })));

        let zero = DatabaseConfig::from_lookup(|k| {
            (k == "DB_MAX_CONNECTIONS").then(|| "0".to_string())
        });
        assert!(zero.is_err());
    }

    #[test]
    fn test_file_round_trip_toml() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("db.toml");
        let mut config = DatabaseConfig::new(dir.path().join("app.db"));
        config.pool.max_connections = 4;
        config.save_to_file(&file).unwrap();

        let loaded = DatabaseConfig::from_file(&file).unwrap();
        assert_eq!(loaded.pool, config.pool);
        assert_eq!(loaded.circuit, config.circuit);
    }
}
