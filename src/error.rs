//! 错误处理模块
//!
//! 区分两类错误：底层引擎错误（`GuardError::Engine`）与连接池自身产生的错误
//! （熔断、关闭中、排队超时），调用方据此选择"稍后重试"或"直接失败"

use crate::adapter::EngineError;
use crate::resilience::ErrorCategory;
use thiserror::Error;

/// rat_sqlguard 统一错误类型
#[derive(Error, Debug)]
pub enum GuardError {
    /// 连接错误
    #[error("连接错误: {message}")]
    ConnectionError { message: String },

    /// 查询错误
    #[error("查询错误: {message}")]
    QueryError { message: String },

    /// 配置错误
    #[error("配置错误: {message}")]
    ConfigError { message: String },

    /// 底层引擎返回的错误
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// 熔断器处于打开状态，快速拒绝
    #[error("熔断器已打开，拒绝执行（约 {remaining_ms}ms 后允许探测）")]
    CircuitOpen { remaining_ms: u64 },

    /// 连接池正在关闭
    #[error("连接池正在关闭")]
    PoolShuttingDown,

    /// 等待连接超时
    #[error("等待可用连接超时（已等待 {waited_ms}ms）")]
    QueueTimeout { waited_ms: u64 },

    /// Schema 初始化失败
    #[error("Schema初始化失败: {message}")]
    InitializationFailed { message: String },

    /// 尚未开始初始化
    #[error("数据库尚未初始化")]
    NotInitialized,

    /// 序列化错误
    #[error("序列化错误: {message}")]
    SerializationError { message: String },

    /// IO 错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 结果类型别名
pub type GuardResult<T> = Result<T, GuardError>;

impl GuardError {
    /// 是否为连接池自身产生的错误（而非底层引擎错误）
    pub fn is_pool_error(&self) -> bool {
        matches!(
            self,
            GuardError::CircuitOpen { .. }
                | GuardError::PoolShuttingDown
                | GuardError::QueueTimeout { .. }
        )
    }

    /// 是否反映底层数据库的健康状况（计入熔断器）
    ///
    /// 连接池自身的拒绝、调用方业务代码返回的查询错误、
    /// 以及 SQL 语句本身的错误（语法、约束等）都不计入
    pub fn affects_health(&self) -> bool {
        match self {
            GuardError::Engine(e) => !e.is_statement_error(),
            GuardError::ConnectionError { .. } | GuardError::IoError(_) => true,
            _ => false,
        }
    }

    /// 错误分类
    ///
    /// 引擎错误交给分类器；连接池错误不应被外层重试循环再次重试，
    /// 只有排队超时视为资源耗尽
    pub fn category(&self) -> ErrorCategory {
        match self {
            GuardError::Engine(e) => crate::resilience::classify(e),
            GuardError::QueueTimeout { .. } => ErrorCategory::RetryableResource,
            GuardError::CircuitOpen { .. }
            | GuardError::PoolShuttingDown
            | GuardError::ConfigError { .. }
            | GuardError::QueryError { .. }
            | GuardError::NotInitialized
            | GuardError::InitializationFailed { .. }
            | GuardError::SerializationError { .. } => ErrorCategory::NonRetryable,
            GuardError::IoError(_) => ErrorCategory::RetryableIo,
            other => crate::resilience::classify_message(&other.to_string()),
        }
    }

    /// 按当前语言返回本地化的错误消息
    pub fn localized_message(&self) -> String {
        match self {
            GuardError::CircuitOpen { remaining_ms } => crate::i18n::tf(
                "error.circuit_open",
                &[("remaining_ms", &remaining_ms.to_string())],
            ),
            GuardError::PoolShuttingDown => crate::i18n::t("error.pool_shutting_down"),
            GuardError::QueueTimeout { waited_ms } => crate::i18n::tf(
                "error.queue_timeout",
                &[("waited_ms", &waited_ms.to_string())],
            ),
            GuardError::InitializationFailed { message } => {
                crate::i18n::tf("error.init_failed", &[("message", message)])
            }
            GuardError::NotInitialized => crate::i18n::t("error.not_initialized"),
            GuardError::ConfigError { message } => {
                crate::i18n::tf("error.config", &[("message", message)])
            }
            other => other.to_string(),
        }
    }

    /// 返回底层引擎错误（如果有）
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            GuardError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::SerializationError {
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for GuardError {
    fn from(err: sqlx::Error) -> Self {
        GuardError::Engine(EngineError::from(err))
    }
}

/// 便捷错误构造宏
#[macro_export]
macro_rules! quick_error {
    (connection, $msg:expr) => {
        $crate::error::GuardError::ConnectionError {
            message: $msg.to_string(),
        }
    };
    (query, $msg:expr) => {
        $crate::error::GuardError::QueryError {
            message: $msg.to_string(),
        }
    };
    (config, $msg:expr) => {
        $crate::error::GuardError::ConfigError {
            message: $msg.to_string(),
        }
    };
    (serialization, $msg:expr) => {
        $crate::error::GuardError::SerializationError {
            message: $msg.to_string(),
        }
    };
    (init, $msg:expr) => {
        $crate::error::GuardError::InitializationFailed {
            message: $msg.to_string(),
        }
    };
}
