//! rat_sqlguard - 嵌入式SQLite数据库韧性层
//!
//! 面向单写者的SQLite，在多个异步请求并发访问时提供：
//! 有界连接池、按错误类别退避的重试、熔断器、优先级等待队列，
//! 以及并发安全的一次性Schema初始化

// 导出所有公共模块
pub mod error;
pub mod types;
pub mod config;
pub mod i18n;
pub mod adapter;
pub mod events;
pub mod resilience;
pub mod pool;
pub mod schema;
pub mod manager;

// 重新导出常用类型和函数
pub use error::{GuardError, GuardResult};
pub use types::{DataValue, ExecuteResult, Row};
pub use adapter::{
    ConnectionFactory, EngineConnection, EngineError, SqliteConnectionFactory, SqliteErrorCode,
};
pub use config::{
    CircuitBreakerConfig, CircuitBreakerConfigBuilder, DatabaseConfig, DatabaseConfigBuilder,
    EngineTuning, LogLevel, LoggingConfig, LoggingConfigBuilder, PoolConfig, PoolConfigBuilder,
};
pub use events::{
    DatabaseEvent, DatabaseEventKind, EventSink, LoggingEventSink, MemoryEventSink, NoopEventSink,
};
pub use resilience::{
    classify, CircuitBreaker, CircuitPhase, CircuitSnapshot, ErrorCategory, OperationContext,
    RetryConfig, RetryEngine, RetryResult,
};
pub use pool::{
    ConnectionPool, ConnectionStatus, ConnectionType, PoolMetrics, PoolStatus, PooledConnection,
    Priority,
};
pub use schema::{InitializationState, SchemaDefinition, SchemaInitializer};
pub use manager::{
    get_or_init_database, global_database, reset_global_database, Database, HealthReport,
};

// 条件编译调试宏 - 只有在 debug 模式下才输出调试信息
#[cfg(debug_assertions)]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        rat_logger::debug!($($arg)*);
    };
}

#[cfg(not(debug_assertions))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        // 在 release 模式下不输出调试信息
    };
}

/// 初始化rat_sqlguard库
///
/// 初始化多语言错误消息系统
///
/// 注意：日志系统由调用者自行初始化，本库不会自动初始化日志
pub fn init() {
    i18n::ErrorMessageI18n::init();
}

/// 库版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 库名称
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 获取库信息
pub fn get_info() -> String {
    format!("{} v{}", NAME, VERSION)
}
