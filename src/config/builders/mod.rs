//! # 配置构建器模块
//!
//! 提供所有配置类型的构建器实现，支持链式调用

pub mod database_builder;
pub mod logging_builder;
pub mod pool_builder;

pub use database_builder::DatabaseConfigBuilder;
pub use logging_builder::LoggingConfigBuilder;
pub use pool_builder::{CircuitBreakerConfigBuilder, PoolConfigBuilder};
