//! # 配置管理模块
//!
//! 提供统一的配置管理系统，支持构建器模式、环境变量与配置文件三种来源；
//! 配置在启动时构建一次，之后以不可变值传入各组件

pub mod builders;
pub mod core;

pub use builders::{
    CircuitBreakerConfigBuilder, DatabaseConfigBuilder, LoggingConfigBuilder, PoolConfigBuilder,
};
pub use core::{
    CircuitBreakerConfig, DatabaseConfig, EngineTuning, LogLevel, LoggingConfig, PoolConfig,
};
