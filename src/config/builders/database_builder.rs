//! # 数据库配置构建器模块
//!
//! 提供数据库配置的构建器实现，数据库路径必须显式设置

use crate::config::core::{
    CircuitBreakerConfig, DatabaseConfig, EngineTuning, LoggingConfig, PoolConfig,
};
use crate::error::GuardResult;
use rat_logger::info;
use std::path::PathBuf;

/// 数据库配置构建器
#[derive(Debug)]
pub struct DatabaseConfigBuilder {
    path: Option<PathBuf>,
    create_if_missing: Option<bool>,
    pool: Option<PoolConfig>,
    circuit: Option<CircuitBreakerConfig>,
    engine: Option<EngineTuning>,
    logging: Option<LoggingConfig>,
}

impl DatabaseConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            path: None,
            create_if_missing: None,
            pool: None,
            circuit: None,
            engine: None,
            logging: None,
        }
    }

    /// 设置数据库文件路径
    ///
    /// # 参数
    ///
    /// * `path` - 数据库文件路径，`:memory:` 表示内存数据库
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// 设置文件不存在时是否创建
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = Some(create);
        self
    }

    /// 设置连接池配置
    ///
    /// # 参数
    ///
    /// * `pool` - 连接池配置
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = Some(pool);
        self
    }

    /// 设置熔断器配置
    pub fn circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = Some(circuit);
        self
    }

    /// 设置引擎调优参数
    pub fn engine(mut self, engine: EngineTuning) -> Self {
        self.engine = Some(engine);
        self
    }

    /// 设置日志配置
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// 构建数据库配置
    ///
    /// # 错误
    ///
    /// 未设置数据库路径或任一子配置不合理时返回错误
    pub fn build(self) -> GuardResult<DatabaseConfig> {
        let path = self
            .path
            .ok_or_else(|| crate::quick_error!(config, "数据库路径必须设置"))?;

        let config = DatabaseConfig {
            path,
            create_if_missing: self.create_if_missing.unwrap_or(true),
            pool: self.pool.unwrap_or_default(),
            circuit: self.circuit.unwrap_or_default(),
            engine: self.engine.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
        };

        config.validate()?;

        info!(
            "创建数据库配置: 路径={:?}, 最大连接数={}",
            config.path, config.pool.max_connections
        );

        Ok(config)
    }
}

impl Default for DatabaseConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_is_required() {
        assert!(DatabaseConfig::builder().build().is_err());
        assert!(DatabaseConfig::builder().path("").build().is_err());

        let config = DatabaseConfig::builder().path(":memory:").build().unwrap();
        assert!(config.is_memory());
        assert!(config.create_if_missing);
    }
}
