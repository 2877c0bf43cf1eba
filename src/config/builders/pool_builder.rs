//! # 连接池配置构建器模块
//!
//! 提供连接池与熔断器配置的构建器实现，支持链式调用；
//! 未显式设置的项使用文档约定的默认值

use crate::config::core::{CircuitBreakerConfig, PoolConfig};
use crate::error::GuardResult;
use rat_logger::info;
use std::time::Duration;

/// 连接池配置构建器
#[derive(Debug)]
pub struct PoolConfigBuilder {
    max_connections: Option<u32>,
    connection_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    retry_attempts: Option<u32>,
    retry_base_delay: Option<Duration>,
    monitor_interval: Option<Duration>,
    long_running_threshold: Option<Duration>,
    queue_alert_threshold: Option<usize>,
    utilization_alert_threshold: Option<f64>,
}

impl PoolConfig {
    /// 创建连接池配置构建器
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }
}

impl PoolConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            max_connections: None,
            connection_timeout: None,
            idle_timeout: None,
            retry_attempts: None,
            retry_base_delay: None,
            monitor_interval: None,
            long_running_threshold: None,
            queue_alert_threshold: None,
            utilization_alert_threshold: None,
        }
    }

    /// 设置最大连接数
    ///
    /// # 参数
    ///
    /// * `max_connections` - 最大连接数
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = Some(max_connections);
        self
    }

    /// 设置获取连接的最长等待时间
    ///
    /// # 参数
    ///
    /// * `timeout` - 等待时间
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// 设置空闲连接超时时间
    ///
    /// # 参数
    ///
    /// * `timeout` - 空闲超时时间
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// 设置重试次数（含首次执行）
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// 设置重试基础延迟
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    /// 设置巡检间隔
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = Some(interval);
        self
    }

    /// 设置长时间占用告警阈值
    pub fn long_running_threshold(mut self, threshold: Duration) -> Self {
        self.long_running_threshold = Some(threshold);
        self
    }

    /// 设置等待队列长度告警阈值
    pub fn queue_alert_threshold(mut self, threshold: usize) -> Self {
        self.queue_alert_threshold = Some(threshold);
        self
    }

    /// 设置利用率告警阈值（0.0 - 1.0）
    pub fn utilization_alert_threshold(mut self, threshold: f64) -> Self {
        self.utilization_alert_threshold = Some(threshold);
        self
    }

    /// 构建连接池配置
    ///
    /// # 错误
    ///
    /// 配置项取值不合理时返回配置错误
    pub fn build(self) -> GuardResult<PoolConfig> {
        let defaults = PoolConfig::default();
        let config = PoolConfig {
            max_connections: self.max_connections.unwrap_or(defaults.max_connections),
            connection_timeout: self.connection_timeout.unwrap_or(defaults.connection_timeout),
            idle_timeout: self.idle_timeout.unwrap_or(defaults.idle_timeout),
            retry_attempts: self.retry_attempts.unwrap_or(defaults.retry_attempts),
            retry_base_delay: self.retry_base_delay.unwrap_or(defaults.retry_base_delay),
            monitor_interval: self.monitor_interval.unwrap_or(defaults.monitor_interval),
            long_running_threshold: self
                .long_running_threshold
                .unwrap_or(defaults.long_running_threshold),
            queue_alert_threshold: self
                .queue_alert_threshold
                .unwrap_or(defaults.queue_alert_threshold),
            utilization_alert_threshold: self
                .utilization_alert_threshold
                .unwrap_or(defaults.utilization_alert_threshold),
        };

        config.validate()?;

        info!(
            "创建连接池配置: 最大连接数={}, 连接超时={:?}, 重试次数={}",
            config.max_connections, config.connection_timeout, config.retry_attempts
        );

        Ok(config)
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 熔断器配置构建器
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<u32>,
    recovery_timeout: Option<Duration>,
    success_threshold: Option<u32>,
    critical_error_threshold: Option<u32>,
}

impl CircuitBreakerConfig {
    /// 创建熔断器配置构建器
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }
}

impl CircuitBreakerConfigBuilder {
    /// 设置连续失败阈值
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// 设置恢复等待时间
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = Some(timeout);
        self
    }

    /// 设置半开状态下的成功阈值
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    /// 设置严重错误阈值
    pub fn critical_error_threshold(mut self, threshold: u32) -> Self {
        self.critical_error_threshold = Some(threshold);
        self
    }

    /// 构建熔断器配置
    pub fn build(self) -> GuardResult<CircuitBreakerConfig> {
        let defaults = CircuitBreakerConfig::default();
        let config = CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            recovery_timeout: self.recovery_timeout.unwrap_or(defaults.recovery_timeout),
            success_threshold: self.success_threshold.unwrap_or(defaults.success_threshold),
            critical_error_threshold: self
                .critical_error_threshold
                .unwrap_or(defaults.critical_error_threshold),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_fields_fall_back_to_defaults() {
        let config = PoolConfig::builder().max_connections(3).build().unwrap();
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.connection_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_attempts, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(PoolConfig::builder().max_connections(0).build().is_err());
        assert!(PoolConfig::builder().utilization_alert_threshold(1.5).build().is_err());
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
    }
}
