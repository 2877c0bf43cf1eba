//! 分类重试引擎
//!
//! 每次调用的尝试计数、耗时与退避记录都是局部状态，引擎本身无共享可变数据

use super::classifier::ErrorCategory;
use crate::config::PoolConfig;
use crate::error::{GuardError, GuardResult};
use crate::events::{DatabaseEvent, DatabaseEventKind, EventSink};
use rand::Rng;
use rat_logger::{debug, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// base * 2^(attempt-1)
    Exponential,
    /// base * attempt
    Linear,
    /// base
    Fixed,
}

/// 单个错误类别的重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    /// 退避策略
    pub strategy: BackoffStrategy,
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
}

/// 重试配置
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 尚未观察到错误时的默认尝试次数，同时作为锁竞争类别的上限
    pub max_attempts: u32,
    /// 基础延迟
    pub base_delay: Duration,
    /// 单次延迟上限
    pub max_delay: Duration,
    /// 抖动比例（0.1 表示 ±10%）
    pub jitter: f64,
}

impl RetryConfig {
    /// 由连接池配置派生，延迟上限为基础延迟的 10 倍
    pub fn from_pool_config(pool: &PoolConfig) -> Self {
        Self {
            max_attempts: pool.retry_attempts,
            base_delay: pool.retry_base_delay,
            max_delay: pool.retry_base_delay * 10,
            jitter: 0.1,
        }
    }

    /// 获取指定类别的重试策略
    pub fn policy_for(&self, category: ErrorCategory) -> CategoryPolicy {
        match category {
            ErrorCategory::RetryableLock => CategoryPolicy {
                strategy: BackoffStrategy::Exponential,
                max_attempts: self.max_attempts,
            },
            ErrorCategory::RetryableIo => CategoryPolicy {
                strategy: BackoffStrategy::Linear,
                max_attempts: 3,
            },
            ErrorCategory::RetryableResource => CategoryPolicy {
                strategy: BackoffStrategy::Exponential,
                max_attempts: 3,
            },
            ErrorCategory::Critical => CategoryPolicy {
                strategy: BackoffStrategy::Fixed,
                max_attempts: 2,
            },
            ErrorCategory::NonRetryable => CategoryPolicy {
                strategy: BackoffStrategy::Fixed,
                max_attempts: 1,
            },
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_pool_config(&PoolConfig::default())
    }
}

/// 操作上下文，贯穿重试、连接池与事件
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// 操作名
    pub operation: String,
    /// 请求ID
    pub request_id: String,
}

impl OperationContext {
    /// 创建上下文并生成新的请求ID
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// 使用调用方提供的请求ID
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// 一次带重试调用的结果
#[derive(Debug)]
pub struct RetryResult<T> {
    /// 是否成功
    pub success: bool,
    /// 成功时的返回值
    pub result: Option<T>,
    /// 失败时的最终错误
    pub error: Option<GuardError>,
    /// 实际尝试次数
    pub attempts: u32,
    /// 总耗时
    pub total_elapsed: Duration,
    /// 每次重试前等待的时长
    pub delays: Vec<Duration>,
    /// 最后一次失败的类别
    pub last_category: Option<ErrorCategory>,
}

impl<T> RetryResult<T> {
    /// 转换为普通结果
    pub fn into_result(self) -> GuardResult<T> {
        match (self.result, self.error) {
            (Some(value), _) => Ok(value),
            (None, Some(err)) => Err(err),
            (None, None) => Err(crate::quick_error!(query, "重试结束但没有结果")),
        }
    }
}

/// 计算第 `attempt` 次失败后的退避时长（不含抖动）
///
/// `attempt` 从 1 开始，结果不超过 `max_delay`
pub fn calculate_delay(
    strategy: BackoffStrategy,
    base: Duration,
    attempt: u32,
    max_delay: Duration,
) -> Duration {
    let attempt = attempt.max(1);
    let raw = match strategy {
        BackoffStrategy::Exponential => {
            let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
            base.checked_mul(factor).unwrap_or(max_delay)
        }
        BackoffStrategy::Linear => base.checked_mul(attempt).unwrap_or(max_delay),
        BackoffStrategy::Fixed => base,
    };
    raw.min(max_delay)
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
    delay.mul_f64(factor.max(0.0))
}

/// 重试引擎
#[derive(Clone)]
pub struct RetryEngine {
    config: RetryConfig,
    events: Arc<dyn EventSink>,
}

impl RetryEngine {
    /// 创建重试引擎
    pub fn new(config: RetryConfig, events: Arc<dyn EventSink>) -> Self {
        Self { config, events }
    }

    /// 当前配置
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 执行操作，按错误类别退避重试
    ///
    /// `op` 接收当前尝试序号（从 1 开始）
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        mut op: F,
        context: &OperationContext,
    ) -> RetryResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = GuardResult<T>>,
    {
        let started = Instant::now();
        let mut delays = Vec::new();
        let mut last_category = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let err = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            "操作 {} 第{}次尝试成功 (请求ID={})",
                            context.operation, attempt, context.request_id
                        );
                    }
                    return RetryResult {
                        success: true,
                        result: Some(value),
                        error: None,
                        attempts: attempt,
                        total_elapsed: started.elapsed(),
                        delays,
                        last_category,
                    };
                }
                Err(err) => err,
            };

            let category = err.category();
            last_category = Some(category);
            let policy = self.config.policy_for(category);

            if !category.is_retryable() || attempt >= policy.max_attempts {
                if category.is_retryable() {
                    warn!(
                        "操作 {} 重试{}次后仍失败 [{}]: {}",
                        context.operation, attempt, category, err
                    );
                } else {
                    debug!("操作 {} 遇到不可重试错误: {}", context.operation, err);
                }
                return RetryResult {
                    success: false,
                    result: None,
                    error: Some(err),
                    attempts: attempt,
                    total_elapsed: started.elapsed(),
                    delays,
                    last_category,
                };
            }

            let delay = apply_jitter(
                calculate_delay(policy.strategy, self.config.base_delay, attempt, self.config.max_delay),
                self.config.jitter,
            );
            delays.push(delay);

            if category == ErrorCategory::RetryableLock {
                self.events.emit(
                    DatabaseEvent::new(DatabaseEventKind::LockDetected, context.operation.clone())
                        .with_duration(delay)
                        .with_metadata(serde_json::json!({
                            "attempt": attempt,
                            "request_id": context.request_id,
                            "error": err.to_string(),
                        }))
                        .failed(),
                );
            } else {
                debug!(
                    "操作 {} 第{}次尝试失败 [{}]，{:?}后重试: {}",
                    context.operation, attempt, category, delay, err
                );
            }

            tokio::time::sleep(delay).await;
        }
    }

    /// 执行操作，失败时直接返回最终错误
    pub async fn execute<T, F, Fut>(&self, op: F, context: &OperationContext) -> GuardResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = GuardResult<T>>,
    {
        self.execute_with_retry(op, context).await.into_result()
    }
}
