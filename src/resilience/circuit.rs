//! 熔断器
//!
//! 三种状态：
//! - Closed：正常放行
//! - Open：快速拒绝，直到距最后一次失败超过恢复时间
//! - HalfOpen：放行探测请求，连续成功达到阈值后关闭，任一失败立即重新打开
//!
//! 所有计数器放在同一把 `parking_lot::Mutex` 后面，状态迁移只发生在
//! `can_execute` / `record_success` / `record_failure` / `reset` 中

use super::classifier::ErrorCategory;
use crate::config::CircuitBreakerConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rat_logger::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// 熔断器阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitPhase {
    /// 正常
    Closed,
    /// 拒绝
    Open,
    /// 探测
    HalfOpen,
}

#[derive(Debug)]
struct CircuitState {
    phase: CircuitPhase,
    consecutive_failures: u32,
    critical_failure_count: u32,
    failures_by_category: HashMap<ErrorCategory, u64>,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    half_open_successes: u32,
    total_failures: u64,
    total_successes: u64,
    times_opened: u64,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            phase: CircuitPhase::Closed,
            consecutive_failures: 0,
            critical_failure_count: 0,
            failures_by_category: HashMap::new(),
            last_failure: None,
            last_failure_at: None,
            last_success_at: None,
            half_open_successes: 0,
            total_failures: 0,
            total_successes: 0,
            times_opened: 0,
        }
    }

    fn open(&mut self) {
        if self.phase != CircuitPhase::Open {
            self.times_opened += 1;
        }
        self.phase = CircuitPhase::Open;
        self.half_open_successes = 0;
    }

    fn close(&mut self) {
        self.phase = CircuitPhase::Closed;
        self.consecutive_failures = 0;
        self.critical_failure_count = 0;
        self.failures_by_category.clear();
        self.half_open_successes = 0;
    }
}

/// 熔断器状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    /// 当前阶段
    pub phase: CircuitPhase,
    /// 连续失败次数
    pub consecutive_failures: u32,
    /// 严重错误次数
    pub critical_failure_count: u32,
    /// 各类别失败次数
    pub failures_by_category: HashMap<ErrorCategory, u64>,
    /// 最后一次失败时间
    pub last_failure_at: Option<DateTime<Utc>>,
    /// 最后一次成功时间
    pub last_success_at: Option<DateTime<Utc>>,
    /// 半开状态下的连续成功次数
    pub half_open_successes: u32,
    /// 累计失败次数
    pub total_failures: u64,
    /// 累计成功次数
    pub total_successes: u64,
    /// 累计打开次数
    pub times_opened: u64,
}

/// 熔断器
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    /// 创建熔断器，初始为 Closed
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CircuitState::new()),
        }
    }

    /// 是否允许执行
    ///
    /// Open 状态下超过恢复时间会迁移到 HalfOpen 并放行
    pub fn can_execute(&self) -> bool {
        let mut state = self.state.lock();
        match state.phase {
            CircuitPhase::Closed | CircuitPhase::HalfOpen => true,
            CircuitPhase::Open => {
                let recovered = state
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    state.phase = CircuitPhase::HalfOpen;
                    state.half_open_successes = 0;
                    info!("熔断器进入半开状态，开始探测");
                }
                recovered
            }
        }
    }

    /// 记录一次成功
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.total_successes += 1;
        state.last_success_at = Some(Utc::now());

        match state.phase {
            CircuitPhase::HalfOpen => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.success_threshold {
                    state.close();
                    info!("熔断器探测成功，恢复为关闭状态");
                }
            }
            CircuitPhase::Closed => {
                // 逐步恢复：每次成功抵消一次失败
                state.consecutive_failures = state.consecutive_failures.saturating_sub(1);
            }
            CircuitPhase::Open => {}
        }
    }

    /// 记录一次失败
    pub fn record_failure(&self, category: ErrorCategory) {
        let mut state = self.state.lock();
        state.total_failures += 1;
        state.consecutive_failures += 1;
        *state.failures_by_category.entry(category).or_insert(0) += 1;
        state.last_failure = Some(Instant::now());
        state.last_failure_at = Some(Utc::now());

        if category == ErrorCategory::Critical {
            state.critical_failure_count += 1;
        }

        match state.phase {
            CircuitPhase::HalfOpen => {
                state.open();
                warn!("熔断器探测失败 [{}]，重新打开", category);
            }
            CircuitPhase::Closed => {
                if category == ErrorCategory::Critical
                    && state.critical_failure_count >= self.config.critical_error_threshold
                {
                    state.open();
                    warn!(
                        "严重错误达到{}次，熔断器立即打开",
                        state.critical_failure_count
                    );
                } else if state.consecutive_failures >= self.config.failure_threshold {
                    state.open();
                    warn!(
                        "连续失败{}次，熔断器打开（最后一次: {}）",
                        state.consecutive_failures, category
                    );
                }
            }
            CircuitPhase::Open => {}
        }
    }

    /// 当前阶段
    pub fn phase(&self) -> CircuitPhase {
        self.state.lock().phase
    }

    /// Open 状态下距离允许探测的剩余时间，其他状态返回零
    pub fn remaining_open_time(&self) -> Duration {
        let state = self.state.lock();
        match (state.phase, state.last_failure) {
            (CircuitPhase::Open, Some(at)) => self.config.recovery_timeout.saturating_sub(at.elapsed()),
            _ => Duration::ZERO,
        }
    }

    /// 状态快照
    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock();
        CircuitSnapshot {
            phase: state.phase,
            consecutive_failures: state.consecutive_failures,
            critical_failure_count: state.critical_failure_count,
            failures_by_category: state.failures_by_category.clone(),
            last_failure_at: state.last_failure_at,
            last_success_at: state.last_success_at,
            half_open_successes: state.half_open_successes,
            total_failures: state.total_failures,
            total_successes: state.total_successes,
            times_opened: state.times_opened,
        }
    }

    /// 重置为初始状态（包括累计统计）
    pub fn reset(&self) {
        *self.state.lock() = CircuitState::new();
        info!("熔断器已重置");
    }

    /// 配置
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}
