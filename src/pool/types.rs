//! 连接池类型定义模块

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// 请求优先级，高优先级的等待者先拿到归还的连接
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// 全部优先级，按服务顺序排列
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub(crate) fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// 连接用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Read,
    Write,
    Transaction,
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// 在可用列表中
    Idle,
    /// 已借出
    Active,
    /// 已借出且处于事务中
    InTransaction,
}

impl ConnectionStatus {
    /// 是否被占用
    pub fn is_active(self) -> bool {
        self != ConnectionStatus::Idle
    }
}

/// 连接簿记记录
///
/// 底层连接句柄在可用列表和 `PooledConnection` 之间移动，这条记录始终留在池内
#[derive(Debug, Clone)]
pub(crate) struct ConnectionState {
    pub id: u64,
    pub status: ConnectionStatus,
    pub connection_type: ConnectionType,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub acquired_at: Option<Instant>,
}

impl ConnectionState {
    pub fn new(id: u64, connection_type: ConnectionType) -> Self {
        let now = Instant::now();
        Self {
            id,
            status: ConnectionStatus::Active,
            connection_type,
            created_at: now,
            last_used_at: now,
            acquired_at: Some(now),
        }
    }

    pub fn activate(&mut self, connection_type: Option<ConnectionType>) {
        let now = Instant::now();
        self.status = ConnectionStatus::Active;
        self.acquired_at = Some(now);
        self.last_used_at = now;
        if let Some(connection_type) = connection_type {
            self.connection_type = connection_type;
        }
    }

    pub fn deactivate(&mut self) {
        self.status = ConnectionStatus::Idle;
        self.acquired_at = None;
        self.last_used_at = Instant::now();
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            status: self.status,
            connection_type: self.connection_type,
            age_ms: millis(self.created_at.elapsed()),
            idle_ms: millis(self.last_used_at.elapsed()),
            active_ms: self.acquired_at.map(|at| millis(at.elapsed())),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// 单个连接的诊断信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: u64,
    pub status: ConnectionStatus,
    pub connection_type: ConnectionType,
    /// 连接存活时长
    pub age_ms: u64,
    /// 距最后一次使用的时长
    pub idle_ms: u64,
    /// 本次借出已持续的时长
    pub active_ms: Option<u64>,
}

/// 连接池状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolStatus {
    /// 可用连接数
    pub available: u32,
    /// 借出中的连接数
    pub in_use: u32,
    /// 连接总数
    pub total: u32,
    /// 正在创建的连接数
    pub pending_creates: u32,
    /// 最大连接数
    pub max: u32,
    /// 等待队列长度
    pub queued: usize,
}

impl PoolStatus {
    /// 利用率（0.0 - 1.0）
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.in_use) / f64::from(self.max)
    }

    /// 是否已达连接上限
    pub fn is_at_capacity(&self) -> bool {
        self.total + self.pending_creates >= self.max
    }
}

/// 连接池累计指标
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub creation_failures: u64,
    pub checkouts: u64,
    pub releases: u64,
    pub checkout_failures: u64,
    pub queue_waits: u64,
    pub timeouts: u64,
}

impl PoolMetrics {
    /// 借出成功率
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts + self.checkout_failures;
        if total == 0 {
            return 1.0;
        }
        self.checkouts as f64 / total as f64
    }
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub connections_created: AtomicU64,
    pub connections_closed: AtomicU64,
    pub creation_failures: AtomicU64,
    pub checkouts: AtomicU64,
    pub releases: AtomicU64,
    pub checkout_failures: AtomicU64,
    pub queue_waits: AtomicU64,
    pub timeouts: AtomicU64,
}

impl PoolCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            checkout_failures: self.checkout_failures.load(Ordering::Relaxed),
            queue_waits: self.queue_waits.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}
