//! 遥测事件
//!
//! 连接池与重试引擎只向 `EventSink` 投递事件，不关心事件最终写到哪里

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rat_logger::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseEventKind {
    /// 新建连接
    ConnectionCreated,
    /// 连接被借出
    ConnectionAcquired,
    /// 连接被归还
    ConnectionReleased,
    /// 连接被关闭
    ConnectionClosed,
    /// 连接创建或使用失败
    ConnectionError,
    /// 等待连接超时
    ConnectionTimeout,
    /// 检测到锁竞争
    LockDetected,
    /// 操作失败
    ErrorOccurred,
    /// 巡检快照
    MonitoringSnapshot,
    /// 巡检告警
    PoolAlert,
}

/// 数据库事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseEvent {
    /// 事件类型
    pub kind: DatabaseEventKind,
    /// 发生时间
    pub timestamp: DateTime<Utc>,
    /// 触发事件的操作名
    pub operation: String,
    /// 相关连接ID
    pub connection_id: Option<u64>,
    /// 耗时
    #[serde(with = "crate::types::serde_helpers::duration_ms_opt")]
    pub duration: Option<Duration>,
    /// 是否成功
    pub success: bool,
    /// 附加信息
    pub metadata: serde_json::Value,
}

impl DatabaseEvent {
    /// 创建成功事件
    pub fn new(kind: DatabaseEventKind, operation: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            operation: operation.into(),
            connection_id: None,
            duration: None,
            success: true,
            metadata: serde_json::Value::Null,
        }
    }

    /// 关联连接ID
    pub fn with_connection(mut self, id: u64) -> Self {
        self.connection_id = Some(id);
        self
    }

    /// 记录耗时
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// 附加信息
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// 标记为失败
    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

/// 事件接收器
pub trait EventSink: Send + Sync {
    /// 投递事件，实现方不得阻塞
    fn emit(&self, event: DatabaseEvent);
}

/// 写入 rat_logger 的默认接收器
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, event: DatabaseEvent) {
        match event.kind {
            DatabaseEventKind::PoolAlert => {
                warn!("连接池告警 [{}]: {}", event.operation, event.metadata);
            }
            DatabaseEventKind::ConnectionError
            | DatabaseEventKind::ConnectionTimeout
            | DatabaseEventKind::ErrorOccurred => {
                warn!(
                    "数据库事件 {:?} [{}] 连接={:?} 耗时={:?}: {}",
                    event.kind, event.operation, event.connection_id, event.duration, event.metadata
                );
            }
            DatabaseEventKind::LockDetected => {
                info!("检测到锁竞争 [{}]: {}", event.operation, event.metadata);
            }
            _ => {
                debug!(
                    "数据库事件 {:?} [{}] 连接={:?} 耗时={:?}",
                    event.kind, event.operation, event.connection_id, event.duration
                );
            }
        }
    }
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: DatabaseEvent) {}
}

/// 把事件保存在内存中，便于诊断和测试断言
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<DatabaseEvent>>,
}

impl MemoryEventSink {
    /// 创建空接收器
    pub fn new() -> Self {
        Self::default()
    }

    /// 已收到事件的副本
    pub fn events(&self) -> Vec<DatabaseEvent> {
        self.events.lock().clone()
    }

    /// 指定类型的事件数量
    pub fn count(&self, kind: DatabaseEventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// 清空
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: DatabaseEvent) {
        self.events.lock().push(event);
    }
}
