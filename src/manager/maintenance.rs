//! 维护操作相关方法

use super::database::Database;
use crate::error::GuardResult;
use crate::pool::{ConnectionType, OperationContext, PoolMetrics, PoolStatus, Priority};
use crate::resilience::{CircuitPhase, CircuitSnapshot};
use crate::schema::InitializationState;
use chrono::{DateTime, Utc};
use rat_logger::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// 健康检查报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// 整体是否健康：探测成功且熔断器未打开
    pub healthy: bool,
    /// 数据库路径
    pub database: String,
    /// `SELECT 1` 往返耗时
    pub latency_ms: Option<u64>,
    /// 探测失败原因
    pub error: Option<String>,
    /// 连接池状态
    pub pool: PoolStatus,
    /// 连接池累计指标
    pub metrics: PoolMetrics,
    /// 熔断器快照
    pub circuit: CircuitSnapshot,
    /// Schema 初始化状态
    pub initialization: InitializationState,
    /// 检查时间
    pub checked_at: DateTime<Utc>,
}

impl Database {
    /// 健康检查
    ///
    /// 以高优先级借一个连接执行 `SELECT 1`，不等待 Schema 初始化
    pub async fn health_check(&self) -> HealthReport {
        let context = OperationContext::new("health_check");
        let started = Instant::now();

        let probe = self
            .pool
            .execute_with_connection(
                |conn| Box::pin(async move { conn.fetch_optional("SELECT 1 AS ok", &[]).await }),
                ConnectionType::Read,
                Priority::High,
                &context,
            )
            .await;

        let (latency_ms, error) = match probe {
            Ok(_) => (
                Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)),
                None,
            ),
            Err(e) => {
                warn!("数据库健康检查失败: {}", e);
                (None, Some(e.localized_message()))
            }
        };

        let circuit = self.pool.circuit_breaker().snapshot();
        HealthReport {
            healthy: error.is_none() && circuit.phase != CircuitPhase::Open,
            database: self.config.path.display().to_string(),
            latency_ms,
            error,
            pool: self.pool.status(),
            metrics: self.pool.metrics(),
            circuit,
            initialization: self.initializer.state(),
            checked_at: Utc::now(),
        }
    }

    /// 关闭连接池
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    /// 重置熔断器与初始化状态
    ///
    /// 下一次查询会重新执行 Schema 初始化
    pub fn reset(&self) {
        self.pool.circuit_breaker().reset();
        self.initializer.reset();
        info!("数据库门面状态已重置: {}", self.config.path.display());
    }
}

/// 删除数据库文件及其 `-wal`、`-shm` 附属文件
///
/// 文件不存在或被占用时跳过，返回实际删除的文件
pub async fn remove_database_files(path: &Path) -> GuardResult<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for candidate in database_files(path) {
        match tokio::fs::remove_file(&candidate).await {
            Ok(()) => {
                debug!("已删除数据库文件: {}", candidate.display());
                removed.push(candidate);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) if is_busy(&e) => {
                warn!("数据库文件被占用，跳过删除: {} ({})", candidate.display(), e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

fn database_files(path: &Path) -> [PathBuf; 3] {
    let with_suffix = |suffix: &str| {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    };
    [path.to_path_buf(), with_suffix("-wal"), with_suffix("-shm")]
}

fn is_busy(e: &std::io::Error) -> bool {
    // 32 为 Windows 的 ERROR_SHARING_VIOLATION
    matches!(e.kind(), ErrorKind::ResourceBusy | ErrorKind::PermissionDenied)
        || e.raw_os_error() == Some(32)
}
