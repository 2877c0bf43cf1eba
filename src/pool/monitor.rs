//! 连接池后台巡检
//!
//! 定期回收超时空闲连接，发现长时间占用的连接，并在利用率或排队过高时告警

use super::pool::{IdleConnection, PoolInner};
use super::types::{PoolCounters, PoolStatus};
use crate::events::{DatabaseEvent, DatabaseEventKind};
use rat_logger::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// 巡检告警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolAlert {
    /// 利用率超过阈值
    HighUtilization { utilization: f64 },
    /// 排队请求过多
    QueueBacklog { queued: usize },
    /// 连接被占用过久
    LongRunningConnection { id: u64, active_ms: u64 },
}

/// 一次巡检的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorReport {
    /// 本次关闭的空闲连接数
    pub closed_idle: usize,
    /// 巡检结束时的连接池状态
    pub status: PoolStatus,
    /// 触发的告警
    pub alerts: Vec<PoolAlert>,
}

/// 启动巡检任务
///
/// 任务只持有弱引用，连接池释放后自动退出；不在运行时内时返回 None
pub(super) fn spawn_monitor(pool: Weak<PoolInner>, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        return None;
    }
    let handle = tokio::runtime::Handle::try_current().ok()?;

    Some(handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即返回，跳过
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(pool) = pool.upgrade() else {
                debug!("连接池已释放，巡检任务退出");
                break;
            };
            if pool.is_shutting_down() {
                break;
            }
            pool.sweep().await;
        }
    }))
}

impl PoolInner {
    pub(super) async fn sweep(&self) -> MonitorReport {
        let now = Instant::now();

        let (expired, long_running) = {
            let mut state = self.state.lock();

            let mut expired: Vec<IdleConnection> = Vec::new();
            let mut kept = std::collections::VecDeque::with_capacity(state.available.len());
            while let Some(idle) = state.available.pop_front() {
                if now.duration_since(idle.idle_since) >= self.config.idle_timeout {
                    expired.push(idle);
                } else {
                    kept.push_back(idle);
                }
            }
            state.available = kept;
            for idle in &expired {
                state.connections.remove(&idle.id);
            }

            let long_running: Vec<(u64, Duration)> = state
                .connections
                .values()
                .filter(|record| record.status.is_active())
                .filter_map(|record| {
                    let active = now.duration_since(record.acquired_at?);
                    (active >= self.config.long_running_threshold).then_some((record.id, active))
                })
                .collect();

            (expired, long_running)
        };

        let closed_idle = expired.len();
        for idle in expired {
            PoolCounters::incr(&self.counters.connections_closed);
            self.emit(
                DatabaseEvent::new(DatabaseEventKind::ConnectionClosed, "idle_timeout")
                    .with_connection(idle.id)
                    .with_duration(now.duration_since(idle.idle_since)),
            );
            if let Err(e) = idle.conn.close().await {
                debug!("关闭空闲连接 {} 时出错: {}", idle.id, e);
            }
        }
        if closed_idle > 0 {
            debug!("回收空闲连接 {} 个", closed_idle);
        }

        let status = self.status();
        let mut alerts = Vec::new();

        let utilization = status.utilization();
        if utilization > self.config.utilization_alert_threshold {
            alerts.push(PoolAlert::HighUtilization { utilization });
        }
        if status.queued > self.config.queue_alert_threshold {
            alerts.push(PoolAlert::QueueBacklog {
                queued: status.queued,
            });
        }
        for (id, active) in long_running {
            alerts.push(PoolAlert::LongRunningConnection {
                id,
                active_ms: u64::try_from(active.as_millis()).unwrap_or(u64::MAX),
            });
        }

        self.emit(
            DatabaseEvent::new(DatabaseEventKind::MonitoringSnapshot, "monitor").with_metadata(
                serde_json::json!({
                    "status": status,
                    "metrics": self.counters.snapshot(),
                    "closed_idle": closed_idle,
                }),
            ),
        );

        for alert in &alerts {
            match alert {
                PoolAlert::HighUtilization { utilization } => {
                    warn!("连接池利用率过高: {:.0}%", utilization * 100.0)
                }
                PoolAlert::QueueBacklog { queued } => {
                    warn!("等待队列积压: {} 个请求", queued)
                }
                PoolAlert::LongRunningConnection { id, active_ms } => {
                    warn!("连接 {} 已占用 {}ms，可能存在长事务", id, active_ms)
                }
            }
            self.emit(
                DatabaseEvent::new(DatabaseEventKind::PoolAlert, "monitor")
                    .with_metadata(serde_json::to_value(alert).unwrap_or_default()),
            );
        }

        MonitorReport {
            closed_idle,
            status,
            alerts,
        }
    }
}
