//! 连接池模块
//!
//! 有界连接池：空闲连接复用、按需创建、饱和时按优先级排队，
//! 获取与执行由重试引擎包裹，执行结果反馈给熔断器

pub mod types;
pub mod queue;
pub mod pool;
mod monitor;

pub use types::{
    ConnectionInfo, ConnectionStatus, ConnectionType, PoolMetrics, PoolStatus, Priority,
};
pub use queue::{WaitError, WaitQueue, Waiter};
pub use pool::{ConnectionPool, PooledConnection};
pub use monitor::{MonitorReport, PoolAlert};
pub use crate::resilience::OperationContext;
