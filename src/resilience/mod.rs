//! 韧性组件
//!
//! 错误分类、分类重试与熔断器。三者互不持有对方，由连接池负责组合

mod circuit;
mod classifier;
mod retry;

pub use circuit::{CircuitBreaker, CircuitPhase, CircuitSnapshot};
pub use classifier::{classify, classify_message, ErrorCategory};
pub use retry::{
    calculate_delay, BackoffStrategy, CategoryPolicy, OperationContext, RetryConfig, RetryEngine,
    RetryResult,
};
