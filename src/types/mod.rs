//! 通用数据类型
//!
//! 查询参数、结果行以及序列化辅助

pub mod data_value;
pub mod serde_helpers;

pub use data_value::{DataValue, ExecuteResult, Row};
