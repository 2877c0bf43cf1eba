//! Schema 模块
//!
//! Schema 定义与一次性初始化协调器

pub mod definition;
pub mod initializer;

pub use definition::{split_statements, ColumnUpgrade, SchemaDefinition};
pub use initializer::{InitializationReport, InitializationState, SchemaInitializer};
