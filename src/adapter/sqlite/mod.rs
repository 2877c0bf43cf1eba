//! SQLite 引擎实现（基于 sqlx）

mod connection;
mod data_conversion;
mod factory;

pub use connection::SqliteEngineConnection;
pub use factory::SqliteConnectionFactory;
