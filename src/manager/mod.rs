//! 数据库门面模块
//!
//! `Database` 组装连接池与 Schema 初始化协调器；本模块另外持有一个
//! 进程级实例，供不方便传递句柄的调用方使用

mod database;
mod maintenance;

pub use database::Database;
pub use maintenance::{remove_database_files, HealthReport};

use crate::config::DatabaseConfig;
use crate::error::GuardResult;
use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rat_logger::info;
use std::sync::Arc;

/// 全局数据库实例
static GLOBAL_DATABASE: Lazy<ArcSwapOption<Database>> = Lazy::new(ArcSwapOption::empty);

/// 串行化全局实例的构造
static GLOBAL_INIT_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// 获取全局数据库实例，首次调用时用给定配置构造
///
/// 实例已存在时忽略 `config`
pub fn get_or_init_database(config: DatabaseConfig) -> GuardResult<Arc<Database>> {
    if let Some(db) = GLOBAL_DATABASE.load_full() {
        return Ok(db);
    }

    let _guard = GLOBAL_INIT_LOCK.lock();
    if let Some(db) = GLOBAL_DATABASE.load_full() {
        return Ok(db);
    }

    let db = Arc::new(Database::new(config)?);
    GLOBAL_DATABASE.store(Some(Arc::clone(&db)));
    info!("全局数据库实例已创建: {}", db.config().path.display());
    Ok(db)
}

/// 当前的全局数据库实例
pub fn global_database() -> Option<Arc<Database>> {
    GLOBAL_DATABASE.load_full()
}

/// 关闭并清除全局实例，删除数据库文件及 WAL/SHM 附属文件
///
/// 没有全局实例时什么都不做
pub async fn reset_global_database() -> GuardResult<()> {
    let Some(db) = GLOBAL_DATABASE.swap(None) else {
        return Ok(());
    };

    db.shutdown().await;
    db.reset();

    if !db.config().is_memory() {
        let removed = remove_database_files(&db.config().path).await?;
        info!("全局数据库已重置，删除文件 {} 个", removed.len());
    }
    Ok(())
}
