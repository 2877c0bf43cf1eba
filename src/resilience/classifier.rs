//! 错误分类器
//!
//! 纯函数：优先看引擎错误码，拿不到错误码时按消息子串匹配

use crate::adapter::{is_statement_message, EngineError, SqliteErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// 锁竞争（BUSY / LOCKED）
    RetryableLock,
    /// 瞬时 IO 错误
    RetryableIo,
    /// 资源耗尽（内存、磁盘）
    RetryableResource,
    /// 严重错误（数据库损坏）
    Critical,
    /// 不可重试（只读、权限、无法打开）
    NonRetryable,
}

impl ErrorCategory {
    /// 全部类别
    pub const ALL: [ErrorCategory; 5] = [
        ErrorCategory::RetryableLock,
        ErrorCategory::RetryableIo,
        ErrorCategory::RetryableResource,
        ErrorCategory::Critical,
        ErrorCategory::NonRetryable,
    ];

    /// 是否值得重试
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorCategory::NonRetryable)
    }

    /// 类别名称
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::RetryableLock => "RETRYABLE_LOCK",
            ErrorCategory::RetryableIo => "RETRYABLE_IO",
            ErrorCategory::RetryableResource => "RETRYABLE_RESOURCE",
            ErrorCategory::Critical => "CRITICAL",
            ErrorCategory::NonRetryable => "NON_RETRYABLE",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 对引擎错误分类
pub fn classify(error: &EngineError) -> ErrorCategory {
    match error.code {
        Some(code) => classify_code(code).unwrap_or_else(|| classify_message(&error.message)),
        None => classify_message(&error.message),
    }
}

/// 按错误码分类；返回 `None` 表示错误码本身不足以判断
fn classify_code(code: SqliteErrorCode) -> Option<ErrorCategory> {
    match code {
        SqliteErrorCode::Busy | SqliteErrorCode::Locked => Some(ErrorCategory::RetryableLock),
        SqliteErrorCode::IoErr | SqliteErrorCode::Interrupt => Some(ErrorCategory::RetryableIo),
        SqliteErrorCode::NoMem | SqliteErrorCode::Full => Some(ErrorCategory::RetryableResource),
        SqliteErrorCode::Corrupt | SqliteErrorCode::NotADb => Some(ErrorCategory::Critical),
        SqliteErrorCode::ReadOnly
        | SqliteErrorCode::CantOpen
        | SqliteErrorCode::Perm
        | SqliteErrorCode::Auth
        | SqliteErrorCode::Constraint
        | SqliteErrorCode::Misuse
        | SqliteErrorCode::Abort => Some(ErrorCategory::NonRetryable),
        // SQLITE_ERROR 之类的通用码，交给消息匹配
        _ => None,
    }
}

/// 按消息文本分类（大小写不敏感）
///
/// 语句级错误（语法、约束、对象不存在）不可重试；无法识别的消息按锁竞争处理
pub fn classify_message(message: &str) -> ErrorCategory {
    let msg = message.to_lowercase();

    // 先于锁匹配：`no such table: locked_items` 这类消息不是锁竞争
    if is_statement_message(&msg) {
        ErrorCategory::NonRetryable
    } else if msg.contains("database is locked") || msg.contains("busy") || msg.contains("locked") {
        ErrorCategory::RetryableLock
    } else if msg.contains("disk i/o error") || msg.contains("interrupted") {
        ErrorCategory::RetryableIo
    } else if msg.contains("out of memory") || msg.contains("database or disk is full") {
        ErrorCategory::RetryableResource
    } else if msg.contains("malformed") || msg.contains("not a database") {
        ErrorCategory::Critical
    } else if msg.contains("readonly")
        || msg.contains("read-only")
        || msg.contains("unable to open")
        || msg.contains("permission denied")
    {
        ErrorCategory::NonRetryable
    } else {
        ErrorCategory::RetryableLock
    }
}
