//! 引擎错误定义
//!
//! 将 SQLite 的结果码整理为显式的标签联合，分类器优先匹配错误码，
//! 只有拿不到错误码的旧式错误才回退到消息子串匹配

use serde::{Deserialize, Serialize};
use std::fmt;

/// SQLite 主结果码
///
/// 扩展结果码（如 `SQLITE_BUSY_SNAPSHOT` = 517）按 `code & 0xff` 折叠为主结果码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqliteErrorCode {
    /// SQLITE_ERROR (1)
    Error,
    /// SQLITE_INTERNAL (2)
    Internal,
    /// SQLITE_PERM (3)
    Perm,
    /// SQLITE_ABORT (4)
    Abort,
    /// SQLITE_BUSY (5)
    Busy,
    /// SQLITE_LOCKED (6)
    Locked,
    /// SQLITE_NOMEM (7)
    NoMem,
    /// SQLITE_READONLY (8)
    ReadOnly,
    /// SQLITE_INTERRUPT (9)
    Interrupt,
    /// SQLITE_IOERR (10)
    IoErr,
    /// SQLITE_CORRUPT (11)
    Corrupt,
    /// SQLITE_FULL (13)
    Full,
    /// SQLITE_CANTOPEN (14)
    CantOpen,
    /// SQLITE_CONSTRAINT (19)
    Constraint,
    /// SQLITE_MISUSE (21)
    Misuse,
    /// SQLITE_AUTH (23)
    Auth,
    /// SQLITE_NOTADB (26)
    NotADb,
    /// 其他未单独列出的结果码
    Other(i32),
}

impl SqliteErrorCode {
    /// 从数值结果码构造（支持扩展结果码）
    pub fn from_code(code: i32) -> Self {
        match code & 0xff {
            1 => SqliteErrorCode::Error,
            2 => SqliteErrorCode::Internal,
            3 => SqliteErrorCode::Perm,
            4 => SqliteErrorCode::Abort,
            5 => SqliteErrorCode::Busy,
            6 => SqliteErrorCode::Locked,
            7 => SqliteErrorCode::NoMem,
            8 => SqliteErrorCode::ReadOnly,
            9 => SqliteErrorCode::Interrupt,
            10 => SqliteErrorCode::IoErr,
            11 => SqliteErrorCode::Corrupt,
            13 => SqliteErrorCode::Full,
            14 => SqliteErrorCode::CantOpen,
            19 => SqliteErrorCode::Constraint,
            21 => SqliteErrorCode::Misuse,
            23 => SqliteErrorCode::Auth,
            26 => SqliteErrorCode::NotADb,
            _ => SqliteErrorCode::Other(code),
        }
    }

    /// 从字符串形式的错误码解析
    ///
    /// sqlx 以字符串返回数值结果码，部分驱动则返回 `SQLITE_BUSY` 这样的符号名
    pub fn parse(code: &str) -> Option<Self> {
        let trimmed = code.trim();
        if let Ok(numeric) = trimmed.parse::<i32>() {
            return Some(Self::from_code(numeric));
        }

        let upper = trimmed.to_ascii_uppercase();
        let name = upper.strip_prefix("SQLITE_").unwrap_or(&upper);
        // 扩展码的符号名形如 BUSY_SNAPSHOT，只看主名
        let primary = name.split('_').next().unwrap_or(name);
        let parsed = match primary {
            "ERROR" => SqliteErrorCode::Error,
            "INTERNAL" => SqliteErrorCode::Internal,
            "PERM" => SqliteErrorCode::Perm,
            "ABORT" => SqliteErrorCode::Abort,
            "BUSY" => SqliteErrorCode::Busy,
            "LOCKED" => SqliteErrorCode::Locked,
            "NOMEM" => SqliteErrorCode::NoMem,
            "READONLY" => SqliteErrorCode::ReadOnly,
            "INTERRUPT" => SqliteErrorCode::Interrupt,
            "IOERR" => SqliteErrorCode::IoErr,
            "CORRUPT" => SqliteErrorCode::Corrupt,
            "FULL" => SqliteErrorCode::Full,
            "CANTOPEN" => SqliteErrorCode::CantOpen,
            "CONSTRAINT" => SqliteErrorCode::Constraint,
            "MISUSE" => SqliteErrorCode::Misuse,
            "AUTH" => SqliteErrorCode::Auth,
            "NOTADB" => SqliteErrorCode::NotADb,
            _ => return None,
        };
        Some(parsed)
    }

    /// 获取错误码的符号名
    pub fn as_str(&self) -> &'static str {
        match self {
            SqliteErrorCode::Error => "SQLITE_ERROR",
            SqliteErrorCode::Internal => "SQLITE_INTERNAL",
            SqliteErrorCode::Perm => "SQLITE_PERM",
            SqliteErrorCode::Abort => "SQLITE_ABORT",
            SqliteErrorCode::Busy => "SQLITE_BUSY",
            SqliteErrorCode::Locked => "SQLITE_LOCKED",
            SqliteErrorCode::NoMem => "SQLITE_NOMEM",
            SqliteErrorCode::ReadOnly => "SQLITE_READONLY",
            SqliteErrorCode::Interrupt => "SQLITE_INTERRUPT",
            SqliteErrorCode::IoErr => "SQLITE_IOERR",
            SqliteErrorCode::Corrupt => "SQLITE_CORRUPT",
            SqliteErrorCode::Full => "SQLITE_FULL",
            SqliteErrorCode::CantOpen => "SQLITE_CANTOPEN",
            SqliteErrorCode::Constraint => "SQLITE_CONSTRAINT",
            SqliteErrorCode::Misuse => "SQLITE_MISUSE",
            SqliteErrorCode::Auth => "SQLITE_AUTH",
            SqliteErrorCode::NotADb => "SQLITE_NOTADB",
            SqliteErrorCode::Other(_) => "SQLITE_OTHER",
        }
    }
}

impl fmt::Display for SqliteErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqliteErrorCode::Other(code) => write!(f, "SQLITE_OTHER({})", code),
            other => f.write_str(other.as_str()),
        }
    }
}

/// 底层引擎错误
///
/// `code` 为空表示无类型的旧式错误，只能依靠消息文本分类
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// 引擎错误码
    pub code: Option<SqliteErrorCode>,
    /// 错误消息
    pub message: String,
}

impl EngineError {
    /// 创建带错误码的引擎错误
    pub fn new(code: SqliteErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// 创建无错误码的引擎错误
    pub fn untyped(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// 是否为语句本身的错误（语法、约束、对象不存在、事务嵌套等）
    ///
    /// 这类错误与数据库健康无关，重试也不会成功
    pub fn is_statement_error(&self) -> bool {
        match self.code {
            Some(SqliteErrorCode::Constraint | SqliteErrorCode::Misuse | SqliteErrorCode::Abort) => true,
            Some(SqliteErrorCode::Error) | None => is_statement_message(&self.message),
            Some(_) => false,
        }
    }

    /// 是否为"已存在"类错误（表、索引、列重复创建）
    pub fn is_already_exists(&self) -> bool {
        let msg = self.message.to_lowercase();
        msg.contains("already exists") || msg.contains("duplicate column")
    }
}

/// SQLITE_ERROR 下常见的语句级错误消息
const STATEMENT_ERROR_PATTERNS: &[&str] = &[
    "syntax error",
    "no such ",
    "constraint failed",
    "already exists",
    "duplicate column",
    "has no column",
    "within a transaction",
    "no transaction is active",
    "incomplete input",
    "unrecognized token",
    "wrong number of arguments",
    "datatype mismatch",
    "values were supplied",
];

pub(crate) fn is_statement_message(message: &str) -> bool {
    let msg = message.to_lowercase();
    STATEMENT_ERROR_PATTERNS.iter().any(|p| msg.contains(p))
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().and_then(|c| SqliteErrorCode::parse(&c));
                Self {
                    code,
                    message: db_err.message().to_string(),
                }
            }
            sqlx::Error::Io(io_err) => Self::new(SqliteErrorCode::IoErr, io_err.to_string()),
            _ => Self::untyped(err.to_string()),
        }
    }
}
