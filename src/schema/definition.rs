//! Schema 定义
//!
//! 描述初始化需要执行的内容：判断 Schema 是否已存在的最小表集合、
//! 建表/建索引语句、增量列升级以及默认数据

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// 增量列升级
///
/// 只在目标表存在且缺少该列时执行 `ALTER TABLE ... ADD COLUMN`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnUpgrade {
    /// 表名
    pub table: String,
    /// 列名
    pub column: String,
    /// 列定义（类型、默认值等）
    pub definition: String,
}

impl ColumnUpgrade {
    /// 创建列升级
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            definition: definition.into(),
        }
    }

    /// 生成 ALTER TABLE 语句
    pub fn to_sql(&self) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_identifier(&self.table),
            quote_identifier(&self.column),
            self.definition
        )
    }
}

/// Schema 定义
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// 这些表都存在时视为 Schema 已就绪
    pub required_tables: Vec<String>,
    /// 建表、建索引语句，按顺序执行
    pub statements: Vec<String>,
    /// 增量列升级
    pub column_upgrades: Vec<ColumnUpgrade>,
    /// 默认数据，必须写成幂等形式（`INSERT ... WHERE NOT EXISTS`）
    pub seeds: Vec<String>,
}

impl SchemaDefinition {
    /// 创建空定义
    pub fn new<I, S>(required_tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_tables: required_tables.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// 从 SQL 脚本创建，脚本按分号拆分为单条语句
    pub fn from_script<I, S>(required_tables: I, script: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut schema = Self::new(required_tables);
        schema.statements = split_statements(script);
        schema
    }

    /// 追加一条语句
    pub fn with_statement(mut self, sql: impl Into<String>) -> Self {
        self.statements.push(sql.into());
        self
    }

    /// 追加一个列升级
    pub fn with_column_upgrade(mut self, upgrade: ColumnUpgrade) -> Self {
        self.column_upgrades.push(upgrade);
        self
    }

    /// 追加一条默认数据
    pub fn with_seed(mut self, sql: impl Into<String>) -> Self {
        self.seeds.push(sql.into());
        self
    }

    /// 应用默认 Schema：用户表、市场分析表、索引与管理员账户
    pub fn application_default() -> Self {
        Self::from_script(["users", "market_analyses"], DEFAULT_SCHEMA)
            .with_column_upgrade(ColumnUpgrade::new(
                "users",
                "role",
                "TEXT NOT NULL DEFAULT 'user'",
            ))
            .with_column_upgrade(ColumnUpgrade::new("users", "created_at", "TEXT"))
            .with_column_upgrade(ColumnUpgrade::new("market_analyses", "updated_at", "TEXT"))
            .with_seed(ADMIN_SEED)
    }
}

const DEFAULT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    hashed_password TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    created_at TEXT
);

CREATE TABLE IF NOT EXISTS market_analyses (
    id TEXT PRIMARY KEY,
    user_id INTEGER,
    product_name TEXT,
    current_price REAL,
    min_price REAL,
    max_price REAL,
    avg_price REAL,
    sales_volume INTEGER,
    competitor_count INTEGER,
    trend TEXT,
    trend_percentage REAL,
    last_updated TEXT,
    recommended_price REAL,
    market_share REAL,
    demand_level TEXT,
    competitors TEXT,
    created_at TEXT,
    updated_at TEXT,
    FOREIGN KEY (user_id) REFERENCES users (id)
);

CREATE INDEX IF NOT EXISTS idx_users_role ON users (role);
CREATE INDEX IF NOT EXISTS idx_market_analyses_user ON market_analyses (user_id);
CREATE INDEX IF NOT EXISTS idx_market_analyses_product ON market_analyses (product_name, created_at DESC);
"#;

// 密码字段为 '!'，在设置真实密码之前无法登录
const ADMIN_SEED: &str = "INSERT INTO users (username, email, hashed_password, role, created_at) \
     SELECT 'admin', 'admin@localhost', '!', 'admin', datetime('now') \
     WHERE NOT EXISTS (SELECT 1 FROM users WHERE username = 'admin')";

static INDEX_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r#"(?is)^\s*CREATE\s+(?:UNIQUE\s+)?INDEX\s+(?:IF\s+NOT\s+EXISTS\s+)?\S+\s+ON\s+["`\[]?(\w+)["`\]]?\s*\((.*)\)"#,
    )
    .ok()
});

/// 是否为 CREATE INDEX 语句
pub fn is_index_statement(sql: &str) -> bool {
    index_target(sql).is_some()
}

/// 解析 CREATE INDEX 语句引用的表和列
pub fn index_target(sql: &str) -> Option<(String, Vec<String>)> {
    let pattern = INDEX_PATTERN.as_ref()?;
    let caps = pattern.captures(sql)?;
    let table = caps.get(1)?.as_str().to_string();
    let columns = caps
        .get(2)?
        .as_str()
        .split(',')
        .filter_map(|part| {
            let name = part.split_whitespace().next()?;
            let name = name.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']');
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect();
    Some((table, columns))
}

/// 按分号拆分 SQL 脚本
///
/// 忽略单引号字符串内的分号和 `--` 行注释，丢弃空语句
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '-' if !in_quote && chars.peek() == Some(&'-') => {
                // 跳过注释直到行尾
                for next in chars.by_ref() {
                    if next == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            ';' if !in_quote => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

/// 用双引号包裹标识符
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_statements() {
        let script = "
            -- 用户表; 注释里的分号
            CREATE TABLE a (id INTEGER);
            INSERT INTO a VALUES ('x;y');;
            CREATE INDEX idx_a ON a (id)
        ";
        let stmts = split_statements(script);
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[0], "CREATE TABLE a (id INTEGER)");
        assert_eq!(stmts[1], "INSERT INTO a VALUES ('x;y')");
        assert!(stmts[2].starts_with("CREATE INDEX"));
    }

    #[test]
    fn test_index_target() {
        let (table, cols) = index_target(
            "CREATE INDEX IF NOT EXISTS idx_p ON market_analyses (product_name, created_at DESC)",
        )
        .unwrap();
        assert_eq!(table, "market_analyses");
        assert_eq!(cols, vec!["product_name", "created_at"]);

        let (table, cols) = index_target("create unique index u on \"users\"(\"email\")").unwrap();
        assert_eq!(table, "users");
        assert_eq!(cols, vec!["email"]);

        assert!(index_target("CREATE TABLE t (id INTEGER)").is_none());
    }

    #[test]
    fn test_application_default() {
        let schema = SchemaDefinition::application_default();
        assert_eq!(schema.required_tables, vec!["users", "market_analyses"]);
        assert_eq!(schema.statements.len(), 5);
        assert_eq!(schema.statements.iter().filter(|s| is_index_statement(s)).count(), 3);
        assert_eq!(schema.seeds.len(), 1);
        assert_eq!(
            schema.column_upgrades[0].to_sql(),
            "ALTER TABLE \"users\" ADD COLUMN \"role\" TEXT NOT NULL DEFAULT 'user'"
        );
    }
}
