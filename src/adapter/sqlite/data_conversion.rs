//! SQLite数据转换模块
//!
//! 参数绑定与结果行转换。SQLite 是动态类型，结果列按值的实际存储类转换，
//! 不依赖列声明类型

use crate::adapter::EngineError;
use crate::types::{DataValue, Row};
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::query::Query;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

/// 将参数依次绑定到查询上
pub(crate) fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [DataValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            DataValue::Null => query.bind(Option::<String>::None),
            DataValue::Bool(b) => query.bind(*b),
            DataValue::Int(i) => query.bind(*i),
            DataValue::Float(f) => query.bind(*f),
            DataValue::String(s) => query.bind(s.as_str()),
            DataValue::Bytes(bytes) => query.bind(bytes.as_slice()),
        };
    }
    query
}

/// 将sqlx的行转换为列名到DataValue的映射
pub(crate) fn row_to_map(row: &SqliteRow) -> Result<Row, EngineError> {
    let mut map = Row::new();

    for (index, column) in row.columns().iter().enumerate() {
        let column_name = column.name();
        let raw = row
            .try_get_raw(index)
            .map_err(|e| EngineError::untyped(format!("读取列 '{}' 失败: {}", column_name, e)))?;

        if raw.is_null() {
            map.insert(column_name.to_string(), DataValue::Null);
            continue;
        }

        let storage_class = raw.type_info().name().to_string();
        let value = match storage_class.as_str() {
            "INTEGER" | "BOOLEAN" => DataValue::Int(get_column(row, index, column_name)?),
            "REAL" => DataValue::Float(get_column(row, index, column_name)?),
            "BLOB" => DataValue::Bytes(get_column(row, index, column_name)?),
            _ => DataValue::String(get_column(row, index, column_name)?),
        };
        map.insert(column_name.to_string(), value);
    }

    Ok(map)
}

fn get_column<'r, T>(row: &'r SqliteRow, index: usize, column_name: &str) -> Result<T, EngineError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get::<T, _>(index)
        .map_err(|e| EngineError::untyped(format!("读取列 '{}' 失败: {}", column_name, e)))
}
