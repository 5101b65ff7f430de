use serde_json::Value;
use sqlx::{postgres::PgArguments, query::Query, PgConnection, Postgres, Row};

use super::manager::DatabaseError;
use super::page::{limit_offset, Page};
use crate::filter::{SelectQuery, SqlResult, SqlValue, ValueType};

/// Binds one parameter; NULLs keep the column's type so Postgres can infer it.
pub fn bind_param<'q>(
    q: Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null(value_type) => match value_type {
            ValueType::Text => q.bind(None::<String>),
            ValueType::Integer => q.bind(None::<i64>),
            ValueType::Float => q.bind(None::<f64>),
            ValueType::Boolean => q.bind(None::<bool>),
            ValueType::Uuid => q.bind(None::<uuid::Uuid>),
            ValueType::Timestamp => q.bind(None::<chrono::NaiveDateTime>),
            ValueType::Date => q.bind(None::<chrono::NaiveDate>),
            ValueType::Json => q.bind(None::<Value>),
            ValueType::TextArray => q.bind(None::<Vec<String>>),
            ValueType::UuidArray => q.bind(None::<Vec<uuid::Uuid>>),
        },
        SqlValue::Text(s) => q.bind(s.as_str()),
        SqlValue::Integer(i) => q.bind(*i),
        SqlValue::Float(f) => q.bind(*f),
        SqlValue::Boolean(b) => q.bind(*b),
        SqlValue::Uuid(u) => q.bind(*u),
        SqlValue::Timestamp(ts) => q.bind(*ts),
        SqlValue::Date(d) => q.bind(*d),
        SqlValue::Json(v) => q.bind(v.clone()),
        SqlValue::TextArray(items) => q.bind(items.as_slice()),
        SqlValue::UuidArray(items) => q.bind(items.as_slice()),
    }
}

fn prepare(sql: &SqlResult) -> Query<'_, Postgres, PgArguments> {
    sql.params.iter().fold(sqlx::query(&sql.query), bind_param)
}

/// Rows of a `SELECT ... AS "data"` statement as JSON values.
pub async fn fetch_json(conn: &mut PgConnection, sql: &SqlResult) -> Result<Vec<Value>, DatabaseError> {
    tracing::debug!(query = %sql.query, params = sql.params.len(), "fetch");
    let rows = prepare(sql).fetch_all(conn).await?;
    rows.iter()
        .map(|row| row.try_get::<Value, _>("data").map_err(DatabaseError::from))
        .collect()
}

pub async fn fetch_count(conn: &mut PgConnection, sql: &SqlResult) -> Result<i64, DatabaseError> {
    tracing::debug!(query = %sql.query, params = sql.params.len(), "count");
    let row = prepare(sql).fetch_one(conn).await?;
    Ok(row.try_get::<i64, _>("count")?)
}

pub async fn execute(conn: &mut PgConnection, sql: &SqlResult) -> Result<u64, DatabaseError> {
    tracing::debug!(query = %sql.query, params = sql.params.len(), "execute");
    Ok(prepare(sql).execute(conn).await?.rows_affected())
}

/// All rows of a compiled query, without pagination.
pub async fn fetch_all(conn: &mut PgConnection, query: &SelectQuery) -> Result<Vec<Value>, DatabaseError> {
    let rows = fetch_json(conn, &query.to_sql(None, None)).await?;
    Ok(flatten(rows, query.single_column))
}

/// Count plus one page of rows for a compiled query.
pub async fn paginate(
    conn: &mut PgConnection,
    query: &SelectQuery,
    page: u32,
    size: u32,
) -> Result<Page<Value>, DatabaseError> {
    let total = fetch_count(&mut *conn, &query.to_count_sql()).await?;
    let (limit, offset) = limit_offset(page, size);
    let rows = fetch_json(conn, &query.to_sql(Some(limit), Some(offset))).await?;
    Ok(Page::new(flatten(rows, query.single_column), total, page, size))
}

/// Single-column rows come back as `{"col": v}`; unwrap them to `v`.
pub fn flatten(rows: Vec<Value>, single_column: bool) -> Vec<Value> {
    if !single_column {
        return rows;
    }
    rows.into_iter()
        .map(|row| match row {
            Value::Object(map) if map.len() == 1 => map.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null),
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_single_column_rows() {
        let rows = vec![json!({"rate": 1.5}), json!({"rate": null})];
        assert_eq!(flatten(rows, true), vec![json!(1.5), Value::Null]);
    }

    #[test]
    fn keeps_full_rows_untouched() {
        let rows = vec![json!({"id": 1, "rate": 1.5})];
        assert_eq!(flatten(rows.clone(), false), rows);
    }
}
