//! Parsers for each query-string parameter kind.
//!
//! Every function here is pure: raw string in, resolved descriptors out.
//! Nothing touches the database.

use chrono::{Days, NaiveDate};
use serde_json::{Map, Value};

use super::error::FilterError;
use super::registry::ColumnRegistry;
use super::schema::QueryParameterSchema;
use super::types::{DescriptorValue, FilterDescriptor, FilterOp, SqlValue, ValueType};

const TSQUERY_SPECIAL: [char; 9] = ['&', '|', '"', '\'', ':', '!', '*', '(', ')'];

/// Backslash-escapes characters reserved by `to_tsquery` syntax.
pub fn escape_search_term(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if TSQUERY_SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `search=["foo","bar"]`: one full-text descriptor per searchable column.
pub fn search(
    raw: &str,
    schema: &QueryParameterSchema,
    registry: &ColumnRegistry<'_>,
) -> Result<Vec<FilterDescriptor>, FilterError> {
    if schema.search_columns().is_empty() {
        return Err(FilterError::SearchUnavailable);
    }
    let terms: Vec<String> =
        serde_json::from_str(raw).map_err(|e| FilterError::InvalidSearch(e.to_string()))?;

    // Whitespace inside a term would break tsquery syntax, so words become separate operands.
    let words: Vec<String> = terms
        .iter()
        .flat_map(|t| t.split_whitespace())
        .map(|w| escape_search_term(w.trim()))
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return Ok(vec![]);
    }

    schema
        .search_columns()
        .iter()
        .map(|key| {
            Ok(FilterDescriptor {
                column: registry.resolve(key)?,
                operator: FilterOp::FullText,
                value: DescriptorValue::Terms(words.clone()),
                includes_null: false,
            })
        })
        .collect()
}

/// `period=YYYY-MM-DD:YYYY-MM-DD` as the half-open range `[start, end + 1 day)`.
pub fn period(
    raw: &str,
    schema: &QueryParameterSchema,
    registry: &ColumnRegistry<'_>,
) -> Result<FilterDescriptor, FilterError> {
    let format_error = || FilterError::InvalidPeriod("format is YYYY-MM-DD:YYYY-MM-DD".to_string());

    let (start, end) = raw.split_once(':').ok_or_else(format_error)?;
    let start = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d").map_err(|_| format_error())?;
    let end = NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d").map_err(|_| format_error())?;
    if end < start {
        return Err(FilterError::InvalidPeriod(
            "end date must be greater or equal to start date".to_string(),
        ));
    }
    let end = end.checked_add_days(Days::new(1)).ok_or_else(format_error)?;

    let column = registry.resolve(schema.period_column())?;
    let bound = |date: NaiveDate| -> Result<SqlValue, FilterError> {
        match registry.value_type(&column)? {
            ValueType::Date => Ok(SqlValue::Date(date)),
            _ => date
                .and_hms_opt(0, 0, 0)
                .map(SqlValue::Timestamp)
                .ok_or_else(format_error),
        }
    };
    let value = DescriptorValue::Range(bound(start)?, bound(end)?);

    Ok(FilterDescriptor { column, operator: FilterOp::Range, value, includes_null: false })
}

/// `gt`/`lt`/`eq={"column": number}`; each column needs a filter annotation.
pub fn comparison(
    raw: &str,
    operator: FilterOp,
    schema: &QueryParameterSchema,
    registry: &ColumnRegistry<'_>,
) -> Result<Vec<FilterDescriptor>, FilterError> {
    let object: Map<String, Value> = serde_json::from_str(raw)
        .map_err(|e| FilterError::InvalidFormat { kind: "gt_lt_eq", reason: e.to_string() })?;

    let mut descriptors = Vec::with_capacity(object.len());
    for (key, value) in &object {
        let column = registry.resolve(key)?;
        let annotation = schema
            .filter_annotation(key)
            .ok_or_else(|| FilterError::InvalidNumberFilter(key.clone()))?;
        let value = annotation
            .element_type()
            .coerce(value)
            .map_err(|reason| FilterError::InvalidFilterValue { column: key.clone(), reason })?;
        descriptors.push(FilterDescriptor {
            column,
            operator,
            value: DescriptorValue::Scalar(value),
            includes_null: false,
        });
    }
    Ok(descriptors)
}

/// `""`, `"null"`, JSON null, `[]` and `[null]` all mean "match NULL".
pub fn is_null_marker(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == "null",
        Value::Array(items) => items.iter().all(Value::is_null),
        _ => false,
    }
}

/// Splits raw filter values into significant values and a null flag.
pub fn split_null_markers(value: &Value) -> (Vec<&Value>, bool) {
    let items: Vec<&Value> = match value {
        Value::Array(items) if !items.is_empty() => items.iter().collect(),
        other => vec![other],
    };
    let mut significant = Vec::with_capacity(items.len());
    let mut includes_null = false;
    for item in items {
        if is_null_marker(item) {
            includes_null = true;
        } else {
            significant.push(item);
        }
    }
    (significant, includes_null)
}

/// `filters={"column": [values-or-null...]}`: set membership per column.
pub fn filters(
    raw: &str,
    schema: &QueryParameterSchema,
    registry: &ColumnRegistry<'_>,
) -> Result<Vec<FilterDescriptor>, FilterError> {
    let object: Map<String, Value> = serde_json::from_str(raw)
        .map_err(|e| FilterError::InvalidFormat { kind: "filters", reason: e.to_string() })?;

    let mut descriptors = Vec::with_capacity(object.len());
    for (key, value) in &object {
        let column = registry.resolve(key)?;
        let annotation = schema
            .filter_annotation(key)
            .ok_or_else(|| FilterError::InvalidFilter(key.clone()))?;

        let (significant, includes_null) = split_null_markers(value);
        let values = significant
            .into_iter()
            .map(|v| annotation.element_type().coerce(v))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| FilterError::InvalidFilterValue { column: key.clone(), reason })?;

        descriptors.push(FilterDescriptor {
            column,
            operator: FilterOp::In,
            value: DescriptorValue::List(values),
            includes_null,
        });
    }
    Ok(descriptors)
}

/// `ascending`/`descending="column"`; the column must be declared sortable.
pub fn sort(
    raw: &str,
    operator: FilterOp,
    schema: &QueryParameterSchema,
    registry: &ColumnRegistry<'_>,
) -> Result<FilterDescriptor, FilterError> {
    let key = serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.trim().to_string());
    if !schema.is_sortable(&key) {
        let allowed = schema.sortable_columns().cloned().collect::<Vec<_>>().join(", ");
        return Err(FilterError::InvalidSortColumn { column: key, allowed });
    }
    Ok(FilterDescriptor {
        column: registry.resolve(&key)?,
        operator,
        value: DescriptorValue::None,
        includes_null: false,
    })
}
