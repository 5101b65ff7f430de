use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Storage type of a column, used both to validate incoming values and to
/// bind them with the right Postgres type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Integer,
    Float,
    Boolean,
    Uuid,
    Timestamp,
    Date,
    Json,
    TextArray,
    UuidArray,
}

impl ValueType {
    pub fn is_array(&self) -> bool {
        matches!(self, ValueType::TextArray | ValueType::UuidArray)
    }

    /// Scalar type of one element; scalars return themselves.
    pub fn element_type(&self) -> ValueType {
        match self {
            ValueType::TextArray => ValueType::Text,
            ValueType::UuidArray => ValueType::Uuid,
            other => *other,
        }
    }

    /// Whether filter values coerced as `annotation` compare cleanly with a
    /// column stored as `self`.
    pub fn accepts(&self, annotation: ValueType) -> bool {
        *self == annotation
            || (self.is_array() && self.element_type() == annotation)
            || matches!(
                (self, annotation),
                (ValueType::Float, ValueType::Integer) | (ValueType::Timestamp, ValueType::Date)
            )
    }

    /// Coerce a JSON value into a bindable value of this type.
    pub fn coerce(&self, value: &Value) -> Result<SqlValue, String> {
        if value.is_null() {
            return Ok(SqlValue::Null(*self));
        }
        match self {
            ValueType::Text => match value {
                Value::String(s) => Ok(SqlValue::Text(s.clone())),
                Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
                other => Err(format!("expected a string, got {}", other)),
            },
            ValueType::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .map(SqlValue::Integer)
                    .ok_or_else(|| format!("expected an integer, got {}", n)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(SqlValue::Integer)
                    .map_err(|_| format!("expected an integer, got {:?}", s)),
                other => Err(format!("expected an integer, got {}", other)),
            },
            ValueType::Float => match value {
                Value::Number(n) => n
                    .as_f64()
                    .map(SqlValue::Float)
                    .ok_or_else(|| format!("expected a number, got {}", n)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(SqlValue::Float)
                    .map_err(|_| format!("expected a number, got {:?}", s)),
                other => Err(format!("expected a number, got {}", other)),
            },
            ValueType::Boolean => match value {
                Value::Bool(b) => Ok(SqlValue::Boolean(*b)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(SqlValue::Boolean(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(SqlValue::Boolean(false)),
                other => Err(format!("expected a boolean, got {}", other)),
            },
            ValueType::Uuid => match value {
                Value::String(s) => Uuid::parse_str(s.trim())
                    .map(SqlValue::Uuid)
                    .map_err(|_| format!("invalid UUID {:?}", s)),
                other => Err(format!("expected a UUID string, got {}", other)),
            },
            ValueType::Timestamp => match value {
                Value::String(s) => parse_timestamp(s)
                    .map(SqlValue::Timestamp)
                    .ok_or_else(|| format!("invalid datetime {:?}", s)),
                other => Err(format!("expected a datetime string, got {}", other)),
            },
            ValueType::Date => match value {
                Value::String(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map(SqlValue::Date)
                    .map_err(|_| format!("invalid date {:?}", s)),
                other => Err(format!("expected a date string, got {}", other)),
            },
            ValueType::Json => Ok(SqlValue::Json(value.clone())),
            ValueType::TextArray | ValueType::UuidArray => {
                let items = value
                    .as_array()
                    .ok_or_else(|| format!("expected an array, got {}", value))?;
                let element = self.element_type();
                let mut texts = Vec::new();
                let mut uuids = Vec::new();
                for item in items {
                    match element.coerce(item)? {
                        SqlValue::Text(s) => texts.push(s),
                        SqlValue::Uuid(u) => uuids.push(u),
                        _ => return Err("array elements must not be null".to_string()),
                    }
                }
                Ok(if element == ValueType::Uuid {
                    SqlValue::UuidArray(uuids)
                } else {
                    SqlValue::TextArray(texts)
                })
            }
        }
    }
}

/// Accepts RFC 3339, naive ISO datetimes and bare dates (midnight).
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// A typed bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(ValueType),
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Uuid(Uuid),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Json(Value),
    TextArray(Vec<String>),
    UuidArray(Vec<Uuid>),
}

/// Rendered SQL with its positional parameters (`$1`, `$2`, ...).
#[derive(Debug, Clone)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<SqlValue>,
}

/// One side of a join condition: `"<table of entity>"."<column>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub entity: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(entity: impl Into<String>, column: impl Into<String>) -> Self {
        Self { entity: entity.into(), column: column.into() }
    }
}

/// One hop of a join path: outer join `target` on `left = right`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinStep {
    pub target: String,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

/// A queryable column resolved through the column registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnReference {
    pub entity: String,
    pub column_name: String,
    pub join_path: Vec<JoinStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Set membership (`IN`, or `= ANY(col)` for array columns).
    In,
    Gte,
    Lte,
    Eq,
    FullText,
    SortAsc,
    SortDesc,
    /// Half-open `[start, end)`.
    Range,
}

impl FilterOp {
    pub fn comparison_sql(&self) -> &'static str {
        match self {
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
            _ => "=",
        }
    }

    pub fn is_sort(&self) -> bool {
        matches!(self, FilterOp::SortAsc | FilterOp::SortDesc)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorValue {
    None,
    Scalar(SqlValue),
    List(Vec<SqlValue>),
    Terms(Vec<String>),
    Range(SqlValue, SqlValue),
}

/// A validated filter/sort/search term, ready for the query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDescriptor {
    pub column: ColumnReference,
    pub operator: FilterOp,
    pub value: DescriptorValue,
    pub includes_null: bool,
}

/// Rows visible to the caller: owner column in `owners`, optionally NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityScope {
    pub owners: Vec<Uuid>,
    pub allow_null_owner: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdSelector {
    One(Uuid),
    Many(Vec<Uuid>),
}

impl IdSelector {
    pub fn to_vec(&self) -> Vec<Uuid> {
        match self {
            IdSelector::One(id) => vec![*id],
            IdSelector::Many(ids) => ids.clone(),
        }
    }
}

/// Which relationships of the base entity are materialized with the rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EagerLoad {
    /// Every relationship except the listed ones.
    Exclude(Vec<String>),
    /// Only the listed relationships.
    Disabled { include: Vec<String> },
}

impl Default for EagerLoad {
    fn default() -> Self {
        EagerLoad::Exclude(vec![])
    }
}

impl EagerLoad {
    pub fn none() -> Self {
        EagerLoad::Disabled { include: vec![] }
    }

    pub fn loads(&self, relationship: &str) -> bool {
        match self {
            EagerLoad::Exclude(excluded) => !excluded.iter().any(|r| r == relationship),
            EagerLoad::Disabled { include } => include.iter().any(|r| r == relationship),
        }
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
