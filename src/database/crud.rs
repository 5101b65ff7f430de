//! Generic CRUD over any catalog entity.
//!
//! Reads go through the query compiler; writes are built here. Every write
//! commits the request session right after its statement.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

use super::executor;
use super::manager::DatabaseError;
use super::page::Page;
use super::session::DbSession;
use crate::filter::filter::json_object;
use crate::filter::validators::split_null_markers;
use crate::filter::{
    quote_identifier, Catalog, ColumnReference, DescriptorValue, EagerLoad, EntityDef, FilterDescriptor,
    FilterError, FilterOp, IdSelector, QueryBuilder, QueryParameters, SelectQuery, SqlResult, SqlValue,
    VisibilityScope,
};

/// Columns the façade maintains itself.
const SYSTEM_FIELDS: &[&str] = &["id", "changelog", "created_at", "created_by"];

#[derive(Debug, Error)]
pub enum CrudError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Refusing to remove rows without an id")]
    EmptyId,

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl From<sqlx::Error> for CrudError {
    fn from(e: sqlx::Error) -> Self {
        CrudError::Database(DatabaseError::from(e))
    }
}

impl CrudError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, CrudError::Database(e) if e.is_integrity())
    }
}

/// Who performs a write; stamped into audit columns and changelog entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub email: Option<String>,
}

/// A patch value the caller explicitly sent.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchValue {
    Null,
    Value(Value),
}

impl PatchValue {
    fn as_json(&self) -> Value {
        match self {
            PatchValue::Null => Value::Null,
            PatchValue::Value(v) => v.clone(),
        }
    }
}

/// Fields to update. A field missing from the map is left untouched; a field
/// mapped to `PatchValue::Null` is cleared.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct UpdatePatch {
    fields: BTreeMap<String, PatchValue>,
}

impl From<Map<String, Value>> for UpdatePatch {
    fn from(map: Map<String, Value>) -> Self {
        let fields = map
            .into_iter()
            .map(|(k, v)| (k, if v.is_null() { PatchValue::Null } else { PatchValue::Value(v) }))
            .collect();
        Self { fields }
    }
}

impl UpdatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: Value) -> Self {
        self.insert(field, value);
        self
    }

    pub fn clear(mut self, field: &str) -> Self {
        self.fields.insert(field.to_string(), PatchValue::Null);
        self
    }

    pub fn insert(&mut self, field: &str, value: Value) {
        let value = if value.is_null() { PatchValue::Null } else { PatchValue::Value(value) };
        self.fields.insert(field.to_string(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<PatchValue> {
        self.fields.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&PatchValue> {
        self.fields.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PatchValue)> {
        self.fields.iter()
    }

    /// Keeps only the listed fields.
    pub fn retain(&mut self, allowed: impl Fn(&str) -> bool) {
        self.fields.retain(|k, _| allowed(k));
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetOptions<'p> {
    pub id: Option<IdSelector>,
    pub params: Option<&'p QueryParameters>,
    pub visibility: Option<VisibilityScope>,
    pub eager: EagerLoad,
    pub column: Option<String>,
}

/// Result shape of `get`: a single row, a plain list or a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Fetched {
    Item(Option<Value>),
    List(Vec<Value>),
    Page(Page<Value>),
}

impl Fetched {
    pub fn into_value(self) -> Value {
        match self {
            Fetched::Item(item) => item.unwrap_or(Value::Null),
            Fetched::List(items) => Value::Array(items),
            Fetched::Page(page) => serde_json::to_value(page).unwrap_or(Value::Null),
        }
    }
}

pub struct Crud<'a> {
    catalog: &'a Catalog,
    entity: &'a EntityDef,
}

impl<'a> Crud<'a> {
    pub fn new(catalog: &'a Catalog, entity: &str) -> Result<Self, CrudError> {
        Ok(Self { catalog, entity: catalog.entity(entity)? })
    }

    pub fn entity(&self) -> &EntityDef {
        self.entity
    }

    pub fn query(&self, options: &GetOptions<'_>) -> Result<SelectQuery, CrudError> {
        let mut builder = QueryBuilder::new(self.catalog, &self.entity.name)?
            .ids(options.id.clone())
            .visibility(options.visibility.clone())
            .eager(options.eager.clone());
        if let Some(column) = &options.column {
            builder = builder.select_column(column)?;
        }
        let query = match options.params {
            Some(params) => builder.build(params.descriptors())?,
            None => builder.build(std::iter::empty::<&FilterDescriptor>())?,
        };
        Ok(query)
    }

    /// Id lookups return an item or list; everything else returns a page.
    pub async fn get(&self, session: &mut DbSession, options: GetOptions<'_>) -> Result<Fetched, CrudError> {
        let query = self.query(&options)?;
        let conn = session.conn()?;
        match &options.id {
            Some(IdSelector::One(_)) => {
                let rows = executor::fetch_all(conn, &query).await?;
                Ok(Fetched::Item(rows.into_iter().next()))
            }
            Some(IdSelector::Many(_)) => Ok(Fetched::List(executor::fetch_all(conn, &query).await?)),
            None => {
                let defaults = QueryParameters::default();
                let params = options.params.unwrap_or(&defaults);
                Ok(Fetched::Page(executor::paginate(conn, &query, params.page, params.size).await?))
            }
        }
    }

    pub async fn get_count(
        &self,
        session: &mut DbSession,
        params: Option<&QueryParameters>,
        visibility: Option<VisibilityScope>,
    ) -> Result<i64, CrudError> {
        let query = self.query(&GetOptions { params, visibility, eager: EagerLoad::none(), ..Default::default() })?;
        Ok(executor::fetch_count(session.conn()?, &query.to_count_sql()).await?)
    }

    /// Plain equality lookup: `{column: value | [values]}` with null markers.
    pub async fn get_by_column_and_value(
        &self,
        session: &mut DbSession,
        filter_data: &Map<String, Value>,
        first: bool,
        or_values: bool,
    ) -> Result<Fetched, CrudError> {
        let descriptors = self.equality_descriptors(filter_data)?;
        let query = QueryBuilder::new(self.catalog, &self.entity.name)?
            .eager(EagerLoad::none())
            .match_any(or_values)
            .build(descriptors.iter())?;
        let rows = executor::fetch_all(session.conn()?, &query).await?;
        Ok(if first { Fetched::Item(rows.into_iter().next()) } else { Fetched::List(rows) })
    }

    fn equality_descriptors(&self, filter_data: &Map<String, Value>) -> Result<Vec<FilterDescriptor>, CrudError> {
        filter_data
            .iter()
            .map(|(key, value)| {
                let column = self
                    .entity
                    .column_def(key)
                    .ok_or_else(|| CrudError::UnknownField(key.clone()))?;
                let (significant, includes_null) = split_null_markers(value);
                let values = significant
                    .into_iter()
                    .map(|v| column.value_type.element_type().coerce(v))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|reason| CrudError::InvalidValue { field: key.clone(), reason })?;
                Ok(FilterDescriptor {
                    column: ColumnReference {
                        entity: self.entity.name.clone(),
                        column_name: key.clone(),
                        join_path: vec![],
                    },
                    operator: FilterOp::In,
                    value: DescriptorValue::List(values),
                    includes_null,
                })
            })
            .collect()
    }

    /// Inserts every object inside the session, then commits. Returns the stored rows.
    pub async fn create(
        &self,
        session: &mut DbSession,
        objects: Vec<Map<String, Value>>,
        actor: Option<&Actor>,
    ) -> Result<Vec<Value>, CrudError> {
        let now = Utc::now().naive_utc();
        let statements = objects
            .iter()
            .map(|object| self.insert_sql(object, actor, now))
            .collect::<Result<Vec<_>, _>>()?;

        let mut created = Vec::with_capacity(statements.len());
        for statement in &statements {
            created.extend(executor::fetch_json(session.conn()?, statement).await?);
        }
        session.commit().await?;
        tracing::info!(entity = %self.entity.name, count = created.len(), "Created rows");
        Ok(created)
    }

    pub fn insert_sql(
        &self,
        object: &Map<String, Value>,
        actor: Option<&Actor>,
        now: NaiveDateTime,
    ) -> Result<SqlResult, CrudError> {
        let mut values: Vec<(String, SqlValue)> = Vec::new();
        for (key, value) in object {
            let column = self.entity.column_def(key).ok_or_else(|| CrudError::UnknownField(key.clone()))?;
            let value = column
                .value_type
                .coerce(value)
                .map_err(|reason| CrudError::InvalidValue { field: key.clone(), reason })?;
            values.push((key.clone(), value));
        }
        for (column, value) in self.audit_values(actor, now, true) {
            values.retain(|(k, _)| k != column);
            values.push((column.to_string(), value));
        }

        let table = quote_identifier(&self.entity.table);
        let returning = json_object(self.entity, &table);
        let query = if values.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING {} AS \"data\"", table, returning)
        } else {
            let columns: Vec<String> = values.iter().map(|(k, _)| quote_identifier(k)).collect();
            let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("${}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING {} AS \"data\"",
                table,
                columns.join(", "),
                placeholders.join(", "),
                returning
            )
        };
        Ok(SqlResult { query, params: values.into_iter().map(|(_, v)| v).collect() })
    }

    /// Applies the patch to every id, appending changelog entries, then commits.
    pub async fn update(
        &self,
        session: &mut DbSession,
        ids: &[Uuid],
        patch: &UpdatePatch,
        actor: Option<&Actor>,
    ) -> Result<u64, CrudError> {
        if ids.is_empty() {
            return Err(CrudError::EmptyId);
        }
        let Some(statement) = self.update_sql(ids, patch, actor, Utc::now().naive_utc())? else {
            return Ok(0);
        };
        let affected = executor::execute(session.conn()?, &statement).await?;
        session.commit().await?;
        tracing::info!(entity = %self.entity.name, affected, "Updated rows");
        Ok(affected)
    }

    /// `None` when nothing would change.
    pub fn update_sql(
        &self,
        ids: &[Uuid],
        patch: &UpdatePatch,
        actor: Option<&Actor>,
        now: NaiveDateTime,
    ) -> Result<Option<SqlResult>, CrudError> {
        let mut assignments: Vec<(String, SqlValue)> = Vec::new();
        let mut changelog = Vec::new();

        for (field, value) in patch.iter() {
            let Some(column) = self.entity.column_def(field) else {
                tracing::debug!(entity = %self.entity.name, field = %field, "Ignoring unknown patch field");
                continue;
            };
            if SYSTEM_FIELDS.contains(&field.as_str()) {
                tracing::debug!(entity = %self.entity.name, field = %field, "Ignoring system field in patch");
                continue;
            }
            let bound = match value {
                PatchValue::Null => SqlValue::Null(column.value_type),
                PatchValue::Value(v) => column
                    .value_type
                    .coerce(v)
                    .map_err(|reason| CrudError::InvalidValue { field: field.clone(), reason })?,
            };
            assignments.push((field.clone(), bound));

            if self.entity.is_changelog_tracked() && self.entity.log_fields.iter().any(|f| f == field) {
                changelog.push(json!({
                    "updated_at": now.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true),
                    "updated_by": actor.and_then(|a| a.email.clone()).unwrap_or_else(|| "unknown".to_string()),
                    "attribute": field,
                    "current_value": value.as_json(),
                }));
            }
        }

        if assignments.is_empty() && changelog.is_empty() {
            return Ok(None);
        }
        for (column, value) in self.audit_values(actor, now, false) {
            assignments.retain(|(k, _)| k != column);
            assignments.push((column.to_string(), value));
        }

        let mut params = Vec::with_capacity(assignments.len() + 2);
        let mut sets = Vec::with_capacity(assignments.len() + 1);
        for (column, value) in assignments {
            params.push(value);
            sets.push(format!("{} = ${}", quote_identifier(&column), params.len()));
        }
        if !changelog.is_empty() {
            params.push(SqlValue::Json(Value::Array(changelog)));
            sets.push(format!("\"changelog\" = COALESCE(\"changelog\", '[]'::jsonb) || ${}", params.len()));
        }
        params.push(SqlValue::UuidArray(ids.to_vec()));

        let query = format!(
            "UPDATE {} SET {} WHERE {} = ANY(${})",
            quote_identifier(&self.entity.table),
            sets.join(", "),
            quote_identifier(&self.entity.primary_key),
            params.len()
        );
        Ok(Some(SqlResult { query, params }))
    }

    /// Deletes by id, optionally constrained by `{column: value}` ownership pairs.
    /// A list value means "any of these owners"; `null` inside it admits unowned rows.
    pub async fn remove(
        &self,
        session: &mut DbSession,
        ids: &[Uuid],
        ownership: Option<&Map<String, Value>>,
    ) -> Result<u64, CrudError> {
        let statement = self.remove_sql(ids, ownership)?;
        let affected = executor::execute(session.conn()?, &statement).await?;
        session.commit().await?;
        tracing::info!(entity = %self.entity.name, affected, "Removed rows");
        Ok(affected)
    }

    pub fn remove_sql(&self, ids: &[Uuid], ownership: Option<&Map<String, Value>>) -> Result<SqlResult, CrudError> {
        if ids.is_empty() {
            return Err(CrudError::EmptyId);
        }
        let mut params = vec![SqlValue::UuidArray(ids.to_vec())];
        let mut conditions = vec![format!("{} = ANY($1)", quote_identifier(&self.entity.primary_key))];
        for (key, value) in ownership.into_iter().flatten() {
            let column = self.entity.column_def(key).ok_or_else(|| CrudError::UnknownField(key.clone()))?;
            let coerce = |value: &Value| {
                column
                    .value_type
                    .coerce(value)
                    .map_err(|reason| CrudError::InvalidValue { field: key.clone(), reason })
            };
            let quoted = quote_identifier(key);
            match value {
                Value::Null => conditions.push(format!("{} IS NULL", quoted)),
                Value::Array(owners) if !column.value_type.is_array() => {
                    let mut placeholders = Vec::with_capacity(owners.len());
                    for owner in owners.iter().filter(|o| !o.is_null()) {
                        params.push(coerce(owner)?);
                        placeholders.push(format!("${}", params.len()));
                    }
                    let unowned = owners.iter().any(Value::is_null);
                    conditions.push(match (placeholders.is_empty(), unowned) {
                        (false, false) => format!("{} IN ({})", quoted, placeholders.join(", ")),
                        (false, true) => format!("({} IS NULL OR {} IN ({}))", quoted, quoted, placeholders.join(", ")),
                        (true, true) => format!("{} IS NULL", quoted),
                        (true, false) => "1=0".to_string(),
                    });
                }
                scalar => {
                    params.push(coerce(scalar)?);
                    conditions.push(format!("{} = ${}", quoted, params.len()));
                }
            }
        }
        let query = format!(
            "DELETE FROM {} WHERE {}",
            quote_identifier(&self.entity.table),
            conditions.join(" AND ")
        );
        Ok(SqlResult { query, params })
    }

    /// Audit columns the entity actually has.
    fn audit_values(&self, actor: Option<&Actor>, now: NaiveDateTime, creating: bool) -> Vec<(&'static str, SqlValue)> {
        let mut values = Vec::new();
        let mut stamp = |column: &'static str, value: SqlValue| {
            if self.entity.has_column(column) {
                values.push((column, value));
            }
        };
        if creating {
            stamp("created_at", SqlValue::Timestamp(now));
        }
        stamp("updated_at", SqlValue::Timestamp(now));
        if let Some(actor) = actor {
            if creating {
                stamp("created_by", SqlValue::Uuid(actor.id));
            }
            stamp("updated_by", SqlValue::Uuid(actor.id));
        }
        values
    }
}
