//! Generic list/get/create/update/delete endpoints for one catalog entity.
//!
//! `EntityApi::router` mounts:
//!
//! - `GET /list` paginated, filtered, sorted listing
//! - `GET /:id` one row, or several for dot-separated ids
//! - `POST /` one object or a list of objects
//! - `PATCH /:id` partial update
//! - `DELETE /:id`
//!
//! Routers for specific entities exclude operations they override and add
//! their own routes next to these.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, patch, post},
    Extension, Json, Router,
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::database::{Crud, CrudError, DbSession, Fetched, GetOptions, UpdatePatch};
use crate::error::ApiError;
use crate::filter::{EagerLoad, IdSelector, QueryParameterSchema, QueryParameters, RawQueryParams};
use crate::middleware::{ApiResponse, ApiResult, AuthContext};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Create,
    Update,
    Delete,
    Paginate,
}

/// Extra filter presets returned next to the table mapping when `meta=true`.
#[async_trait]
pub trait Prefilters: Send + Sync {
    async fn prefilters(&self, _state: &AppState, _auth: &AuthContext) -> Result<Value, ApiError> {
        Ok(json!({}))
    }
}

pub struct NoPrefilters;

impl Prefilters for NoPrefilters {}

#[derive(Clone)]
pub struct EntityApi {
    entity: &'static str,
    exclude: Vec<Operation>,
    list_eager: EagerLoad,
    prefilters: Arc<dyn Prefilters>,
}

impl EntityApi {
    pub fn new(entity: &'static str) -> Self {
        Self {
            entity,
            exclude: vec![],
            list_eager: EagerLoad::none(),
            prefilters: Arc::new(NoPrefilters),
        }
    }

    pub fn exclude(mut self, operations: &[Operation]) -> Self {
        self.exclude.extend_from_slice(operations);
        self
    }

    pub fn prefilters(mut self, prefilters: impl Prefilters + 'static) -> Self {
        self.prefilters = Arc::new(prefilters);
        self
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    fn includes(&self, operation: Operation) -> bool {
        !self.exclude.contains(&operation)
    }

    pub fn router(self) -> Router<AppState> {
        let mut router = Router::new();
        if self.includes(Operation::Paginate) {
            router = router.route("/list", get(paginate_handler));
        }
        if self.includes(Operation::Get) {
            router = router.route("/:id", get(get_handler));
        }
        if self.includes(Operation::Update) {
            router = router.route("/:id", patch(update_handler));
        }
        if self.includes(Operation::Delete) {
            router = router.route("/:id", delete(delete_handler));
        }
        if self.includes(Operation::Create) {
            router = router.route("/", post(create_handler));
        }
        router.layer(Extension(Arc::new(self)))
    }

    fn schema<'s>(&self, state: &'s AppState) -> Result<&'s QueryParameterSchema, ApiError> {
        Ok(state.schemas.get(self.entity)?)
    }

    fn crud<'s>(&self, state: &'s AppState) -> Result<Crud<'s>, ApiError> {
        Ok(Crud::new(&state.catalog, self.entity)?)
    }

    /// One page of rows plus the `meta` block.
    pub async fn list(&self, state: &AppState, auth: &AuthContext, raw: &RawQueryParams) -> Result<(Value, Value), ApiError> {
        let schema = self.schema(state)?;
        let params = QueryParameters::parse(raw, schema, &state.catalog, &state.config.filter)?;
        let crud = self.crud(state)?;

        let options = GetOptions {
            params: Some(&params),
            visibility: auth.visibility(),
            eager: self.list_eager.clone(),
            ..Default::default()
        };
        let mut session = DbSession::begin(&state.pool).await?;
        let result = crud.get(&mut session, options).await.map_err(ApiError::from);
        let data = session.finish(result).await?;

        let meta = if params.meta {
            json!({
                "table_name": self.entity,
                "table_mapping": schema.table_mapping(),
                "prefilters": self.prefilters.prefilters(state, auth).await?,
            })
        } else {
            json!({})
        };
        Ok((data.into_value(), meta))
    }

    /// Rows by id; a single id yields an object, several a list.
    pub async fn fetch(&self, state: &AppState, auth: &AuthContext, ids: Vec<Uuid>) -> Result<Value, ApiError> {
        let crud = self.crud(state)?;
        let single = ids.len() == 1;
        let options = GetOptions {
            id: Some(id_selector(ids)),
            visibility: auth.visibility(),
            ..Default::default()
        };
        let mut session = DbSession::begin(&state.pool).await?;
        let result = crud.get(&mut session, options).await.map_err(ApiError::from);
        let fetched = session.finish(result).await?;
        match fetched {
            Fetched::Item(None) if single => Err(ApiError::not_found("Not found")),
            other => Ok(other.into_value()),
        }
    }

    /// Inserts already-validated objects; integrity violations become 409s.
    pub async fn insert(
        &self,
        state: &AppState,
        auth: &AuthContext,
        objects: Vec<Map<String, Value>>,
    ) -> Result<Vec<Value>, ApiError> {
        let crud = self.crud(state)?;
        let mut session = DbSession::begin(&state.pool).await?;
        let result = crud.create(&mut session, objects, Some(&auth.actor())).await.map_err(ApiError::on_create);
        session.finish(result).await
    }

    pub async fn update(
        &self,
        state: &AppState,
        auth: &AuthContext,
        ids: Vec<Uuid>,
        mut patch: UpdatePatch,
    ) -> Result<Value, ApiError> {
        let schema = self.schema(state)?;
        patch.retain(|field| schema.is_writable(field));
        let crud = self.crud(state)?;
        let mut session = DbSession::begin(&state.pool).await?;
        let result = crud.update(&mut session, &ids, &patch, Some(&auth.actor())).await.map_err(ApiError::from);
        session.finish(result).await?;
        self.fetch(state, auth, ids).await
    }

    pub async fn remove(&self, state: &AppState, ids: Vec<Uuid>) -> Result<Value, ApiError> {
        let crud = self.crud(state)?;
        let mut session = DbSession::begin(&state.pool).await?;
        let result = crud.remove(&mut session, &ids, None).await.map_err(ApiError::from);
        let count = session.finish(result).await?;
        Ok(json!({ "ids": ids, "count": count }))
    }

    /// Splits a create body into objects, rejecting fields the schema does not allow writing.
    pub fn creatable(&self, state: &AppState, body: Value) -> Result<(Vec<Map<String, Value>>, bool), ApiError> {
        let schema = self.schema(state)?;
        let (objects, single) = split_body(body)?;
        for object in &objects {
            if let Some(field) = object.keys().find(|k| !schema.is_writable(k)) {
                return Err(CrudError::UnknownField(field.clone()).into());
            }
        }
        Ok((objects, single))
    }
}

/// `a.b.c` → three ids.
pub fn parse_id(raw: &str) -> Result<Vec<Uuid>, ApiError> {
    raw.split('.')
        .map(|part| Uuid::parse_str(part.trim()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ApiError::validation("Invalid UUID format or value"))
}

fn id_selector(mut ids: Vec<Uuid>) -> IdSelector {
    if ids.len() == 1 {
        IdSelector::One(ids.remove(0))
    } else {
        IdSelector::Many(ids)
    }
}

/// An object creates one row; a list of objects creates many.
pub fn split_body(body: Value) -> Result<(Vec<Map<String, Value>>, bool), ApiError> {
    let invalid = || ApiError::validation("Expected an object or a list of objects");
    match body {
        Value::Object(object) => Ok((vec![object], true)),
        Value::Array(items) => {
            let objects = items
                .into_iter()
                .map(|item| match item {
                    Value::Object(object) => Ok(object),
                    _ => Err(invalid()),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((objects, false))
        }
        _ => Err(invalid()),
    }
}

/// Mirrors the request shape: one object in, one object out.
pub fn created_shape(mut rows: Vec<Value>, single: bool) -> Value {
    if single && rows.len() == 1 {
        rows.remove(0)
    } else {
        Value::Array(rows)
    }
}

/// GET /list - Paginated listing
async fn paginate_handler(
    State(state): State<AppState>,
    Extension(api): Extension<Arc<EntityApi>>,
    Extension(auth): Extension<AuthContext>,
    Query(raw): Query<RawQueryParams>,
) -> ApiResult<Value> {
    let (data, meta) = api.list(&state, &auth, &raw).await?;
    Ok(ApiResponse::retrieved(data).with_meta(meta))
}

/// GET /:id - One or more rows by id
async fn get_handler(
    State(state): State<AppState>,
    Extension(api): Extension<Arc<EntityApi>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let data = api.fetch(&state, &auth, parse_id(&id)?).await?;
    Ok(ApiResponse::retrieved(data))
}

/// POST / - Create one or more rows
async fn create_handler(
    State(state): State<AppState>,
    Extension(api): Extension<Arc<EntityApi>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<Value>,
) -> ApiResult<Value> {
    let (objects, single) = api.creatable(&state, body)?;
    let rows = api.insert(&state, &auth, objects).await?;
    Ok(ApiResponse::added(created_shape(rows, single)))
}

/// PATCH /:id - Update the given rows
async fn update_handler(
    State(state): State<AppState>,
    Extension(api): Extension<Arc<EntityApi>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(patch): Json<UpdatePatch>,
) -> ApiResult<Value> {
    let data = api.update(&state, &auth, parse_id(&id)?, patch).await?;
    Ok(ApiResponse::updated(data))
}

/// DELETE /:id - Remove the given rows
async fn delete_handler(
    State(state): State<AppState>,
    Extension(api): Extension<Arc<EntityApi>>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let data = api.remove(&state, parse_id(&id)?).await?;
    Ok(ApiResponse::deleted(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dot_separated_ids() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(parse_id(&format!("{}.{}", a, b)).unwrap(), vec![a, b]);
        assert_eq!(parse_id(&a.to_string()).unwrap(), vec![a]);
        assert_eq!(parse_id("nope"), Err(ApiError::validation("Invalid UUID format or value")));
        assert!(parse_id(&format!("{}.", a)).is_err());
    }

    #[test]
    fn create_bodies_keep_their_shape() {
        let (objects, single) = split_body(json!({"rate": 1})).unwrap();
        assert!(single);
        assert_eq!(created_shape(vec![json!({"id": 1})], single), json!({"id": 1}));

        let (objects_many, single_many) = split_body(json!([{"rate": 1}, {"rate": 2}])).unwrap();
        assert_eq!(objects_many.len(), 2);
        assert!(!single_many);
        assert_eq!(created_shape(vec![json!({"id": 1})], single_many), json!([{"id": 1}]));

        assert_eq!(objects.len(), 1);
        assert!(split_body(json!([1, 2])).is_err());
        assert!(split_body(json!("x")).is_err());
    }

    #[test]
    fn excluded_operations_are_not_mounted() {
        let api = EntityApi::new("sessions").exclude(&[Operation::Create, Operation::Update]);
        assert!(api.includes(Operation::Paginate));
        assert!(!api.includes(Operation::Create));
        assert!(!api.includes(Operation::Update));
    }
}
