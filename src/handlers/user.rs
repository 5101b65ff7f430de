use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::entity::{created_shape, parse_id, EntityApi, Operation};
use crate::auth::hash_password;
use crate::database::UpdatePatch;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthContext};
use crate::state::AppState;

/// Fields a user may change on their own profile.
const SELF_EDITABLE: &[&str] = &["first_name", "last_name", "full_name", "picture", "description"];

pub fn router() -> Router<AppState> {
    EntityApi::new("user")
        .exclude(&[Operation::Create, Operation::Delete])
        .router()
        .route("/", get(me).post(create).patch(update_me).delete(delete_me))
        .route("/:id", delete(remove))
}

fn api() -> EntityApi {
    EntityApi::new("user")
}

#[derive(Debug, Deserialize)]
pub struct UserCreate {
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl UserCreate {
    /// Row to insert: hashed password, lowercased email, derived full name.
    pub async fn into_row(self) -> Result<Map<String, Value>, ApiError> {
        let last_name = self.last_name.unwrap_or_default();
        let full_name = self
            .full_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{} {}", self.first_name, last_name).trim().to_string());

        let mut row = Map::new();
        row.insert("first_name".into(), json!(self.first_name));
        row.insert("last_name".into(), json!(last_name));
        row.insert("full_name".into(), json!(full_name));
        row.insert("email".into(), json!(self.email.trim().to_lowercase()));
        row.insert("hashed_password".into(), json!(hash_password(&self.password).await?));
        row.insert("is_active".into(), json!(self.is_active.unwrap_or(false)));
        row.insert("allow_basic_login".into(), json!(true));
        if let Some(picture) = self.picture {
            row.insert("picture".into(), json!(picture));
        }
        Ok(row)
    }
}

/// POST / - Register one or more users
async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<Value>,
) -> ApiResult<Value> {
    let single = body.is_object();
    let users: Vec<UserCreate> = if single {
        vec![serde_json::from_value(body).map_err(|e| ApiError::validation(e.to_string()))?]
    } else {
        serde_json::from_value(body).map_err(|e| ApiError::validation(e.to_string()))?
    };

    let mut rows = Vec::with_capacity(users.len());
    for user in users {
        rows.push(user.into_row().await?);
    }
    let created = api().insert(&state, &auth, rows).await?;
    Ok(ApiResponse::added(created_shape(created, single)))
}

/// DELETE /:id - Remove users other than the caller
async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let ids = parse_id(&id)?;
    if ids.contains(&auth.user.id) {
        return Err(ApiError::bad_request("You cannot delete yourself"));
    }
    let data = api().remove(&state, ids).await?;
    Ok(ApiResponse::deleted(data))
}

/// GET / - The authenticated user
async fn me(Extension(auth): Extension<AuthContext>) -> ApiResult<Value> {
    let data = serde_json::to_value(&auth.user).map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(ApiResponse::retrieved(data))
}

/// PATCH / - Update the authenticated user's profile
async fn update_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(mut patch): Json<UpdatePatch>,
) -> ApiResult<Value> {
    patch.retain(|field| SELF_EDITABLE.contains(&field));
    let data = api().update(&state, &auth, vec![auth.user.id], patch).await?;
    Ok(ApiResponse::updated(data))
}

/// DELETE / - Remove the authenticated user
async fn delete_me(State(state): State<AppState>, Extension(auth): Extension<AuthContext>) -> ApiResult<Value> {
    let data = api().remove(&state, vec![auth.user.id]).await?;
    Ok(ApiResponse::deleted(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registration_derives_profile_fields() {
        let user: UserCreate = serde_json::from_value(json!({
            "first_name": "Ada",
            "last_name": "Lovelace",
            "password": "engine",
            "email": "  Ada@Example.COM ",
        }))
        .unwrap();
        let row = user.into_row().await.unwrap();
        assert_eq!(row["full_name"], "Ada Lovelace");
        assert_eq!(row["email"], "ada@example.com");
        assert_eq!(row["is_active"], false);
        assert_eq!(row["allow_basic_login"], true);
        assert!(!row.contains_key("password"));
        assert!(row["hashed_password"].as_str().unwrap().starts_with("$2"));
    }

    #[tokio::test]
    async fn explicit_full_name_wins() {
        let user: UserCreate = serde_json::from_value(json!({
            "first_name": "Ada",
            "password": "engine",
            "full_name": "Countess",
            "email": "ada@example.com",
            "is_active": true,
        }))
        .unwrap();
        let row = user.into_row().await.unwrap();
        assert_eq!(row["full_name"], "Countess");
        assert_eq!(row["last_name"], "");
        assert_eq!(row["is_active"], true);
    }
}
