//! Token acquisition (public) and session management (authenticated).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Form, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::{generate_cookie, generate_password, hash_password, verify_password, TokenType};
use crate::database::models::{sessions_to_replace, NewSession, Session, User};
use crate::database::{DatabaseError, DbSession};
use crate::error::ApiError;
use crate::middleware::auth::AUTH_COOKIE;
use crate::middleware::{auth_cookie, ApiResponse, ApiResult, AuthContext};
use crate::state::AppState;

/// Routes reachable without a token.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/basic", post(login))
        .route("/refresh-token", post(refresh_token))
}

/// Routes behind `require_auth`.
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", get(logout))
        .route("/basic/reset-password/:id", get(reset_password))
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutQuery {
    #[serde(default)]
    pub all_devices: bool,
}

/// `auth=<value>; HttpOnly; Path=/`, plus `Secure` outside plain-http setups.
pub fn session_cookie(value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((AUTH_COOKIE, value)).http_only(true).path("/").secure(secure).build()
}

async fn authenticate(state: &AppState, form: &LoginForm) -> Result<User, ApiError> {
    let incorrect = || ApiError::bad_request("Incorrect email or password");

    let mut conn = state.pool.acquire().await.map_err(DatabaseError::from)?;
    let user = User::find_by_email(&mut conn, &form.username).await?.ok_or_else(incorrect)?;
    drop(conn);

    if !user.is_active {
        return Err(ApiError::conflict("User is disabled"));
    }
    if !user.allow_basic_login {
        return Err(ApiError::conflict("Basic login is disabled for this user"));
    }
    let hashed = user.hashed_password.as_deref().ok_or_else(incorrect)?;
    if !verify_password(&form.password, hashed).await? {
        return Err(incorrect());
    }
    Ok(user)
}

/// POST /basic - Exchange email and password for a token pair
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<(CookieJar, ApiResponse<Value>), ApiError> {
    let user = authenticate(&state, &form).await?;
    let security = &state.config.security;

    let access = state.keys.issue(user.id, Some(&user.email), TokenType::Access, security.access_token_expire_minutes)?;
    let refresh = state.keys.issue(user.id, Some(&user.email), TokenType::Refresh, security.refresh_token_expire_minutes)?;

    let existing_cookie = auth_cookie(&jar);
    let cookie = existing_cookie.clone().unwrap_or_else(generate_cookie);

    let mut session = DbSession::begin(&state.pool).await?;
    let result: Result<Session, DatabaseError> = async {
        let conn = session.conn()?;
        let existing = Session::list_for_user(conn, user.id).await?;
        let stale = sessions_to_replace(&existing, existing_cookie.as_deref(), security.max_sessions);
        Session::delete_many(conn, &stale).await?;
        Session::insert(
            conn,
            &NewSession {
                cookie: cookie.clone(),
                access_token: access.token.clone(),
                refresh_token: refresh.token.clone(),
                expires_at: access.expires_at_i32(),
                user_id: user.id,
            },
        )
        .await
    }
    .await;
    session.finish(result).await?;

    tracing::info!(user_id = %user.id, "User logged in");

    let jar = match existing_cookie {
        Some(_) => jar,
        None => jar.add(session_cookie(cookie, security.secure_cookies)),
    };

    let data = json!({
        "access_token": access.token,
        "token_type": "bearer",
        "refresh_token": refresh.token,
        "expires_at": access.expires_at,
    });
    let response = ApiResponse::added(data)
        .with_meta(user.auth_meta())
        .with_message("Login correctly")
        .with_status(StatusCode::CREATED);
    Ok((jar, response))
}

/// POST /refresh-token - Issue a new access token for a live session
async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<RefreshRequest>,
) -> ApiResult<Value> {
    let claims = state.keys.verify(&body.refresh_token, TokenType::Refresh)?;
    let security = &state.config.security;

    let mut session = DbSession::begin(&state.pool).await?;
    let result: Result<Value, ApiError> = async {
        let conn = session.conn()?;
        let user = User::find_by_id(conn, claims.user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        if !user.is_active {
            return Err(ApiError::conflict("User is disabled"));
        }

        let sessions = Session::list_for_user(conn, user.id).await?;
        let current = sessions
            .iter()
            .find(|s| s.refresh_token.as_deref() == Some(body.refresh_token.as_str()))
            .ok_or_else(|| ApiError::unauthorized("The session does not exist"))?;

        let access = state.keys.issue(user.id, Some(&user.email), TokenType::Access, security.access_token_expire_minutes)?;
        let cookie = auth_cookie(&jar)
            .or_else(|| current.cookie.clone())
            .unwrap_or_else(generate_cookie);
        Session::refresh_access(conn, current.id, &access.token, access.expires_at_i32(), &cookie).await?;

        Ok(json!({
            "access_token": access.token,
            "token_type": "bearer",
            "refresh_token": body.refresh_token,
            "expires_at": access.expires_at,
        }))
    }
    .await;
    let data = session.finish(result).await?;

    Ok(ApiResponse::added(data)
        .with_message("Access token generated correctly")
        .with_status(StatusCode::CREATED))
}

/// GET /logout - Drop this device's session, or every session
async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    jar: CookieJar,
    Query(query): Query<LogoutQuery>,
) -> ApiResult<Value> {
    let ids: Vec<Uuid> = if query.all_devices {
        auth.sessions.iter().map(|s| s.id).collect()
    } else {
        auth.current_sessions(auth_cookie(&jar).as_deref())
    };

    let mut conn = state.pool.acquire().await.map_err(DatabaseError::from)?;
    let count = Session::delete_many(&mut conn, &ids).await?;
    tracing::info!(user_id = %auth.user.id, count, "User logged out");

    Ok(ApiResponse::deleted(json!({ "count": count })).with_message("Logged out"))
}

/// GET /basic/reset-password/:id - Replace a user's password with a random one
async fn reset_password(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    let id = Uuid::parse_str(id.trim()).map_err(|_| ApiError::validation("Invalid UUID format or value"))?;
    let password = generate_password();
    let hashed = hash_password(&password).await?;

    let mut conn = state.pool.acquire().await.map_err(DatabaseError::from)?;
    if !User::set_password(&mut conn, id, &hashed).await? {
        return Err(ApiError::not_found("User not found"));
    }

    Ok(ApiResponse::added(json!({ "password": password }))
        .with_message("New password")
        .with_status(StatusCode::CREATED))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_attributes_follow_config() {
        let plain = session_cookie("abc".to_string(), false);
        assert_eq!((plain.name(), plain.value()), ("auth", "abc"));
        assert_eq!(plain.http_only(), Some(true));
        assert_eq!(plain.path(), Some("/"));
        assert!(!plain.to_string().contains("Secure"));

        let secure = session_cookie("abc".to_string(), true);
        assert!(secure.to_string().contains("Secure"));
    }

    #[test]
    fn logout_defaults_to_this_device() {
        let query: LogoutQuery = serde_json::from_value(json!({})).unwrap();
        assert!(!query.all_devices);
    }
}
