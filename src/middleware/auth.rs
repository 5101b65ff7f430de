use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use uuid::Uuid;

use crate::auth::{Claims, TokenType};
use crate::database::models::{Session, User};
use crate::database::{Actor, DatabaseError};
use crate::error::ApiError;
use crate::filter::VisibilityScope;
use crate::state::AppState;

pub const AUTH_COOKIE: &str = "auth";

/// Caller identity resolved from the bearer token.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user: User,
    pub sessions: Vec<Session>,
    pub access_token: String,
    pub claims: Claims,
}

impl AuthContext {
    /// Superusers see every row; everyone else is scoped to rows they own.
    pub fn visibility(&self) -> Option<VisibilityScope> {
        if self.user.is_superuser {
            None
        } else {
            Some(VisibilityScope { owners: vec![self.user.id], allow_null_owner: true })
        }
    }

    pub fn actor(&self) -> Actor {
        Actor { id: self.user.id, email: Some(self.user.email.clone()) }
    }

    /// Sessions belonging to this browser or this token.
    pub fn current_sessions(&self, cookie: Option<&str>) -> Vec<Uuid> {
        self.sessions
            .iter()
            .filter(|s| (cookie.is_some() && s.cookie.as_deref() == cookie) || s.access_token == self.access_token)
            .map(|s| s.id)
            .collect()
    }
}

/// Rejects requests without a valid access token and a live session.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())?;
    let claims = state.keys.verify(&token, TokenType::Access)?;

    let mut conn = state.pool.acquire().await.map_err(DatabaseError::from)?;
    let user = User::find_by_id(&mut conn, claims.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("auth: user not found"))?;
    let sessions = Session::list_for_user(&mut conn, user.id).await?;
    drop(conn);

    if sessions.is_empty() {
        return Err(ApiError::unauthorized("auth: user has no active sessions"));
    }
    if !user.is_active {
        return Err(ApiError::conflict("auth: user is not active"));
    }
    if !sessions.iter().any(|s| s.access_token == token) {
        return Err(ApiError::unauthorized("The session does not exist"));
    }

    tracing::debug!(user_id = %user.id, "Authenticated request");
    request
        .extensions_mut()
        .insert(AuthContext { user, sessions, access_token: token, claims });
    Ok(next.run(request).await)
}

pub fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("Not authenticated"))?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim().to_string())
        }
        _ => Err(ApiError::unauthorized("Not authenticated")),
    }
}

/// Value of the `auth` cookie, if the browser sent one.
pub fn auth_cookie(jar: &CookieJar) -> Option<String> {
    jar.get(AUTH_COOKIE).map(|cookie| cookie.value().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer_tokens() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), Err(ApiError::unauthorized("Not authenticated")));
    }

    #[test]
    fn finds_the_auth_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; auth=xyz; lang=en"));
        assert_eq!(auth_cookie(&CookieJar::from_headers(&headers)).as_deref(), Some("xyz"));

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; authx=nope"));
        assert_eq!(auth_cookie(&CookieJar::from_headers(&headers)), None);
    }
}
