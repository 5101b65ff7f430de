//! Router behaviour that needs no live database: the pool connects lazily
//! to a closed port, so anything reaching the store fails fast.

mod common;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use cargo_tariff_api::auth::{Jwk, KeyPair, TokenType};
use cargo_tariff_api::config::AppConfig;
use cargo_tariff_api::database::DatabaseManager;
use cargo_tariff_api::handlers;
use cargo_tariff_api::state::AppState;

fn app() -> Result<(Router, KeyPair)> {
    let config = AppConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://nobody@127.0.0.1:1/none".to_string()),
        "DATABASE_CONNECTION_TIMEOUT" => Some("1".to_string()),
        "JWK" => Some(common::JWK.to_string()),
        _ => None,
    })?;
    let jwk = Jwk::from_json(common::JWK)?;
    let pool = DatabaseManager::connect_lazy(&config.database)?;
    let state = AppState::new(pool, config, KeyPair::from_jwk(&jwk)?)?;
    Ok((handlers::router(state), KeyPair::from_jwk(&jwk)?))
}

async fn send(app: Router, request: Request<Body>) -> Result<(StatusCode, String, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let toast = response
        .headers()
        .get("x-ui-toast")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, toast, body))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() -> Result<()> {
    for uri in ["/api/v1/cargo_insurance/list", "/api/v1/user", "/api/v1/sessions/list", "/api/v1/auth/logout"] {
        let (app, _) = app()?;
        let (status, toast, body) = send(app, get(uri)).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        assert_eq!(toast, "false");
        assert_eq!(body["detail"], "Not authenticated");
    }
    Ok(())
}

#[tokio::test]
async fn refresh_tokens_do_not_authenticate_requests() -> Result<()> {
    let (app, keys) = app()?;
    let refresh = keys.issue(uuid::Uuid::new_v4(), None, TokenType::Refresh, 10)?;
    let request = Request::builder()
        .uri("/api/v1/cargo_insurance/list")
        .header(header::AUTHORIZATION, format!("Bearer {}", refresh.token))
        .body(Body::empty())?;
    let (status, _, body) = send(app, request).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Could not validate credentials");
    Ok(())
}

#[tokio::test]
async fn garbage_refresh_token_is_rejected_before_the_store() -> Result<()> {
    let (app, _) = app()?;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/refresh-token")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"refresh_token":"not-a-jwt"}"#))?;
    let (status, toast, _) = send(app, request).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(toast, "false");
    Ok(())
}

#[tokio::test]
async fn incomplete_login_form_is_unprocessable() -> Result<()> {
    let (app, _) = app()?;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/basic")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("username=ops%40example.com"))?;
    let (status, toast, _) = send(app, request).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(toast, "true");
    Ok(())
}

#[tokio::test]
async fn unknown_paths_fall_back_to_404() -> Result<()> {
    let (app, _) = app()?;
    let (status, toast, body) = send(app, get("/api/v2/anything")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(toast, "true");
    assert_eq!(body["detail"], "Not Found");
    Ok(())
}

#[tokio::test]
async fn health_is_503_without_a_database() -> Result<()> {
    let (app, _) = app()?;
    let (status, toast, body) = send(app, get("/health")).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(toast, "false");
    assert_eq!(body["status"], "degraded");
    Ok(())
}
