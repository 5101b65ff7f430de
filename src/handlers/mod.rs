//! HTTP surface.
//!
//! Public: `/health`, `/api/v1/auth/basic`, `/api/v1/auth/refresh-token`.
//! Everything else runs behind `require_auth`.

pub mod auth;
pub mod cargo_insurance;
pub mod entity;
pub mod health;
pub mod sessions;
pub mod user;

use axum::{
    http::{HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::error::ApiError;
use crate::middleware::{require_auth, toast_header};
use crate::state::AppState;

pub use entity::{EntityApi, Operation, Prefilters};

pub const API_PREFIX: &str = "/api/v1";

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/user", user::router())
        .nest("/sessions", sessions::router())
        .nest("/cargo_insurance", cargo_insurance::router())
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let api = Router::new().nest("/auth", auth::public_router()).merge(protected);

    let mut router = Router::new()
        .route("/health", get(health::health))
        .nest(API_PREFIX, api)
        .fallback(not_found)
        .layer(from_fn(toast_header))
        .layer(cors(&state));
    if state.config.api.enable_request_logging {
        router = router.layer(TraceLayer::new_for_http());
    }
    router.with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not Found")
}

/// Development accepts any origin; other environments only the configured list.
fn cors(state: &AppState) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);
    if state.config.is_development() {
        return base.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = state
        .config
        .security
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
}
