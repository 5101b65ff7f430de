// HTTP API Error Types
use axum::{
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::auth::AuthError;
use crate::database::{CrudError, DatabaseError};
use crate::filter::FilterError;
use crate::middleware::response::TOAST_HEADER;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 422 Unprocessable Entity
    Validation(String),

    // 500 Internal Server Error
    Internal(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Validation(msg)
            | ApiError::Internal(msg)
            | ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Whether the UI should surface the error as a toast.
    pub fn toast(&self) -> bool {
        !matches!(self, ApiError::Unauthorized(_) | ApiError::ServiceUnavailable(_))
    }

    pub fn to_json(&self) -> Value {
        json!({ "detail": self.message() })
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }

    /// Inserts report constraint violations as conflicts rather than bad requests.
    pub fn on_create(err: CrudError) -> Self {
        match err {
            CrudError::Database(DatabaseError::Integrity(detail)) => ApiError::conflict(format!("error: {}", detail)),
            other => other.into(),
        }
    }
}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        if err.is_client_error() {
            tracing::debug!("Rejected query parameters: {}", err);
            ApiError::validation(err.to_string())
        } else {
            tracing::error!("Schema error: {}", err);
            ApiError::internal("An error occurred while processing your request")
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Integrity(detail) => ApiError::bad_request(format!("error: {}", detail)),
            DatabaseError::Unavailable { .. } => {
                tracing::error!("Database unavailable: {}", err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DatabaseError::Sqlx(sqlx::Error::PoolTimedOut) => {
                tracing::error!("Database pool timed out");
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            other => {
                // Log the real error but return generic message
                tracing::error!("Database error: {}", other);
                ApiError::internal("Database error occurred")
            }
        }
    }
}

impl From<CrudError> for ApiError {
    fn from(err: CrudError) -> Self {
        match err {
            CrudError::Filter(e) => e.into(),
            CrudError::Database(e) => e.into(),
            CrudError::EmptyId => ApiError::bad_request(err.to_string()),
            CrudError::UnknownField(_) | CrudError::InvalidValue { .. } => {
                tracing::debug!("Rejected payload: {}", err);
                ApiError::validation(err.to_string())
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Token(_) | AuthError::WrongTokenType { .. } => {
                tracing::debug!("Rejected token: {}", err);
                ApiError::unauthorized("Could not validate credentials")
            }
            AuthError::InvalidKey(_) | AuthError::Hashing(_) => {
                tracing::error!("Auth error: {}", err);
                ApiError::internal("An error occurred while processing your request")
            }
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let toast = if self.toast() { "true" } else { "false" };
        let mut response = (self.status_code(), Json(self.to_json())).into_response();
        response.headers_mut().insert(TOAST_HEADER, HeaderValue::from_static(toast));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_errors_are_unprocessable() {
        let err: ApiError = FilterError::DoubleSort.into();
        assert_eq!(err, ApiError::Validation("Can not apply two sorts".to_string()));
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn integrity_violations_depend_on_the_operation() {
        let integrity = || CrudError::Database(DatabaseError::Integrity("Key (email) already exists.".into()));
        assert_eq!(ApiError::from(integrity()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::on_create(integrity()).status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn unauthorized_responses_do_not_toast() {
        let response = ApiError::unauthorized("auth: user has no active sessions").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[TOAST_HEADER], "false");

        let response = ApiError::not_found("auth: user not found").into_response();
        assert_eq!(response.headers()[TOAST_HEADER], "true");
    }
}
