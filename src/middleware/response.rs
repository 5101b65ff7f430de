use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Value};

pub const TOAST_HEADER: &str = "x-ui-toast";

pub const MSG_RETRIEVED: &str = "Data retrieved successfully";
pub const MSG_ADDED: &str = "Data added successfully";
pub const MSG_UPDATED: &str = "Data updated successfully";
pub const MSG_DELETED: &str = "Data deleted successfully";

/// `{message, meta, data}` envelope shared by every endpoint.
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: Value,
    pub message: String,
    pub status_code: StatusCode,
    pub toast: bool,
}

impl<T: Serialize> ApiResponse<T> {
    fn new(data: T, message: &str, toast: bool) -> Self {
        Self {
            data,
            meta: json!({}),
            message: message.to_string(),
            status_code: StatusCode::OK,
            toast,
        }
    }

    pub fn retrieved(data: T) -> Self {
        Self::new(data, MSG_RETRIEVED, false)
    }

    pub fn added(data: T) -> Self {
        Self::new(data, MSG_ADDED, false)
    }

    pub fn updated(data: T) -> Self {
        Self::new(data, MSG_UPDATED, true)
    }

    pub fn deleted(data: T) -> Self {
        Self::new(data, MSG_DELETED, true)
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_status(mut self, status_code: StatusCode) -> Self {
        self.status_code = status_code;
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let data = match serde_json::to_value(&self.data) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to serialize response data: {}", e);
                return crate::error::ApiError::internal("Failed to format response").into_response();
            }
        };

        let envelope = json!({
            "message": self.message,
            "meta": self.meta,
            "data": data,
        });
        let toast = if self.toast { "true" } else { "false" };
        let mut response = (self.status_code, Json(envelope)).into_response();
        response.headers_mut().insert(TOAST_HEADER, HeaderValue::from_static(toast));
        response
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, crate::error::ApiError>;

/// Fills in `X-UI-TOAST` for responses that did not set it themselves
/// (extractor rejections, unmatched routes).
pub async fn toast_header(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    if !response.headers().contains_key(TOAST_HEADER) {
        let status = response.status();
        let toast = (status.is_client_error() || status.is_server_error())
            && status != StatusCode::UNAUTHORIZED
            && status != StatusCode::SERVICE_UNAVAILABLE;
        let value = if toast { "true" } else { "false" };
        response.headers_mut().insert(TOAST_HEADER, HeaderValue::from_static(value));
    }
    response
}
