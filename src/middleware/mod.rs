pub mod auth;
pub mod response;

pub use auth::{auth_cookie, require_auth, AuthContext};
pub use response::{toast_header, ApiResponse, ApiResult};
