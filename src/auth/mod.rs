pub mod jwk;
pub mod password;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use jwk::{Jwk, KeyPair};
pub use password::{generate_cookie, generate_password, hash_password, verify_password};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid JWK: {0}")]
    InvalidKey(String),

    #[error("Invalid token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Expected a {expected} token")]
    WrongTokenType { expected: TokenType },

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Access => write!(f, "access"),
            TokenType::Refresh => write!(f, "refresh"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub exp: i64,
    pub iat: i64,
    /// Keeps tokens issued within the same second distinct.
    #[serde(default = "Uuid::nil")]
    pub jti: Uuid,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

impl IssuedToken {
    /// Expiry as stored in the sessions table (int4).
    pub fn expires_at_i32(&self) -> i32 {
        i32::try_from(self.expires_at).unwrap_or(i32::MAX)
    }
}

impl KeyPair {
    pub fn issue(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        token_type: TokenType,
        ttl_minutes: i64,
    ) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let expires_at = (now + Duration::minutes(ttl_minutes)).timestamp();
        let claims = Claims {
            user_id,
            email: email.map(str::to_string),
            token_type,
            exp: expires_at,
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding)?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Checks signature, expiry and the `type` claim.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::RS256);
        let claims = decode::<Claims>(token, &self.decoding, &validation)?.claims;
        if claims.token_type != expected {
            return Err(AuthError::WrongTokenType { expected });
        }
        Ok(claims)
    }
}
