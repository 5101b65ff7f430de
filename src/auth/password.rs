use rand::distr::Alphanumeric;
use rand::Rng;

use super::AuthError;

const GENERATED_PASSWORD_LEN: usize = 12;
const COOKIE_LEN: usize = 32;

/// bcrypt is CPU-bound; it runs on the blocking pool.
pub async fn hash_password(password: &str) -> Result<String, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// A malformed stored hash counts as a mismatch.
pub async fn verify_password(password: &str, hashed: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hashed = hashed.to_string();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hashed))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?;
    match verified {
        Ok(matches) => Ok(matches),
        Err(e) => {
            tracing::warn!("Stored password hash is unusable: {}", e);
            Ok(false)
        }
    }
}

fn random_string(len: usize) -> String {
    rand::rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

pub fn generate_password() -> String {
    random_string(GENERATED_PASSWORD_LEN)
}

/// Value of the `auth` cookie binding a browser to its sessions.
pub fn generate_cookie() -> String {
    random_string(COOKIE_LEN)
}
