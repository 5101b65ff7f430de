use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::database::DatabaseError;

/// One issued token pair, bound to a browser cookie.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub cookie: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_at: Option<i32>,
    pub created_at: NaiveDateTime,
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub cookie: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i32,
    pub user_id: Uuid,
}

const COLUMNS: &str = "id, cookie, access_token, refresh_token, token_type, expires_at, created_at, user_id";

impl Session {
    pub async fn find_by_access_token(conn: &mut PgConnection, token: &str) -> Result<Option<Session>, DatabaseError> {
        let query = format!("SELECT {} FROM sessions WHERE access_token = $1", COLUMNS);
        Ok(sqlx::query_as::<_, Session>(&query).bind(token).fetch_optional(conn).await?)
    }

    /// Oldest first.
    pub async fn list_for_user(conn: &mut PgConnection, user_id: Uuid) -> Result<Vec<Session>, DatabaseError> {
        let query = format!("SELECT {} FROM sessions WHERE user_id = $1 ORDER BY created_at ASC", COLUMNS);
        Ok(sqlx::query_as::<_, Session>(&query).bind(user_id).fetch_all(conn).await?)
    }

    pub async fn insert(conn: &mut PgConnection, new: &NewSession) -> Result<Session, DatabaseError> {
        let query = format!(
            "INSERT INTO sessions (cookie, access_token, refresh_token, expires_at, user_id) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            COLUMNS
        );
        Ok(sqlx::query_as::<_, Session>(&query)
            .bind(&new.cookie)
            .bind(&new.access_token)
            .bind(&new.refresh_token)
            .bind(new.expires_at)
            .bind(new.user_id)
            .fetch_one(conn)
            .await?)
    }

    pub async fn refresh_access(
        conn: &mut PgConnection,
        id: Uuid,
        access_token: &str,
        expires_at: i32,
        cookie: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE sessions SET access_token = $1, expires_at = $2, cookie = $3 WHERE id = $4")
            .bind(access_token)
            .bind(expires_at)
            .bind(cookie)
            .bind(id)
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn delete_many(conn: &mut PgConnection, ids: &[Uuid]) -> Result<u64, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM sessions WHERE id = ANY($1)")
            .bind(ids)
            .execute(conn)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Sessions to drop before adding a new one: any bound to the caller's
/// cookie, plus the oldest when the user is already at `max_sessions`.
pub fn sessions_to_replace(existing: &[Session], cookie: Option<&str>, max_sessions: usize) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = existing
        .iter()
        .filter(|s| cookie.is_some() && s.cookie.as_deref() == cookie)
        .map(|s| s.id)
        .collect();
    if existing.len() >= max_sessions {
        if let Some(oldest) = existing.iter().min_by_key(|s| s.created_at) {
            if !ids.contains(&oldest.id) {
                ids.push(oldest.id);
            }
        }
    }
    ids
}
