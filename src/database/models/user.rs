use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::database::DatabaseError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: Option<String>,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub allow_basic_login: bool,
    pub picture: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

const COLUMNS: &str = "id, first_name, last_name, full_name, email, hashed_password, is_active, \
                       is_staff, is_superuser, allow_basic_login, picture, created_at, updated_at";

impl User {
    pub async fn find_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<User>, DatabaseError> {
        let query = format!("SELECT {} FROM \"user\" WHERE lower(email) = lower($1)", COLUMNS);
        Ok(sqlx::query_as::<_, User>(&query).bind(email.trim()).fetch_optional(conn).await?)
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<User>, DatabaseError> {
        let query = format!("SELECT {} FROM \"user\" WHERE id = $1", COLUMNS);
        Ok(sqlx::query_as::<_, User>(&query).bind(id).fetch_optional(conn).await?)
    }

    pub async fn set_password(conn: &mut PgConnection, id: Uuid, hashed_password: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE \"user\" SET hashed_password = $1, updated_at = now() WHERE id = $2")
            .bind(hashed_password)
            .bind(id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fields echoed back as `meta` after a login or token refresh.
    pub fn auth_meta(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "first_name": self.first_name,
            "last_name": self.last_name,
            "full_name": self.full_name,
            "email": self.email,
            "picture": self.picture,
        })
    }
}
