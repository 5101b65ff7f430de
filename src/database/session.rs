use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::manager::DatabaseError;

/// One transaction per request.
///
/// `commit` makes the work so far durable and opens a fresh transaction, so
/// several façade calls in one request each commit on their own. Dropping a
/// session without finishing it rolls the open transaction back.
pub struct DbSession {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl DbSession {
    pub async fn begin(pool: &PgPool) -> Result<Self, DatabaseError> {
        let tx = pool.begin().await?;
        Ok(Self { pool: pool.clone(), tx: Some(tx) })
    }

    pub fn conn(&mut self) -> Result<&mut PgConnection, DatabaseError> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(DatabaseError::SessionClosed),
        }
    }

    pub async fn commit(&mut self) -> Result<(), DatabaseError> {
        let tx = self.tx.take().ok_or(DatabaseError::SessionClosed)?;
        tx.commit().await?;
        self.tx = Some(self.pool.begin().await?);
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), DatabaseError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    /// Commits when the request succeeded, rolls back otherwise.
    pub async fn finish<T, E>(mut self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<DatabaseError>,
    {
        let Some(tx) = self.tx.take() else {
            return result;
        };
        match result {
            Ok(value) => {
                tx.commit().await.map_err(DatabaseError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }
}
