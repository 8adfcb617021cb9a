//! History Repository
//!
//! Append-only audit ledger. The table rejects updates and deletes, so the
//! only write here is `append`.

use chrono::{DateTime, Utc};

use super::models::HistoryRecord;
use super::{query_failed, DatabaseError, DbConn, DbPool};
use crate::domain::entities::history::{BasketHistory, NewHistoryEntry};

#[derive(Clone)]
pub struct HistoryRepository {
    pool: DbPool,
}

impl HistoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        conn: &mut DbConn,
        entry: &NewHistoryEntry,
        now: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let metadata = serde_json::to_string(&entry.metadata)
            .map_err(|e| DatabaseError::QueryError(format!("Failed to encode history metadata: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO basket_history (
                basket_version_id, action, actor_kind, actor_id, comment, metadata, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(entry.basket_version_id)
        .bind(entry.action.as_str())
        .bind(entry.actor.kind.as_str())
        .bind(entry.actor.id)
        .bind(&entry.comment)
        .bind(metadata)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(query_failed("append history"))?;

        Ok(result.last_insert_rowid())
    }

    /// Full ledger of a version in insertion order
    pub async fn list_for_version(&self, version_id: i64) -> Result<Vec<BasketHistory>, DatabaseError> {
        sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT id, basket_version_id, action, actor_kind, actor_id, comment, metadata, created_at
            FROM basket_history
            WHERE basket_version_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("list history"))?
        .into_iter()
        .map(BasketHistory::try_from)
        .collect()
    }
}
