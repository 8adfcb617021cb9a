use super::basket_repository::BasketRepository;
use super::history_repository::HistoryRepository;
use super::subscription_repository::SubscriptionRepository;
use super::time_slot_repository::TimeSlotRepository;
use super::{query_failed, DatabaseError, DbPool, DbTransaction};

/// All repositories over one pool, plus transaction entry
#[derive(Clone)]
pub struct LifecycleStore {
    pool: DbPool,
    pub baskets: BasketRepository,
    pub slots: TimeSlotRepository,
    pub subscriptions: SubscriptionRepository,
    pub history: HistoryRepository,
}

impl LifecycleStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            baskets: BasketRepository::new(pool.clone()),
            slots: TimeSlotRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            history: HistoryRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Open a write transaction holding SQLite's write lock.
    ///
    /// sqlx 0.7 only issues a deferred `BEGIN`, so the first statement is a
    /// write to the lock row. That takes the lock up front, waiting out
    /// `busy_timeout` behind any other writer, and every read that follows
    /// sees the latest committed state. Nothing else may touch the pool from
    /// the same task until the transaction is committed or dropped.
    pub async fn begin(&self) -> Result<DbTransaction, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE lifecycle_write_lock SET acquired_at = CURRENT_TIMESTAMP WHERE id = 1")
            .execute(&mut *tx)
            .await
            .map_err(query_failed("take the write lock"))?;
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{init_database, DatabaseConfig};
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_writer_waits_for_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("lock.db").display()),
            max_connections: 4,
            log_queries: false,
        };
        let store = LifecycleStore::new(init_database(&config).await.unwrap());

        let first = store.begin().await.unwrap();

        let second_store = store.clone();
        let second = tokio::spawn(async move {
            let tx = second_store.begin().await.unwrap();
            tx.commit().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!second.is_finished(), "second writer should block on the lock");

        first.commit().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_the_lock() {
        let store = LifecycleStore::new(init_database(&DatabaseConfig::in_memory()).await.unwrap());

        let tx = store.begin().await.unwrap();
        drop(tx);

        let tx = store.begin().await.unwrap();
        tx.commit().await.unwrap();
    }
}
