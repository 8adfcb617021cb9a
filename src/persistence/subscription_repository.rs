//! Subscription Repository

use chrono::{DateTime, Utc};
use tracing::debug;

use super::models::SubscriptionRecord;
use super::{query_failed, DatabaseError, DbConn, DbPool};
use crate::domain::entities::subscription::BasketSubscription;

/// Fields of a subscription about to be granted
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: i64,
    pub basket_id: i64,
    pub basket_version_id: i64,
    pub subscribed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SubscriptionRepository {
    pool: DbPool,
}

impl SubscriptionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert an ACTIVE subscription. A second ACTIVE row for the same
    /// (user, basket) surfaces as `DatabaseError::UniqueViolation`.
    pub async fn insert(
        &self,
        conn: &mut DbConn,
        subscription: &NewSubscription,
    ) -> Result<BasketSubscription, DatabaseError> {
        let record = sqlx::query_as::<_, SubscriptionRecord>(
            r#"
            INSERT INTO basket_subscriptions (
                user_id, basket_id, basket_version_id, subscribed_at, status, expires_at,
                reminder_sent, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, 'ACTIVE', ?5, 0, ?4, ?4)
            RETURNING *
            "#,
        )
        .bind(subscription.user_id)
        .bind(subscription.basket_id)
        .bind(subscription.basket_version_id)
        .bind(subscription.subscribed_at)
        .bind(subscription.expires_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(query_failed("create subscription"))?;

        debug!(
            "User {} subscribed to basket {} (version {})",
            record.user_id, record.basket_id, record.basket_version_id
        );
        record.try_into()
    }

    pub async fn find_active(
        &self,
        conn: &mut DbConn,
        user_id: i64,
        basket_id: i64,
    ) -> Result<Option<BasketSubscription>, DatabaseError> {
        sqlx::query_as::<_, SubscriptionRecord>(
            r#"
            SELECT * FROM basket_subscriptions
            WHERE user_id = ?1 AND basket_id = ?2 AND status = 'ACTIVE' AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(basket_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_failed("get active subscription"))?
        .map(BasketSubscription::try_from)
        .transpose()
    }

    pub async fn find(&self, conn: &mut DbConn, id: i64) -> Result<Option<BasketSubscription>, DatabaseError> {
        sqlx::query_as::<_, SubscriptionRecord>(
            "SELECT * FROM basket_subscriptions WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_failed("get subscription"))?
        .map(BasketSubscription::try_from)
        .transpose()
    }

    /// Users holding an ACTIVE subscription to a version
    pub async fn active_user_ids(&self, conn: &mut DbConn, version_id: i64) -> Result<Vec<i64>, DatabaseError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT user_id FROM basket_subscriptions
            WHERE basket_version_id = ?1 AND status = 'ACTIVE' AND deleted_at IS NULL
            ORDER BY user_id
            "#,
        )
        .bind(version_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(query_failed("list subscribers"))?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Expire every ACTIVE subscription on a version. Returns the affected count.
    pub async fn expire_for_version(
        &self,
        conn: &mut DbConn,
        version_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let rows = sqlx::query(
            r#"
            UPDATE basket_subscriptions
            SET status = 'EXPIRED', updated_at = ?1
            WHERE basket_version_id = ?2 AND status = 'ACTIVE' AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(version_id)
        .execute(&mut *conn)
        .await
        .map_err(query_failed("expire subscriptions"))?
        .rows_affected();

        if rows > 0 {
            debug!("Expired {} subscription(s) on version {}", rows, version_id);
        }
        Ok(rows)
    }

    /// ACTIVE -> CANCELLED. Returns false if the subscription was no longer active.
    pub async fn cancel(&self, conn: &mut DbConn, id: i64, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let rows = sqlx::query(
            r#"
            UPDATE basket_subscriptions
            SET status = 'CANCELLED', updated_at = ?1
            WHERE id = ?2 AND status = 'ACTIVE' AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(query_failed("cancel subscription"))?
        .rows_affected();

        Ok(rows == 1)
    }

    /// ACTIVE subscriptions whose expiry instant has passed
    pub async fn expire_lapsed(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let rows = sqlx::query(
            r#"
            UPDATE basket_subscriptions
            SET status = 'EXPIRED', updated_at = ?1
            WHERE status = 'ACTIVE' AND expires_at IS NOT NULL AND expires_at <= ?1
              AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(query_failed("expire lapsed subscriptions"))?
        .rows_affected();

        Ok(rows)
    }

    /// ACTIVE subscriptions expiring in (now, until] that have not been reminded
    pub async fn due_for_reminder(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<BasketSubscription>, DatabaseError> {
        sqlx::query_as::<_, SubscriptionRecord>(
            r#"
            SELECT * FROM basket_subscriptions
            WHERE status = 'ACTIVE' AND reminder_sent = 0
              AND expires_at IS NOT NULL AND expires_at > ?1 AND expires_at <= ?2
              AND deleted_at IS NULL
            ORDER BY expires_at ASC, id ASC
            "#,
        )
        .bind(now)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("select subscriptions due for reminder"))?
        .into_iter()
        .map(BasketSubscription::try_from)
        .collect()
    }

    pub async fn mark_reminded(&self, id: i64, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let rows = sqlx::query(
            r#"
            UPDATE basket_subscriptions
            SET reminder_sent = 1, updated_at = ?1
            WHERE id = ?2 AND reminder_sent = 0
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(query_failed("mark reminder sent"))?
        .rows_affected();

        Ok(rows == 1)
    }

    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<BasketSubscription>, DatabaseError> {
        sqlx::query_as::<_, SubscriptionRecord>(
            r#"
            SELECT * FROM basket_subscriptions
            WHERE user_id = ?1 AND deleted_at IS NULL
            ORDER BY subscribed_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("list subscriptions"))?
        .into_iter()
        .map(BasketSubscription::try_from)
        .collect()
    }

    pub async fn list_for_version(&self, version_id: i64) -> Result<Vec<BasketSubscription>, DatabaseError> {
        sqlx::query_as::<_, SubscriptionRecord>(
            r#"
            SELECT * FROM basket_subscriptions
            WHERE basket_version_id = ?1 AND deleted_at IS NULL
            ORDER BY id ASC
            "#,
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("list version subscriptions"))?
        .into_iter()
        .map(BasketSubscription::try_from)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::basket::{BasketType, NewBasket};
    use crate::domain::entities::subscription::SubscriptionStatus;
    use crate::persistence::basket_repository::BasketRepository;
    use crate::persistence::{init_database, DatabaseConfig};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 0).unwrap()
    }

    async fn setup() -> (DbPool, SubscriptionRepository, i64, i64) {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        let baskets = BasketRepository::new(pool.clone());
        let mut conn = pool.acquire().await.unwrap();
        let basket = baskets
            .insert_basket(
                &mut conn,
                3,
                &NewBasket {
                    name: "Index Tracker".to_string(),
                    description: None,
                    basket_type: BasketType::SingleDay,
                    subscription_fee: 10.0,
                    instruments: vec![],
                    trading_date: None,
                },
                t0(),
            )
            .await
            .unwrap();
        let version = baskets.insert_draft_version(&mut conn, basket.id, None, t0()).await.unwrap();
        drop(conn);
        (pool.clone(), SubscriptionRepository::new(pool), basket.id, version.id)
    }

    fn grant(user_id: i64, basket_id: i64, version_id: i64, expires_at: Option<DateTime<Utc>>) -> NewSubscription {
        NewSubscription {
            user_id,
            basket_id,
            basket_version_id: version_id,
            subscribed_at: t0(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_one_active_subscription_per_user_and_basket() {
        let (pool, repo, basket_id, version_id) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        repo.insert(&mut conn, &grant(1, basket_id, version_id, None)).await.unwrap();
        let err = repo
            .insert(&mut conn, &grant(1, basket_id, version_id, None))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::UniqueViolation(_)));

        // Another user is unaffected
        repo.insert(&mut conn, &grant(2, basket_id, version_id, None)).await.unwrap();
        assert_eq!(repo.active_user_ids(&mut conn, version_id).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_resubscribe_after_cancel() {
        let (pool, repo, basket_id, version_id) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let first = repo.insert(&mut conn, &grant(1, basket_id, version_id, None)).await.unwrap();
        assert!(repo.cancel(&mut conn, first.id, t0()).await.unwrap());
        assert!(!repo.cancel(&mut conn, first.id, t0()).await.unwrap());

        let second = repo.insert(&mut conn, &grant(1, basket_id, version_id, None)).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(
            repo.find(&mut conn, first.id).await.unwrap().unwrap().status,
            SubscriptionStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_expire_for_version_only_touches_active_rows() {
        let (pool, repo, basket_id, version_id) = setup().await;
        let mut conn = pool.acquire().await.unwrap();

        let cancelled = repo.insert(&mut conn, &grant(1, basket_id, version_id, None)).await.unwrap();
        repo.cancel(&mut conn, cancelled.id, t0()).await.unwrap();
        repo.insert(&mut conn, &grant(2, basket_id, version_id, None)).await.unwrap();

        assert_eq!(repo.expire_for_version(&mut conn, version_id, t0()).await.unwrap(), 1);
        assert_eq!(repo.expire_for_version(&mut conn, version_id, t0()).await.unwrap(), 0);
        drop(conn);

        let statuses: Vec<SubscriptionStatus> = repo
            .list_for_version(version_id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.status)
            .collect();
        assert_eq!(statuses, vec![SubscriptionStatus::Cancelled, SubscriptionStatus::Expired]);
    }

    #[tokio::test]
    async fn test_reminder_window_and_flag() {
        let (pool, repo, basket_id, version_id) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        let soon = repo
            .insert(&mut conn, &grant(1, basket_id, version_id, Some(t0() + Duration::hours(12))))
            .await
            .unwrap();
        repo.insert(&mut conn, &grant(2, basket_id, version_id, Some(t0() + Duration::hours(72))))
            .await
            .unwrap();
        repo.insert(&mut conn, &grant(3, basket_id, version_id, None)).await.unwrap();
        drop(conn);

        let due = repo.due_for_reminder(t0(), t0() + Duration::hours(48)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, soon.id);

        assert!(repo.mark_reminded(soon.id, t0()).await.unwrap());
        assert!(!repo.mark_reminded(soon.id, t0()).await.unwrap());
        assert!(repo.due_for_reminder(t0(), t0() + Duration::hours(48)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_lapsed() {
        let (pool, repo, basket_id, version_id) = setup().await;
        let mut conn = pool.acquire().await.unwrap();
        repo.insert(&mut conn, &grant(1, basket_id, version_id, Some(t0() + Duration::hours(1))))
            .await
            .unwrap();
        repo.insert(&mut conn, &grant(2, basket_id, version_id, None)).await.unwrap();
        drop(conn);

        assert_eq!(repo.expire_lapsed(t0()).await.unwrap(), 0);
        assert_eq!(repo.expire_lapsed(t0() + Duration::hours(1)).await.unwrap(), 1);

        let remaining = repo.list_for_user(2).await.unwrap();
        assert!(remaining[0].is_active());
    }
}
