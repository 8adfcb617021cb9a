//! Time Slot Repository
//!
//! Publishing windows for hour-bound versions, plus the due-work queries the
//! scanner sweeps with.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use super::models::{DueVersionRecord, TimeSlotRecord};
use super::{query_failed, DatabaseError, DbConn, DbPool};
use crate::domain::entities::time_slot::{BasketTimeSlot, SlotWindow};

#[derive(Clone)]
pub struct TimeSlotRepository {
    pool: DbPool,
}

impl TimeSlotRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        conn: &mut DbConn,
        version_id: i64,
        window: &SlotWindow,
        set_by: i64,
        now: DateTime<Utc>,
    ) -> Result<BasketTimeSlot, DatabaseError> {
        let record = sqlx::query_as::<_, TimeSlotRecord>(
            r#"
            INSERT INTO basket_time_slots (
                basket_version_id, scheduled_date, start_time, end_time, duration_minutes,
                timezone, set_by, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            RETURNING *
            "#,
        )
        .bind(version_id)
        .bind(window.scheduled_date)
        .bind(window.start_time)
        .bind(window.end_time)
        .bind(window.duration_minutes())
        .bind(&window.timezone)
        .bind(set_by)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(query_failed("create time slot"))?;

        debug!(
            "Slot for version {}: {} .. {}",
            version_id, record.start_time, record.end_time
        );
        Ok(record.into())
    }

    pub async fn find_by_version(
        &self,
        conn: &mut DbConn,
        version_id: i64,
    ) -> Result<Option<BasketTimeSlot>, DatabaseError> {
        let record = sqlx::query_as::<_, TimeSlotRecord>(
            "SELECT * FROM basket_time_slots WHERE basket_version_id = ?1 AND deleted_at IS NULL",
        )
        .bind(version_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_failed("get time slot"))?;

        Ok(record.map(BasketTimeSlot::from))
    }

    pub async fn get_by_version(&self, version_id: i64) -> Result<Option<BasketTimeSlot>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        self.find_by_version(&mut conn, version_id).await
    }

    /// SCHEDULED hour-bound versions whose window contains `now`, earliest start first
    pub async fn due_for_publish(&self, now: DateTime<Utc>) -> Result<Vec<DueVersionRecord>, DatabaseError> {
        sqlx::query_as::<_, DueVersionRecord>(
            r#"
            SELECT v.id AS version_id, v.basket_id, b.basket_type, s.id AS slot_id, s.start_time AS boundary
            FROM basket_versions v
            JOIN baskets b ON b.id = v.basket_id
            JOIN basket_time_slots s ON s.basket_version_id = v.id
            WHERE v.status = 'SCHEDULED'
              AND b.basket_type = 'hour_bound'
              AND s.actual_publish_time IS NULL
              AND s.start_time <= ?1
              AND s.end_time > ?1
              AND v.deleted_at IS NULL AND s.deleted_at IS NULL AND b.deleted_at IS NULL
            ORDER BY s.start_time ASC, v.id ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("select versions due for publish"))
    }

    /// PUBLISHED hour-bound versions whose window has closed, earliest end first
    pub async fn due_for_expiry(&self, now: DateTime<Utc>) -> Result<Vec<DueVersionRecord>, DatabaseError> {
        sqlx::query_as::<_, DueVersionRecord>(
            r#"
            SELECT v.id AS version_id, v.basket_id, b.basket_type, s.id AS slot_id, s.end_time AS boundary
            FROM basket_versions v
            JOIN baskets b ON b.id = v.basket_id
            JOIN basket_time_slots s ON s.basket_version_id = v.id
            WHERE v.status = 'PUBLISHED'
              AND b.basket_type = 'hour_bound'
              AND s.actual_expire_time IS NULL
              AND s.end_time <= ?1
              AND v.deleted_at IS NULL AND s.deleted_at IS NULL AND b.deleted_at IS NULL
            ORDER BY s.end_time ASC, v.id ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("select versions due for expiry"))
    }

    /// PUBLISHED single-day versions whose trading date is on or before `through`
    pub async fn single_day_due(&self, through: NaiveDate) -> Result<Vec<DueVersionRecord>, DatabaseError> {
        sqlx::query_as::<_, DueVersionRecord>(
            r#"
            SELECT v.id AS version_id, v.basket_id, b.basket_type,
                   NULL AS slot_id, NULL AS boundary
            FROM basket_versions v
            JOIN baskets b ON b.id = v.basket_id
            WHERE v.status = 'PUBLISHED'
              AND b.basket_type = 'single_day'
              AND (v.trading_date IS NULL OR v.trading_date <= ?1)
              AND v.deleted_at IS NULL AND b.deleted_at IS NULL
            ORDER BY v.trading_date ASC, v.id ASC
            "#,
        )
        .bind(through)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("select single-day versions due"))
    }

    /// Record when the window actually opened. No-op if already stamped.
    pub async fn stamp_publish(
        &self,
        conn: &mut DbConn,
        slot_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let rows = sqlx::query(
            r#"
            UPDATE basket_time_slots
            SET actual_publish_time = ?1, updated_at = ?1
            WHERE id = ?2 AND actual_publish_time IS NULL
            "#,
        )
        .bind(at)
        .bind(slot_id)
        .execute(&mut *conn)
        .await
        .map_err(query_failed("stamp publish time"))?
        .rows_affected();

        Ok(rows == 1)
    }

    /// Record when the window actually closed. No-op if already stamped.
    pub async fn stamp_expire(
        &self,
        conn: &mut DbConn,
        slot_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let rows = sqlx::query(
            r#"
            UPDATE basket_time_slots
            SET actual_expire_time = ?1, updated_at = ?1
            WHERE id = ?2 AND actual_expire_time IS NULL
            "#,
        )
        .bind(at)
        .bind(slot_id)
        .execute(&mut *conn)
        .await
        .map_err(query_failed("stamp expire time"))?
        .rows_affected();

        Ok(rows == 1)
    }
}
