//! Basket Repository
//!
//! Data access for baskets, their versions and constituents. Writes take an
//! explicit connection so they can be composed inside one transaction.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use super::models::*;
use super::{query_failed, DatabaseError, DbConn, DbPool};
use crate::domain::entities::basket::{Basket, NewBasket};
use crate::domain::entities::basket_version::{BasketVersion, VersionStatus};
use crate::domain::entities::instrument::{BasketInstrument, NewInstrument};

/// Conditional status write for a basket version.
///
/// Optional fields are only written when `Some`; existing values are kept otherwise.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub version_id: i64,
    pub expected: VersionStatus,
    pub to: VersionStatus,
    pub at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<i64>,
    pub rejection_reason: Option<String>,
    pub price_at_approval: Option<f64>,
    pub trading_date: Option<NaiveDate>,
}

impl StatusChange {
    pub fn new(version_id: i64, expected: VersionStatus, to: VersionStatus, at: DateTime<Utc>) -> Self {
        Self {
            version_id,
            expected,
            to,
            at,
            submitted_at: None,
            approved_at: None,
            approved_by: None,
            rejection_reason: None,
            price_at_approval: None,
            trading_date: None,
        }
    }
}

/// Basket and version repository
#[derive(Clone)]
pub struct BasketRepository {
    pool: DbPool,
}

impl BasketRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Insert a basket without a current version
    pub async fn insert_basket(
        &self,
        conn: &mut DbConn,
        amc_id: i64,
        basket: &NewBasket,
        now: DateTime<Utc>,
    ) -> Result<Basket, DatabaseError> {
        let record = sqlx::query_as::<_, BasketRecord>(
            r#"
            INSERT INTO baskets (
                amc_id, name, description, basket_type, current_version_id,
                subscription_fee, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?6)
            RETURNING *
            "#,
        )
        .bind(amc_id)
        .bind(&basket.name)
        .bind(&basket.description)
        .bind(basket.basket_type.as_str())
        .bind(basket.subscription_fee)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(query_failed("create basket"))?;

        debug!("Created basket {} ({}) for AMC {}", record.id, record.name, amc_id);
        record.try_into()
    }

    /// Insert a DRAFT version numbered one past the basket's highest version
    pub async fn insert_draft_version(
        &self,
        conn: &mut DbConn,
        basket_id: i64,
        trading_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<BasketVersion, DatabaseError> {
        let record = sqlx::query_as::<_, BasketVersionRecord>(
            r#"
            INSERT INTO basket_versions (
                basket_id, version_number, status, trading_date, created_at, updated_at
            )
            VALUES (
                ?1,
                (SELECT COALESCE(MAX(version_number), 0) + 1 FROM basket_versions WHERE basket_id = ?1),
                'DRAFT', ?2, ?3, ?3
            )
            RETURNING *
            "#,
        )
        .bind(basket_id)
        .bind(trading_date)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(query_failed("create basket version"))?;

        debug!(
            "Created version {} (v{}) of basket {}",
            record.id, record.version_number, basket_id
        );
        record.try_into()
    }

    pub async fn insert_instrument(
        &self,
        conn: &mut DbConn,
        version_id: i64,
        instrument: &NewInstrument,
        now: DateTime<Utc>,
    ) -> Result<BasketInstrument, DatabaseError> {
        let record = sqlx::query_as::<_, InstrumentRecord>(
            r#"
            INSERT INTO basket_instruments (
                basket_version_id, instrument_token, symbol, exchange, quantity, weight,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            RETURNING id, basket_version_id, instrument_token, symbol, exchange, quantity, weight
            "#,
        )
        .bind(version_id)
        .bind(&instrument.instrument_token)
        .bind(&instrument.symbol)
        .bind(&instrument.exchange)
        .bind(instrument.quantity)
        .bind(instrument.weight)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(query_failed("add instrument"))?;

        Ok(record.into())
    }

    pub async fn find_basket(&self, conn: &mut DbConn, id: i64) -> Result<Option<Basket>, DatabaseError> {
        sqlx::query_as::<_, BasketRecord>("SELECT * FROM baskets WHERE id = ?1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(query_failed("get basket"))?
            .map(Basket::try_from)
            .transpose()
    }

    pub async fn find_version(
        &self,
        conn: &mut DbConn,
        id: i64,
    ) -> Result<Option<BasketVersion>, DatabaseError> {
        sqlx::query_as::<_, BasketVersionRecord>(
            "SELECT * FROM basket_versions WHERE id = ?1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_failed("get basket version"))?
        .map(BasketVersion::try_from)
        .transpose()
    }

    /// The sibling currently holding PUBLISHED, if any
    pub async fn find_published_version(
        &self,
        conn: &mut DbConn,
        basket_id: i64,
    ) -> Result<Option<BasketVersion>, DatabaseError> {
        sqlx::query_as::<_, BasketVersionRecord>(
            r#"
            SELECT * FROM basket_versions
            WHERE basket_id = ?1 AND status = 'PUBLISHED' AND deleted_at IS NULL
            "#,
        )
        .bind(basket_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_failed("get published version"))?
        .map(BasketVersion::try_from)
        .transpose()
    }

    /// Latest version still in one of `statuses`
    pub async fn find_latest_with_status(
        &self,
        conn: &mut DbConn,
        basket_id: i64,
        statuses: &[VersionStatus],
    ) -> Result<Option<BasketVersion>, DatabaseError> {
        let versions = self.list_versions_on(conn, basket_id).await?;
        Ok(versions
            .into_iter()
            .rev()
            .find(|v| statuses.contains(&v.status)))
    }

    pub async fn count_instruments(&self, conn: &mut DbConn, version_id: i64) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM basket_instruments WHERE basket_version_id = ?1 AND deleted_at IS NULL",
        )
        .bind(version_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(query_failed("count instruments"))?;

        Ok(count)
    }

    /// Apply a status change only if the version still holds `expected`.
    /// Returns false when another writer got there first.
    pub async fn change_status(&self, conn: &mut DbConn, change: &StatusChange) -> Result<bool, DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE basket_versions
            SET status = ?1,
                updated_at = ?2,
                submitted_at = COALESCE(?3, submitted_at),
                approved_at = COALESCE(?4, approved_at),
                approved_by = COALESCE(?5, approved_by),
                rejection_reason = COALESCE(?6, rejection_reason),
                price_at_approval = COALESCE(?7, price_at_approval),
                trading_date = COALESCE(?8, trading_date)
            WHERE id = ?9 AND status = ?10 AND deleted_at IS NULL
            "#,
        )
        .bind(change.to.as_str())
        .bind(change.at)
        .bind(change.submitted_at)
        .bind(change.approved_at)
        .bind(change.approved_by)
        .bind(&change.rejection_reason)
        .bind(change.price_at_approval)
        .bind(change.trading_date)
        .bind(change.version_id)
        .bind(change.expected.as_str())
        .execute(&mut *conn)
        .await
        .map_err(query_failed("update version status"))?
        .rows_affected();

        if rows_affected == 1 {
            debug!(
                "Version {} moved {} -> {}",
                change.version_id, change.expected, change.to
            );
        }
        Ok(rows_affected == 1)
    }

    /// Point the basket at a version that has left DRAFT
    pub async fn set_current_version(
        &self,
        conn: &mut DbConn,
        basket_id: i64,
        version_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE baskets
            SET current_version_id = ?1, updated_at = ?2
            WHERE id = ?3 AND deleted_at IS NULL
              AND EXISTS (
                  SELECT 1 FROM basket_versions
                  WHERE id = ?1 AND basket_id = ?3 AND status != 'DRAFT'
              )
            "#,
        )
        .bind(version_id)
        .bind(now)
        .bind(basket_id)
        .execute(&mut *conn)
        .await
        .map_err(query_failed("update current version"))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DatabaseError::QueryError(format!(
                "Basket {} cannot point at version {}",
                basket_id, version_id
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pool reads
    // ------------------------------------------------------------------

    pub async fn get_basket(&self, id: i64) -> Result<Option<Basket>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        self.find_basket(&mut conn, id).await
    }

    pub async fn get_version(&self, id: i64) -> Result<Option<BasketVersion>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        self.find_version(&mut conn, id).await
    }

    /// All versions of a basket, oldest first
    pub async fn list_versions(&self, basket_id: i64) -> Result<Vec<BasketVersion>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        self.list_versions_on(&mut conn, basket_id).await
    }

    pub async fn list_versions_on(
        &self,
        conn: &mut DbConn,
        basket_id: i64,
    ) -> Result<Vec<BasketVersion>, DatabaseError> {
        sqlx::query_as::<_, BasketVersionRecord>(
            r#"
            SELECT * FROM basket_versions
            WHERE basket_id = ?1 AND deleted_at IS NULL
            ORDER BY version_number ASC
            "#,
        )
        .bind(basket_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(query_failed("list basket versions"))?
        .into_iter()
        .map(BasketVersion::try_from)
        .collect()
    }

    pub async fn list_instruments(&self, version_id: i64) -> Result<Vec<BasketInstrument>, DatabaseError> {
        let records = sqlx::query_as::<_, InstrumentRecord>(
            r#"
            SELECT id, basket_version_id, instrument_token, symbol, exchange, quantity, weight
            FROM basket_instruments
            WHERE basket_version_id = ?1 AND deleted_at IS NULL
            ORDER BY id ASC
            "#,
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("list instruments"))?;

        Ok(records.into_iter().map(BasketInstrument::from).collect())
    }
}
