//! Persistence Layer
//!
//! SQLite storage for baskets, versions, time slots, subscriptions and the
//! history ledger, with async access via sqlx.
//!
//! Every lifecycle mutation is a conditional update guarded by the expected
//! current status (`UPDATE ... WHERE status = ?`), so racing writers resolve
//! to exactly one winner. Multi-row effects (sibling demotion, subscription
//! cascades, history) run inside the same transaction as the status write.
//!
//! # Database Schema
//!
//! ## baskets
//! - id, amc_id, name, description
//! - basket_type: "hour_bound" | "single_day" | "perpetual"
//! - current_version_id: nullable pointer into basket_versions
//! - subscription_fee
//!
//! ## basket_versions
//! - basket_id, version_number (unique per basket)
//! - status: DRAFT .. REJECTED, at most one PUBLISHED per basket (partial unique index)
//! - submitted_at, approved_at, approved_by, rejection_reason, price_at_approval, trading_date
//!
//! ## basket_instruments
//! - basket_version_id, instrument_token, symbol, exchange, quantity, weight
//!
//! ## basket_time_slots
//! - basket_version_id (unique), scheduled_date, start_time, end_time, duration_minutes
//! - timezone, set_by, actual_publish_time, actual_expire_time
//!
//! ## basket_subscriptions
//! - user_id, basket_id, basket_version_id, subscribed_at
//! - status: ACTIVE | EXPIRED | CANCELLED, at most one ACTIVE per (user, basket)
//! - expires_at, reminder_sent
//!
//! ## basket_history (insert-only, enforced by triggers)
//! - basket_version_id, action, actor_kind, actor_id, comment, metadata (JSON)
//!
//! ## lifecycle_write_lock
//! - a single row; every write transaction updates it first (see `LifecycleStore::begin`)
//!
//! All tables but history and the lock carry created_at / updated_at / deleted_at (soft delete).

pub mod basket_repository;
pub mod history_repository;
pub mod models;
pub mod store;
pub mod subscription_repository;
pub mod time_slot_repository;

pub use store::LifecycleStore;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{ConnectOptions, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::domain::errors::LifecycleError;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Connection a repository write runs on: a pooled connection or an open transaction
pub type DbConn = SqliteConnection;

pub type DbTransaction = Transaction<'static, Sqlite>;

/// Database error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// SQLITE_BUSY and its extended codes: another connection holds the write lock
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

impl From<DatabaseError> for LifecycleError {
    fn from(e: DatabaseError) -> Self {
        LifecycleError::Persistence(e.to_string())
    }
}

/// Map a failed statement to a `DatabaseError`, logging it first
pub(crate) fn query_failed(context: &'static str) -> impl FnOnce(sqlx::Error) -> DatabaseError {
    move |e| {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return DatabaseError::UniqueViolation(format!("{}: {}", context, db.message()));
            }
            if is_busy_code(db.code().as_deref()) {
                warn!("Database busy while trying to {}: {}", context, db.message());
                return DatabaseError::Busy(format!("{}: {}", context, db.message()));
            }
        }
        error!("Failed to {}: {}", context, e);
        DatabaseError::QueryError(format!("Failed to {}: {}", context, e))
    }
}

/// SQLITE_BUSY (5), SQLITE_BUSY_RECOVERY (261), SQLITE_BUSY_SNAPSHOT (517)
fn is_busy_code(code: Option<&str>) -> bool {
    matches!(code, Some("5") | Some("261") | Some("517"))
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/baskets.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/baskets.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// Private in-memory store, used by tests
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            log_queries: false,
        }
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://data/baskets.db".to_string());

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(5);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(cfg!(debug_assertions));

        Self {
            url,
            max_connections,
            log_queries,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Initialize the database connection pool and bootstrap the schema
///
/// An in-memory database lives inside a single connection, so the pool is
/// pinned to exactly one connection that is never recycled.
pub async fn init_database(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    // Ensure data directory exists
    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let mut options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    options = if config.log_queries {
        options.log_statements(tracing::log::LevelFilter::Debug)
    } else {
        options.disable_statement_logging()
    };

    let pool = if config.is_in_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        options = options.journal_mode(SqliteJournalMode::Wal);
        SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?
    };

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

const SCHEMA: &[(&str, &str)] = &[
    (
        "baskets table",
        r#"
        CREATE TABLE IF NOT EXISTS baskets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            amc_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            basket_type TEXT NOT NULL CHECK(basket_type IN ('hour_bound', 'single_day', 'perpetual')),
            current_version_id INTEGER REFERENCES basket_versions(id),
            subscription_fee REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    ),
    (
        "basket_versions table",
        r#"
        CREATE TABLE IF NOT EXISTS basket_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            basket_id INTEGER NOT NULL REFERENCES baskets(id),
            version_number INTEGER NOT NULL CHECK(version_number >= 1),
            status TEXT NOT NULL CHECK(status IN (
                'DRAFT', 'PENDING_APPROVAL', 'SCHEDULED', 'PUBLISHED',
                'EXPIRED', 'UNPUBLISHED', 'REJECTED'
            )),
            submitted_at TEXT,
            approved_at TEXT,
            approved_by INTEGER,
            rejection_reason TEXT,
            price_at_approval REAL,
            trading_date TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            UNIQUE(basket_id, version_number)
        )
        "#,
    ),
    (
        "basket_instruments table",
        r#"
        CREATE TABLE IF NOT EXISTS basket_instruments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            basket_version_id INTEGER NOT NULL REFERENCES basket_versions(id),
            instrument_token TEXT NOT NULL,
            symbol TEXT NOT NULL,
            exchange TEXT NOT NULL,
            quantity REAL NOT NULL CHECK(quantity > 0),
            weight REAL NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    ),
    (
        "basket_time_slots table",
        r#"
        CREATE TABLE IF NOT EXISTS basket_time_slots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            basket_version_id INTEGER NOT NULL UNIQUE REFERENCES basket_versions(id),
            scheduled_date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            duration_minutes INTEGER NOT NULL,
            timezone TEXT NOT NULL,
            set_by INTEGER NOT NULL,
            actual_publish_time TEXT,
            actual_expire_time TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            CHECK(end_time > start_time)
        )
        "#,
    ),
    (
        "basket_subscriptions table",
        r#"
        CREATE TABLE IF NOT EXISTS basket_subscriptions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            basket_id INTEGER NOT NULL REFERENCES baskets(id),
            basket_version_id INTEGER NOT NULL REFERENCES basket_versions(id),
            subscribed_at TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('ACTIVE', 'EXPIRED', 'CANCELLED')),
            expires_at TEXT,
            reminder_sent INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    ),
    (
        "basket_history table",
        r#"
        CREATE TABLE IF NOT EXISTS basket_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            basket_version_id INTEGER NOT NULL REFERENCES basket_versions(id),
            action TEXT NOT NULL,
            actor_kind TEXT NOT NULL CHECK(actor_kind IN ('AMC', 'ADMIN', 'SYSTEM', 'USER')),
            actor_id INTEGER NOT NULL,
            comment TEXT,
            metadata TEXT NOT NULL DEFAULT 'null',
            created_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "write lock table",
        r#"
        CREATE TABLE IF NOT EXISTS lifecycle_write_lock (
            id INTEGER PRIMARY KEY CHECK(id = 1),
            acquired_at TEXT
        )
        "#,
    ),
    (
        "write lock row",
        "INSERT OR IGNORE INTO lifecycle_write_lock (id, acquired_at) VALUES (1, NULL)",
    ),
    (
        "append-only update guard",
        r#"
        CREATE TRIGGER IF NOT EXISTS basket_history_no_update
        BEFORE UPDATE ON basket_history
        BEGIN
            SELECT RAISE(ABORT, 'basket_history is append-only');
        END
        "#,
    ),
    (
        "append-only delete guard",
        r#"
        CREATE TRIGGER IF NOT EXISTS basket_history_no_delete
        BEFORE DELETE ON basket_history
        BEGIN
            SELECT RAISE(ABORT, 'basket_history is append-only');
        END
        "#,
    ),
    (
        "single published version index",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_versions_one_published \
         ON basket_versions(basket_id) WHERE status = 'PUBLISHED' AND deleted_at IS NULL",
    ),
    (
        "single active subscription index",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_one_active \
         ON basket_subscriptions(user_id, basket_id) WHERE status = 'ACTIVE' AND deleted_at IS NULL",
    ),
    (
        "version status index",
        "CREATE INDEX IF NOT EXISTS idx_versions_status ON basket_versions(status)",
    ),
    (
        "instrument version index",
        "CREATE INDEX IF NOT EXISTS idx_instruments_version ON basket_instruments(basket_version_id)",
    ),
    (
        "slot start index",
        "CREATE INDEX IF NOT EXISTS idx_slots_start ON basket_time_slots(start_time)",
    ),
    (
        "slot end index",
        "CREATE INDEX IF NOT EXISTS idx_slots_end ON basket_time_slots(end_time)",
    ),
    (
        "subscription version index",
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_version \
         ON basket_subscriptions(basket_version_id, status)",
    ),
    (
        "subscription expiry index",
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_expires ON basket_subscriptions(expires_at)",
    ),
    (
        "history version index",
        "CREATE INDEX IF NOT EXISTS idx_history_version ON basket_history(basket_version_id)",
    ),
];

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    for (name, statement) in SCHEMA {
        sqlx::query(statement).execute(pool).await.map_err(|e| {
            DatabaseError::MigrationError(format!("Failed to create {}: {}", name, e))
        })?;
    }

    info!("✓ Database migrations completed successfully");

    Ok(())
}
