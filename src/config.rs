use chrono::{FixedOffset, NaiveTime};
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::application::actors::SchedulerConfig;
use crate::domain::repositories::price_lookup::PriceLookup;
use crate::domain::services::market_calendar::MarketCalendar;
use crate::infrastructure::price_lookup::CachedPriceLookup;
use crate::persistence::DatabaseConfig;
use crate::task_runner::BackoffConfig;

/// Runtime configuration for the lifecycle daemon
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub database: DatabaseConfig,

    // Market calendar
    pub market_utc_offset_minutes: i32, // Market timezone as minutes east of UTC
    pub market_close_time: NaiveTime,   // Single-day cutoff, market-local

    // Scheduler
    pub scanner_interval_seconds: u64,
    pub reminder_time: NaiveTime, // Daily reminder sweep, market-local
    pub reminder_lookahead_hours: i64,

    // Price lookup cache
    pub price_cache_capacity: usize,
    pub price_cache_ttl_seconds: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            database: DatabaseConfig::default(),
            market_utc_offset_minutes: 330, // IST
            market_close_time: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or(NaiveTime::MIN),
            scanner_interval_seconds: 60,
            reminder_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            reminder_lookahead_hours: 48,
            price_cache_capacity: 256,
            price_cache_ttl_seconds: 30,
        }
    }
}

impl LifecycleConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> LifecycleConfig {
        let mut config = LifecycleConfig {
            database: DatabaseConfig::from_env(),
            ..LifecycleConfig::default()
        };

        if let Some(value) = parse_env::<i32>("MARKET_UTC_OFFSET_MINUTES") {
            if (-720..=840).contains(&value) {
                config.market_utc_offset_minutes = value;
            } else {
                tracing::warn!(
                    "Invalid MARKET_UTC_OFFSET_MINUTES value: {} (must be between -720 and 840), using default: {}",
                    value,
                    config.market_utc_offset_minutes
                );
            }
        }

        if let Some(value) = parse_time_env("MARKET_CLOSE_TIME") {
            config.market_close_time = value;
        }

        if let Some(value) = parse_env::<u64>("SCANNER_INTERVAL_SECONDS") {
            if (1..=3600).contains(&value) {
                config.scanner_interval_seconds = value;
            } else {
                tracing::warn!(
                    "Invalid SCANNER_INTERVAL_SECONDS value: {} (must be between 1 and 3600), using default: {}",
                    value,
                    config.scanner_interval_seconds
                );
            }
        }

        if let Some(value) = parse_time_env("REMINDER_TIME") {
            config.reminder_time = value;
        }

        if let Some(value) = parse_env::<i64>("REMINDER_LOOKAHEAD_HOURS") {
            if value > 0 {
                config.reminder_lookahead_hours = value;
            } else {
                tracing::warn!(
                    "Invalid REMINDER_LOOKAHEAD_HOURS value: {} (must be positive), using default: {}",
                    value,
                    config.reminder_lookahead_hours
                );
            }
        }

        if let Some(value) = parse_env::<usize>("PRICE_CACHE_CAPACITY") {
            if value > 0 {
                config.price_cache_capacity = value;
            } else {
                tracing::warn!(
                    "Invalid PRICE_CACHE_CAPACITY value: 0, using default: {}",
                    config.price_cache_capacity
                );
            }
        }

        if let Some(value) = parse_env::<u64>("PRICE_CACHE_TTL_SECONDS") {
            config.price_cache_ttl_seconds = value;
        }

        config
    }

    pub fn market_calendar(&self) -> MarketCalendar {
        let offset = FixedOffset::east_opt(self.market_utc_offset_minutes * 60)
            .unwrap_or_else(|| MarketCalendar::default().offset());
        MarketCalendar::new(offset, self.market_close_time)
    }

    pub fn scanner_interval(&self) -> Duration {
        Duration::from_secs(self.scanner_interval_seconds)
    }

    pub fn reminder_lookahead(&self) -> chrono::Duration {
        chrono::Duration::hours(self.reminder_lookahead_hours)
    }

    pub fn price_cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.price_cache_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn price_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.price_cache_ttl_seconds)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: self.scanner_interval(),
            reminder_time: self.reminder_time,
            reminder_lookahead: self.reminder_lookahead(),
            backoff: BackoffConfig::default(),
        }
    }

    /// Wrap a price source in the configured cache
    pub fn cached_prices(&self, source: Arc<dyn PriceLookup>) -> CachedPriceLookup {
        CachedPriceLookup::new(source, self.price_cache_capacity(), self.price_cache_ttl())
    }
}

fn parse_env<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Failed to parse {} '{}': {}, using default", name, raw, e);
            None
        }
    }
}

/// `HH:MM` or `HH:MM:SS`
fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

fn parse_time_env(name: &str) -> Option<NaiveTime> {
    let raw = std::env::var(name).ok()?;
    let parsed = parse_time(&raw);
    if parsed.is_none() {
        tracing::warn!("Invalid {} value: '{}' (expected HH:MM), using default", name, raw);
    }
    parsed
}
