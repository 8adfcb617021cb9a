//! Price Lookup Trait
//!
//! Opaque access to live instrument prices from a broker. Used only for the
//! approval-time snapshot and informational valuations, never to decide a
//! lifecycle transition.

use async_trait::async_trait;

use crate::domain::errors::PriceLookupError;

pub type PriceResult<T> = Result<T, PriceLookupError>;

#[async_trait]
pub trait PriceLookup: Send + Sync {
    /// Last traded price of an instrument
    async fn get_price(&self, instrument_token: &str) -> PriceResult<f64>;
}
