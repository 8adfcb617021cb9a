//! Informational basket valuation.
//!
//! Prices come from the lookup collaborator and never influence a lifecycle
//! decision. A failed lookup leaves the affected figure empty instead of
//! failing the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::entities::instrument::BasketInstrument;
use crate::domain::errors::{LifecycleError, LifecycleResult, PriceLookupError};
use crate::domain::repositories::price_lookup::PriceLookup;
use crate::domain::services::clock::Clock;
use crate::persistence::basket_repository::BasketRepository;

/// Σ quantity × price over all constituents. Fails on the first missing price.
pub async fn snapshot_value(
    prices: &dyn PriceLookup,
    instruments: &[BasketInstrument],
) -> Result<f64, PriceLookupError> {
    let mut total = 0.0;
    for instrument in instruments {
        let price = prices.get_price(&instrument.instrument_token).await?;
        total += instrument.quantity * price;
    }
    Ok(total)
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstituentValue {
    pub instrument_token: String,
    pub symbol: String,
    pub quantity: f64,
    pub price: Option<f64>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Valuation {
    pub version_id: i64,
    pub priced_at: DateTime<Utc>,
    pub constituents: Vec<ConstituentValue>,
    /// Sum over priced constituents only; `None` if any price is missing
    pub current_value: Option<f64>,
    pub price_at_approval: Option<f64>,
    pub change_percent: Option<f64>,
}

impl Valuation {
    pub fn is_complete(&self) -> bool {
        self.current_value.is_some()
    }
}

/// Current value of a version against its approval snapshot
pub struct ValuationService {
    baskets: BasketRepository,
    prices: Arc<dyn PriceLookup>,
    clock: Arc<dyn Clock>,
}

impl ValuationService {
    pub fn new(baskets: BasketRepository, prices: Arc<dyn PriceLookup>, clock: Arc<dyn Clock>) -> Self {
        Self { baskets, prices, clock }
    }

    pub async fn current_value(&self, version_id: i64) -> LifecycleResult<Valuation> {
        let version = self
            .baskets
            .get_version(version_id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("Basket version", version_id))?;
        let instruments = self.baskets.list_instruments(version_id).await?;

        let mut constituents = Vec::with_capacity(instruments.len());
        let mut missing = 0;
        for instrument in instruments {
            let price = match self.prices.get_price(&instrument.instrument_token).await {
                Ok(price) => Some(price),
                Err(e) => {
                    warn!("No price for {} ({}): {}", instrument.symbol, instrument.instrument_token, e);
                    missing += 1;
                    None
                }
            };
            constituents.push(ConstituentValue {
                value: price.map(|p| p * instrument.quantity),
                instrument_token: instrument.instrument_token,
                symbol: instrument.symbol,
                quantity: instrument.quantity,
                price,
            });
        }

        let current_value = if missing == 0 {
            Some(constituents.iter().filter_map(|c| c.value).sum::<f64>())
        } else {
            None
        };

        let change_percent = match (current_value, version.price_at_approval) {
            (Some(current), Some(base)) if base > 0.0 => Some((current - base) / base * 100.0),
            _ => None,
        };

        debug!(
            "Valued version {}: {:?} (approval {:?})",
            version_id, current_value, version.price_at_approval
        );

        Ok(Valuation {
            version_id,
            priced_at: self.clock.now(),
            constituents,
            current_value,
            price_at_approval: version.price_at_approval,
            change_percent,
        })
    }
}
