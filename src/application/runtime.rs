//! Wiring of the lifecycle services over one store.
//!
//! Every price read (approval snapshots and valuations) goes through a single
//! `CachedPriceLookup` sized from the configuration.

use std::sync::Arc;
use tracing::info;

use crate::application::services::{BasketLifecycleService, TransitionScanner, ValuationService};
use crate::config::LifecycleConfig;
use crate::domain::repositories::notifier::Notifier;
use crate::domain::repositories::price_lookup::PriceLookup;
use crate::domain::services::clock::Clock;
use crate::infrastructure::price_lookup::CachedPriceLookup;
use crate::persistence::LifecycleStore;

pub struct LifecycleRuntime {
    pub service: Arc<BasketLifecycleService>,
    pub valuation: Arc<ValuationService>,
    pub scanner: Arc<TransitionScanner>,
    pub prices: Arc<CachedPriceLookup>,
}

impl LifecycleRuntime {
    pub fn new(
        config: &LifecycleConfig,
        store: LifecycleStore,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        price_source: Arc<dyn PriceLookup>,
    ) -> Self {
        let calendar = config.market_calendar();
        let prices = Arc::new(config.cached_prices(price_source));
        info!(
            "Price cache: {} entries, {}s TTL",
            config.price_cache_capacity(),
            config.price_cache_ttl_seconds
        );

        let service = BasketLifecycleService::new(
            store.clone(),
            calendar,
            clock.clone(),
            notifier.clone(),
            prices.clone(),
        );
        let valuation = ValuationService::new(store.baskets.clone(), prices.clone(), clock);
        let scanner = TransitionScanner::new(store, calendar, notifier);

        Self {
            service: Arc::new(service),
            valuation: Arc::new(valuation),
            scanner: Arc::new(scanner),
            prices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::ApprovalRequest;
    use crate::domain::entities::basket::{BasketType, NewBasket};
    use crate::domain::entities::instrument::NewInstrument;
    use crate::domain::services::clock::ManualClock;
    use crate::infrastructure::{StaticPriceLookup, TracingNotifier};
    use crate::persistence::{init_database, DatabaseConfig};
    use chrono::{TimeZone, Utc};

    async fn runtime_for_test(source: Arc<StaticPriceLookup>) -> LifecycleRuntime {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 0).unwrap()));
        LifecycleRuntime::new(
            &LifecycleConfig::default(),
            LifecycleStore::new(pool),
            clock,
            Arc::new(TracingNotifier),
            source,
        )
    }

    #[tokio::test]
    async fn test_approval_and_valuation_share_the_price_cache() {
        let source = Arc::new(StaticPriceLookup::with_prices([("INFY", 1500.0), ("TCS", 3800.0)]));
        let runtime = runtime_for_test(source.clone()).await;
        assert!(runtime.prices.is_empty().await);

        let (basket, v1) = runtime
            .service
            .create_basket(
                7,
                NewBasket {
                    name: "Large caps".to_string(),
                    description: None,
                    basket_type: BasketType::Perpetual,
                    subscription_fee: 0.0,
                    instruments: vec![
                        NewInstrument::new("INFY", "INFY", "NSE", 2.0, 50.0),
                        NewInstrument::new("TCS", "TCS", "NSE", 1.0, 50.0),
                    ],
                    trading_date: None,
                },
            )
            .await
            .unwrap();
        runtime.service.submit_version(basket.id, v1.id, 7).await.unwrap();
        let approved = runtime
            .service
            .approve_version(v1.id, 1, ApprovalRequest::default())
            .await
            .unwrap();
        assert_eq!(approved.price_at_approval, Some(6800.0));
        assert_eq!(runtime.prices.len().await, 2);

        // Within the TTL the valuation sees the cached prices
        source.set_price("INFY", 1600.0);
        let valuation = runtime.valuation.current_value(v1.id).await.unwrap();
        assert_eq!(valuation.current_value, Some(6800.0));
        assert_eq!(valuation.change_percent, Some(0.0));
    }

    #[tokio::test]
    async fn test_scanner_runs_over_the_same_store() {
        let runtime = runtime_for_test(Arc::new(StaticPriceLookup::new())).await;
        let report = runtime
            .scanner
            .run_tick(Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 0).unwrap())
            .await;
        assert_eq!(report.changed(), 0);
        assert!(report.errors.is_empty());
    }
}
