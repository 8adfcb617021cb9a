pub mod notifier;
pub mod price_lookup;
