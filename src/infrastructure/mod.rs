pub mod notifiers;
pub mod price_lookup;

pub use notifiers::{ChannelNotifier, Notification, TracingNotifier};
pub use price_lookup::{CachedPriceLookup, StaticPriceLookup};
