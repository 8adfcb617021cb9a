pub mod basket;
pub mod basket_version;
pub mod history;
pub mod instrument;
pub mod subscription;
pub mod time_slot;
