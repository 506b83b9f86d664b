pub mod blob_store;
pub mod cache_store;
pub mod clock;
pub mod counter_store;
pub mod event_bus;
pub mod http;
pub mod ledger;
