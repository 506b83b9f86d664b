//! Feed fetch orchestration: decides
//! whether and when a subscribed URL is
//! fetched, throttles per host, records
//! every attempt in a partitioned
//! ledger and escalates URLs that keep
//! failing.

pub mod app;
pub mod domain;
pub mod error;
pub mod infra;
pub mod ports;
