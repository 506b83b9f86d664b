pub mod amqp;
pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod database;
pub mod fs_blob;
mod ledger_rows;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod postgres_ledger;
pub mod rate_limit;
pub mod redis_store;
pub mod reqwest_http;
pub mod response_store;
pub mod s3_blob;
pub mod sqlite_ledger;
pub mod time;
