pub mod backoff;
pub mod events;
pub mod hashing;
pub mod messages;
pub mod model;
pub mod partition;
