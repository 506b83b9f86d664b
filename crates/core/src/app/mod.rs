pub mod context;
pub mod emit;
pub mod fetch;
pub mod guard;
pub mod intake;
pub mod ledger;
pub mod maintenance;
pub mod on_demand;
pub mod policy;
