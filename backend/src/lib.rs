pub mod api;
pub mod config;
pub mod database;
pub mod metrics_api;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod sync;
pub mod types;
