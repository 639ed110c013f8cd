// Common library for the agency response reconciliation service

pub mod config;
pub mod crypto;
pub mod errors;
pub mod models;
pub mod reconcile;
pub mod store;
pub mod telemetry;
pub mod transport;
