pub mod config;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod telemetry;
