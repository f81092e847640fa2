//! HTTP API handlers for tentwatch-counter

pub mod buildinfo;
pub mod dashboard;
pub mod form;
pub mod health;
pub mod ingest;
pub mod tenant;

pub use dashboard::dashboard_routes;
pub use health::health_routes;
pub use ingest::ingest_routes;
