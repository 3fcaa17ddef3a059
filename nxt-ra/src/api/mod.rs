//! HTTP control surface for nxt-ra
//!
//! GET /health, plus starting, listing, inspecting and cancelling research runs.

pub mod health;
pub mod runs;

pub use health::health_routes;
pub use runs::run_routes;
