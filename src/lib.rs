//! CLOB market-making engine library.
//!
//! Exposes every module so the binary and the integration tests can drive
//! the engine without duplicating wiring.

pub mod api;
pub mod catalog;
pub mod config;
pub mod cycle;
pub mod enricher;
pub mod error;
pub mod keywords;
pub mod middleware;
pub mod models;
pub mod oracle;
pub mod paper;
pub mod quoter;
pub mod reconciler;
pub mod risk;
pub mod scorer;
pub mod store;
pub mod venue;

pub use config::Config;
pub use cycle::Engine;
pub use error::normalize_error;
pub use store::Store;
pub use venue::{PolymarketClobClient, VenueClient};
