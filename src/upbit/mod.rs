//! Upbit exchange adapter
//!
//! Implements `MarketData` and `OrderVenue` over the Upbit REST API.

pub mod auth;
pub mod client;
pub mod types;

pub use auth::Credentials;
pub use client::{ClientConfig, UpbitClient, API_BASE_URL, MAX_CANDLES_PER_REQUEST};
