//! ATR-adaptive dollar-cost averaging
//!
//! An automated spot trader that buys a fixed amount per ticker, buys again
//! after a volatility-scaled dip below the last buy price, and sells the
//! whole position once it reaches a profit target over average cost.

pub mod audit;
pub mod config;
pub mod exchange;
pub mod indicators;
pub mod notify;
pub mod paper;
pub mod report;
pub mod state_manager;
pub mod strategy;
pub mod trader;
pub mod types;
pub mod upbit;

pub use config::{Config, ConfigError, TradingMode};
pub use exchange::{ExchangeError, FillResult, MarketData, OrderVenue};
pub use strategy::{decide, Action, DecisionInputs, StrategyParams};
pub use trader::{Trader, TraderSettings};
pub use types::*;
