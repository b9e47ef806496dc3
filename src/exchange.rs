//! Exchange boundary
//!
//! The trading loop talks to an exchange only through these two traits:
//! `MarketData` for prices and candles, `OrderVenue` for balances and market
//! orders. Concrete adapters live in `upbit` (REST) and `paper` (simulated).

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Candle, Money, Ticker, Timeframe};

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Network failure, timeout, 5xx, rate limit or unparsable payload.
    /// Safe to retry on the next cycle.
    #[error("exchange unavailable: {0}")]
    Unavailable(String),

    /// The venue refused the request (bad parameters, insufficient funds, ...)
    #[error("rejected by exchange: {0}")]
    Rejected(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Unavailable(_))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        ExchangeError::Unavailable(err.to_string())
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Outcome of a market order as far as the venue has reported it
#[derive(Debug, Clone, PartialEq)]
pub struct FillResult {
    pub order_id: String,
    /// No further fills will happen (done, or cancelled with remainder)
    pub settled: bool,
    /// Volume-weighted fill price, when any volume executed
    pub average_price: Option<f64>,
    pub executed_quantity: f64,
}

#[async_trait]
pub trait MarketData: Send + Sync {
    async fn current_price(&self, ticker: &Ticker) -> ExchangeResult<f64>;

    /// Most recent `count` candles, oldest first
    async fn candles(
        &self,
        ticker: &Ticker,
        timeframe: Timeframe,
        count: usize,
    ) -> ExchangeResult<Vec<Candle>>;
}

#[async_trait]
pub trait OrderVenue: Send + Sync {
    fn name(&self) -> &str;

    /// Buy `notional` worth of `ticker` in quote currency at market
    async fn place_market_buy(&self, ticker: &Ticker, notional: Money) -> ExchangeResult<FillResult>;

    /// Sell `quantity` units of `ticker` at market
    async fn place_market_sell(&self, ticker: &Ticker, quantity: f64) -> ExchangeResult<FillResult>;

    async fn order_status(&self, order_id: &str) -> ExchangeResult<FillResult>;

    /// Average entry price, `None` when nothing is held
    async fn average_cost(&self, ticker: &Ticker) -> ExchangeResult<Option<f64>>;

    /// Units held, 0 when nothing is held
    async fn held_quantity(&self, ticker: &Ticker) -> ExchangeResult<f64>;

    /// Free quote-currency balance
    async fn cash_balance(&self) -> ExchangeResult<Money>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(ExchangeError::Unavailable("timeout".into()).is_transient());
        assert!(!ExchangeError::Rejected("insufficient funds".into()).is_transient());
        assert!(!ExchangeError::Auth("bad key".into()).is_transient());
        assert!(!ExchangeError::NotFound("KRW-FOO".into()).is_transient());
    }
}
