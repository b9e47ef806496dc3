//! Paper trading venue
//!
//! Simulated `OrderVenue` that fills every market order immediately at the
//! `MarketData` current price. Cash is tracked in `Money`, positions carry a
//! volume-weighted average cost the way the exchange reports `avg_buy_price`
//! (fees excluded). The book can optionally be persisted to a JSON file so a
//! restarted paper run sees the same holdings as its reference prices.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::exchange::{ExchangeError, ExchangeResult, FillResult, MarketData, OrderVenue};
use crate::types::{Money, Ticker};

/// Quantities below this are treated as an empty position
const DUST: f64 = 1e-12;

/// Most recent fills kept for `order_status`; older ones are dropped
const MAX_TRACKED_ORDERS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaperPosition {
    pub quantity: f64,
    pub average_cost: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaperBook {
    pub cash: Money,
    pub positions: BTreeMap<Ticker, PaperPosition>,
    #[serde(skip)]
    orders: HashMap<String, FillResult>,
    #[serde(skip)]
    order_ids: VecDeque<String>,
}

impl PaperBook {
    pub fn new(cash: Money) -> Self {
        PaperBook {
            cash,
            ..Default::default()
        }
    }

    fn record(&mut self, fill: FillResult) -> FillResult {
        self.orders.insert(fill.order_id.clone(), fill.clone());
        self.order_ids.push_back(fill.order_id.clone());
        while self.order_ids.len() > MAX_TRACKED_ORDERS {
            if let Some(oldest) = self.order_ids.pop_front() {
                self.orders.remove(&oldest);
            }
        }
        fill
    }
}

pub struct PaperVenue {
    market: Arc<dyn MarketData>,
    fee_rate: f64,
    state_file: Option<PathBuf>,
    book: Mutex<PaperBook>,
}

impl PaperVenue {
    pub fn new(market: Arc<dyn MarketData>, starting_cash: Money, fee_rate: f64) -> Self {
        PaperVenue {
            market,
            fee_rate,
            state_file: None,
            book: Mutex::new(PaperBook::new(starting_cash)),
        }
    }

    /// Resume the book from `path` when it exists, else start from
    /// `starting_cash`. Every fill rewrites the file.
    pub fn with_state_file(
        market: Arc<dyn MarketData>,
        starting_cash: Money,
        fee_rate: f64,
        path: impl Into<PathBuf>,
    ) -> Self {
        let path = path.into();
        let book = match load_book(&path) {
            Ok(Some(book)) => {
                info!(
                    "Resumed paper book from {}: cash={} positions={}",
                    path.display(),
                    book.cash,
                    book.positions.len()
                );
                book
            }
            Ok(None) => PaperBook::new(starting_cash),
            Err(e) => {
                warn!("Ignoring unreadable paper book {}: {:#}", path.display(), e);
                PaperBook::new(starting_cash)
            }
        };

        PaperVenue {
            market,
            fee_rate,
            state_file: Some(path),
            book: Mutex::new(book),
        }
    }

    fn persist(&self, book: &PaperBook) {
        if let Some(path) = &self.state_file {
            if let Err(e) = save_book(path, book) {
                warn!("Failed to save paper book {}: {:#}", path.display(), e);
            }
        }
    }

    fn fee(&self, amount: Money) -> Money {
        (amount * Money::from_f64(self.fee_rate)).round_dp(8)
    }
}

fn load_book(path: &Path) -> anyhow::Result<Option<PaperBook>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let book = serde_json::from_str(&contents).context("Malformed paper book")?;
    Ok(Some(book))
}

fn save_book(path: &Path, book: &PaperBook) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(book)?)?;
    Ok(())
}

fn new_order_id() -> String {
    format!("paper-{}", uuid::Uuid::new_v4())
}

#[async_trait]
impl OrderVenue for PaperVenue {
    fn name(&self) -> &str {
        "paper"
    }

    async fn place_market_buy(&self, ticker: &Ticker, notional: Money) -> ExchangeResult<FillResult> {
        if !notional.is_positive() {
            return Err(ExchangeError::Rejected(format!(
                "buy amount must be positive, got {}",
                notional
            )));
        }
        let price = self.market.current_price(ticker).await?;

        let mut book = self.book.lock().await;
        let fee = self.fee(notional);
        let total = notional + fee;
        if total > book.cash {
            return Err(ExchangeError::Rejected(format!(
                "insufficient cash: need {}, have {}",
                total, book.cash
            )));
        }

        let quantity = notional.to_f64() / price;
        book.cash = book.cash - total;
        let position = book.positions.entry(ticker.clone()).or_insert(PaperPosition {
            quantity: 0.0,
            average_cost: 0.0,
        });
        let new_quantity = position.quantity + quantity;
        position.average_cost =
            (position.average_cost * position.quantity + price * quantity) / new_quantity;
        position.quantity = new_quantity;

        debug!(
            "[PAPER] BUY {} qty={:.8} @ {:.4} fee={} cash={}",
            ticker, quantity, price, fee, book.cash
        );

        let fill = book.record(FillResult {
            order_id: new_order_id(),
            settled: true,
            average_price: Some(price),
            executed_quantity: quantity,
        });
        self.persist(&book);
        Ok(fill)
    }

    async fn place_market_sell(&self, ticker: &Ticker, quantity: f64) -> ExchangeResult<FillResult> {
        if quantity.is_nan() || quantity <= 0.0 {
            return Err(ExchangeError::Rejected(format!(
                "sell quantity must be positive, got {}",
                quantity
            )));
        }
        let price = self.market.current_price(ticker).await?;

        let mut book = self.book.lock().await;
        let held = book.positions.get(ticker).map(|p| p.quantity).unwrap_or(0.0);
        if quantity > held + DUST {
            return Err(ExchangeError::Rejected(format!(
                "insufficient {}: want {}, have {}",
                ticker.base_currency(),
                quantity,
                held
            )));
        }

        let gross = Money::from_f64(quantity * price);
        let fee = self.fee(gross);
        book.cash = book.cash + gross - fee;

        let remaining = held - quantity;
        if remaining <= DUST {
            book.positions.remove(ticker);
        } else if let Some(position) = book.positions.get_mut(ticker) {
            position.quantity = remaining;
        }

        debug!(
            "[PAPER] SELL {} qty={:.8} @ {:.4} fee={} cash={}",
            ticker, quantity, price, fee, book.cash
        );

        let fill = book.record(FillResult {
            order_id: new_order_id(),
            settled: true,
            average_price: Some(price),
            executed_quantity: quantity,
        });
        self.persist(&book);
        Ok(fill)
    }

    async fn order_status(&self, order_id: &str) -> ExchangeResult<FillResult> {
        self.book
            .lock()
            .await
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::NotFound(format!("order {}", order_id)))
    }

    async fn average_cost(&self, ticker: &Ticker) -> ExchangeResult<Option<f64>> {
        Ok(self
            .book
            .lock()
            .await
            .positions
            .get(ticker)
            .map(|p| p.average_cost))
    }

    async fn held_quantity(&self, ticker: &Ticker) -> ExchangeResult<f64> {
        Ok(self
            .book
            .lock()
            .await
            .positions
            .get(ticker)
            .map(|p| p.quantity)
            .unwrap_or(0.0))
    }

    async fn cash_balance(&self) -> ExchangeResult<Money> {
        Ok(self.book.lock().await.cash)
    }
}
