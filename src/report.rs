//! Per-cycle reporting
//!
//! Snapshots of each ticker evaluation and the portfolio roll-up logged at
//! the end of every sweep. Money totals are summed in `Money` so that a
//! long ticker list does not accumulate float error.

use serde::Serialize;
use tracing::info;

use crate::strategy::Action;
use crate::types::{Money, Ticker};

/// Everything the loop observed and decided for one ticker in one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerSnapshot {
    pub ticker: Ticker,
    pub current_price: f64,
    pub average_cost: Option<f64>,
    pub quantity_held: f64,
    pub atr: f64,
    pub atr_percent: f64,
    pub scale: f64,
    pub adjusted_drop_ratio: f64,
    /// Reference price the add-on check used (stored, or average cost fallback)
    pub reference_price: Option<f64>,
    pub threshold_price: Option<f64>,
    pub action: Action,
}

impl TickerSnapshot {
    /// Drop below the reference that triggers an add-on buy, in percent
    pub fn drop_percent(&self) -> f64 {
        (1.0 - self.adjusted_drop_ratio) * 100.0
    }

    /// Signed distance of the current price from the reference, in percent
    pub fn distance_from_reference_pct(&self) -> Option<f64> {
        self.reference_price
            .filter(|r| *r > 0.0)
            .map(|r| (self.current_price - r) / r * 100.0)
    }

    pub fn holding(&self) -> Option<Holding> {
        match self.average_cost {
            Some(avg) if self.quantity_held > 0.0 => Some(Holding {
                ticker: self.ticker.clone(),
                quantity: self.quantity_held,
                average_cost: avg,
                current_price: self.current_price,
            }),
            _ => None,
        }
    }
}

/// One held position valued at the current price
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Holding {
    pub ticker: Ticker,
    pub quantity: f64,
    pub average_cost: f64,
    pub current_price: f64,
}

impl Holding {
    pub fn cost_basis(&self) -> Money {
        Money::from_f64(self.quantity * self.average_cost)
    }

    pub fn market_value(&self) -> Money {
        Money::from_f64(self.quantity * self.current_price)
    }

    pub fn unrealized_pnl(&self) -> Money {
        self.market_value() - self.cost_basis()
    }

    pub fn pnl_pct(&self) -> f64 {
        pct(self.unrealized_pnl(), self.cost_basis())
    }
}

fn pct(part: Money, whole: Money) -> f64 {
    if whole.is_zero() {
        0.0
    } else {
        part.to_f64() / whole.to_f64() * 100.0
    }
}

/// Aggregate across held positions
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PortfolioSummary {
    pub cash: Money,
    pub total_cost: Money,
    pub total_value: Money,
    pub unrealized_pnl: Money,
    pub pnl_pct: f64,
}

impl PortfolioSummary {
    pub fn from_holdings(cash: Money, holdings: &[Holding]) -> Self {
        let total_cost: Money = holdings.iter().map(Holding::cost_basis).sum();
        let total_value: Money = holdings.iter().map(Holding::market_value).sum();
        let unrealized_pnl = total_value - total_cost;
        PortfolioSummary {
            cash,
            total_cost,
            total_value,
            unrealized_pnl,
            pnl_pct: pct(unrealized_pnl, total_cost),
        }
    }
}

fn opt(value: Option<f64>) -> String {
    value.map_or_else(|| "none".to_string(), |v| format!("{:.2}", v))
}

/// ATR analysis block: volatility, scale and add-on threshold per ticker
pub fn log_atr_analysis(snapshots: &[TickerSnapshot]) {
    if snapshots.is_empty() {
        return;
    }
    info!("━━━ ATR volatility analysis ━━━");
    for s in snapshots {
        let distance = s
            .distance_from_reference_pct()
            .map_or_else(|| "n/a".to_string(), |d| format!("{:+.2}%", d));
        info!(
            ticker = %s.ticker,
            action = %s.action,
            "{} | ATR {:.2}% | scale {:.4} | reference {} | price {:.2} ({}) | add-on at {} (-{:.2}%)",
            s.ticker,
            s.atr_percent,
            s.scale,
            opt(s.reference_price),
            s.current_price,
            distance,
            opt(s.threshold_price),
            s.drop_percent()
        );
    }
}

/// Holdings block and portfolio totals
pub fn log_holdings(summary: &PortfolioSummary, holdings: &[Holding]) {
    info!("━━━ Holdings ━━━");
    info!(cash = %summary.cash, "Cash: {}", summary.cash.round_dp(0));
    for h in holdings {
        info!(
            ticker = %h.ticker,
            "{} | cost {} | value {} | P&L {} ({:+.2}%)",
            h.ticker,
            h.cost_basis().round_dp(0),
            h.market_value().round_dp(0),
            h.unrealized_pnl().round_dp(0),
            h.pnl_pct()
        );
    }
    info!(
        total_cost = %summary.total_cost,
        total_value = %summary.total_value,
        unrealized_pnl = %summary.unrealized_pnl,
        "Total cost {} | total value {} | P&L {} ({:+.2}%)",
        summary.total_cost.round_dp(0),
        summary.total_value.round_dp(0),
        summary.unrealized_pnl.round_dp(0),
        summary.pnl_pct
    );
}
