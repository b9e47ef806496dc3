//! Dollar-cost-averaging decision engine
//!
//! A pure function from one ticker's observed state to the single action the
//! trading loop should take this cycle. No I/O happens here; prices, balances
//! and the persisted reference price are gathered by the caller.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::indicators::{adjusted_drop_ratio, VolatilityBounds};
use crate::types::Ticker;

/// What the trading loop should do for a ticker this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// No position exists; open one
    InitialBuy,
    /// Price dropped far enough below the reference price; buy again
    AddOnBuy,
    /// Price reached the profit target over average cost; sell everything
    TakeProfitSell,
    Hold,
}

impl Action {
    pub fn is_buy(self) -> bool {
        matches!(self, Action::InitialBuy | Action::AddOnBuy)
    }

    pub fn places_order(self) -> bool {
        self != Action::Hold
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::InitialBuy => "initial-buy",
            Action::AddOnBuy => "add-on-buy",
            Action::TakeProfitSell => "take-profit-sell",
            Action::Hold => "hold",
        };
        f.write_str(s)
    }
}

/// Strategy thresholds fixed for the lifetime of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParams {
    /// Take profit when `price >= avg_cost * target_profit_multiple` (1.01 = +1%)
    pub target_profit_multiple: f64,
    /// Baseline add-on trigger before volatility scaling (0.98 = -2%)
    pub base_drop_ratio: f64,
    pub bounds: VolatilityBounds,
}

impl StrategyParams {
    pub fn adjusted_drop_ratio(&self, atr_percent: f64) -> f64 {
        adjusted_drop_ratio(atr_percent, self.base_drop_ratio, &self.bounds)
    }

    /// Price at or below which an add-on buy triggers, if a reference exists
    pub fn add_on_threshold(&self, reference_price: Option<f64>, atr_percent: f64) -> Option<f64> {
        reference_price.map(|r| r * self.adjusted_drop_ratio(atr_percent))
    }

    pub fn take_profit_price(&self, average_cost: f64) -> f64 {
        average_cost * self.target_profit_multiple
    }
}

/// Everything `decide` looks at for one ticker
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionInputs {
    pub ticker: Ticker,
    pub current_price: f64,
    /// Venue-reported average entry price; `None` when nothing is held
    pub average_cost: Option<f64>,
    pub quantity_held: f64,
    /// Price the next add-on threshold is measured from
    pub reference_price: Option<f64>,
    pub atr_percent: f64,
}

/// Evaluate one ticker.
///
/// Precedence: `InitialBuy` whenever there is no average cost, then
/// `TakeProfitSell`, then `AddOnBuy`, otherwise `Hold`. When the sell and
/// add-on conditions hold together the sell wins; the next cycle starts from
/// a flat position.
pub fn decide(inputs: &DecisionInputs, params: &StrategyParams) -> Action {
    let Some(average_cost) = inputs.average_cost else {
        return Action::InitialBuy;
    };

    if inputs.quantity_held > 0.0 && inputs.current_price >= params.take_profit_price(average_cost) {
        return Action::TakeProfitSell;
    }

    match params.add_on_threshold(inputs.reference_price, inputs.atr_percent) {
        Some(threshold) if inputs.current_price <= threshold => Action::AddOnBuy,
        _ => Action::Hold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StrategyParams {
        StrategyParams {
            target_profit_multiple: 1.01,
            base_drop_ratio: 0.98,
            bounds: VolatilityBounds::default(),
        }
    }

    fn inputs(
        current_price: f64,
        average_cost: Option<f64>,
        quantity_held: f64,
        reference_price: Option<f64>,
        atr_percent: f64,
    ) -> DecisionInputs {
        DecisionInputs {
            ticker: Ticker::new("KRW-XLM"),
            current_price,
            average_cost,
            quantity_held,
            reference_price,
            atr_percent,
        }
    }

    #[test]
    fn test_no_position_always_initial_buy() {
        for price in [0.5, 100.0, 1e9] {
            for reference in [None, Some(1.0), Some(1e12)] {
                let i = inputs(price, None, 0.0, reference, 5.0);
                assert_eq!(decide(&i, &params()), Action::InitialBuy);
            }
        }
    }

    #[test]
    fn test_take_profit_at_target() {
        let i = inputs(102.0, Some(100.0), 5.0, Some(100.0), 3.0);
        assert_eq!(decide(&i, &params()), Action::TakeProfitSell);

        let exactly = inputs(101.0, Some(100.0), 5.0, None, 3.0);
        assert_eq!(decide(&exactly, &params()), Action::TakeProfitSell);
    }

    #[test]
    fn test_never_sells_without_quantity() {
        let i = inputs(150.0, Some(100.0), 0.0, None, 3.0);
        assert_eq!(decide(&i, &params()), Action::Hold);
    }

    #[test]
    fn test_add_on_buy_threshold() {
        // 0.98 * 0.98 = 0.9604 -> threshold 96.04
        let hit = inputs(96.0, Some(100.0), 5.0, Some(100.0), 3.0);
        assert_eq!(decide(&hit, &params()), Action::AddOnBuy);

        let miss = inputs(97.0, Some(100.0), 5.0, Some(100.0), 3.0);
        assert_eq!(decide(&miss, &params()), Action::Hold);
    }

    #[test]
    fn test_high_volatility_needs_deeper_drop() {
        // at 12% ATR the scale is 0.90 -> threshold 100 * 0.98 * 0.90 = 88.2
        let i = inputs(95.0, Some(100.0), 5.0, Some(100.0), 12.0);
        assert_eq!(decide(&i, &params()), Action::Hold);

        let deep = inputs(88.0, Some(100.0), 5.0, Some(100.0), 12.0);
        assert_eq!(decide(&deep, &params()), Action::AddOnBuy);
    }

    #[test]
    fn test_no_reference_means_no_add_on() {
        let i = inputs(10.0, Some(100.0), 5.0, None, 3.0);
        assert_eq!(decide(&i, &params()), Action::Hold);
    }

    #[test]
    fn test_take_profit_beats_add_on() {
        // reference far above avg cost: both conditions hold
        let i = inputs(105.0, Some(100.0), 5.0, Some(200.0), 3.0);
        assert_eq!(decide(&i, &params()), Action::TakeProfitSell);
    }

    #[test]
    fn test_decide_is_idempotent() {
        let i = inputs(96.0, Some(100.0), 5.0, Some(100.0), 7.3);
        let p = params();
        assert_eq!(decide(&i, &p), decide(&i, &p));
    }

    #[test]
    fn test_thresholds() {
        let p = params();
        assert_eq!(p.add_on_threshold(None, 3.0), None);
        let t = p.add_on_threshold(Some(100.0), 3.0).unwrap();
        assert!((t - 96.04).abs() < 1e-9);
        assert!((p.take_profit_price(200.0) - 202.0).abs() < 1e-9);
    }

    #[test]
    fn test_action_helpers() {
        assert!(Action::InitialBuy.is_buy());
        assert!(Action::AddOnBuy.is_buy());
        assert!(!Action::TakeProfitSell.is_buy());
        assert!(!Action::Hold.places_order());
        assert_eq!(Action::TakeProfitSell.to_string(), "take-profit-sell");
    }
}
