//! Trading loop
//!
//! Sweeps the configured tickers on a fixed cadence. Per ticker: observe the
//! venue position and current price, compute ATR over the latest candles,
//! ask `strategy::decide` for an action, execute it, and keep the reference
//! price store in step with every fill. Tickers whose data cannot be fetched
//! are skipped for the cycle; a cycle-level failure is reported and followed
//! by a backoff. The loop only ends on shutdown or after `max_cycles`.

use anyhow::{anyhow, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::audit::AtrAuditLog;
use crate::config::Config;
use crate::exchange::{ExchangeError, FillResult, MarketData, OrderVenue};
use crate::indicators::{scale_for_volatility, AtrReading, IndicatorError};
use crate::notify::Notifier;
use crate::report::{log_atr_analysis, log_holdings, Holding, PortfolioSummary, TickerSnapshot};
use crate::state_manager::ReferencePriceStore;
use crate::strategy::{decide, Action, DecisionInputs, StrategyParams};
use crate::types::{Money, Ticker, Timeframe};

/// Remaining quantity at or below this counts as a flat position
const DUST_QUANTITY: f64 = 1e-8;

/// Run-wide settings derived from `Config`
#[derive(Debug, Clone)]
pub struct TraderSettings {
    pub buy_amount: Money,
    pub params: StrategyParams,
    pub timeframe: Timeframe,
    pub atr_period: usize,
    pub cycle_interval: Duration,
    pub post_order_delay: Duration,
    pub error_backoff: Duration,
    pub settle_poll: Duration,
    pub settle_timeout: Duration,
    /// Evaluate and report only: no orders, no state or audit writes
    pub dry_run: bool,
}

impl TraderSettings {
    pub fn from_config(config: &Config) -> Self {
        let s = &config.schedule;
        TraderSettings {
            buy_amount: Money::from_f64(config.trading.buy_amount),
            params: config.strategy_params(),
            timeframe: config.atr.timeframe,
            atr_period: config.atr.period,
            cycle_interval: Duration::from_secs(s.cycle_interval_secs),
            post_order_delay: Duration::from_secs(s.post_order_delay_secs),
            error_backoff: Duration::from_secs(s.error_backoff_secs),
            settle_poll: Duration::from_secs(s.settle_poll_secs),
            settle_timeout: Duration::from_secs(s.settle_timeout_secs),
            dry_run: false,
        }
    }
}

/// Why a ticker was left out of a cycle
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("price unavailable: {0}")]
    Price(ExchangeError),

    #[error("position unavailable: {0}")]
    Position(ExchangeError),

    #[error("candles unavailable: {0}")]
    Candles(ExchangeError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),
}

impl SkipReason {
    /// Bad credentials affect every ticker; escalate to the cycle
    fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            SkipReason::Price(ExchangeError::Auth(_))
                | SkipReason::Position(ExchangeError::Auth(_))
                | SkipReason::Candles(ExchangeError::Auth(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Filled {
        order_id: String,
        /// Reference price recorded for buys, fill price for sells
        price: f64,
        quantity: f64,
        settled: bool,
    },
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub ticker: Ticker,
    pub action: Action,
    pub outcome: ExecutionOutcome,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub snapshots: Vec<TickerSnapshot>,
    pub skipped: Vec<(Ticker, String)>,
    pub orders: Vec<OrderRecord>,
    pub holdings: Vec<Holding>,
    pub summary: PortfolioSummary,
}

pub struct Trader {
    market: Arc<dyn MarketData>,
    venue: Arc<dyn OrderVenue>,
    notifier: Arc<dyn Notifier>,
    store: ReferencePriceStore,
    audit: Option<AtrAuditLog>,
    tickers: Vec<Ticker>,
    settings: TraderSettings,
    cycle_count: u64,
}

impl Trader {
    pub fn new(
        market: Arc<dyn MarketData>,
        venue: Arc<dyn OrderVenue>,
        notifier: Arc<dyn Notifier>,
        store: ReferencePriceStore,
        audit: Option<AtrAuditLog>,
        tickers: Vec<Ticker>,
        settings: TraderSettings,
    ) -> Self {
        Trader {
            market,
            venue,
            notifier,
            store,
            audit,
            tickers,
            settings,
            cycle_count: 0,
        }
    }

    pub fn store(&self) -> &ReferencePriceStore {
        &self.store
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Reference for the add-on check: the stored price, or the venue's
    /// average cost for a held position the store knows nothing about
    fn effective_reference(&self, ticker: &Ticker, average_cost: Option<f64>, quantity: f64) -> Option<f64> {
        self.store
            .get(ticker)
            .or_else(|| average_cost.filter(|_| quantity > 0.0))
    }

    /// Observe one ticker and decide what to do with it
    pub async fn evaluate_ticker(&self, ticker: &Ticker) -> Result<TickerSnapshot, SkipReason> {
        let current_price = self
            .market
            .current_price(ticker)
            .await
            .map_err(SkipReason::Price)?;
        let average_cost = self
            .venue
            .average_cost(ticker)
            .await
            .map_err(SkipReason::Position)?;
        let quantity_held = self
            .venue
            .held_quantity(ticker)
            .await
            .map_err(SkipReason::Position)?;

        let candles = self
            .market
            .candles(ticker, self.settings.timeframe, self.settings.atr_period + 1)
            .await
            .map_err(SkipReason::Candles)?;
        let reading = AtrReading::compute(ticker, &candles, self.settings.atr_period, current_price)?;

        if !self.settings.dry_run {
            if let Some(audit) = &self.audit {
                if let Err(e) = audit.append(&reading) {
                    warn!("Failed to append ATR audit row for {}: {:#}", ticker, e);
                }
            }
        }

        let params = &self.settings.params;
        let reference_price = self.effective_reference(ticker, average_cost, quantity_held);
        let inputs = DecisionInputs {
            ticker: ticker.clone(),
            current_price,
            average_cost,
            quantity_held,
            reference_price,
            atr_percent: reading.percent,
        };
        let action = decide(&inputs, params);

        let snapshot = TickerSnapshot {
            ticker: ticker.clone(),
            current_price,
            average_cost,
            quantity_held,
            atr: reading.value,
            atr_percent: reading.percent,
            scale: scale_for_volatility(reading.percent, &params.bounds),
            adjusted_drop_ratio: params.adjusted_drop_ratio(reading.percent),
            reference_price,
            threshold_price: params.add_on_threshold(reference_price, reading.percent),
            action,
        };

        debug!(
            ticker = %ticker,
            action = %action,
            "{} price={:.4} avg={:?} qty={} ref={:?} threshold={:?} atr%={:.2}",
            ticker,
            current_price,
            average_cost,
            quantity_held,
            reference_price,
            snapshot.threshold_price,
            reading.percent
        );

        Ok(snapshot)
    }

    /// One full sweep of the ticker set
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.cycle_count += 1;
        let cycle = self.cycle_count;
        info!("━━━ Trading cycle {} ━━━", cycle);

        // retry a save that failed earlier
        self.persist().await;

        let mut snapshots = Vec::new();
        let mut skipped = Vec::new();
        let mut orders = Vec::new();

        for ticker in self.tickers.clone() {
            let snapshot = match self.evaluate_ticker(&ticker).await {
                Ok(s) => s,
                Err(reason) if reason.is_cycle_fatal() => {
                    return Err(anyhow!("{}: {}", ticker, reason));
                }
                Err(reason) => {
                    warn!("Skipping {} this cycle: {}", ticker, reason);
                    skipped.push((ticker.clone(), reason.to_string()));
                    continue;
                }
            };

            if snapshot.action.places_order() && !self.settings.dry_run {
                if let Some(record) = self.execute(&snapshot).await? {
                    orders.push(record);
                }
            }
            snapshots.push(snapshot);
        }

        let mut holdings = self.current_holdings(&snapshots, &orders).await;
        for (ticker, _) in &skipped {
            holdings.extend(self.skipped_holding(ticker).await);
        }
        let cash = match self.venue.cash_balance().await {
            Ok(c) => c,
            Err(ExchangeError::Auth(msg)) => return Err(anyhow!("cash balance: {}", msg)),
            Err(e) => {
                warn!("Cash balance unavailable: {}", e);
                Money::ZERO
            }
        };
        let summary = PortfolioSummary::from_holdings(cash, &holdings);

        log_atr_analysis(&snapshots);
        log_holdings(&summary, &holdings);

        Ok(CycleReport {
            cycle,
            snapshots,
            skipped,
            orders,
            holdings,
            summary,
        })
    }

    /// Positions after this cycle's orders. Tickers that traded are
    /// re-queried; the rest reuse the snapshot.
    async fn current_holdings(&self, snapshots: &[TickerSnapshot], orders: &[OrderRecord]) -> Vec<Holding> {
        let mut holdings = Vec::new();
        for s in snapshots {
            let traded = orders
                .iter()
                .any(|o| o.ticker == s.ticker && matches!(o.outcome, ExecutionOutcome::Filled { .. }));
            if !traded {
                holdings.extend(s.holding());
                continue;
            }

            let avg = self.venue.average_cost(&s.ticker).await;
            let qty = self.venue.held_quantity(&s.ticker).await;
            match (avg, qty) {
                (Ok(Some(average_cost)), Ok(quantity)) if quantity > 0.0 => holdings.push(Holding {
                    ticker: s.ticker.clone(),
                    quantity,
                    average_cost,
                    current_price: s.current_price,
                }),
                (Ok(_), Ok(_)) => {}
                _ => holdings.extend(s.holding()),
            }
        }
        holdings
    }

    /// Position of a ticker that was skipped this cycle, so the portfolio
    /// totals still cover it
    async fn skipped_holding(&self, ticker: &Ticker) -> Option<Holding> {
        let quantity = match self.venue.held_quantity(ticker).await {
            Ok(q) => q,
            Err(e) => {
                warn!("{} excluded from portfolio totals: {}", ticker, e);
                return None;
            }
        };
        if quantity <= 0.0 {
            return None;
        }
        let position = match self.venue.average_cost(ticker).await {
            Ok(Some(average_cost)) => self
                .market
                .current_price(ticker)
                .await
                .map(|current_price| (average_cost, current_price)),
            Ok(None) => return None,
            Err(e) => Err(e),
        };
        match position {
            Ok((average_cost, current_price)) => Some(Holding {
                ticker: ticker.clone(),
                quantity,
                average_cost,
                current_price,
            }),
            Err(e) => {
                warn!("{} excluded from portfolio totals: {}", ticker, e);
                None
            }
        }
    }

    /// Place the order for `snapshot.action` and update the reference price.
    ///
    /// Returns `Ok(None)` for `Hold`. Venue rejections, transport failures
    /// and orders that settle without any fill become
    /// `ExecutionOutcome::Rejected` with no state change; only
    /// authentication failures escalate.
    pub async fn execute(&mut self, snapshot: &TickerSnapshot) -> Result<Option<OrderRecord>> {
        let ticker = &snapshot.ticker;
        let action = snapshot.action;

        let placed = match action {
            Action::Hold => return Ok(None),
            Action::InitialBuy | Action::AddOnBuy => {
                info!("{} {}: buying {} at ~{:.4}", ticker, action, self.settings.buy_amount, snapshot.current_price);
                self.venue.place_market_buy(ticker, self.settings.buy_amount).await
            }
            Action::TakeProfitSell => {
                info!(
                    "{} {}: selling {} at ~{:.4} (avg {:?})",
                    ticker, action, snapshot.quantity_held, snapshot.current_price, snapshot.average_cost
                );
                self.venue.place_market_sell(ticker, snapshot.quantity_held).await
            }
        };

        let fill = match placed {
            Ok(fill) => fill,
            Err(ExchangeError::Auth(msg)) => return Err(anyhow!("{} order: {}", ticker, msg)),
            Err(e) => {
                warn!("{} {} not filled: {}", ticker, action, e);
                self.notifier
                    .notify(&format!("❌ {} {} order failed: {}", ticker, action, e))
                    .await;
                return Ok(Some(OrderRecord {
                    ticker: ticker.clone(),
                    action,
                    outcome: ExecutionOutcome::Rejected(e.to_string()),
                }));
            }
        };

        let fill = self.await_settlement(fill).await;

        // settled without trades (cancelled): nothing changed at the venue
        if fill.settled && fill.executed_quantity <= 0.0 {
            warn!("{} {} order {} settled with no fills", ticker, action, fill.order_id);
            self.notifier
                .notify(&format!("❌ {} {} order {} was not filled", ticker, action, fill.order_id))
                .await;
            return Ok(Some(OrderRecord {
                ticker: ticker.clone(),
                action,
                outcome: ExecutionOutcome::Rejected(format!("order {} settled with no fills", fill.order_id)),
            }));
        }

        let outcome = if action.is_buy() {
            let reference = self.buy_reference_price(ticker, &fill, snapshot.current_price).await;
            self.store.set(ticker, Some(reference));
            info!("{} reference price set to {:.4}", ticker, reference);
            self.notifier
                .notify(&format!(
                    "✅ {} {}: {} spent, reference {:.4}{}",
                    ticker,
                    action,
                    self.settings.buy_amount,
                    reference,
                    if fill.settled { "" } else { " (unsettled)" }
                ))
                .await;
            ExecutionOutcome::Filled {
                order_id: fill.order_id.clone(),
                price: reference,
                quantity: fill.executed_quantity,
                settled: fill.settled,
            }
        } else {
            self.complete_sell(ticker, snapshot.quantity_held, &fill).await;
            let price = fill.average_price.unwrap_or(snapshot.current_price);
            let pnl_pct = snapshot
                .average_cost
                .filter(|a| *a > 0.0)
                .map(|a| (price - a) / a * 100.0)
                .unwrap_or(0.0);
            self.notifier
                .notify(&format!(
                    "🎯 {} take-profit sell: {} @ {:.4} ({:+.2}%)",
                    ticker, fill.executed_quantity, price, pnl_pct
                ))
                .await;
            ExecutionOutcome::Filled {
                order_id: fill.order_id.clone(),
                price,
                quantity: fill.executed_quantity,
                settled: fill.settled,
            }
        };

        self.persist().await;

        if !self.settings.post_order_delay.is_zero() {
            debug!("Waiting {:?} after order", self.settings.post_order_delay);
            sleep(self.settings.post_order_delay).await;
        }

        Ok(Some(OrderRecord {
            ticker: ticker.clone(),
            action,
            outcome,
        }))
    }

    /// Poll the order until the venue reports it settled or the timeout
    /// passes; returns the last status seen
    async fn await_settlement(&self, initial: FillResult) -> FillResult {
        if initial.settled {
            return initial;
        }

        let deadline = Instant::now() + self.settings.settle_timeout;
        let mut last = initial;
        while Instant::now() < deadline {
            sleep(self.settings.settle_poll).await;
            match self.venue.order_status(&last.order_id).await {
                Ok(status) if status.settled => return status,
                Ok(status) => last = status,
                Err(e) => warn!("Order {} status unavailable: {}", last.order_id, e),
            }
        }

        warn!(
            "Order {} not settled after {:?}, continuing with last known state",
            last.order_id, self.settings.settle_timeout
        );
        last
    }

    /// Fill price, else a fresh quote, else the price the decision used
    async fn buy_reference_price(&self, ticker: &Ticker, fill: &FillResult, decision_price: f64) -> f64 {
        if let Some(price) = fill.average_price.filter(|p| p.is_finite() && *p > 0.0) {
            return price;
        }
        match self.market.current_price(ticker).await {
            Ok(price) if price > 0.0 => price,
            Ok(_) => decision_price,
            Err(e) => {
                warn!("{} price unavailable after buy, using decision price: {}", ticker, e);
                decision_price
            }
        }
    }

    /// Clear the reference once the position is flat
    async fn complete_sell(&mut self, ticker: &Ticker, sold: f64, fill: &FillResult) {
        let remaining = match self.venue.held_quantity(ticker).await {
            Ok(q) => q,
            Err(e) => {
                warn!("{} quantity unavailable after sell: {}", ticker, e);
                (sold - fill.executed_quantity).max(0.0)
            }
        };

        if remaining <= DUST_QUANTITY {
            self.store.set(ticker, None);
            info!("{} position closed, reference cleared", ticker);
        } else {
            warn!(
                "{} still holds {} after take-profit sell, keeping reference",
                ticker, remaining
            );
        }
    }

    /// Save the store if it has unsaved changes. Failures are reported and
    /// left dirty for the next attempt.
    async fn persist(&mut self) {
        if self.settings.dry_run || !self.store.is_dirty() {
            return;
        }
        if let Err(e) = self.store.save() {
            warn!("Failed to save reference prices to {}: {:#}", self.store.path().display(), e);
            self.notifier
                .notify(&format!("⚠️ Failed to save reference prices: {:#}", e))
                .await;
        }
    }

    /// Run until Ctrl+C or `max_cycles` sweeps
    pub async fn run(&mut self, max_cycles: Option<u64>) -> Result<()> {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, finishing current cycle...");
                    let _ = tx.send(());
                }
                Err(e) => error!("Error setting up signal handler: {}", e),
            }
        });

        self.run_until(max_cycles, async {
            if rx.await.is_err() {
                // no signal handler: run until max_cycles
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves or `max_cycles` sweeps have been made.
    /// Shutdown is observed between sweeps, never in the middle of one.
    pub async fn run_until<F>(&mut self, max_cycles: Option<u64>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            "Starting trading loop on {} ({} tickers, cycle every {:?})",
            self.venue.name(),
            self.tickers.len(),
            self.settings.cycle_interval
        );
        self.notifier
            .notify(&format!(
                "🚀 ATR DCA started on {}: {}",
                self.venue.name(),
                self.tickers.iter().map(Ticker::as_str).collect::<Vec<_>>().join(", ")
            ))
            .await;

        loop {
            let delay = match self.run_cycle().await {
                Ok(report) => {
                    info!(
                        "Cycle {} done: {} evaluated, {} skipped, {} orders",
                        report.cycle,
                        report.snapshots.len(),
                        report.skipped.len(),
                        report.orders.len()
                    );
                    self.settings.cycle_interval
                }
                Err(e) => {
                    error!("Trading cycle {} failed: {:#}", self.cycle_count, e);
                    self.notifier
                        .notify(&format!("⚠️ Error in cycle {}: {:#}", self.cycle_count, e))
                        .await;
                    self.settings.error_backoff
                }
            };

            if max_cycles.is_some_and(|max| self.cycle_count >= max) {
                info!("Reached {} cycles", self.cycle_count);
                break;
            }

            tokio::select! {
                _ = sleep(delay) => {}
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.persist().await;
        self.notifier
            .notify(&format!("🛑 ATR DCA stopped after {} cycles", self.cycle_count))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeResult;
    use crate::indicators::VolatilityBounds;
    use crate::types::Candle;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Mutex;

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(&self, _message: &str) {}
    }

    /// Venue that reports a fixed position and hands out orders that settle
    /// on the n-th status poll
    struct SlowVenue {
        polls_until_settled: Mutex<u32>,
        fill_price: Option<f64>,
    }

    #[async_trait]
    impl OrderVenue for SlowVenue {
        fn name(&self) -> &str {
            "slow"
        }

        async fn place_market_buy(&self, _: &Ticker, _: Money) -> ExchangeResult<FillResult> {
            Ok(FillResult {
                order_id: "o-1".into(),
                settled: false,
                average_price: None,
                executed_quantity: 0.0,
            })
        }

        async fn place_market_sell(&self, _: &Ticker, _: f64) -> ExchangeResult<FillResult> {
            Err(ExchangeError::Rejected("not supported".into()))
        }

        async fn order_status(&self, order_id: &str) -> ExchangeResult<FillResult> {
            let mut left = self.polls_until_settled.lock().unwrap();
            *left = left.saturating_sub(1);
            Ok(FillResult {
                order_id: order_id.to_string(),
                settled: *left == 0,
                average_price: if *left == 0 { self.fill_price } else { None },
                executed_quantity: if *left == 0 { 1.0 } else { 0.0 },
            })
        }

        async fn average_cost(&self, _: &Ticker) -> ExchangeResult<Option<f64>> {
            Ok(None)
        }

        async fn held_quantity(&self, _: &Ticker) -> ExchangeResult<f64> {
            Ok(0.0)
        }

        async fn cash_balance(&self) -> ExchangeResult<Money> {
            Ok(Money::ZERO)
        }
    }

    struct FlatMarket(f64);

    #[async_trait]
    impl MarketData for FlatMarket {
        async fn current_price(&self, _: &Ticker) -> ExchangeResult<f64> {
            Ok(self.0)
        }

        async fn candles(&self, _: &Ticker, _: Timeframe, count: usize) -> ExchangeResult<Vec<Candle>> {
            let start = Utc::now();
            Ok((0..count)
                .map(|i| Candle {
                    datetime: start + ChronoDuration::minutes(i as i64),
                    open: self.0,
                    high: self.0 + 1.0,
                    low: self.0 - 1.0,
                    close: self.0,
                    volume: 1.0,
                })
                .collect())
        }
    }

    fn settings() -> TraderSettings {
        TraderSettings {
            buy_amount: Money::from_f64(5000.0),
            params: StrategyParams {
                target_profit_multiple: 1.01,
                base_drop_ratio: 0.98,
                bounds: VolatilityBounds::default(),
            },
            timeframe: Timeframe::Minutes(5),
            atr_period: 3,
            cycle_interval: Duration::from_secs(5),
            post_order_delay: Duration::from_secs(10),
            error_backoff: Duration::from_secs(5),
            settle_poll: Duration::from_secs(1),
            settle_timeout: Duration::from_secs(30),
            dry_run: false,
        }
    }

    /// Holds 5 units at 100; buys come back cancelled with nothing traded
    struct CancellingVenue;

    #[async_trait]
    impl OrderVenue for CancellingVenue {
        fn name(&self) -> &str {
            "cancelling"
        }

        async fn place_market_buy(&self, _: &Ticker, _: Money) -> ExchangeResult<FillResult> {
            Ok(FillResult {
                order_id: "o-cancelled".into(),
                settled: true,
                average_price: None,
                executed_quantity: 0.0,
            })
        }

        async fn place_market_sell(&self, _: &Ticker, _: f64) -> ExchangeResult<FillResult> {
            Err(ExchangeError::Rejected("not supported".into()))
        }

        async fn order_status(&self, order_id: &str) -> ExchangeResult<FillResult> {
            Err(ExchangeError::NotFound(order_id.to_string()))
        }

        async fn average_cost(&self, _: &Ticker) -> ExchangeResult<Option<f64>> {
            Ok(Some(100.0))
        }

        async fn held_quantity(&self, _: &Ticker) -> ExchangeResult<f64> {
            Ok(5.0)
        }

        async fn cash_balance(&self) -> ExchangeResult<Money> {
            Ok(Money::ZERO)
        }
    }

    fn trader(venue: impl OrderVenue + 'static, price: f64) -> (Trader, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!("trader_state_{}.json", uuid::Uuid::new_v4()));
        let t = Ticker::new("KRW-BTC");
        let store = ReferencePriceStore::open(&path, &[t.clone()]);
        let trader = Trader::new(
            Arc::new(FlatMarket(price)),
            Arc::new(venue),
            Arc::new(NullNotifier),
            store,
            None,
            vec![t],
            settings(),
        );
        (trader, path)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_settled_and_uses_fill_price() {
        let venue = SlowVenue {
            polls_until_settled: Mutex::new(3),
            fill_price: Some(101.5),
        };
        let (mut trader, path) = trader(venue, 100.0);
        let t = Ticker::new("KRW-BTC");

        let snapshot = trader.evaluate_ticker(&t).await.unwrap();
        assert_eq!(snapshot.action, Action::InitialBuy);

        let record = trader.execute(&snapshot).await.unwrap().unwrap();
        match record.outcome {
            ExecutionOutcome::Filled { price, settled, .. } => {
                assert_eq!(price, 101.5);
                assert!(settled);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(trader.store().get(&t), Some(101.5));
        assert!(!trader.store().is_dirty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settlement_timeout_falls_back_to_quote() {
        let venue = SlowVenue {
            polls_until_settled: Mutex::new(u32::MAX),
            fill_price: None,
        };
        let (mut trader, path) = trader(venue, 100.0);
        let t = Ticker::new("KRW-BTC");

        let started = Instant::now();
        let snapshot = trader.evaluate_ticker(&t).await.unwrap();
        let record = trader.execute(&snapshot).await.unwrap().unwrap();

        assert!(matches!(
            record.outcome,
            ExecutionOutcome::Filled { settled: false, price, .. } if price == 100.0
        ));
        // 30s settle timeout + 10s post-order pause
        assert!(started.elapsed() >= Duration::from_secs(40));
        assert_eq!(trader.store().get(&t), Some(100.0));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buy_settled_without_fills_keeps_reference() {
        let (mut trader, path) = trader(CancellingVenue, 96.0);
        let t = Ticker::new("KRW-BTC");
        trader.store.set(&t, Some(100.0));
        trader.store.save().unwrap();

        let snapshot = trader.evaluate_ticker(&t).await.unwrap();
        assert_eq!(snapshot.action, Action::AddOnBuy);

        let record = trader.execute(&snapshot).await.unwrap().unwrap();
        assert!(matches!(record.outcome, ExecutionOutcome::Rejected(_)));
        assert_eq!(trader.store().get(&t), Some(100.0));
        assert!(!trader.store().is_dirty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_places_no_orders() {
        let venue = SlowVenue {
            polls_until_settled: Mutex::new(1),
            fill_price: Some(100.0),
        };
        let (mut trader, path) = trader(venue, 100.0);
        trader.settings.dry_run = true;

        let report = trader.run_cycle().await.unwrap();
        assert_eq!(report.snapshots.len(), 1);
        assert_eq!(report.snapshots[0].action, Action::InitialBuy);
        assert!(report.orders.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_auth_skip_is_cycle_fatal() {
        assert!(SkipReason::Position(ExchangeError::Auth("x".into())).is_cycle_fatal());
        assert!(!SkipReason::Price(ExchangeError::Unavailable("x".into())).is_cycle_fatal());
        assert!(!SkipReason::Indicator(IndicatorError::InsufficientData { needed: 4, got: 1 }).is_cycle_fatal());
    }
}
