//! One read-only evaluation of every ticker

use anyhow::{Context, Result};
use tracing::info;

use atr_dca::{Config, TradingMode};

pub fn run(config_path: String) -> Result<()> {
    dotenv::dotenv().ok();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path))
}

async fn run_async(config_path: String) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    // real positions when credentials exist, otherwise the paper book
    let mode = if config.exchange.has_credentials() {
        TradingMode::Live
    } else {
        TradingMode::Paper
    };
    config.validate(mode).context("Invalid configuration")?;
    info!("Evaluating {} tickers against the {} venue (no orders)", config.tickers().len(), mode);

    let mut trader = super::build_trader(&config, mode, true)?;
    let report = trader.run_cycle().await?;

    for s in &report.snapshots {
        println!(
            "{:<12} {:<17} price {:>14.4}  avg {:>14}  qty {:>14.8}  ATR {:>6.2}%  add-on at {:>14}",
            s.ticker.as_str(),
            s.action.to_string(),
            s.current_price,
            s.average_cost.map_or_else(|| "-".to_string(), |a| format!("{:.4}", a)),
            s.quantity_held,
            s.atr_percent,
            s.threshold_price.map_or_else(|| "-".to_string(), |t| format!("{:.4}", t)),
        );
    }
    for (ticker, reason) in &report.skipped {
        println!("{:<12} skipped: {}", ticker.as_str(), reason);
    }

    let summary = &report.summary;
    println!(
        "cash {}  cost {}  value {}  P&L {} ({:+.2}%)",
        summary.cash.round_dp(0),
        summary.total_cost.round_dp(0),
        summary.total_value.round_dp(0),
        summary.unrealized_pnl.round_dp(0),
        summary.pnl_pct
    );

    Ok(())
}
