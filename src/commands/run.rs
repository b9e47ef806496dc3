//! Trading loop command

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use atr_dca::{Config, TradingMode};

pub fn run(config_path: String, paper: bool, live: bool, cycles: Option<u64>) -> Result<()> {
    if !paper && !live {
        anyhow::bail!("Must specify either --paper or --live mode");
    }

    if live && paper {
        anyhow::bail!("Cannot specify both --paper and --live modes");
    }

    dotenv::dotenv().ok();

    let mode = if live { TradingMode::Live } else { TradingMode::Paper };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config_path, mode, cycles))
}

async fn run_async(config_path: String, mode: TradingMode, cycles: Option<u64>) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;
    config.validate(mode).context("Invalid configuration")?;

    let tickers: Vec<String> = config.tickers().iter().map(|t| t.to_string()).collect();
    info!("╔══════════════════════════════════════════════════════════════╗");
    info!("║          ATR DCA TRADER - {:<5} MODE                          ║", mode);
    info!("╠══════════════════════════════════════════════════════════════╣");
    info!("║ Tickers: {:<51} ║", tickers.join(", "));
    info!("║ Buy amount: {:<48} ║", config.trading.buy_amount);
    info!(
        "║ Take profit: x{:<46} ║",
        config.trading.target_profit_multiple
    );
    info!("║ Base drop ratio: {:<43} ║", config.trading.base_drop_ratio);
    info!(
        "║ ATR: {} x {:<48} ║",
        config.atr.period, config.atr.timeframe
    );
    info!(
        "║ Cycle interval: {} seconds{:<35} ║",
        config.schedule.cycle_interval_secs, ""
    );
    info!("╚══════════════════════════════════════════════════════════════╝");

    if mode == TradingMode::Live {
        warn!("⚠️  LIVE TRADING MODE - REAL MONEY AT RISK!");
        warn!("⚠️  Press Ctrl+C within 10 seconds to abort...");

        for i in (1..=10).rev() {
            info!("Starting in {} seconds...", i);
            sleep(Duration::from_secs(1)).await;
        }
    }

    let mut trader = super::build_trader(&config, mode, false)?;
    trader.run(cycles).await?;

    info!("Trading session ended after {} cycles.", trader.cycle_count());
    Ok(())
}
