pub mod init_config;
pub mod run;
pub mod status;

use anyhow::Result;
use std::sync::Arc;

use atr_dca::audit::AtrAuditLog;
use atr_dca::notify::{self, LogNotifier, Notifier};
use atr_dca::paper::PaperVenue;
use atr_dca::state_manager::ReferencePriceStore;
use atr_dca::upbit::{ClientConfig, Credentials, UpbitClient};
use atr_dca::{Config, MarketData, Money, OrderVenue, Trader, TraderSettings, TradingMode};

/// Wire the exchange client, venue, notifier and stores from `config`.
///
/// Market data always comes from Upbit. `Paper` fills against a simulated
/// book; `Live` sends orders to the exchange. `dry_run` traders never place
/// orders or write state.
pub fn build_trader(config: &Config, mode: TradingMode, dry_run: bool) -> Result<Trader> {
    let tickers = config.tickers();

    let client_config = ClientConfig::default()
        .with_max_retries(config.exchange.max_retries)
        .with_timeout(config.exchange.timeout());
    let credentials = match (&config.exchange.api_key, &config.exchange.api_secret) {
        (Some(key), Some(secret)) if config.exchange.has_credentials() => {
            Some(Credentials::new(key, secret))
        }
        _ => None,
    };
    let client = Arc::new(UpbitClient::new(credentials, client_config)?);
    let market: Arc<dyn MarketData> = client.clone();

    let venue: Arc<dyn OrderVenue> = match mode {
        TradingMode::Live => client,
        TradingMode::Paper => Arc::new(PaperVenue::with_state_file(
            market.clone(),
            Money::from_f64(config.exchange.paper_cash),
            config.exchange.paper_fee_rate,
            &config.storage.paper_state_file,
        )),
    };

    let notifier: Arc<dyn Notifier> = if dry_run {
        Arc::new(LogNotifier)
    } else {
        notify::from_webhook_url(config.notification.webhook_url.as_deref())?
    };

    let store = ReferencePriceStore::open(config.storage.reference_file(mode), &tickers);
    let audit = config
        .storage
        .atr_log_file
        .as_ref()
        .map(|path| AtrAuditLog::new(path.clone()));

    let mut settings = TraderSettings::from_config(config);
    settings.dry_run = dry_run;

    Ok(Trader::new(
        market, venue, notifier, store, audit, tickers, settings,
    ))
}
