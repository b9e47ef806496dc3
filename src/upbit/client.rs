//! Upbit API Client
//!
//! HTTP client for the Upbit spot exchange with:
//! - Automatic retry with exponential backoff for transient failures
//! - JWT-signed private endpoints
//! - Status-code classification into `ExchangeError`
//!
//! Order placement is sent exactly once; a retried POST could fill twice.
//!
//! # Example
//!
//! ```no_run
//! use atr_dca::exchange::MarketData;
//! use atr_dca::upbit::{ClientConfig, UpbitClient};
//! use atr_dca::Ticker;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = UpbitClient::new(None, ClientConfig::default())?;
//!     let price = client.current_price(&Ticker::new("KRW-BTC")).await?;
//!     println!("KRW-BTC: {}", price);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::auth::Credentials;
use super::types::{Account, ErrorResponse, OrderRequest, OrderResponse, TickerResponse, CandleResponse};
use crate::exchange::{ExchangeError, ExchangeResult, FillResult, MarketData, OrderVenue};
use crate::types::{Candle, Money, Ticker, Timeframe};

/// Base URL for the Upbit REST API
pub const API_BASE_URL: &str = "https://api.upbit.com";

/// Upper bound the candle endpoints accept for `count`
pub const MAX_CANDLES_PER_REQUEST: usize = 200;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum number of retry attempts for idempotent requests
    pub max_retries: u32,
    /// Request timeout duration
    pub timeout: Duration,
    pub base_url: String,
    /// Currency the cash balance is reported in
    pub quote_currency: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(10),
            base_url: API_BASE_URL.to_string(),
            quote_currency: "KRW".to_string(),
        }
    }
}

impl ClientConfig {
    /// Set maximum retry attempts
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Upbit Exchange API Client
///
/// Public endpoints (ticker, candles) work without credentials; account
/// and order endpoints fail with `ExchangeError::Auth` when none are set.
#[derive(Clone)]
pub struct UpbitClient {
    credentials: Option<Credentials>,
    http_client: Client,
    base_url: String,
    quote_currency: String,
    max_retries: u32,
}

impl UpbitClient {
    pub fn new(credentials: Option<Credentials>, config: ClientConfig) -> ExchangeResult<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ExchangeError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            credentials,
            http_client,
            base_url: config.base_url,
            quote_currency: config.quote_currency,
            max_retries: config.max_retries,
        })
    }

    /// Execute a request, retrying transient failures with exponential backoff
    async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> ExchangeResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ExchangeResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "Request failed (attempt {}/{}): {}",
                        attempt,
                        self.max_retries + 1,
                        e
                    );
                    // Exponential backoff: 1s, 2s, 4s, 8s...
                    let delay = Duration::from_secs(2u64.pow(attempt - 1));
                    debug!("Retrying after {}ms", delay.as_millis());
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn credentials(&self) -> ExchangeResult<&Credentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| ExchangeError::Auth("no API credentials configured".to_string()))
    }

    fn url(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.base_url, path, q),
            _ => format!("{}{}", self.base_url, path),
        }
    }

    /// Send a request and map the status code onto `ExchangeError`
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ExchangeResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(classify_error(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Unavailable(format!("Failed to parse response: {}", e)))
    }

    async fn public_get<T: DeserializeOwned>(&self, path: &str, query: &str) -> ExchangeResult<T> {
        let request = self.http_client.get(self.url(path, Some(query)));
        self.send(request).await
    }

    async fn private_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<&str>,
    ) -> ExchangeResult<T> {
        let authorization = self.credentials()?.authorization(query);
        let request = self
            .http_client
            .get(self.url(path, query))
            .header("Authorization", authorization);
        self.send(request).await
    }

    // ==================== PUBLIC ENDPOINTS ====================

    pub async fn get_ticker(&self, ticker: &Ticker) -> ExchangeResult<TickerResponse> {
        let query = format!("markets={}", ticker);
        let tickers: Vec<TickerResponse> = self
            .execute_with_retry(|| self.public_get("/v1/ticker", &query))
            .await?;

        tickers
            .into_iter()
            .find(|t| t.market == ticker.as_str())
            .ok_or_else(|| ExchangeError::NotFound(format!("ticker {}", ticker)))
    }

    /// Fetch the latest `count` candles, oldest first
    pub async fn get_candles(
        &self,
        ticker: &Ticker,
        timeframe: Timeframe,
        count: usize,
    ) -> ExchangeResult<Vec<Candle>> {
        if count > MAX_CANDLES_PER_REQUEST {
            debug!(
                "Requested {} candles for {}, capping at {}",
                count, ticker, MAX_CANDLES_PER_REQUEST
            );
        }
        let count = count.clamp(1, MAX_CANDLES_PER_REQUEST);
        let path = format!("/v1/candles/{}", candle_path(timeframe));
        let query = format!("market={}&count={}", ticker, count);

        let raw: Vec<CandleResponse> = self
            .execute_with_retry(|| self.public_get(&path, &query))
            .await?;

        raw.into_iter()
            .rev()
            .map(|c| {
                c.into_candle()
                    .map_err(|e| ExchangeError::Unavailable(format!("{}: {}", ticker, e)))
            })
            .collect()
    }

    // ==================== AUTHENTICATED ENDPOINTS ====================

    pub async fn get_accounts(&self) -> ExchangeResult<Vec<Account>> {
        self.execute_with_retry(|| self.private_get("/v1/accounts", None))
            .await
    }

    /// Submit an order. Not retried.
    pub async fn place_order(&self, order: &OrderRequest) -> ExchangeResult<OrderResponse> {
        let query = order.query_string();
        let authorization = self.credentials()?.authorization(Some(&query));
        debug!("POST /v1/orders {}", query);

        let request = self
            .http_client
            .post(self.url("/v1/orders", None))
            .header("Authorization", authorization)
            .json(order);
        self.send(request).await
    }

    pub async fn get_order(&self, uuid: &str) -> ExchangeResult<OrderResponse> {
        let query = format!("uuid={}", uuid);
        self.execute_with_retry(|| self.private_get("/v1/order", Some(&query)))
            .await
    }

    async fn account_for(&self, currency: &str) -> ExchangeResult<Option<Account>> {
        let accounts = self.get_accounts().await?;
        Ok(accounts.into_iter().find(|a| a.currency == currency))
    }
}

fn candle_path(timeframe: Timeframe) -> String {
    match timeframe {
        Timeframe::Minutes(n) => format!("minutes/{}", n),
        Timeframe::Day => "days".to_string(),
        Timeframe::Week => "weeks".to_string(),
        Timeframe::Month => "months".to_string(),
    }
}

fn classify_error(status: StatusCode, body: &str) -> ExchangeError {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| format!("{}: {}", e.error.name, e.error.message))
        .unwrap_or_else(|_| body.chars().take(200).collect());
    let message = format!("{} {}", status.as_u16(), detail);

    match status {
        StatusCode::UNAUTHORIZED => ExchangeError::Auth(message),
        StatusCode::NOT_FOUND => ExchangeError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => ExchangeError::Unavailable(message),
        s if s.is_client_error() => ExchangeError::Rejected(message),
        _ => ExchangeError::Unavailable(message),
    }
}

fn fill_from(order: &OrderResponse) -> FillResult {
    FillResult {
        order_id: order.uuid.clone(),
        settled: order.is_settled(),
        average_price: order.average_fill_price(),
        executed_quantity: order.executed_quantity(),
    }
}

#[async_trait]
impl MarketData for UpbitClient {
    async fn current_price(&self, ticker: &Ticker) -> ExchangeResult<f64> {
        let t = self.get_ticker(ticker).await?;
        if t.trade_price > 0.0 {
            Ok(t.trade_price)
        } else {
            Err(ExchangeError::Unavailable(format!(
                "non-positive price {} for {}",
                t.trade_price, ticker
            )))
        }
    }

    async fn candles(
        &self,
        ticker: &Ticker,
        timeframe: Timeframe,
        count: usize,
    ) -> ExchangeResult<Vec<Candle>> {
        self.get_candles(ticker, timeframe, count).await
    }
}

#[async_trait]
impl OrderVenue for UpbitClient {
    fn name(&self) -> &str {
        "upbit"
    }

    async fn place_market_buy(&self, ticker: &Ticker, notional: Money) -> ExchangeResult<FillResult> {
        let order = self.place_order(&OrderRequest::market_buy(ticker, notional)).await?;
        Ok(fill_from(&order))
    }

    async fn place_market_sell(&self, ticker: &Ticker, quantity: f64) -> ExchangeResult<FillResult> {
        let order = self
            .place_order(&OrderRequest::market_sell(ticker, quantity))
            .await?;
        Ok(fill_from(&order))
    }

    async fn order_status(&self, order_id: &str) -> ExchangeResult<FillResult> {
        let order = self.get_order(order_id).await?;
        Ok(fill_from(&order))
    }

    async fn average_cost(&self, ticker: &Ticker) -> ExchangeResult<Option<f64>> {
        let account = self.account_for(ticker.base_currency()).await?;
        Ok(account
            .map(|a| a.avg_buy_price_f64())
            .filter(|avg| *avg > 0.0))
    }

    async fn held_quantity(&self, ticker: &Ticker) -> ExchangeResult<f64> {
        let account = self.account_for(ticker.base_currency()).await?;
        Ok(account.map(|a| a.balance_f64()).unwrap_or(0.0))
    }

    async fn cash_balance(&self) -> ExchangeResult<Money> {
        let account = self.account_for(&self.quote_currency).await?;
        Ok(account
            .and_then(|a| rust_decimal::Decimal::from_str(&a.balance).ok())
            .map(Money::from)
            .unwrap_or(Money::ZERO))
    }
}
