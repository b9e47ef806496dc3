//! Request and response types for the Upbit REST API

use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{Candle, CandleValidationError, Money, Ticker};

/// Accept either a JSON string or a number, as Upbit mixes both
fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Num(f64),
    }

    Ok(match Option::<StrOrNum>::deserialize(deserializer)? {
        Some(StrOrNum::Num(n)) => Some(n),
        Some(StrOrNum::Str(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// `GET /v1/ticker` entry
#[derive(Debug, Clone, Deserialize)]
pub struct TickerResponse {
    pub market: String,
    pub trade_price: f64,
}

/// `GET /v1/candles/...` entry (newest first on the wire)
#[derive(Debug, Clone, Deserialize)]
pub struct CandleResponse {
    pub market: String,
    pub candle_date_time_utc: String,
    pub opening_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub trade_price: f64,
    pub candle_acc_trade_volume: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum CandleConversionError {
    #[error("bad candle timestamp {0:?}")]
    Timestamp(String),
    #[error(transparent)]
    Invalid(#[from] CandleValidationError),
}

impl CandleResponse {
    pub fn into_candle(self) -> Result<Candle, CandleConversionError> {
        let naive = NaiveDateTime::parse_from_str(&self.candle_date_time_utc, "%Y-%m-%dT%H:%M:%S")
            .map_err(|_| CandleConversionError::Timestamp(self.candle_date_time_utc.clone()))?;
        Ok(Candle::new(
            Utc.from_utc_datetime(&naive),
            self.opening_price,
            self.high_price,
            self.low_price,
            self.trade_price,
            self.candle_acc_trade_volume,
        )?)
    }
}

/// `GET /v1/accounts` entry. Numeric fields arrive as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub currency: String,
    pub balance: String,
    #[serde(default)]
    pub locked: String,
    pub avg_buy_price: String,
    #[serde(default)]
    pub unit_currency: String,
}

impl Account {
    pub fn balance_f64(&self) -> f64 {
        self.balance.parse().unwrap_or(0.0)
    }

    pub fn avg_buy_price_f64(&self) -> f64 {
        self.avg_buy_price.parse().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// buy
    Bid,
    /// sell
    Ask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// market buy by quote-currency amount
    Price,
    /// market sell by volume
    Market,
}

/// `POST /v1/orders` body
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub market: String,
    pub side: OrderSide,
    pub ord_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
}

impl OrderRequest {
    pub fn market_buy(ticker: &Ticker, notional: Money) -> Self {
        Self {
            market: ticker.as_str().to_string(),
            side: OrderSide::Bid,
            ord_type: OrderType::Price,
            price: Some(notional.to_plain_string()),
            volume: None,
        }
    }

    pub fn market_sell(ticker: &Ticker, quantity: f64) -> Self {
        Self {
            market: ticker.as_str().to_string(),
            side: OrderSide::Ask,
            ord_type: OrderType::Market,
            price: None,
            volume: Some(format_volume(quantity)),
        }
    }

    /// Parameter string the query hash is computed over, in body field order
    pub fn query_string(&self) -> String {
        let side = match self.side {
            OrderSide::Bid => "bid",
            OrderSide::Ask => "ask",
        };
        let ord_type = match self.ord_type {
            OrderType::Price => "price",
            OrderType::Market => "market",
        };
        let mut query = format!("market={}&side={}&ord_type={}", self.market, side, ord_type);
        if let Some(price) = &self.price {
            query.push_str(&format!("&price={}", price));
        }
        if let Some(volume) = &self.volume {
            query.push_str(&format!("&volume={}", volume));
        }
        query
    }
}

/// Truncate to 8 decimals (never round up past the held amount) and drop
/// trailing zeros
pub fn format_volume(quantity: f64) -> String {
    let truncated = (quantity * 1e8).floor() / 1e8;
    let s = format!("{:.8}", truncated);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trade {
    #[serde(deserialize_with = "deserialize_f64_lenient", default)]
    pub price: Option<f64>,
    #[serde(deserialize_with = "deserialize_f64_lenient", default)]
    pub volume: Option<f64>,
    #[serde(deserialize_with = "deserialize_f64_lenient", default)]
    pub funds: Option<f64>,
}

/// `POST /v1/orders` and `GET /v1/order` response
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub uuid: String,
    pub side: String,
    pub ord_type: String,
    pub state: String,
    pub market: String,
    #[serde(deserialize_with = "deserialize_f64_lenient", default)]
    pub executed_volume: Option<f64>,
    #[serde(default)]
    pub trades: Vec<Trade>,
}

impl OrderResponse {
    /// `done`, or `cancel` which is how a market buy ends when its
    /// notional leaves dust unspent
    pub fn is_settled(&self) -> bool {
        matches!(self.state.as_str(), "done" | "cancel")
    }

    /// Volume-weighted fill price over reported trades
    pub fn average_fill_price(&self) -> Option<f64> {
        let (funds, volume) = self.trades.iter().fold((0.0, 0.0), |(f, v), t| {
            let vol = t.volume.unwrap_or(0.0);
            let fund = t.funds.or_else(|| t.price.map(|p| p * vol)).unwrap_or(0.0);
            (f + fund, v + vol)
        });
        (volume > 0.0).then(|| funds / volume)
    }

    pub fn executed_quantity(&self) -> f64 {
        self.executed_volume
            .unwrap_or_else(|| self.trades.iter().filter_map(|t| t.volume).sum())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
}

/// `{"error": {"name": ..., "message": ...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_candle_conversion() {
        let json = r#"{
            "market": "KRW-BTC",
            "candle_date_time_utc": "2025-07-20T01:05:00",
            "candle_date_time_kst": "2025-07-20T10:05:00",
            "opening_price": 160000000.0,
            "high_price": 160500000.0,
            "low_price": 159800000.0,
            "trade_price": 160200000.0,
            "timestamp": 1752973512345,
            "candle_acc_trade_price": 1234567.0,
            "candle_acc_trade_volume": 0.52,
            "unit": 5
        }"#;
        let resp: CandleResponse = serde_json::from_str(json).unwrap();
        let candle = resp.into_candle().unwrap();
        assert_eq!(candle.datetime.to_rfc3339(), "2025-07-20T01:05:00+00:00");
        assert_eq!(candle.high, 160500000.0);
        assert_eq!(candle.close, 160200000.0);
    }

    #[test]
    fn test_bad_candle_timestamp() {
        let resp = CandleResponse {
            market: "KRW-BTC".into(),
            candle_date_time_utc: "yesterday".into(),
            opening_price: 1.0,
            high_price: 1.0,
            low_price: 1.0,
            trade_price: 1.0,
            candle_acc_trade_volume: 1.0,
        };
        assert!(matches!(
            resp.into_candle(),
            Err(CandleConversionError::Timestamp(_))
        ));
    }

    #[test]
    fn test_account_parsing() {
        let json = r#"[
            {"currency":"KRW","balance":"1000000.0","locked":"0.0","avg_buy_price":"0","avg_buy_price_modified":false,"unit_currency":"KRW"},
            {"currency":"BTC","balance":"0.00031","locked":"0.0","avg_buy_price":"158000000","avg_buy_price_modified":false,"unit_currency":"KRW"}
        ]"#;
        let accounts: Vec<Account> = serde_json::from_str(json).unwrap();
        assert_eq!(accounts[0].balance_f64(), 1_000_000.0);
        assert_eq!(accounts[1].avg_buy_price_f64(), 158_000_000.0);
    }

    #[test]
    fn test_order_request_query_string() {
        let t = Ticker::new("KRW-XLM");
        let buy = OrderRequest::market_buy(&t, Money::from_f64(5000.0));
        assert_eq!(
            buy.query_string(),
            "market=KRW-XLM&side=bid&ord_type=price&price=5000"
        );

        let sell = OrderRequest::market_sell(&t, 12.5);
        assert_eq!(
            sell.query_string(),
            "market=KRW-XLM&side=ask&ord_type=market&volume=12.5"
        );

        let body = serde_json::to_value(&sell).unwrap();
        assert_eq!(body["side"], "ask");
        assert_eq!(body["ord_type"], "market");
        assert!(body.get("price").is_none());
    }

    #[test]
    fn test_format_volume_truncates() {
        assert_eq!(format_volume(1.0), "1");
        assert_eq!(format_volume(0.123456789), "0.12345678");
        assert_eq!(format_volume(0.5), "0.5");
        assert_eq!(format_volume(0.0), "0");
    }

    #[test]
    fn test_order_response_fill_price() {
        let json = r#"{
            "uuid": "9ca023a5-851b-4fec-9f0a-48cd83c2eaae",
            "side": "bid",
            "ord_type": "price",
            "price": "5000",
            "state": "cancel",
            "market": "KRW-XLM",
            "created_at": "2025-07-20T10:05:00+09:00",
            "volume": null,
            "remaining_volume": null,
            "executed_volume": "12.0",
            "trades_count": 2,
            "trades": [
                {"market":"KRW-XLM","uuid":"a","price":"400","volume":"5.0","funds":"2000","side":"bid"},
                {"market":"KRW-XLM","uuid":"b","price":"420","volume":"7.0","funds":"2940","side":"bid"}
            ]
        }"#;
        let order: OrderResponse = serde_json::from_str(json).unwrap();
        assert!(order.is_settled());
        assert_relative_eq!(order.executed_quantity(), 12.0);
        assert_relative_eq!(order.average_fill_price().unwrap(), 4940.0 / 12.0);
    }

    #[test]
    fn test_pending_order_without_trades() {
        let json = r#"{"uuid":"x","side":"ask","ord_type":"market","state":"wait","market":"KRW-BTC","executed_volume":"0"}"#;
        let order: OrderResponse = serde_json::from_str(json).unwrap();
        assert!(!order.is_settled());
        assert_eq!(order.average_fill_price(), None);
        assert_eq!(order.executed_quantity(), 0.0);
    }

    #[test]
    fn test_error_response() {
        let json = r#"{"error":{"name":"insufficient_funds_bid","message":"주문가능한 금액(KRW)이 부족합니다."}}"#;
        let err: ErrorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(err.error.name, "insufficient_funds_bid");
    }
}
