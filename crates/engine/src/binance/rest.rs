use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use common::{
    Candle, Error, ExchangeClient, Holdings, Order, OrderOutcome, OrderRecord, Result, TradingPair,
};

const BASE_URL: &str = "https://api.binance.com";

/// REST API client for Binance spot. Used for order placement, order status,
/// account queries and historical klines.
#[derive(Clone)]
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    http: Client,
}

impl BinanceClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, secret, BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: base_url.into(),
            http,
        })
    }

    /// Client for public market data only (klines, prices). Signed calls fail.
    pub fn public() -> Result<Self> {
        Self::new("", "")
    }

    fn sign(&self, query: &str) -> Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Config(format!("invalid API secret: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, params: &str) -> Result<String> {
        let ts = Utc::now().timestamp_millis();
        let query = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let signature = self.sign(&query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    async fn signed_get(&self, path: &str, params: &str) -> Result<String> {
        let url = format!("{}{path}?{}", self.base_url, self.signed_query(params)?);
        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Connectivity(e.to_string()))?;
        read_body(resp).await
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<String> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(self.signed_query(params)?)
            .send()
            .await
            .map_err(|e| Error::Connectivity(e.to_string()))?;
        read_body(resp).await
    }

    async fn public_get(&self, path: &str, params: &str) -> Result<String> {
        let url = format!("{}{path}?{params}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Connectivity(e.to_string()))?;
        read_body(resp).await
    }

    /// The most recent closed klines, oldest first. The still-forming kline
    /// Binance returns last is dropped.
    pub async fn klines(&self, pair: &TradingPair, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let params = format!(
            "symbol={}&interval={interval}&limit={}",
            pair.symbol(),
            (limit + 1).min(1000)
        );
        let body = self.public_get("/api/v3/klines", &params).await?;
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(&body)?;
        let now = Utc::now();

        let mut candles: Vec<Candle> = rows
            .iter()
            .filter_map(|row| parse_kline_row(row, now))
            .collect();
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        debug!(pair = %pair, interval, count = candles.len(), "Fetched klines");
        Ok(candles)
    }
}

/// Map the HTTP status onto the error taxonomy: 4xx is the exchange saying
/// no, 5xx and rate limiting are worth retrying later.
async fn read_body(resp: reqwest::Response) -> Result<String> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| Error::Connectivity(e.to_string()))?;

    if status.is_success() {
        return Ok(body);
    }
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.as_u16() == 418
    {
        return Err(Error::Connectivity(format!("HTTP {status}: {body}")));
    }
    Err(Error::ExchangeRejected(format!("HTTP {status}: {body}")))
}

/// Binance rejects quantities with more precision than the lot allows, and
/// `f64` display can produce long tails, so print at most 8 decimals.
fn format_decimal(value: f64) -> String {
    let s = format!("{value:.8}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn parse_f64(s: &str) -> Result<f64> {
    s.parse::<f64>()
        .map_err(|e| Error::Other(format!("bad decimal '{s}' from exchange: {e}")))
}

fn millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Kline arrays: [open_time, open, high, low, close, volume, close_time, ...].
fn parse_kline_row(row: &[serde_json::Value], now: DateTime<Utc>) -> Option<Candle> {
    let num = |i: usize| row.get(i)?.as_str()?.parse::<f64>().ok();
    let open_time = millis(row.first()?.as_i64()?)?;
    let close_time = millis(row.get(6)?.as_i64()?)?;
    if close_time >= now {
        return None;
    }
    Some(Candle {
        open_time,
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: num(5)?,
    })
}

impl OrderResponse {
    /// Translate Binance's order status into an outcome for `order`.
    ///
    /// A cancelled or expired order that executed anything is a partial fill:
    /// the executed quantity moved balances and must be tracked.
    fn into_record(self, base: OrderRecord) -> Result<OrderRecord> {
        let executed = parse_f64(&self.executed_qty)?;
        let outcome = match self.status.as_str() {
            "FILLED" => OrderOutcome::Filled,
            "NEW" | "PARTIALLY_FILLED" | "PENDING_NEW" => OrderOutcome::Pending,
            "EXPIRED" | "CANCELED" | "EXPIRED_IN_MATCH" if executed > 0.0 => OrderOutcome::Filled,
            "REJECTED" | "EXPIRED" | "CANCELED" | "EXPIRED_IN_MATCH" => OrderOutcome::Rejected,
            other => return Err(Error::Other(format!("unknown order status '{other}'"))),
        };
        if outcome != OrderOutcome::Filled {
            return Ok(OrderRecord { outcome, ..base });
        }

        let quote = parse_f64(&self.cummulative_quote_qty)?;
        let (quantity, fill_price) = if executed > 0.0 {
            (executed, quote / executed)
        } else {
            (base.requested_quantity, base.price_hint.unwrap_or(0.0))
        };
        let fill_time = self
            .update_time
            .or(self.transact_time)
            .and_then(millis)
            .unwrap_or_else(Utc::now);
        Ok(base.partially_filled(quantity, fill_price, fill_time))
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn submit_order(&self, order: &Order) -> Result<OrderRecord> {
        let mut params = format!(
            "symbol={}&side={}&quantity={}&newClientOrderId={}&newOrderRespType=FULL",
            order.pair,
            order.side,
            format_decimal(order.quantity),
            order.id
        );
        match order.price {
            Some(price) => params.push_str(&format!(
                "&type=LIMIT&timeInForce=GTC&price={}",
                format_decimal(price)
            )),
            None => params.push_str("&type=MARKET"),
        }

        debug!(pair = %order.pair, side = %order.side, order_id = %order.id, "Submitting order to Binance");
        let body = self.signed_post("/api/v3/order", &params).await?;
        let resp: OrderResponse = serde_json::from_str(&body)?;
        resp.into_record(OrderRecord::for_order(order, OrderOutcome::Pending))
    }

    async fn poll_order(&self, record: &OrderRecord) -> Result<OrderRecord> {
        let params = format!("symbol={}&origClientOrderId={}", record.pair, record.order_id);
        let body = self.signed_get("/api/v3/order", &params).await?;
        let resp: OrderResponse = serde_json::from_str(&body)?;
        let base = OrderRecord {
            outcome: OrderOutcome::Pending,
            fill_price: None,
            fill_time: None,
            filled_quantity: None,
            ..record.clone()
        };
        resp.into_record(base)
    }

    async fn current_holdings(&self, pair: &TradingPair) -> Result<Holdings> {
        let quantity = self.asset_balance(&pair.base).await?;
        Ok(Holdings::from_quantity(quantity, 0.0))
    }

    async fn quote_balance(&self, pair: &TradingPair) -> Result<f64> {
        self.asset_balance(&pair.quote).await
    }
}

impl BinanceClient {
    /// Free plus locked balance of one asset; assets the account never held
    /// are absent from the response and count as zero.
    async fn asset_balance(&self, asset: &str) -> Result<f64> {
        let body = self.signed_get("/api/v3/account", "").await?;
        let account: AccountResponse = serde_json::from_str(&body)?;
        let quantity = account.balance_of(asset)?;
        debug!(asset, quantity, "Account balance");
        Ok(quantity)
    }
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    status: String,
    #[serde(default = "zero")]
    executed_qty: String,
    #[serde(default = "zero")]
    cummulative_quote_qty: String,
    #[serde(default)]
    transact_time: Option<i64>,
    #[serde(default)]
    update_time: Option<i64>,
}

fn zero() -> String {
    "0".to_string()
}

#[derive(Deserialize)]
struct AccountResponse {
    balances: Vec<Balance>,
}

#[derive(Deserialize)]
struct Balance {
    asset: String,
    free: String,
    locked: String,
}

impl AccountResponse {
    fn balance_of(&self, asset: &str) -> Result<f64> {
        match self.balances.iter().find(|b| b.asset == asset) {
            Some(b) => Ok(parse_f64(&b.free)? + parse_f64(&b.locked)?),
            None => Ok(0.0),
        }
    }
}
