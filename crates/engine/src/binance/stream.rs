use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use url::Url;

use common::{Candle, Error, Result, TradingPair};

const WS_BASE: &str = "wss://stream.binance.com:9443/ws";

/// Binance kline WebSocket stream for one pair and interval.
///
/// Forwards only closed candles, in the order Binance sends them, to the
/// engine's candle channel. Reconnects with exponential backoff; stops when
/// the receiving side is gone.
pub struct BinanceStream {
    pair: TradingPair,
    interval: String,
    candle_tx: mpsc::Sender<Candle>,
}

impl BinanceStream {
    pub fn new(pair: TradingPair, interval: impl Into<String>, candle_tx: mpsc::Sender<Candle>) -> Self {
        Self {
            pair,
            interval: interval.into(),
            candle_tx,
        }
    }

    /// Run the stream loop, reconnecting on failure.
    /// Call this inside a `tokio::spawn`.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(60);

        loop {
            if self.candle_tx.is_closed() {
                info!(pair = %self.pair, "Candle receiver dropped; stream stopping");
                return;
            }
            info!(pair = %self.pair, interval = %self.interval, "Connecting to Binance kline stream");
            match self.connect_once().await {
                Ok(()) => {
                    // Binance ends sessions after 24h; reconnect promptly.
                    info!(pair = %self.pair, "Kline stream closed cleanly");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(pair = %self.pair, error = %e, backoff = ?backoff, "Kline stream error, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let url_str = format!(
            "{WS_BASE}/{}@kline_{}",
            self.pair.symbol().to_lowercase(),
            self.interval
        );
        let url = Url::parse(&url_str).map_err(|e| Error::WebSocket(e.to_string()))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;

            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                match parse_closed_kline(&text) {
                    Ok(Some(candle)) => {
                        debug!(pair = %self.pair, open_time = %candle.open_time, close = candle.close, "Closed candle");
                        if self.candle_tx.send(candle).await.is_err() {
                            return Ok(());
                        }
                    }
                    Ok(None) => {} // forming candle or non-kline message
                    Err(e) => warn!(error = %e, "Failed to parse kline event"),
                }
            }
        }

        Ok(())
    }
}

// ─── Binance kline JSON parsing ──────────────────────────────────────────────

#[derive(Deserialize)]
struct KlineWrapper {
    k: KlineData,
}

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "t")]
    open_time_ms: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

fn number(field: &str, value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| Error::WebSocket(format!("bad {field} '{value}' in kline")))
}

/// `Ok(None)` for anything that is not a closed kline.
fn parse_closed_kline(text: &str) -> Result<Option<Candle>> {
    let wrapper: serde_json::Value = serde_json::from_str(text)?;
    if wrapper.get("e").and_then(|v| v.as_str()) != Some("kline") {
        return Ok(None);
    }

    let k = serde_json::from_value::<KlineWrapper>(wrapper)?.k;
    if !k.is_closed {
        return Ok(None);
    }

    let open_time = Utc
        .timestamp_millis_opt(k.open_time_ms)
        .single()
        .ok_or_else(|| Error::WebSocket(format!("bad kline open time {}", k.open_time_ms)))?;

    Ok(Some(Candle {
        open_time,
        open: number("open", &k.open)?,
        high: number("high", &k.high)?,
        low: number("low", &k.low)?,
        close: number("close", &k.close)?,
        volume: number("volume", &k.volume)?,
    }))
}
