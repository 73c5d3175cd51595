// =============================================================================
// Binance USDⓈ-M Futures Client — public market-data surface
// =============================================================================
//
// Only the read-only endpoints the pipeline needs are implemented; there is
// no order placement here (the teacher's signing scaffold is kept for the
// one endpoint — none, currently — that would need it, and is retained in
// `sign`/`signed_query` so a future authenticated endpoint is a one-line
// addition rather than a rewrite).
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::error::PipelineError;
use crate::precision::SymbolPrecision;
use crate::types::{BookEntry, BookSide, OrderBook, Symbol};

use super::{ExchangeClient, TickerStats};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

/// Binance USDⓈ-M futures REST client.
pub struct BinanceFuturesClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    precision_cache: RwLock<HashMap<Symbol, SymbolPrecision>>,
}

impl BinanceFuturesClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("BinanceFuturesClient initialised (base_url=https://fapi.binance.com)");

        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: "https://fapi.binance.com".to_string(),
            client,
            precision_cache: RwLock::new(HashMap::new()),
        }
    }

    #[allow(dead_code)]
    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[allow(dead_code)]
    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    #[allow(dead_code)]
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, PipelineError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await.map_err(|e| {
            PipelineError::TransientVenue(format!("GET {path} failed: {e}"))
        })?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| {
            PipelineError::TransientVenue(format!("GET {path} returned unparseable body: {e}"))
        })?;

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::TransientVenue(format!(
                "GET {path} returned {status}: {body}"
            )));
        }
        if !status.is_success() {
            return Err(PipelineError::PermanentVenue(format!(
                "GET {path} returned {status}: {body}"
            )));
        }
        Ok(body)
    }

    fn parse_str_decimal(val: &serde_json::Value) -> Decimal {
        if let Some(s) = val.as_str() {
            s.parse().unwrap_or_default()
        } else if let Some(n) = val.as_f64() {
            Decimal::try_from(n).unwrap_or_default()
        } else {
            Decimal::ZERO
        }
    }

    fn parse_side(raw: &serde_json::Value) -> BookSide {
        let entries = raw
            .as_array()
            .map(|levels| {
                levels
                    .iter()
                    .filter_map(|level| {
                        let arr = level.as_array()?;
                        let price = Self::parse_str_decimal(arr.first()?);
                        let quantity = Self::parse_str_decimal(arr.get(1)?);
                        Some(BookEntry::new(price, quantity))
                    })
                    .collect()
            })
            .unwrap_or_default();
        BookSide { entries }
    }
}

#[async_trait]
impl ExchangeClient for BinanceFuturesClient {
    async fn get_futures_symbols(&self) -> Result<Vec<Symbol>, PipelineError> {
        let body = self.get_json("/fapi/v1/exchangeInfo").await?;
        let symbols = body["symbols"]
            .as_array()
            .ok_or_else(|| PipelineError::PermanentVenue("exchangeInfo missing symbols".into()))?
            .iter()
            .filter(|s| s["status"].as_str() == Some("TRADING"))
            .filter(|s| s["contractType"].as_str() == Some("PERPETUAL"))
            .filter_map(|s| s["symbol"].as_str().map(str::to_string))
            .collect();
        Ok(symbols)
    }

    #[instrument(skip(self), name = "binance::get_24h_stats")]
    async fn get_24h_stats(&self) -> Result<Vec<TickerStats>, PipelineError> {
        let body = self.get_json("/fapi/v1/ticker/24hr").await?;
        let raw = body
            .as_array()
            .ok_or_else(|| PipelineError::PermanentVenue("ticker/24hr is not an array".into()))?;

        let stats = raw
            .iter()
            .filter_map(|entry| {
                let symbol = entry["symbol"].as_str()?.to_string();
                let last_price = Self::parse_str_decimal(&entry["lastPrice"]);
                let quote_volume = Self::parse_str_decimal(&entry["quoteVolume"]);
                let price_change_percent = entry["priceChangePercent"]
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.0);
                Some(TickerStats {
                    symbol,
                    last_price,
                    quote_volume,
                    price_change_percent,
                })
            })
            .collect();
        Ok(stats)
    }

    async fn get_top_by_quote_volume(&self, limit: usize) -> Result<Vec<Symbol>, PipelineError> {
        let mut stats = self.get_24h_stats().await?;
        stats.sort_by(|a, b| b.quote_volume.cmp(&a.quote_volume));
        Ok(stats.into_iter().take(limit).map(|s| s.symbol).collect())
    }

    #[instrument(skip(self), name = "binance::get_orderbook")]
    async fn get_orderbook(&self, symbol: &str, depth: u32) -> Result<OrderBook, PipelineError> {
        let limit = depth.clamp(5, 1000);
        let path = format!("/fapi/v1/depth?symbol={symbol}&limit={limit}");
        let body = self.get_json(&path).await?;

        let last_update_id = body["lastUpdateId"].as_u64().unwrap_or(0);
        let bids = Self::parse_side(&body["bids"]);
        let asks = Self::parse_side(&body["asks"]);

        debug!(symbol, bids = bids.entries.len(), asks = asks.entries.len(), "orderbook fetched");
        Ok(OrderBook { bids, asks, last_update_id })
    }

    async fn get_last_price(&self, symbol: &str) -> Result<Decimal, PipelineError> {
        let path = format!("/fapi/v1/ticker/price?symbol={symbol}");
        let body = self.get_json(&path).await?;
        let price = body["price"]
            .as_str()
            .ok_or_else(|| PipelineError::PermanentVenue(format!("no price for {symbol}")))?
            .parse()
            .map_err(|e| PipelineError::PermanentVenue(format!("bad price for {symbol}: {e}")))?;
        Ok(price)
    }

    #[instrument(skip(self), name = "binance::get_volatility")]
    async fn get_volatility(&self, symbol: &str, window: &str) -> Result<f64, PipelineError> {
        let (interval, limit) = match window {
            "1h" => ("1m", 60u32),
            "24h" => ("15m", 96u32),
            other => {
                warn!(window = other, "unknown volatility window, defaulting to 1h");
                ("1m", 60)
            }
        };
        let path = format!("/fapi/v1/klines?symbol={symbol}&interval={interval}&limit={limit}");
        let body = self.get_json(&path).await?;
        let raw = body
            .as_array()
            .ok_or_else(|| PipelineError::PermanentVenue("klines is not an array".into()))?;

        let closes: Vec<f64> = raw
            .iter()
            .filter_map(|entry| entry.as_array())
            .filter_map(|arr| arr.get(4))
            .filter_map(|v| v.as_str())
            .filter_map(|s| s.parse::<f64>().ok())
            .collect();

        if closes.len() < 2 {
            return Ok(0.0);
        }
        let high = closes.iter().cloned().fold(f64::MIN, f64::max);
        let low = closes.iter().cloned().fold(f64::MAX, f64::min);
        if low <= 0.0 {
            return Ok(0.0);
        }
        Ok((high - low) / low)
    }

    #[instrument(skip(self), name = "binance::get_price_precision")]
    async fn get_price_precision(&self, symbol: &str) -> Result<SymbolPrecision, PipelineError> {
        if let Some(precision) = self.precision_cache.read().get(symbol) {
            return Ok(*precision);
        }

        let path = format!("/fapi/v1/exchangeInfo?symbol={symbol}");
        let body = self.get_json(&path).await?;
        let info = body["symbols"]
            .as_array()
            .and_then(|arr| arr.first())
            .ok_or_else(|| PipelineError::PermanentVenue(format!("{symbol} not found in exchangeInfo")))?;

        let precision = SymbolPrecision {
            price_decimals: info["pricePrecision"].as_u64().unwrap_or(2) as u32,
            quantity_decimals: info["quantityPrecision"].as_u64().unwrap_or(3) as u32,
        };

        self.precision_cache.write().insert(symbol.to_string(), precision);
        Ok(precision)
    }
}

impl std::fmt::Debug for BinanceFuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFuturesClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_side_skips_malformed_levels() {
        let raw = serde_json::json!([["50000.10", "1.5"], ["bad"], ["50001.00", "2.0"]]);
        let side = BinanceFuturesClient::parse_side(&raw);
        assert_eq!(side.entries.len(), 2);
        assert_eq!(side.entries[0].price, dec!(50000.10));
    }

    #[test]
    fn parse_str_decimal_handles_numeric_and_string() {
        assert_eq!(
            BinanceFuturesClient::parse_str_decimal(&serde_json::json!("1.25")),
            dec!(1.25)
        );
        assert_eq!(
            BinanceFuturesClient::parse_str_decimal(&serde_json::json!(2.5)),
            Decimal::try_from(2.5).unwrap()
        );
    }
}
