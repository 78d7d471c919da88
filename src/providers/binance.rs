use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::enums::TimeWindow;
use crate::error::{ AppError, Result };
use crate::providers::market_data::{ HistoricalAggregate, MarketDataProvider, MarketSnapshot };

pub const BINANCE_API_BASE: &str = "https://api.binance.com/api/v3";
const SNAPSHOT_CACHE_SECS: i64 = 10;
const EXTREMES_CACHE_SECS: i64 = 3600;
const MAX_RETRIES: u32 = 3;

#[derive(Deserialize)]
struct BinanceTicker24hr {
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
}

/// One kline row: `[open_time, open, high, low, close, volume, close_time, quote_volume, ...]`.
type KlineRow = Vec<serde_json::Value>;

#[derive(Debug, Clone, Copy)]
struct Candle {
    open: f64,
    high: f64,
    low: f64,
    quote_volume: f64,
}

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    fetched_at: DateTime<Utc>,
}

/// Market data from the public Binance spot API.
///
/// Binance has no market cap, rank or dominance, so those snapshot fields are
/// always empty and the rule kinds depending on them never fire with this
/// provider.
pub struct BinanceMarketData {
    client: reqwest::Client,
    api_base: String,
    snapshots: RwLock<HashMap<String, Cached<MarketSnapshot>>>,
    extremes: RwLock<HashMap<String, Cached<(f64, f64)>>>,
}

impl BinanceMarketData {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client
            ::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            snapshots: RwLock::new(HashMap::new()),
            extremes: RwLock::new(HashMap::new()),
        })
    }

    /// Fetch a URL with retry on 429 rate-limit responses
    async fn fetch_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            let response = self.client
                .get(url)
                .send().await
                .map_err(|e| AppError::DataUnavailable(format!("Binance API error: {}", e)))?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let wait_secs = 2u64.pow(attempt + 1);
                tracing::warn!(url, wait_secs, "Binance rate limited, backing off");
                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                last_err = Some(AppError::DataUnavailable("Binance rate limited".to_string()));
                continue;
            }

            if !response.status().is_success() {
                return Err(
                    AppError::DataUnavailable(
                        format!("Binance API returned status: {}", response.status())
                    )
                );
            }

            return Ok(response);
        }
        Err(
            last_err.unwrap_or_else(||
                AppError::DataUnavailable("Binance API request failed after retries".to_string())
            )
        )
    }

    async fn fetch_candles(&self, pair: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/klines?symbol={}&interval={}&limit={}",
            self.api_base,
            pair,
            interval,
            limit
        );

        let rows: Vec<KlineRow> = self
            .fetch_with_retry(&url).await?
            .json().await
            .map_err(|e| AppError::DataUnavailable(format!("Failed to parse Binance klines: {}", e)))?;

        Ok(rows.iter().filter_map(parse_candle).collect())
    }

    /// All-time high and low from monthly candles, cached for an hour.
    async fn all_time_extremes(&self, pair: &str) -> Result<(f64, f64)> {
        if let Some(cached) = self.extremes.read().await.get(pair) {
            if (Utc::now() - cached.fetched_at).num_seconds() < EXTREMES_CACHE_SECS {
                return Ok(cached.value);
            }
        }

        let candles = self.fetch_candles(pair, "1M", 1000).await?;
        let extremes = candles
            .iter()
            .fold(None, |acc: Option<(f64, f64)>, c| {
                Some(match acc {
                    Some((high, low)) => (high.max(c.high), low.min(c.low)),
                    None => (c.high, c.low),
                })
            })
            .ok_or_else(|| AppError::DataUnavailable(format!("No monthly candles for {}", pair)))?;

        self.extremes.write().await.insert(pair.to_string(), Cached {
            value: extremes,
            fetched_at: Utc::now(),
        });
        Ok(extremes)
    }
}

#[async_trait]
impl MarketDataProvider for BinanceMarketData {
    async fn get_snapshot(&self, asset_id: &str) -> Result<MarketSnapshot> {
        if let Some(cached) = self.snapshots.read().await.get(asset_id) {
            if (Utc::now() - cached.fetched_at).num_seconds() < SNAPSHOT_CACHE_SECS {
                return Ok(cached.value.clone());
            }
        }

        let snapshot = if is_stablecoin(asset_id) {
            MarketSnapshot::new(asset_id, 1.0)
        } else {
            let pair = asset_to_binance_pair(asset_id).ok_or_else(||
                AppError::DataUnavailable(format!("No Binance market for {}", asset_id))
            )?;
            let url = format!("{}/ticker/24hr?symbol={}", self.api_base, pair);
            let ticker: BinanceTicker24hr = self
                .fetch_with_retry(&url).await?
                .json().await
                .map_err(|e|
                    AppError::DataUnavailable(format!("Failed to parse Binance response: {}", e))
                )?;

            let price: f64 = ticker.last_price
                .parse()
                .map_err(|_| AppError::DataUnavailable(format!("Bad price for {}", asset_id)))?;
            let mut snapshot = MarketSnapshot::new(asset_id, price);
            snapshot.volume = ticker.quote_volume.parse().ok();
            snapshot
        };

        self.snapshots.write().await.insert(asset_id.to_string(), Cached {
            value: snapshot.clone(),
            fetched_at: Utc::now(),
        });
        Ok(snapshot)
    }

    async fn get_aggregate(&self, asset_id: &str, window: TimeWindow) -> Result<HistoricalAggregate> {
        let pair = asset_to_binance_pair(asset_id).ok_or_else(||
            AppError::DataUnavailable(format!("No Binance market for {}", asset_id))
        )?;

        let (interval, limit) = kline_interval(window);
        let candles = self.fetch_candles(&pair, interval, limit).await?;
        let first = candles
            .first()
            .ok_or_else(|| AppError::DataUnavailable(format!("No candles for {}", asset_id)))?;

        let high = candles.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let low = candles.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let total_volume: f64 = candles.iter().map(|c| c.quote_volume).sum();

        // Snapshot volume is a rolling 24h figure, so express the window's
        // volume as a daily rate before comparing the two.
        let window_hours = window.duration().num_hours() as f64;
        let avg_volume = (total_volume / window_hours) * 24.0;

        let (ath, atl) = match self.all_time_extremes(&pair).await {
            Ok(extremes) => (Some(extremes.0), Some(extremes.1)),
            Err(e) => {
                tracing::debug!(asset_id, error = %e, "All-time extremes unavailable");
                (None, None)
            }
        };

        Ok(HistoricalAggregate {
            window,
            start_price: Some(first.open),
            high: Some(high),
            low: Some(low),
            ath_so_far: ath.map(|v| v.max(high)),
            atl_so_far: atl.map(|v| v.min(low)),
            avg_volume: Some(avg_volume),
            start_market_cap: None,
            start_rank: None,
        })
    }
}

fn parse_candle(row: &KlineRow) -> Option<Candle> {
    let field = |i: usize| row.get(i)?.as_str()?.parse::<f64>().ok();
    Some(Candle {
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        quote_volume: field(7)?,
    })
}

fn kline_interval(window: TimeWindow) -> (&'static str, u32) {
    match window {
        TimeWindow::OneHour => ("5m", 12),
        TimeWindow::FourHours => ("15m", 16),
        TimeWindow::OneDay => ("1h", 24),
        TimeWindow::SevenDays => ("4h", 42),
        TimeWindow::ThirtyDays => ("1d", 30),
    }
}

fn is_stablecoin(asset_id: &str) -> bool {
    matches!(
        asset_id.to_uppercase().as_str(),
        "USDT" | "USDC" | "DAI" | "BUSD" | "TETHER" | "USD-COIN"
    )
}

/// Map an asset id (CoinGecko-style name or ticker) to a Binance USDT pair.
pub fn asset_to_binance_pair(asset_id: &str) -> Option<String> {
    let upper = asset_id.to_uppercase();
    let base = match upper.as_str() {
        "BITCOIN" | "BTC" => "BTC",
        "ETHEREUM" | "ETH" | "WETH" => "ETH",
        "BINANCECOIN" | "BNB" => "BNB",
        "SOLANA" | "SOL" => "SOL",
        "RIPPLE" | "XRP" => "XRP",
        "CARDANO" | "ADA" => "ADA",
        "DOGECOIN" | "DOGE" => "DOGE",
        "POLKADOT" | "DOT" => "DOT",
        "AVALANCHE-2" | "AVAX" => "AVAX",
        "CHAINLINK" | "LINK" => "LINK",
        "UNISWAP" | "UNI" => "UNI",
        "LITECOIN" | "LTC" => "LTC",
        "SHIBA-INU" | "SHIB" => "SHIB",
        "MATIC-NETWORK" | "MATIC" | "POL" => "POL",
        "COSMOS" | "ATOM" => "ATOM",
        "NEAR" => "NEAR",
        "ARBITRUM" | "ARB" => "ARB",
        "OPTIMISM" | "OP" => "OP",
        "APTOS" | "APT" => "APT",
        "SUI" => "SUI",
        "PEPE" => "PEPE",
        other if !other.is_empty() && other.chars().all(|c| c.is_ascii_alphanumeric()) => {
            return Some(format!("{}USDT", other));
        }
        _ => {
            return None;
        }
    };
    Some(format!("{}USDT", base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_to_binance_pair() {
        assert_eq!(asset_to_binance_pair("bitcoin").as_deref(), Some("BTCUSDT"));
        assert_eq!(asset_to_binance_pair("ETH").as_deref(), Some("ETHUSDT"));
        assert_eq!(asset_to_binance_pair("avalanche-2").as_deref(), Some("AVAXUSDT"));
        assert_eq!(asset_to_binance_pair("inj").as_deref(), Some("INJUSDT"));
        assert_eq!(asset_to_binance_pair("not a coin"), None);
        assert_eq!(asset_to_binance_pair(""), None);
    }

    #[test]
    fn test_parse_candle() {
        let row: KlineRow = serde_json
            ::from_str(
                r#"[1700000000000,"100.0","110.0","95.0","105.0","12.5",1700000299999,"1312.5",42,"6.0","630.0","0"]"#
            )
            .unwrap();
        let candle = parse_candle(&row).unwrap();
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.high, 110.0);
        assert_eq!(candle.low, 95.0);
        assert_eq!(candle.quote_volume, 1312.5);

        let short: KlineRow = serde_json::from_str(r#"[1700000000000,"100.0"]"#).unwrap();
        assert!(parse_candle(&short).is_none());
    }

    #[test]
    fn test_kline_interval_covers_window() {
        for window in [TimeWindow::OneHour, TimeWindow::OneDay, TimeWindow::ThirtyDays] {
            let (interval, limit) = kline_interval(window);
            assert!(!interval.is_empty());
            assert!(limit > 0);
        }
        assert_eq!(kline_interval(TimeWindow::SevenDays), ("4h", 42));
    }
}
