use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };

use crate::enums::TimeWindow;
use crate::error::Result;

/// Point-in-time market reading for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub asset_id: String,
    pub price: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub rank: Option<u32>,
    /// Market dominance in percent.
    #[serde(default)]
    pub dominance: Option<f64>,
    /// Precomputed pair ratio (e.g. ETH/BTC).
    #[serde(default)]
    pub ratio: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn new(asset_id: impl Into<String>, price: f64) -> Self {
        Self {
            asset_id: asset_id.into(),
            price,
            volume: None,
            market_cap: None,
            rank: None,
            dominance: None,
            ratio: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_market_cap(mut self, market_cap: f64) -> Self {
        self.market_cap = Some(market_cap);
        self
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn with_dominance(mut self, dominance: f64) -> Self {
        self.dominance = Some(dominance);
        self
    }

    pub fn with_ratio(mut self, ratio: f64) -> Self {
        self.ratio = Some(ratio);
        self
    }
}

/// Summary of an asset over a lookback window. Every field is optional:
/// a missing value means the provider could not supply it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalAggregate {
    #[serde(default)]
    pub window: TimeWindow,
    #[serde(default)]
    pub start_price: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    /// All-time high, not just the window's.
    #[serde(default)]
    pub ath_so_far: Option<f64>,
    /// All-time low, not just the window's.
    #[serde(default)]
    pub atl_so_far: Option<f64>,
    #[serde(default)]
    pub avg_volume: Option<f64>,
    #[serde(default)]
    pub start_market_cap: Option<f64>,
    #[serde(default)]
    pub start_rank: Option<u32>,
}

impl HistoricalAggregate {
    pub fn for_window(window: TimeWindow) -> Self {
        Self { window, ..Default::default() }
    }

    /// Percent move of `price` relative to the window's start price.
    pub fn percent_change(&self, price: f64) -> Option<f64> {
        match self.start_price {
            Some(start) if start != 0.0 => Some(((price - start) / start) * 100.0),
            _ => None,
        }
    }
}

/// Source of market data consumed by the evaluator. The engine never fetches
/// data any other way.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Current reading for an asset. Fails with `AppError::DataUnavailable`.
    async fn get_snapshot(&self, asset_id: &str) -> Result<MarketSnapshot>;

    /// Aggregate over `window`, including all-time extremes.
    async fn get_aggregate(&self, asset_id: &str, window: TimeWindow) -> Result<HistoricalAggregate>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_change_requires_start_price() {
        let aggregate = HistoricalAggregate::default();
        assert_eq!(aggregate.percent_change(100.0), None);

        let aggregate = HistoricalAggregate { start_price: Some(0.0), ..Default::default() };
        assert_eq!(aggregate.percent_change(100.0), None);

        let aggregate = HistoricalAggregate { start_price: Some(100.0), ..Default::default() };
        let percent = aggregate.percent_change(88.0).unwrap();
        assert!((percent + 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_deserializes_with_only_price() {
        let snapshot: MarketSnapshot = serde_json
            ::from_str(r#"{"asset_id":"bitcoin","price":50123.0,"fetched_at":"2026-01-01T00:00:00Z"}"#)
            .unwrap();
        assert_eq!(snapshot.price, 50123.0);
        assert!(snapshot.volume.is_none());
        assert!(snapshot.rank.is_none());
    }
}
