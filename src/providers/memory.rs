use std::collections::{ HashMap, HashSet };
use std::sync::atomic::{ AtomicUsize, Ordering };

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::enums::TimeWindow;
use crate::error::{ AppError, Result };
use crate::providers::market_data::{ HistoricalAggregate, MarketDataProvider, MarketSnapshot };

/// Market data held in memory and fed by the host (a websocket feed, a replay,
/// or a test fixture).
#[derive(Default)]
pub struct InMemoryMarketData {
    snapshots: RwLock<HashMap<String, MarketSnapshot>>,
    aggregates: RwLock<HashMap<(String, TimeWindow), HistoricalAggregate>>,
    unavailable: RwLock<HashSet<String>>,
    snapshot_fetches: AtomicUsize,
    aggregate_fetches: AtomicUsize,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_snapshot(&self, snapshot: MarketSnapshot) {
        self.snapshots.write().await.insert(snapshot.asset_id.clone(), snapshot);
    }

    pub async fn set_aggregate(&self, asset_id: &str, aggregate: HistoricalAggregate) {
        self.aggregates.write().await.insert((asset_id.to_string(), aggregate.window), aggregate);
    }

    /// Make every fetch for `asset_id` fail until `restore` is called.
    pub async fn mark_unavailable(&self, asset_id: &str) {
        self.unavailable.write().await.insert(asset_id.to_string());
    }

    pub async fn restore(&self, asset_id: &str) {
        self.unavailable.write().await.remove(asset_id);
    }

    pub fn snapshot_fetches(&self) -> usize {
        self.snapshot_fetches.load(Ordering::SeqCst)
    }

    pub fn aggregate_fetches(&self) -> usize {
        self.aggregate_fetches.load(Ordering::SeqCst)
    }

    async fn check_available(&self, asset_id: &str) -> Result<()> {
        if self.unavailable.read().await.contains(asset_id) {
            return Err(AppError::DataUnavailable(format!("{} is marked unavailable", asset_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataProvider for InMemoryMarketData {
    async fn get_snapshot(&self, asset_id: &str) -> Result<MarketSnapshot> {
        self.snapshot_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available(asset_id).await?;

        self.snapshots
            .read().await
            .get(asset_id)
            .cloned()
            .ok_or_else(|| AppError::DataUnavailable(format!("No snapshot for {}", asset_id)))
    }

    async fn get_aggregate(&self, asset_id: &str, window: TimeWindow) -> Result<HistoricalAggregate> {
        self.aggregate_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available(asset_id).await?;

        self.aggregates
            .read().await
            .get(&(asset_id.to_string(), window))
            .cloned()
            .ok_or_else(|| {
                AppError::DataUnavailable(format!("No {} aggregate for {}", window, asset_id))
            })
    }
}
