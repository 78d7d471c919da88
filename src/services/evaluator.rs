use std::collections::{ HashMap, HashSet };
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{ DateTime, Utc };
use futures::future::join_all;
use uuid::Uuid;

use crate::enums::TimeWindow;
use crate::error::{ AppError, Result };
use crate::providers::{ HistoricalAggregate, MarketDataProvider, MarketSnapshot };
use crate::rules::{ AlertRule, Evaluation };

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A rule that fired this cycle, with the data it fired on. `rule` reflects
/// the state after `trigger_at`.
#[derive(Debug, Clone)]
pub struct Firing {
    pub rule: AlertRule,
    pub snapshot: MarketSnapshot,
    pub aggregate: HistoricalAggregate,
}

/// A rule that could not be evaluated this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRule {
    pub rule_id: Uuid,
    pub asset_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Rules whose condition was actually assessed.
    pub evaluated: usize,
    pub firings: Vec<Firing>,
    pub skipped: Vec<SkippedRule>,
}

/// Drives one evaluation cycle: a parallel fetch phase over distinct assets,
/// then a sequential evaluate phase in rule order.
#[derive(Clone)]
pub struct RuleSetEvaluator {
    provider: Arc<dyn MarketDataProvider>,
    fetch_timeout: Duration,
}

impl RuleSetEvaluator {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            provider,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Evaluate every eligible rule at `now` and trigger the ones that fire.
    ///
    /// All assessments happen before any `trigger_at`, so no rule observes
    /// another rule's firing from the same cycle.
    pub async fn run_cycle(&self, rules: &mut [AlertRule], now: DateTime<Utc>) -> CycleReport {
        let eligible: Vec<usize> = rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_eligible())
            .map(|(i, _)| i)
            .collect();

        let mut assets: Vec<String> = Vec::new();
        let mut windows: Vec<(String, TimeWindow)> = Vec::new();
        {
            let mut seen_assets = HashSet::new();
            let mut seen_windows = HashSet::new();
            for &i in &eligible {
                let rule = &rules[i];
                if seen_assets.insert(rule.asset_id.clone()) {
                    assets.push(rule.asset_id.clone());
                }
                let key = (rule.asset_id.clone(), rule.time_window);
                if seen_windows.insert(key.clone()) {
                    windows.push(key);
                }
            }
        }

        let (snapshots, aggregates) = self.fetch_all(&assets, &windows).await;

        let mut report = CycleReport::default();
        let mut fired: Vec<(usize, MarketSnapshot, HistoricalAggregate)> = Vec::new();

        for &i in &eligible {
            let rule = &rules[i];

            let snapshot = match snapshots.get(&rule.asset_id) {
                Some(Ok(snapshot)) => snapshot,
                Some(Err(e)) => {
                    report.skipped.push(skip(rule, e.to_string()));
                    continue;
                }
                None => {
                    report.skipped.push(skip(rule, "snapshot was not fetched".to_string()));
                    continue;
                }
            };

            let key = (rule.asset_id.clone(), rule.time_window);
            let aggregate = match aggregates.get(&key) {
                Some(Ok(aggregate)) => aggregate.clone(),
                Some(Err(e)) if rule.needs_aggregate() => {
                    report.skipped.push(skip(rule, e.to_string()));
                    continue;
                }
                _ => HistoricalAggregate::for_window(rule.time_window),
            };

            report.evaluated += 1;
            match rule.assess(snapshot, &aggregate, now) {
                Evaluation::Fired => {
                    tracing::info!(rule_id = %rule.id, asset = %rule.asset_id, kind = %rule.kind, "Rule fired");
                    fired.push((i, snapshot.clone(), aggregate));
                }
                Evaluation::NotMet => {
                    tracing::trace!(rule_id = %rule.id, "Condition not met");
                }
                Evaluation::CoolingDown { remaining_secs } => {
                    tracing::debug!(rule_id = %rule.id, remaining_secs, "Rule cooling down");
                }
                Evaluation::MissingData(field) => {
                    tracing::debug!(rule_id = %rule.id, asset = %rule.asset_id, field, "No usable data for rule");
                }
                Evaluation::Misconfigured(reason) => {
                    tracing::warn!(rule_id = %rule.id, %reason, "Rule is misconfigured");
                }
                Evaluation::Inactive => {}
            }
        }

        for (i, snapshot, aggregate) in fired {
            let rule = &mut rules[i];
            rule.trigger_at(now);
            report.firings.push(Firing {
                rule: rule.clone(),
                snapshot,
                aggregate,
            });
        }

        for skipped in &report.skipped {
            tracing::warn!(rule_id = %skipped.rule_id, asset = %skipped.asset_id, reason = %skipped.reason, "Rule skipped this cycle");
        }

        report
    }

    /// Fetch each distinct snapshot and aggregate exactly once, concurrently.
    async fn fetch_all(
        &self,
        assets: &[String],
        windows: &[(String, TimeWindow)]
    ) -> (
        HashMap<String, Result<MarketSnapshot>>,
        HashMap<(String, TimeWindow), Result<HistoricalAggregate>>,
    ) {
        let snapshot_futures = assets.iter().map(|asset| async move {
            let result = self.bounded(self.provider.get_snapshot(asset)).await;
            (asset.clone(), result)
        });
        let aggregate_futures = windows.iter().map(|(asset, window)| async move {
            let result = self.bounded(self.provider.get_aggregate(asset, *window)).await;
            ((asset.clone(), *window), result)
        });

        let (snapshots, aggregates) = futures::join!(
            join_all(snapshot_futures),
            join_all(aggregate_futures)
        );

        (snapshots.into_iter().collect(), aggregates.into_iter().collect())
    }

    async fn bounded<T>(&self, fetch: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => {
                Err(
                    AppError::DataUnavailable(
                        format!("fetch timed out after {}s", self.fetch_timeout.as_secs_f64())
                    )
                )
            }
        }
    }
}

fn skip(rule: &AlertRule, reason: String) -> SkippedRule {
    SkippedRule {
        rule_id: rule.id,
        asset_id: rule.asset_id.clone(),
        reason,
    }
}
