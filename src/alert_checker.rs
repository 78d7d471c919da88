use std::path::PathBuf;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;

use chrono::{ DateTime, Utc };
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{ interval, Duration, MissedTickBehavior };

use crate::error::{ AppError, Result };
use crate::services::{ NotificationDispatcher, RuleRepository, RuleSetEvaluator };

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Counts from one evaluation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub evaluated: usize,
    pub fired: usize,
    pub dispatched: usize,
    pub grouped: usize,
    pub skipped: usize,
    /// Set when firing state could not be written back. Firings are still
    /// dispatched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_back_error: Option<String>,
}

/// Clears the in-progress flag when a cycle finishes or is dropped mid-flight.
struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Periodic driver: load rules, evaluate, write back firing state, dispatch.
pub struct AlertChecker {
    repository: Arc<dyn RuleRepository>,
    evaluator: RuleSetEvaluator,
    dispatcher: NotificationDispatcher,
    check_interval: Duration,
    history_file: Option<PathBuf>,
    in_progress: AtomicBool,
}

impl AlertChecker {
    pub fn new(
        repository: Arc<dyn RuleRepository>,
        evaluator: RuleSetEvaluator,
        dispatcher: NotificationDispatcher
    ) -> Self {
        Self {
            repository,
            evaluator,
            dispatcher,
            check_interval: DEFAULT_CHECK_INTERVAL,
            history_file: None,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn with_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Where the notification history is flushed on shutdown.
    pub fn with_history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_file = Some(path.into());
        self
    }

    pub fn is_running_cycle(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Run one cycle at `now`. Fails with `CycleInProgress` instead of
    /// overlapping a cycle that is still running.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleSummary> {
        let Some(_guard) = CycleGuard::acquire(&self.in_progress) else {
            return Err(AppError::CycleInProgress);
        };

        let mut rules = self.repository.list_rules().await?;
        let report = self.evaluator.run_cycle(&mut rules, now).await;

        let fired: Vec<_> = report.firings
            .iter()
            .map(|f| f.rule.clone())
            .collect();
        let mut summary = CycleSummary {
            evaluated: report.evaluated,
            fired: report.firings.len(),
            skipped: report.skipped.len(),
            ..Default::default()
        };

        if let Err(e) = self.repository.record_triggers(&fired).await {
            tracing::error!(error = %e, fired = fired.len(), "Failed to write back firing state");
            summary.write_back_error = Some(e.to_string());
        }

        for firing in &report.firings {
            if self.dispatcher.dispatch(firing, now).await.is_grouped() {
                summary.grouped += 1;
            } else {
                summary.dispatched += 1;
            }
        }

        tracing::debug!(
            evaluated = summary.evaluated,
            fired = summary.fired,
            dispatched = summary.dispatched,
            grouped = summary.grouped,
            skipped = summary.skipped,
            "Alert cycle finished"
        );
        Ok(summary)
    }

    /// Tick every `check_interval` until `shutdown` flips to true (or its
    /// sender goes away), then flush the notification history.
    pub async fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.check_interval.as_secs(), "Alert checker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                result = self.run_cycle(Utc::now()) => {
                    match result {
                        Ok(_) => {}
                        Err(AppError::CycleInProgress) => {
                            tracing::debug!("Previous cycle still running, skipping tick");
                        }
                        Err(e) => tracing::error!(error = %e, "Alert cycle failed"),
                    }
                }
                _ = shutdown.changed() => {
                    tracing::warn!("Shutdown during alert cycle, abandoning it");
                    break;
                }
            }
        }

        if let Err(e) = self.flush_history().await {
            tracing::error!(error = %e, "Failed to flush notification history");
        }
        tracing::info!("Alert checker stopped");
    }

    /// Write the in-memory history to the configured file, if any.
    pub async fn flush_history(&self) -> Result<()> {
        let Some(path) = &self.history_file else {
            return Ok(());
        };
        let history = self.dispatcher.history();
        let history = history.read().await;
        history.save_to(path).await?;
        tracing::info!(path = %path.display(), events = history.len(), "Flushed notification history");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelRegistry;
    use crate::enums::{ AlertKind, Operator };
    use crate::providers::{ InMemoryMarketData, MarketSnapshot };
    use crate::rules::{ AlertRule, Condition };
    use crate::services::{ InMemoryRuleRepository, NotificationHistoryStore };
    use tokio::sync::RwLock;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    async fn checker() -> (AlertChecker, Arc<InMemoryRuleRepository>, Arc<InMemoryMarketData>) {
        let data = Arc::new(InMemoryMarketData::new());
        data.set_snapshot(MarketSnapshot::new("bitcoin", 51_000.0)).await;

        let repo = Arc::new(InMemoryRuleRepository::new());
        let history = Arc::new(RwLock::new(NotificationHistoryStore::default()));
        let checker = AlertChecker::new(
            repo.clone(),
            RuleSetEvaluator::new(data.clone()),
            NotificationDispatcher::new(history, ChannelRegistry::new())
        );
        (checker, repo, data)
    }

    fn btc_above(threshold: f64) -> AlertRule {
        AlertRule::new("u", "BTC", AlertKind::AbsolutePrice, "bitcoin").with_condition(
            Condition::new(Operator::Above, threshold)
        )
    }

    #[tokio::test]
    async fn test_cycle_writes_back_and_groups() {
        let (checker, repo, _) = checker().await;
        let rule = repo.create_rule(btc_above(50_000.0)).await.unwrap();

        let first = checker.run_cycle(at(0)).await.unwrap();
        assert_eq!(first, CycleSummary {
            evaluated: 1,
            fired: 1,
            dispatched: 1,
            grouped: 0,
            skipped: 0,
            write_back_error: None,
        });

        let second = checker.run_cycle(at(30)).await.unwrap();
        assert_eq!(second.fired, 1);
        assert_eq!(second.grouped, 1);

        let stored = repo.get_rule(rule.id).await.unwrap();
        assert_eq!(stored.trigger_count(), 2);
        assert_eq!(stored.last_triggered_at(), Some(at(30)));
    }

    #[tokio::test]
    async fn test_firings_are_dispatched_when_write_back_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");

        let data = Arc::new(InMemoryMarketData::new());
        data.set_snapshot(MarketSnapshot::new("bitcoin", 51_000.0)).await;
        let repo = Arc::new(InMemoryRuleRepository::with_file(&path).await.unwrap());
        let rule = repo.create_rule(btc_above(50_000.0)).await.unwrap();
        let history = Arc::new(RwLock::new(NotificationHistoryStore::default()));
        let checker = AlertChecker::new(
            repo.clone(),
            RuleSetEvaluator::new(data),
            NotificationDispatcher::new(history.clone(), ChannelRegistry::new())
        );

        // The rules file can no longer be written.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let summary = checker.run_cycle(at(0)).await.unwrap();
        assert_eq!(summary.fired, 1);
        assert_eq!(summary.dispatched, 1);
        assert!(summary.write_back_error.is_some());

        let store = history.read().await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.events().next().unwrap().rule_id, rule.id);
        assert_eq!(repo.get_rule(rule.id).await.unwrap().trigger_count(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_rejected() {
        let (checker, _, _) = checker().await;
        let guard = CycleGuard::acquire(&checker.in_progress).unwrap();
        assert!(checker.is_running_cycle());
        assert!(matches!(checker.run_cycle(at(0)).await, Err(AppError::CycleInProgress)));

        drop(guard);
        assert!(!checker.is_running_cycle());
        assert!(checker.run_cycle(at(0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_asset_is_reported_as_skipped() {
        let (checker, repo, data) = checker().await;
        repo.create_rule(btc_above(1.0)).await.unwrap();
        data.mark_unavailable("bitcoin").await;

        let summary = checker.run_cycle(at(0)).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.fired, 0);
        assert!(repo.list_rules().await.unwrap()[0].is_eligible());
    }

    #[tokio::test]
    async fn test_start_flushes_history_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let (checker, repo, _) = checker().await;
        repo.create_rule(btc_above(1.0)).await.unwrap();
        let checker = Arc::new(checker.with_interval(Duration::from_millis(10)).with_history_file(&path));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(checker.clone().start(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let saved = NotificationHistoryStore::load_from(&path, 50).await.unwrap();
        assert_eq!(saved.len(), 1);
    }
}
