use std::sync::Arc;

use chrono::{ DateTime, Duration, Utc };
use futures::future::join_all;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::channels::ChannelRegistry;
use crate::enums::ChannelKind;
use crate::providers::{ HistoricalAggregate, MarketSnapshot };
use crate::rules::condition::format_number;
use crate::rules::AlertRule;
use crate::services::evaluator::Firing;
use crate::services::history::{ NotificationEvent, NotificationHistoryStore };

pub const DEFAULT_GROUPING_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A new event was stored and sent to the rule's channels.
    Dispatched {
        event_id: Uuid,
        delivered: Vec<ChannelKind>,
        failed: Vec<ChannelKind>,
    },
    /// Folded into a live event; no channel was contacted.
    Grouped {
        event_id: Uuid,
        group_count: u32,
    },
}

impl DispatchOutcome {
    pub fn event_id(&self) -> Uuid {
        match self {
            DispatchOutcome::Dispatched { event_id, .. } => *event_id,
            DispatchOutcome::Grouped { event_id, .. } => *event_id,
        }
    }

    pub fn is_grouped(&self) -> bool {
        matches!(self, DispatchOutcome::Grouped { .. })
    }
}

/// Turns firings into stored, de-duplicated notifications and fans them out.
#[derive(Clone)]
pub struct NotificationDispatcher {
    history: Arc<RwLock<NotificationHistoryStore>>,
    channels: ChannelRegistry,
    grouping_window: Duration,
}

impl NotificationDispatcher {
    pub fn new(history: Arc<RwLock<NotificationHistoryStore>>, channels: ChannelRegistry) -> Self {
        Self {
            history,
            channels,
            grouping_window: Duration::seconds(DEFAULT_GROUPING_WINDOW_SECS),
        }
    }

    pub fn with_grouping_window(mut self, window: Duration) -> Self {
        self.grouping_window = window;
        self
    }

    pub fn history(&self) -> Arc<RwLock<NotificationHistoryStore>> {
        self.history.clone()
    }

    /// Dispatch one firing at `now`.
    ///
    /// A firing for a (rule, asset) pair that already has an event inside the
    /// grouping window only bumps that event's count. Otherwise the new event
    /// is appended to history before any channel is tried, so a failing
    /// channel cannot lose it.
    pub async fn dispatch(&self, firing: &Firing, now: DateTime<Utc>) -> DispatchOutcome {
        let rule = &firing.rule;

        let event = {
            let mut history = self.history.write().await;
            if
                let Some(live) = history.find_live_mut(
                    rule.id,
                    &rule.asset_id,
                    now,
                    self.grouping_window
                )
            {
                live.record_repeat(now, rule.current_value(&firing.snapshot));
                tracing::debug!(
                    rule_id = %rule.id,
                    event_id = %live.id,
                    group_count = live.group_count,
                    "Grouped repeat firing"
                );
                return DispatchOutcome::Grouped {
                    event_id: live.id,
                    group_count: live.group_count,
                };
            }

            let event = build_event(rule, &firing.snapshot, &firing.aggregate, now);
            history.push(event.clone());
            event
        };

        let (delivered, failed) = self.fan_out(&rule.channels, &event).await;
        tracing::info!(
            rule_id = %rule.id,
            event_id = %event.id,
            delivered = delivered.len(),
            failed = failed.len(),
            "Notification dispatched"
        );

        DispatchOutcome::Dispatched {
            event_id: event.id,
            delivered,
            failed,
        }
    }

    /// Send to every requested channel concurrently. Each channel's error is
    /// logged and reported, never propagated.
    async fn fan_out(
        &self,
        kinds: &[ChannelKind],
        event: &NotificationEvent
    ) -> (Vec<ChannelKind>, Vec<ChannelKind>) {
        let sends = kinds.iter().map(|&kind| async move {
            let Some(channel) = self.channels.get(kind) else {
                tracing::warn!(channel = %kind, event_id = %event.id, "No sink registered for channel");
                return (kind, false);
            };
            match channel.send(event).await {
                Ok(()) => (kind, true),
                Err(e) => {
                    tracing::warn!(channel = %kind, event_id = %event.id, error = %e, "Channel delivery failed");
                    (kind, false)
                }
            }
        });

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for (kind, ok) in join_all(sends).await {
            if ok {
                delivered.push(kind);
            } else {
                failed.push(kind);
            }
        }
        (delivered, failed)
    }
}

fn build_event(
    rule: &AlertRule,
    snapshot: &MarketSnapshot,
    aggregate: &HistoricalAggregate,
    now: DateTime<Utc>
) -> NotificationEvent {
    let (title, message) = format_notification(rule, snapshot, aggregate);
    NotificationEvent {
        id: Uuid::new_v4(),
        rule_id: rule.id,
        asset_id: rule.asset_id.clone(),
        symbol: rule.symbol().to_string(),
        kind: rule.kind,
        fired_at: now,
        title,
        message,
        priority: rule.priority,
        current_value: rule.current_value(snapshot),
        percent_change: aggregate.percent_change(snapshot.price),
        group_count: 1,
        grouped: false,
        read: false,
        require_interaction: rule.priority.requires_interaction(),
    }
}

/// Title is the priority icon and rule name. The message is the custom
/// template (or the rule description) followed by one line per known value.
pub fn format_notification(
    rule: &AlertRule,
    snapshot: &MarketSnapshot,
    aggregate: &HistoricalAggregate
) -> (String, String) {
    let title = format!("{} {}", rule.priority.icon(), rule.name);

    let headline = match &rule.custom_message {
        Some(template) if !template.trim().is_empty() => render_template(template, rule, snapshot),
        _ => rule.describe(),
    };

    let mut lines = vec![headline, format!("Current price: ${}", format_number(snapshot.price))];
    if let Some(change) = aggregate.percent_change(snapshot.price) {
        lines.push(format!("Change ({}): {:+.2}%", rule.time_window, change));
    }
    if let Some(volume) = snapshot.volume {
        lines.push(format!("Volume: ${}", format_number(volume)));
    }
    if let Some(market_cap) = snapshot.market_cap {
        lines.push(format!("Market cap: ${}", format_number(market_cap)));
    }
    if let Some(rank) = snapshot.rank {
        lines.push(format!("Rank: #{}", rank));
    }

    (title, lines.join("\n"))
}

/// Substitutes `{name}`, `{symbol}`, `{asset}`, `{price}` and `{value}`.
fn render_template(template: &str, rule: &AlertRule, snapshot: &MarketSnapshot) -> String {
    template
        .replace("{name}", &rule.name)
        .replace("{symbol}", rule.symbol())
        .replace("{asset}", &rule.asset_name)
        .replace("{price}", &format_number(snapshot.price))
        .replace("{value}", &format_number(rule.current_value(snapshot)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::tests::RecordingChannel;
    use crate::enums::{ AlertKind, Operator, Priority };
    use crate::rules::Condition;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn firing(rule: &AlertRule, price: f64) -> Firing {
        Firing {
            rule: rule.clone(),
            snapshot: MarketSnapshot::new(rule.asset_id.clone(), price),
            aggregate: HistoricalAggregate::default(),
        }
    }

    fn btc_rule() -> AlertRule {
        AlertRule::new("u", "BTC breakout", AlertKind::AbsolutePrice, "bitcoin")
            .with_asset_display("Bitcoin", "BTC")
            .with_condition(Condition::new(Operator::Above, 50_000.0))
            .with_channels(vec![ChannelKind::Visual, ChannelKind::History])
    }

    fn dispatcher(channels: ChannelRegistry) -> NotificationDispatcher {
        NotificationDispatcher::new(Arc::new(RwLock::new(NotificationHistoryStore::default())), channels)
    }

    #[tokio::test]
    async fn test_repeat_firings_inside_window_are_grouped() {
        let visual = RecordingChannel::new(ChannelKind::Visual);
        let history = RecordingChannel::new(ChannelKind::History);
        let dispatcher = dispatcher(ChannelRegistry::new().with(visual.clone()).with(history.clone()));
        let rule = btc_rule();

        let first = dispatcher.dispatch(&firing(&rule, 51_000.0), at(0)).await;
        assert!(!first.is_grouped());
        for (i, secs) in [10, 30, 59].iter().enumerate() {
            let outcome = dispatcher.dispatch(&firing(&rule, 51_000.0), at(*secs)).await;
            assert_eq!(outcome, DispatchOutcome::Grouped {
                event_id: first.event_id(),
                group_count: (i as u32) + 2,
            });
        }

        let store = dispatcher.history();
        let store = store.read().await;
        assert_eq!(store.len(), 1);
        let event = store.get(first.event_id()).unwrap();
        assert_eq!(event.group_count, 4);
        assert!(event.grouped);
        assert_eq!(event.fired_at, at(59));

        assert_eq!(visual.received.lock().await.len(), 1);
        assert_eq!(history.received.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_firing_after_window_creates_new_event() {
        let dispatcher = dispatcher(ChannelRegistry::new());
        let rule = btc_rule();

        let first = dispatcher.dispatch(&firing(&rule, 51_000.0), at(0)).await;
        let second = dispatcher.dispatch(&firing(&rule, 51_000.0), at(60)).await;
        assert!(!second.is_grouped());
        assert_ne!(first.event_id(), second.event_id());
        assert_eq!(dispatcher.history().read().await.len(), 2);
    }

    #[tokio::test]
    async fn test_grouping_is_per_rule_and_asset() {
        let dispatcher = dispatcher(ChannelRegistry::new());
        let a = btc_rule();
        let b = btc_rule();

        assert!(!dispatcher.dispatch(&firing(&a, 51_000.0), at(0)).await.is_grouped());
        assert!(!dispatcher.dispatch(&firing(&b, 51_000.0), at(1)).await.is_grouped());
        assert_eq!(dispatcher.history().read().await.len(), 2);
    }

    #[tokio::test]
    async fn test_channel_failure_is_isolated() {
        let visual = RecordingChannel::failing(ChannelKind::Visual);
        let history = RecordingChannel::new(ChannelKind::History);
        let dispatcher = dispatcher(ChannelRegistry::new().with(visual.clone()).with(history.clone()));
        let rule = btc_rule().with_channels(
            vec![ChannelKind::Visual, ChannelKind::History, ChannelKind::Telegram]
        );

        let outcome = dispatcher.dispatch(&firing(&rule, 51_000.0), at(0)).await;
        match outcome {
            DispatchOutcome::Dispatched { delivered, failed, .. } => {
                assert_eq!(delivered, vec![ChannelKind::History]);
                assert_eq!(failed, vec![ChannelKind::Visual, ChannelKind::Telegram]);
            }
            other => panic!("expected dispatch, got {:?}", other),
        }
        assert_eq!(visual.received.lock().await.len(), 1);
        assert_eq!(history.received.lock().await.len(), 1);
        assert_eq!(dispatcher.history().read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_critical_priority_requires_interaction() {
        let dispatcher = dispatcher(ChannelRegistry::new());
        let rule = btc_rule().with_priority(Priority::Critical);

        let outcome = dispatcher.dispatch(&firing(&rule, 51_000.0), at(0)).await;
        let store = dispatcher.history();
        let store = store.read().await;
        let event = store.get(outcome.event_id()).unwrap();
        assert!(event.require_interaction);
        assert_eq!(event.priority, Priority::Critical);
        assert!(event.title.starts_with(Priority::Critical.icon()));
    }

    #[test]
    fn test_message_includes_only_known_context() {
        let rule = btc_rule();
        let snapshot = MarketSnapshot::new("bitcoin", 51_000.0);
        let (title, message) = format_notification(&rule, &snapshot, &HistoricalAggregate::default());
        assert_eq!(title, format!("{} BTC breakout", Priority::Medium.icon()));
        assert_eq!(message, "BTC price above $50000\nCurrent price: $51000");

        let snapshot = snapshot.with_volume(1_500.0).with_rank(1);
        let aggregate = HistoricalAggregate { start_price: Some(50_000.0), ..Default::default() };
        let (_, message) = format_notification(&rule, &snapshot, &aggregate);
        assert_eq!(
            message,
            "BTC price above $50000\nCurrent price: $51000\nChange (24h): +2.00%\nVolume: $1500\nRank: #1"
        );
    }

    #[test]
    fn test_custom_template_replaces_description() {
        let rule = btc_rule().with_message("{symbol} hit {price} ({name})");
        let snapshot = MarketSnapshot::new("bitcoin", 51_000.0);
        let (_, message) = format_notification(&rule, &snapshot, &HistoricalAggregate::default());
        assert_eq!(message, "BTC hit 51000 (BTC breakout)\nCurrent price: $51000");
    }
}
