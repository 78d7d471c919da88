use std::sync::Arc;

use chrono::{ DateTime, Duration, Utc };
use proptest::prelude::*;
use tokio::sync::RwLock;
use uuid::Uuid;

use crypto_alert_engine::channels::ChannelRegistry;
use crypto_alert_engine::enums::{ AlertKind, ChannelKind, ConditionField, LogicalOperator, Operator };
use crypto_alert_engine::providers::{ HistoricalAggregate, InMemoryMarketData, MarketSnapshot };
use crypto_alert_engine::rules::{ AlertRule, Condition };
use crypto_alert_engine::services::{
    Firing,
    InMemoryRuleRepository,
    NotificationDispatcher,
    NotificationEvent,
    NotificationHistoryStore,
    RuleRepository,
    RuleSetEvaluator,
};
use crypto_alert_engine::{ AlertChecker, Priority, TimeWindow };

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn price_rule(asset: &str, operator: Operator, threshold: f64) -> AlertRule {
    AlertRule::new("user-1", format!("{} {}", asset, operator), AlertKind::AbsolutePrice, asset)
        .with_condition(Condition::new(operator, threshold))
}

fn event(rule_id: Uuid, fired_at: DateTime<Utc>) -> NotificationEvent {
    NotificationEvent {
        id: Uuid::new_v4(),
        rule_id,
        asset_id: "bitcoin".to_string(),
        symbol: "BTC".to_string(),
        kind: AlertKind::AbsolutePrice,
        fired_at,
        title: "BTC".to_string(),
        message: "BTC price above $1".to_string(),
        priority: Priority::Low,
        current_value: 1.0,
        percent_change: None,
        group_count: 1,
        grouped: false,
        read: false,
        require_interaction: false,
    }
}

proptest! {
    #[test]
    fn cooldown_suppresses_until_it_elapses(cooldown in 1u64..10_000, offset in 0i64..20_000) {
        let mut rule = price_rule("bitcoin", Operator::Above, 1.0).with_cooldown(cooldown);
        let snapshot = MarketSnapshot::new("bitcoin", 10.0);
        let aggregate = HistoricalAggregate::default();

        rule.trigger_at(at(0));
        let fired = rule.evaluate_at(&snapshot, &aggregate, at(offset));
        prop_assert_eq!(fired, offset >= cooldown as i64);
    }

    #[test]
    fn history_keeps_the_most_recent_cap_entries(cap in 1usize..40, extra in 0usize..40) {
        let mut store = NotificationHistoryStore::new(cap);
        let mut ids = Vec::new();
        for i in 0..cap + extra {
            let e = event(Uuid::new_v4(), at(i as i64));
            ids.push(e.id);
            store.push(e);
        }

        prop_assert_eq!(store.len(), cap);
        let kept: Vec<Uuid> = store.events().map(|e| e.id).collect();
        let expected: Vec<Uuid> = ids.iter().rev().take(cap).copied().collect();
        prop_assert_eq!(kept, expected);
    }

    #[test]
    fn composite_and_or_match_their_parts(price in 0.0f64..100_000.0, volume in 0.0f64..10_000_000.0) {
        let by_price = Condition::on(ConditionField::AbsolutePrice, Operator::Above, 50_000.0);
        let by_volume = Condition::on(ConditionField::AbsoluteVolume, Operator::Above, 1_000_000.0);
        let snapshot = MarketSnapshot::new("bitcoin", price).with_volume(volume);
        let aggregate = HistoricalAggregate::default();

        let single = |c: &Condition| {
            let kind = AlertKind::from(c.field.unwrap());
            AlertRule::new("u", "part", kind, "bitcoin")
                .with_condition(Condition { field: None, ..c.clone() })
                .evaluate(&snapshot, &aggregate)
        };
        let p = single(&by_price);
        let v = single(&by_volume);

        let combo = |logic| {
            AlertRule::new("u", "combo", AlertKind::Composite, "bitcoin")
                .with_logic(logic)
                .with_condition(by_price.clone())
                .with_condition(by_volume.clone())
        };
        prop_assert_eq!(combo(LogicalOperator::And).evaluate(&snapshot, &aggregate), p && v);
        prop_assert_eq!(combo(LogicalOperator::Or).evaluate(&snapshot, &aggregate), p || v);
    }
}

#[tokio::test]
async fn grouping_collapses_n_firings_into_one_entry() {
    let history = Arc::new(RwLock::new(NotificationHistoryStore::default()));
    let dispatcher = NotificationDispatcher::new(history.clone(), ChannelRegistry::new());
    let rule = price_rule("bitcoin", Operator::Above, 1.0);

    let n = 7;
    for i in 0..n {
        let firing = Firing {
            rule: rule.clone(),
            snapshot: MarketSnapshot::new("bitcoin", 2.0),
            aggregate: HistoricalAggregate::default(),
        };
        dispatcher.dispatch(&firing, at(i * 5)).await;
    }

    let store = history.read().await;
    assert_eq!(store.len(), 1);
    let only = store.events().next().unwrap();
    assert_eq!(only.group_count, n as u32);
    assert!(only.grouped);
}

#[tokio::test]
async fn cooldown_scenario_across_cycles() {
    let data = Arc::new(InMemoryMarketData::new());
    data.set_snapshot(MarketSnapshot::new("bitcoin", 50_500.0)).await;

    let evaluator = RuleSetEvaluator::new(data);
    let mut rules = vec![price_rule("bitcoin", Operator::Above, 50_000.0).with_cooldown(300)];

    assert_eq!(evaluator.run_cycle(&mut rules, at(0)).await.firings.len(), 1);
    assert!(evaluator.run_cycle(&mut rules, at(60)).await.firings.is_empty());
    assert_eq!(evaluator.run_cycle(&mut rules, at(301)).await.firings.len(), 1);
}

#[tokio::test]
async fn end_to_end_cycle_with_mixed_rules() {
    let data = Arc::new(InMemoryMarketData::new());
    data.set_snapshot(MarketSnapshot::new("bitcoin", 88.0).with_volume(3_500.0)).await;
    data.set_snapshot(MarketSnapshot::new("ethereum", 3_000.0)).await;
    data.set_snapshot(MarketSnapshot::new("solana", 150.0)).await;
    data.set_aggregate("bitcoin", HistoricalAggregate {
        start_price: Some(100.0),
        avg_volume: Some(1_000.0),
        ..HistoricalAggregate::for_window(TimeWindow::OneDay)
    }).await;
    data.mark_unavailable("solana").await;

    let repo = Arc::new(InMemoryRuleRepository::new());
    let drop = repo.create_rule(
        AlertRule::new("u", "BTC drop", AlertKind::PercentChange, "bitcoin").with_condition(
            Condition::new(Operator::DecreasesBy, 10.0)
        )
    ).await.unwrap();
    let spike = repo.create_rule(
        AlertRule::new("u", "BTC spike", AlertKind::VolumeSpike, "bitcoin").with_channels(
            vec![ChannelKind::Visual, ChannelKind::Audible]
        )
    ).await.unwrap();
    let quiet = repo.create_rule(price_rule("ethereum", Operator::Above, 10_000.0)).await.unwrap();
    repo.create_rule(price_rule("solana", Operator::Above, 1.0)).await.unwrap();

    let history = Arc::new(RwLock::new(NotificationHistoryStore::default()));
    let checker = AlertChecker::new(
        repo.clone(),
        RuleSetEvaluator::new(data.clone()),
        NotificationDispatcher::new(history.clone(), ChannelRegistry::new()).with_grouping_window(
            Duration::seconds(60)
        )
    );

    let summary = checker.run_cycle(at(0)).await.unwrap();
    assert_eq!(summary.evaluated, 3);
    assert_eq!(summary.fired, 2);
    assert_eq!(summary.dispatched, 2);
    assert_eq!(summary.skipped, 1);

    // Each distinct asset is fetched once per cycle.
    assert_eq!(data.snapshot_fetches(), 3);

    assert_eq!(repo.get_rule(drop.id).await.unwrap().trigger_count(), 1);
    assert_eq!(repo.get_rule(spike.id).await.unwrap().trigger_count(), 1);
    assert_eq!(repo.get_rule(quiet.id).await.unwrap().trigger_count(), 0);

    let store = history.read().await;
    assert_eq!(store.len(), 2);
    assert_eq!(store.unread_count(), 2);
    let newest = store.events().next().unwrap();
    assert_eq!(newest.rule_id, spike.id);
    assert_eq!(newest.percent_change.map(|p| p.round()), Some(-12.0));
}
