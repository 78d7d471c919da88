use std::collections::HashSet;

use chrono::{ DateTime, Duration, Utc };
use serde::{ Deserialize, Serialize };
use uuid::Uuid;

use crate::enums::{ AlertKind, ChannelKind, ConditionField, LogicalOperator, Priority, TimeWindow };
use crate::error::{ AppError, Result };
use crate::providers::{ HistoricalAggregate, MarketSnapshot };
use crate::rules::condition::{
    describe_condition,
    evaluate_condition,
    measured_value,
    Condition,
    Evaluation,
};

/// Cooldowns are clamped to a century.
const MAX_COOLDOWN_SECS: u64 = 100 * 365 * 24 * 3600;

fn default_true() -> bool {
    true
}

/// A user-configured alert condition bound to one asset.
///
/// Firing state (`trigger_count`, `last_triggered_at`) and the pause flag are
/// only changed through [`trigger_at`](Self::trigger_at), [`reset`](Self::reset),
/// [`pause`](Self::pause) and [`resume`](Self::resume).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub kind: AlertKind,
    pub asset_id: String,
    #[serde(default)]
    pub asset_name: String,
    #[serde(default)]
    pub asset_symbol: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_operator: Option<LogicalOperator>,
    #[serde(default)]
    pub time_window: TimeWindow,
    #[serde(default)]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub channels: Vec<ChannelKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message: Option<String>,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    paused: bool,
    #[serde(default)]
    trigger_count: u64,
    #[serde(default)]
    last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        kind: AlertKind,
        asset_id: impl Into<String>
    ) -> Self {
        let asset_id = asset_id.into();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            name: name.into(),
            kind,
            asset_name: asset_id.clone(),
            asset_symbol: asset_id.to_uppercase(),
            asset_id,
            conditions: Vec::new(),
            logical_operator: None,
            time_window: TimeWindow::default(),
            cooldown_secs: 0,
            priority: Priority::default(),
            channels: vec![ChannelKind::Visual],
            custom_message: None,
            active: true,
            paused: false,
            trigger_count: 0,
            last_triggered_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_asset_display(mut self, name: impl Into<String>, symbol: impl Into<String>) -> Self {
        self.asset_name = name.into();
        self.asset_symbol = symbol.into();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_logic(mut self, logic: LogicalOperator) -> Self {
        self.logical_operator = Some(logic);
        self
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.time_window = window;
        self
    }

    pub fn with_cooldown(mut self, cooldown_secs: u64) -> Self {
        self.cooldown_secs = cooldown_secs;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_channels(mut self, channels: Vec<ChannelKind>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.custom_message = Some(message.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Active and not paused.
    pub fn is_eligible(&self) -> bool {
        self.active && !self.paused
    }

    pub fn trigger_count(&self) -> u64 {
        self.trigger_count
    }

    pub fn last_triggered_at(&self) -> Option<DateTime<Utc>> {
        self.last_triggered_at
    }

    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs.min(MAX_COOLDOWN_SECS) as i64)
    }

    /// Whether the rule needs a historical aggregate to evaluate.
    pub fn needs_aggregate(&self) -> bool {
        match self.kind.condition_field() {
            Some(field) => field.needs_aggregate(),
            None => self.conditions
                .iter()
                .any(|c| c.field.map(|f| f.needs_aggregate()).unwrap_or(false)),
        }
    }

    /// Evaluate against the wall clock.
    pub fn evaluate(&self, snapshot: &MarketSnapshot, aggregate: &HistoricalAggregate) -> bool {
        self.evaluate_at(snapshot, aggregate, Utc::now())
    }

    pub fn evaluate_at(
        &self,
        snapshot: &MarketSnapshot,
        aggregate: &HistoricalAggregate,
        now: DateTime<Utc>
    ) -> bool {
        self.assess(snapshot, aggregate, now).is_fired()
    }

    /// Full evaluation outcome, including why a rule did not fire.
    pub fn assess(
        &self,
        snapshot: &MarketSnapshot,
        aggregate: &HistoricalAggregate,
        now: DateTime<Utc>
    ) -> Evaluation {
        if !self.is_eligible() {
            return Evaluation::Inactive;
        }

        if let Some(last) = self.last_triggered_at {
            let elapsed = now - last;
            if elapsed < self.cooldown() {
                return Evaluation::CoolingDown {
                    remaining_secs: (self.cooldown() - elapsed).num_seconds(),
                };
            }
        }

        self.assess_condition(snapshot, aggregate)
    }

    /// The condition alone, ignoring active/paused/cooldown state.
    pub fn assess_condition(
        &self,
        snapshot: &MarketSnapshot,
        aggregate: &HistoricalAggregate
    ) -> Evaluation {
        match self.kind.condition_field() {
            Some(field) => {
                let fallback = Condition::default();
                let condition = self.conditions.first().unwrap_or(&fallback);
                evaluate_condition(field, condition, snapshot, aggregate)
            }
            None => self.assess_composite(snapshot, aggregate),
        }
    }

    fn assess_composite(
        &self,
        snapshot: &MarketSnapshot,
        aggregate: &HistoricalAggregate
    ) -> Evaluation {
        let Some(logic) = self.logical_operator else {
            return Evaluation::Misconfigured("composite rule has no logical operator".to_string());
        };
        if self.conditions.is_empty() {
            return Evaluation::Misconfigured("composite rule has no sub-conditions".to_string());
        }
        if logic == LogicalOperator::Not && self.conditions.len() != 1 {
            return Evaluation::Misconfigured(
                "NOT takes exactly one sub-condition".to_string()
            );
        }

        let mut results = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            let result = match condition.field {
                Some(field) => evaluate_condition(field, condition, snapshot, aggregate),
                None => Evaluation::Misconfigured("sub-condition has no field".to_string()),
            };
            if let Evaluation::Misconfigured(_) = result {
                return result;
            }
            results.push(result);
        }

        let missing = || {
            results
                .iter()
                .find(|r| matches!(r, Evaluation::MissingData(_)))
                .cloned()
                .unwrap_or(Evaluation::NotMet)
        };

        match logic {
            LogicalOperator::And => {
                if results.iter().all(Evaluation::is_fired) {
                    Evaluation::Fired
                } else if results.iter().any(|r| *r == Evaluation::NotMet) {
                    Evaluation::NotMet
                } else {
                    missing()
                }
            }
            LogicalOperator::Or => {
                if results.iter().any(Evaluation::is_fired) {
                    Evaluation::Fired
                } else if results.iter().any(|r| *r == Evaluation::NotMet) {
                    Evaluation::NotMet
                } else {
                    missing()
                }
            }
            LogicalOperator::Not =>
                match &results[0] {
                    Evaluation::Fired => Evaluation::NotMet,
                    Evaluation::NotMet => Evaluation::Fired,
                    other => other.clone(),
                }
        }
    }

    /// Record a firing at the current time.
    pub fn trigger(&mut self) {
        self.trigger_at(Utc::now());
    }

    /// Record a firing. `last_triggered_at` never moves backwards.
    pub fn trigger_at(&mut self, now: DateTime<Utc>) {
        self.trigger_count += 1;
        self.last_triggered_at = Some(match self.last_triggered_at {
            Some(last) if last > now => last,
            _ => now,
        });
    }

    /// Clear firing state without touching `active`/`paused`.
    pub fn reset(&mut self) {
        self.trigger_count = 0;
        self.last_triggered_at = None;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Value reported in notifications: price for price kinds, volume for
    /// volume kinds, and so on.
    pub fn current_value(&self, snapshot: &MarketSnapshot) -> f64 {
        let field = self.kind
            .condition_field()
            .or_else(|| self.conditions.first().and_then(|c| c.field));
        field.and_then(|f| measured_value(f, snapshot)).unwrap_or(snapshot.price)
    }

    pub fn symbol(&self) -> &str {
        if self.asset_symbol.is_empty() { &self.asset_id } else { &self.asset_symbol }
    }

    /// Human-readable description of what the rule watches.
    pub fn describe(&self) -> String {
        let symbol = self.symbol();
        match self.kind.condition_field() {
            Some(field) => {
                let fallback = Condition::default();
                let condition = self.conditions.first().unwrap_or(&fallback);
                describe_condition(field, condition, symbol, self.time_window)
            }
            None => {
                let parts: Vec<String> = self.conditions
                    .iter()
                    .filter_map(|c| {
                        c.field.map(|f| describe_condition(f, c, symbol, self.time_window))
                    })
                    .collect();
                match self.logical_operator {
                    Some(LogicalOperator::Not) => format!("NOT ({})", parts.join(", ")),
                    Some(logic) => parts.join(&format!(" {} ", logic)),
                    None => parts.join(", "),
                }
            }
        }
    }

    /// Reject configurations that could never evaluate.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(AppError::InvalidRuleConfiguration(msg));

        if self.asset_id.trim().is_empty() {
            return invalid("asset id must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return invalid("rule name must not be empty".to_string());
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel) {
                return invalid(format!("channel {} listed twice", channel));
            }
        }

        match self.kind.condition_field() {
            Some(field) => {
                let fallback = Condition::default();
                let condition = self.conditions.first().unwrap_or(&fallback);
                if let Some(other) = condition.field {
                    if other != field {
                        return invalid(format!("condition field {} does not match kind {}", other, self.kind));
                    }
                }
                validate_condition(field, condition)
            }
            None => {
                let Some(logic) = self.logical_operator else {
                    return invalid("composite rule needs a logical operator".to_string());
                };
                if self.conditions.is_empty() {
                    return invalid("composite rule needs at least one sub-condition".to_string());
                }
                if logic == LogicalOperator::Not && self.conditions.len() != 1 {
                    return invalid(
                        format!(
                            "NOT takes exactly one sub-condition, got {}",
                            self.conditions.len()
                        )
                    );
                }
                for condition in &self.conditions {
                    let Some(field) = condition.field else {
                        return invalid("every composite sub-condition needs a field".to_string());
                    };
                    validate_condition(field, condition)?;
                }
                Ok(())
            }
        }
    }
}

fn validate_condition(field: ConditionField, condition: &Condition) -> Result<()> {
    let allowed = field.allowed_operators();
    if !allowed.is_empty() && !allowed.contains(&condition.operator) {
        return Err(
            AppError::InvalidRuleConfiguration(
                format!("operator {} does not apply to {}", condition.operator, field)
            )
        );
    }

    match condition.value {
        Some(v) if !v.is_finite() => {
            Err(AppError::InvalidRuleConfiguration(format!("{} value must be finite", field)))
        }
        Some(v) if v <= 0.0 && field == ConditionField::VolumeSpike => {
            Err(AppError::InvalidRuleConfiguration("spike multiplier must be positive".to_string()))
        }
        None if field.requires_value() => {
            Err(AppError::InvalidRuleConfiguration(format!("{} needs a threshold", field)))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::Operator;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn price_rule(operator: Operator, threshold: f64) -> AlertRule {
        AlertRule::new("user-1", "BTC watch", AlertKind::AbsolutePrice, "bitcoin")
            .with_asset_display("Bitcoin", "BTC")
            .with_condition(Condition::new(operator, threshold))
    }

    #[test]
    fn test_absolute_price_above_scenario() {
        let rule = price_rule(Operator::Above, 50_000.0);
        let snapshot = MarketSnapshot::new("bitcoin", 50_123.0);
        assert!(rule.evaluate(&snapshot, &HistoricalAggregate::default()));
    }

    #[test]
    fn test_paused_or_inactive_rule_never_fires() {
        let snapshot = MarketSnapshot::new("bitcoin", 60_000.0);
        let aggregate = HistoricalAggregate::default();

        let mut rule = price_rule(Operator::Above, 50_000.0);
        rule.pause();
        assert_eq!(rule.assess(&snapshot, &aggregate, at(0)), Evaluation::Inactive);
        rule.resume();
        assert!(rule.evaluate_at(&snapshot, &aggregate, at(0)));

        rule.deactivate();
        assert!(!rule.evaluate_at(&snapshot, &aggregate, at(0)));
        rule.activate();
        assert!(rule.evaluate_at(&snapshot, &aggregate, at(0)));
    }

    #[test]
    fn test_cooldown_suppression_scenario() {
        let mut rule = price_rule(Operator::Above, 50_000.0).with_cooldown(300);
        let snapshot = MarketSnapshot::new("bitcoin", 51_000.0);
        let aggregate = HistoricalAggregate::default();

        assert!(rule.evaluate_at(&snapshot, &aggregate, at(0)));
        rule.trigger_at(at(0));

        assert!(!rule.evaluate_at(&snapshot, &aggregate, at(60)));
        assert!(matches!(rule.assess(&snapshot, &aggregate, at(60)), Evaluation::CoolingDown {
            remaining_secs: 240,
        }));
        assert!(!rule.evaluate_at(&snapshot, &aggregate, at(299)));
        assert!(rule.evaluate_at(&snapshot, &aggregate, at(300)));
        assert!(rule.evaluate_at(&snapshot, &aggregate, at(301)));
    }

    #[test]
    fn test_trigger_counts_and_never_moves_backwards() {
        let mut rule = price_rule(Operator::Above, 1.0);
        rule.trigger_at(at(100));
        rule.trigger_at(at(50));
        assert_eq!(rule.trigger_count(), 2);
        assert_eq!(rule.last_triggered_at(), Some(at(100)));

        rule.pause();
        rule.reset();
        assert_eq!(rule.trigger_count(), 0);
        assert_eq!(rule.last_triggered_at(), None);
        assert!(rule.is_paused());
        assert!(rule.is_active());
    }

    #[test]
    fn test_percent_change_decrease_scenario() {
        let rule = AlertRule::new("u", "Drop", AlertKind::PercentChange, "bitcoin").with_condition(
            Condition::new(Operator::DecreasesBy, 10.0)
        );
        let aggregate = HistoricalAggregate { start_price: Some(100.0), ..Default::default() };
        assert!(rule.evaluate(&MarketSnapshot::new("bitcoin", 88.0), &aggregate));
    }

    #[test]
    fn test_volume_spike_without_conditions_uses_default_multiplier() {
        let rule = AlertRule::new("u", "Spike", AlertKind::VolumeSpike, "bitcoin");
        let aggregate = HistoricalAggregate { avg_volume: Some(1_000.0), ..Default::default() };

        let quiet = MarketSnapshot::new("bitcoin", 1.0).with_volume(2_500.0);
        let busy = MarketSnapshot::new("bitcoin", 1.0).with_volume(3_500.0);
        assert!(!rule.evaluate(&quiet, &aggregate));
        assert!(rule.evaluate(&busy, &aggregate));
        assert!(rule.validate().is_ok());
    }

    fn composite(logic: LogicalOperator, conditions: Vec<Condition>) -> AlertRule {
        let mut rule = AlertRule::new("u", "Combo", AlertKind::Composite, "bitcoin").with_logic(logic);
        rule.conditions = conditions;
        rule
    }

    #[test]
    fn test_composite_and_or() {
        let price = Condition::on(ConditionField::AbsolutePrice, Operator::Above, 50_000.0);
        let volume = Condition::on(ConditionField::AbsoluteVolume, Operator::Above, 1_000_000.0);
        let aggregate = HistoricalAggregate::default();

        let both = MarketSnapshot::new("bitcoin", 51_000.0).with_volume(2_000_000.0);
        let price_only = MarketSnapshot::new("bitcoin", 51_000.0).with_volume(10.0);
        let neither = MarketSnapshot::new("bitcoin", 40_000.0).with_volume(10.0);

        let and = composite(LogicalOperator::And, vec![price.clone(), volume.clone()]);
        assert!(and.evaluate(&both, &aggregate));
        assert!(!and.evaluate(&price_only, &aggregate));
        assert!(!and.evaluate(&neither, &aggregate));

        let or = composite(LogicalOperator::Or, vec![price, volume]);
        assert!(or.evaluate(&both, &aggregate));
        assert!(or.evaluate(&price_only, &aggregate));
        assert!(!or.evaluate(&neither, &aggregate));
    }

    #[test]
    fn test_composite_not_requires_single_condition() {
        let price = Condition::on(ConditionField::AbsolutePrice, Operator::Above, 50_000.0);
        let aggregate = HistoricalAggregate::default();
        let low = MarketSnapshot::new("bitcoin", 40_000.0);

        let not = composite(LogicalOperator::Not, vec![price.clone()]);
        assert!(not.evaluate(&low, &aggregate));
        assert!(not.validate().is_ok());

        let two = composite(LogicalOperator::Not, vec![price.clone(), price]);
        assert!(!two.evaluate(&low, &aggregate));
        assert!(matches!(two.validate(), Err(AppError::InvalidRuleConfiguration(_))));
    }

    #[test]
    fn test_composite_not_does_not_fire_on_missing_data() {
        let volume = Condition::on(ConditionField::AbsoluteVolume, Operator::Above, 10.0);
        let rule = composite(LogicalOperator::Not, vec![volume]);
        let snapshot = MarketSnapshot::new("bitcoin", 1.0);
        assert_eq!(
            rule.assess(&snapshot, &HistoricalAggregate::default(), at(0)),
            Evaluation::MissingData("volume")
        );
    }

    #[test]
    fn test_missing_data_is_distinguishable_from_not_met() {
        let rule = AlertRule::new("u", "Move", AlertKind::PercentChange, "bitcoin").with_condition(
            Condition::new(Operator::IncreasesBy, 5.0)
        );
        let snapshot = MarketSnapshot::new("bitcoin", 100.0);
        assert_eq!(
            rule.assess(&snapshot, &HistoricalAggregate::default(), at(0)),
            Evaluation::MissingData("start_price")
        );
        let flat = HistoricalAggregate { start_price: Some(100.0), ..Default::default() };
        assert_eq!(rule.assess(&snapshot, &flat, at(0)), Evaluation::NotMet);
    }

    #[test]
    fn test_validate_rejects_bad_configurations() {
        let no_threshold = AlertRule::new("u", "x", AlertKind::AbsolutePrice, "bitcoin");
        assert!(no_threshold.validate().is_err());

        let wrong_operator = AlertRule::new("u", "x", AlertKind::PercentChange, "bitcoin").with_condition(
            Condition::new(Operator::Above, 5.0)
        );
        assert!(wrong_operator.validate().is_err());

        let duplicate_channels = price_rule(Operator::Above, 1.0).with_channels(
            vec![ChannelKind::Visual, ChannelKind::Visual]
        );
        assert!(duplicate_channels.validate().is_err());

        let no_logic = AlertRule::new("u", "x", AlertKind::Composite, "bitcoin").with_condition(
            Condition::on(ConditionField::AbsolutePrice, Operator::Above, 1.0)
        );
        assert!(no_logic.validate().is_err());

        let fieldless = composite(LogicalOperator::And, vec![Condition::new(Operator::Above, 1.0)]);
        assert!(fieldless.validate().is_err());

        assert!(price_rule(Operator::Below, 30_000.0).validate().is_ok());
    }

    #[test]
    fn test_describe_and_current_value() {
        let rule = price_rule(Operator::Above, 50_000.0);
        assert_eq!(rule.describe(), "BTC price above $50000");

        let volume_rule = AlertRule::new("u", "Vol", AlertKind::AbsoluteVolume, "bitcoin").with_condition(
            Condition::new(Operator::Above, 10.0)
        );
        let snapshot = MarketSnapshot::new("bitcoin", 50_000.0).with_volume(1_234.0);
        assert_eq!(volume_rule.current_value(&snapshot), 1_234.0);
        assert_eq!(rule.current_value(&snapshot), 50_000.0);

        let combo = composite(
            LogicalOperator::And,
            vec![
                Condition::on(ConditionField::AbsolutePrice, Operator::Above, 1.0),
                Condition::bare(ConditionField::NewAth)
            ]
        );
        assert_eq!(combo.describe(), "BITCOIN price above $1 AND BITCOIN reaches a new all-time high");
    }

    #[test]
    fn test_rule_round_trips_through_json_with_state() {
        let mut rule = price_rule(Operator::Above, 1.0).with_cooldown(60);
        rule.trigger_at(at(10));
        rule.pause();

        let json = serde_json::to_string(&rule).unwrap();
        let restored: AlertRule = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, rule);
        assert_eq!(restored.trigger_count(), 1);
        assert!(restored.is_paused());
    }
}
