use serde::{ Deserialize, Serialize };

use crate::enums::{ ConditionField, Operator, TimeWindow };
use crate::providers::{ HistoricalAggregate, MarketSnapshot };

/// Spike multiplier used when a volume-spike condition carries no value.
pub const DEFAULT_SPIKE_MULTIPLIER: f64 = 3.0;

/// Relative tolerance for the `equals` operator (0.1%).
pub const EQUALS_TOLERANCE: f64 = 0.001;

/// A single comparison. `field` is implied by the rule kind for simple rules and
/// required on every sub-condition of a composite rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<ConditionField>,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default)]
    pub value: Option<f64>,
}

impl Condition {
    pub fn new(operator: Operator, value: f64) -> Self {
        Self { field: None, operator, value: Some(value) }
    }

    pub fn on(field: ConditionField, operator: Operator, value: f64) -> Self {
        Self { field: Some(field), operator, value: Some(value) }
    }

    /// A condition with no threshold, for kinds that don't need one.
    pub fn bare(field: ConditionField) -> Self {
        Self { field: Some(field), ..Default::default() }
    }
}

/// Outcome of assessing a rule or condition. Only `Fired` means the rule fires;
/// the other variants keep "no data" apart from "not met" in diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Fired,
    NotMet,
    /// Rule is inactive or paused.
    Inactive,
    CoolingDown {
        remaining_secs: i64,
    },
    /// A required input was absent from the snapshot or aggregate.
    MissingData(&'static str),
    Misconfigured(String),
}

impl Evaluation {
    pub fn is_fired(&self) -> bool {
        matches!(self, Evaluation::Fired)
    }

    fn from_bool(hit: bool) -> Self {
        if hit { Evaluation::Fired } else { Evaluation::NotMet }
    }
}

/// Evaluate one condition against a snapshot and aggregate. Stateless, shared
/// by simple rules and every composite sub-condition.
pub fn evaluate_condition(
    field: ConditionField,
    condition: &Condition,
    snapshot: &MarketSnapshot,
    aggregate: &HistoricalAggregate
) -> Evaluation {
    match field {
        ConditionField::AbsolutePrice => compare(Some(snapshot.price), condition, "price"),
        ConditionField::PercentChange => percent_change(condition, snapshot, aggregate),
        ConditionField::NewAth => new_ath(snapshot, aggregate),
        ConditionField::NewAtl => new_atl(snapshot, aggregate),
        ConditionField::AbsoluteVolume => compare(snapshot.volume, condition, "volume"),
        ConditionField::VolumeSpike => volume_spike(condition, snapshot, aggregate),
        ConditionField::MarketCapChange => market_cap_change(condition, snapshot, aggregate),
        ConditionField::RankChange => rank_change(condition, snapshot, aggregate),
        ConditionField::PairRatio => compare(snapshot.ratio, condition, "ratio"),
        ConditionField::Dominance => compare(snapshot.dominance, condition, "dominance"),
    }
}

fn threshold(condition: &Condition) -> Result<f64, Evaluation> {
    match condition.value {
        Some(v) if v.is_finite() => Ok(v),
        Some(_) => Err(Evaluation::Misconfigured("threshold is not a finite number".to_string())),
        None => Err(Evaluation::Misconfigured("threshold is required".to_string())),
    }
}

fn compare(value: Option<f64>, condition: &Condition, name: &'static str) -> Evaluation {
    let Some(value) = value else {
        return Evaluation::MissingData(name);
    };
    let target = match threshold(condition) {
        Ok(t) => t,
        Err(e) => {
            return e;
        }
    };

    match condition.operator {
        Operator::Above => Evaluation::from_bool(value >= target),
        Operator::Below => Evaluation::from_bool(value <= target),
        Operator::Equals => Evaluation::from_bool(
            (value - target).abs() <= target.abs() * EQUALS_TOLERANCE
        ),
        other => Evaluation::Misconfigured(format!("operator {} does not apply to {}", other, name)),
    }
}

fn percent_change(
    condition: &Condition,
    snapshot: &MarketSnapshot,
    aggregate: &HistoricalAggregate
) -> Evaluation {
    let target = match threshold(condition) {
        Ok(t) => t,
        Err(e) => {
            return e;
        }
    };
    let Some(percent) = aggregate.percent_change(snapshot.price) else {
        return Evaluation::MissingData("start_price");
    };

    match condition.operator {
        Operator::IncreasesBy => Evaluation::from_bool(percent >= target),
        Operator::DecreasesBy => Evaluation::from_bool(percent <= -target),
        other => Evaluation::Misconfigured(format!("operator {} does not apply to percent_change", other)),
    }
}

fn new_ath(snapshot: &MarketSnapshot, aggregate: &HistoricalAggregate) -> Evaluation {
    match aggregate.ath_so_far {
        Some(ath) => Evaluation::from_bool(snapshot.price >= ath),
        None => Evaluation::MissingData("ath_so_far"),
    }
}

fn new_atl(snapshot: &MarketSnapshot, aggregate: &HistoricalAggregate) -> Evaluation {
    match aggregate.atl_so_far {
        Some(atl) => Evaluation::from_bool(snapshot.price <= atl),
        None => Evaluation::MissingData("atl_so_far"),
    }
}

fn volume_spike(
    condition: &Condition,
    snapshot: &MarketSnapshot,
    aggregate: &HistoricalAggregate
) -> Evaluation {
    let multiplier = match condition.value {
        None => DEFAULT_SPIKE_MULTIPLIER,
        Some(v) if v.is_finite() && v > 0.0 => v,
        Some(_) => {
            return Evaluation::Misconfigured(
                "spike multiplier must be a positive finite number".to_string()
            );
        }
    };
    let Some(volume) = snapshot.volume else {
        return Evaluation::MissingData("volume");
    };
    match aggregate.avg_volume {
        Some(avg) if avg > 0.0 => Evaluation::from_bool(volume / avg >= multiplier),
        _ => Evaluation::MissingData("avg_volume"),
    }
}

fn market_cap_change(
    condition: &Condition,
    snapshot: &MarketSnapshot,
    aggregate: &HistoricalAggregate
) -> Evaluation {
    let target = match threshold(condition) {
        Ok(t) => t,
        Err(e) => {
            return e;
        }
    };
    let Some(market_cap) = snapshot.market_cap else {
        return Evaluation::MissingData("market_cap");
    };
    match aggregate.start_market_cap {
        Some(start) if start != 0.0 => {
            let percent = ((market_cap - start) / start) * 100.0;
            Evaluation::from_bool(percent.abs() >= target)
        }
        _ => Evaluation::MissingData("start_market_cap"),
    }
}

fn rank_change(
    condition: &Condition,
    snapshot: &MarketSnapshot,
    aggregate: &HistoricalAggregate
) -> Evaluation {
    let target = match threshold(condition) {
        Ok(t) => t,
        Err(e) => {
            return e;
        }
    };
    let Some(rank) = snapshot.rank else {
        return Evaluation::MissingData("rank");
    };
    let Some(start_rank) = aggregate.start_rank else {
        return Evaluation::MissingData("start_rank");
    };
    let moved = ((rank as i64) - (start_rank as i64)).abs() as f64;
    Evaluation::from_bool(moved >= target)
}

/// The snapshot value a field reports on, used for notification payloads.
pub fn measured_value(field: ConditionField, snapshot: &MarketSnapshot) -> Option<f64> {
    match field {
        | ConditionField::AbsolutePrice
        | ConditionField::PercentChange
        | ConditionField::NewAth
        | ConditionField::NewAtl => Some(snapshot.price),
        ConditionField::AbsoluteVolume | ConditionField::VolumeSpike => snapshot.volume,
        ConditionField::MarketCapChange => snapshot.market_cap,
        ConditionField::RankChange => snapshot.rank.map(f64::from),
        ConditionField::PairRatio => snapshot.ratio,
        ConditionField::Dominance => snapshot.dominance,
    }
}

/// Human-readable sentence for a condition, e.g. "BTC price above $50000".
pub fn describe_condition(
    field: ConditionField,
    condition: &Condition,
    symbol: &str,
    window: TimeWindow
) -> String {
    let op = condition.operator.as_str().replace('_', " ");
    let value = condition.value.map(format_number).unwrap_or_else(|| "?".to_string());

    match field {
        ConditionField::AbsolutePrice => format!("{} price {} ${}", symbol, op, value),
        ConditionField::PercentChange => format!("{} {} {}% in {}", symbol, op, value, window),
        ConditionField::NewAth => format!("{} reaches a new all-time high", symbol),
        ConditionField::NewAtl => format!("{} reaches a new all-time low", symbol),
        ConditionField::AbsoluteVolume => format!("{} volume {} ${}", symbol, op, value),
        ConditionField::VolumeSpike => {
            let multiplier = condition.value.unwrap_or(DEFAULT_SPIKE_MULTIPLIER);
            format!("{} volume reaches {}x the {} average", symbol, format_number(multiplier), window)
        }
        ConditionField::MarketCapChange => {
            format!("{} market cap moves {}% in {}", symbol, value, window)
        }
        ConditionField::RankChange => format!("{} rank moves {} places in {}", symbol, value, window),
        ConditionField::PairRatio => format!("{} ratio {} {}", symbol, op, value),
        ConditionField::Dominance => format!("{} dominance {} {}%", symbol, op, value),
    }
}

/// Drop trailing zeros so 50000.0 reads as "50000" and 0.25 stays "0.25".
pub fn format_number(value: f64) -> String {
    let text = format!("{:.8}", value);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" { "0".to_string() } else { trimmed.to_string() }
}
