use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{ Deserialize, Serialize };

use crate::error::AppError;

// ─── AlertKind ───────────────────────────────────────────────────────

/// The kind of condition an alert rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    AbsolutePrice,
    PercentChange,
    NewAth,
    NewAtl,
    AbsoluteVolume,
    VolumeSpike,
    MarketCapChange,
    RankChange,
    PairRatio,
    Dominance,
    Composite,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self.condition_field() {
            Some(field) => field.as_str(),
            None => "composite",
        }
    }

    /// The single-condition field a simple kind evaluates. `None` for composite rules.
    pub fn condition_field(&self) -> Option<ConditionField> {
        match self {
            AlertKind::AbsolutePrice => Some(ConditionField::AbsolutePrice),
            AlertKind::PercentChange => Some(ConditionField::PercentChange),
            AlertKind::NewAth => Some(ConditionField::NewAth),
            AlertKind::NewAtl => Some(ConditionField::NewAtl),
            AlertKind::AbsoluteVolume => Some(ConditionField::AbsoluteVolume),
            AlertKind::VolumeSpike => Some(ConditionField::VolumeSpike),
            AlertKind::MarketCapChange => Some(ConditionField::MarketCapChange),
            AlertKind::RankChange => Some(ConditionField::RankChange),
            AlertKind::PairRatio => Some(ConditionField::PairRatio),
            AlertKind::Dominance => Some(ConditionField::Dominance),
            AlertKind::Composite => None,
        }
    }

    pub fn all() -> &'static [AlertKind] {
        &[
            AlertKind::AbsolutePrice,
            AlertKind::PercentChange,
            AlertKind::NewAth,
            AlertKind::NewAtl,
            AlertKind::AbsoluteVolume,
            AlertKind::VolumeSpike,
            AlertKind::MarketCapChange,
            AlertKind::RankChange,
            AlertKind::PairRatio,
            AlertKind::Dominance,
            AlertKind::Composite,
        ]
    }
}

impl From<ConditionField> for AlertKind {
    fn from(field: ConditionField) -> Self {
        match field {
            ConditionField::AbsolutePrice => AlertKind::AbsolutePrice,
            ConditionField::PercentChange => AlertKind::PercentChange,
            ConditionField::NewAth => AlertKind::NewAth,
            ConditionField::NewAtl => AlertKind::NewAtl,
            ConditionField::AbsoluteVolume => AlertKind::AbsoluteVolume,
            ConditionField::VolumeSpike => AlertKind::VolumeSpike,
            ConditionField::MarketCapChange => AlertKind::MarketCapChange,
            ConditionField::RankChange => AlertKind::RankChange,
            ConditionField::PairRatio => AlertKind::PairRatio,
            ConditionField::Dominance => AlertKind::Dominance,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("composite") {
            return Ok(AlertKind::Composite);
        }
        s.parse::<ConditionField>().map(AlertKind::from)
    }
}

// ─── ConditionField ──────────────────────────────────────────────────

/// What a single condition measures. Composite rules name one per sub-condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    AbsolutePrice,
    PercentChange,
    NewAth,
    NewAtl,
    AbsoluteVolume,
    VolumeSpike,
    MarketCapChange,
    RankChange,
    PairRatio,
    Dominance,
}

impl ConditionField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionField::AbsolutePrice => "absolute_price",
            ConditionField::PercentChange => "percent_change",
            ConditionField::NewAth => "new_ath",
            ConditionField::NewAtl => "new_atl",
            ConditionField::AbsoluteVolume => "absolute_volume",
            ConditionField::VolumeSpike => "volume_spike",
            ConditionField::MarketCapChange => "market_cap_change",
            ConditionField::RankChange => "rank_change",
            ConditionField::PairRatio => "pair_ratio",
            ConditionField::Dominance => "dominance",
        }
    }

    /// Whether evaluating this field needs a historical aggregate.
    pub fn needs_aggregate(&self) -> bool {
        matches!(
            self,
            ConditionField::PercentChange |
                ConditionField::NewAth |
                ConditionField::NewAtl |
                ConditionField::VolumeSpike |
                ConditionField::MarketCapChange |
                ConditionField::RankChange
        )
    }

    /// Operators accepted by this field. Empty when the operator is ignored.
    pub fn allowed_operators(&self) -> &'static [Operator] {
        match self {
            | ConditionField::AbsolutePrice
            | ConditionField::AbsoluteVolume
            | ConditionField::PairRatio
            | ConditionField::Dominance => &[Operator::Above, Operator::Below, Operator::Equals],
            ConditionField::PercentChange => &[Operator::IncreasesBy, Operator::DecreasesBy],
            | ConditionField::NewAth
            | ConditionField::NewAtl
            | ConditionField::VolumeSpike
            | ConditionField::MarketCapChange
            | ConditionField::RankChange => &[],
        }
    }

    /// Whether a condition on this field must carry a numeric value.
    pub fn requires_value(&self) -> bool {
        !matches!(self, ConditionField::NewAth | ConditionField::NewAtl | ConditionField::VolumeSpike)
    }
}

impl fmt::Display for ConditionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "absolute_price" | "price" => Ok(ConditionField::AbsolutePrice),
            "percent_change" | "percent" => Ok(ConditionField::PercentChange),
            "new_ath" | "ath" => Ok(ConditionField::NewAth),
            "new_atl" | "atl" => Ok(ConditionField::NewAtl),
            "absolute_volume" | "volume" => Ok(ConditionField::AbsoluteVolume),
            "volume_spike" => Ok(ConditionField::VolumeSpike),
            "market_cap_change" | "market_cap" => Ok(ConditionField::MarketCapChange),
            "rank_change" | "rank" => Ok(ConditionField::RankChange),
            "pair_ratio" | "ratio" => Ok(ConditionField::PairRatio),
            "dominance" => Ok(ConditionField::Dominance),
            _ => Err(AppError::InvalidInput(format!("Invalid alert kind: {}", s))),
        }
    }
}

// ─── Operator ────────────────────────────────────────────────────────

/// Comparison applied between a measured value and a condition's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Above,
    Below,
    Equals,
    IncreasesBy,
    DecreasesBy,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Above => "above",
            Operator::Below => "below",
            Operator::Equals => "equals",
            Operator::IncreasesBy => "increases_by",
            Operator::DecreasesBy => "decreases_by",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "above" => Ok(Operator::Above),
            "below" => Ok(Operator::Below),
            "equals" => Ok(Operator::Equals),
            "increases_by" => Ok(Operator::IncreasesBy),
            "decreases_by" => Ok(Operator::DecreasesBy),
            _ => Err(AppError::InvalidInput(format!(
                "Invalid operator: {}. Supported: above, below, equals, increases_by, decreases_by",
                s
            ))),
        }
    }
}

// ─── LogicalOperator ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

impl LogicalOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
            LogicalOperator::Not => "NOT",
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogicalOperator {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AND" => Ok(LogicalOperator::And),
            "OR" => Ok(LogicalOperator::Or),
            "NOT" => Ok(LogicalOperator::Not),
            _ => Err(AppError::InvalidInput(format!("Invalid logical operator: {}", s))),
        }
    }
}

// ─── TimeWindow ──────────────────────────────────────────────────────

/// Lookback window used to fetch a rule's historical aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TimeWindow {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[default]
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::OneHour => "1h",
            TimeWindow::FourHours => "4h",
            TimeWindow::OneDay => "24h",
            TimeWindow::SevenDays => "7d",
            TimeWindow::ThirtyDays => "30d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::OneHour => Duration::hours(1),
            TimeWindow::FourHours => Duration::hours(4),
            TimeWindow::OneDay => Duration::hours(24),
            TimeWindow::SevenDays => Duration::days(7),
            TimeWindow::ThirtyDays => Duration::days(30),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeWindow {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1h" => Ok(TimeWindow::OneHour),
            "4h" => Ok(TimeWindow::FourHours),
            "24h" | "1d" => Ok(TimeWindow::OneDay),
            "7d" => Ok(TimeWindow::SevenDays),
            "30d" => Ok(TimeWindow::ThirtyDays),
            _ => Err(AppError::InvalidInput(format!(
                "Invalid time window: {}. Supported: 1h, 4h, 24h, 7d, 30d",
                s
            ))),
        }
    }
}

// ─── Priority ────────────────────────────────────────────────────────

/// Presentation tier of a rule's notifications. Never gates dispatch.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Default
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Beep pattern played by the audible channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundPattern {
    pub beeps: u8,
    pub frequency_hz: u32,
    pub duration_ms: u32,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Priority::Low => "\u{1f535}", // 🔵
            Priority::Medium => "\u{1f7e1}", // 🟡
            Priority::High => "\u{1f7e0}", // 🟠
            Priority::Critical => "\u{1f534}", // 🔴
        }
    }

    pub fn sound_pattern(&self) -> SoundPattern {
        match self {
            Priority::Low => SoundPattern { beeps: 1, frequency_hz: 440, duration_ms: 150 },
            Priority::Medium => SoundPattern { beeps: 2, frequency_hz: 660, duration_ms: 150 },
            Priority::High => SoundPattern { beeps: 3, frequency_hz: 880, duration_ms: 200 },
            Priority::Critical => SoundPattern { beeps: 5, frequency_hz: 1000, duration_ms: 300 },
        }
    }

    /// Critical notifications stay on screen until dismissed.
    pub fn requires_interaction(&self) -> bool {
        matches!(self, Priority::Critical)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(AppError::InvalidInput(format!("Invalid priority: {}", s))),
        }
    }
}

// ─── ChannelKind ─────────────────────────────────────────────────────

/// Delivery mechanism a rule can fan out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Visual,
    Audible,
    System,
    History,
    Telegram,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Visual => "visual",
            ChannelKind::Audible => "audible",
            ChannelKind::System => "system",
            ChannelKind::History => "history",
            ChannelKind::Telegram => "telegram",
        }
    }

    pub fn all() -> &'static [ChannelKind] {
        &[
            ChannelKind::Visual,
            ChannelKind::Audible,
            ChannelKind::System,
            ChannelKind::History,
            ChannelKind::Telegram,
        ]
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "visual" | "toast" => Ok(ChannelKind::Visual),
            "audible" | "sound" => Ok(ChannelKind::Audible),
            "system" | "browser" => Ok(ChannelKind::System),
            "history" => Ok(ChannelKind::History),
            "telegram" => Ok(ChannelKind::Telegram),
            _ => Err(AppError::InvalidInput(format!("Invalid channel: {}", s))),
        }
    }
}
