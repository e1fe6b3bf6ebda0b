use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw value of a single factor as entered by the input provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Flag(bool),
    Number(f64),
    Level(String),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Flag(true) => f.write_str("yes"),
            RawValue::Flag(false) => f.write_str("no"),
            RawValue::Number(value) => write!(f, "{value}"),
            RawValue::Level(level) => f.write_str(level),
        }
    }
}

/// Point-in-time attribute snapshot of one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSignal {
    pub identifier: String,
    /// NaN when not reported; serialized as `null`.
    #[serde(with = "missing_number", default = "missing_number::missing")]
    pub attendance_percentage: f64,
    #[serde(with = "missing_number", default = "missing_number::missing")]
    pub academic_score: f64,
    #[serde(default)]
    pub category_factors: BTreeMap<String, BTreeMap<String, RawValue>>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

/// Core values are plain `f64`s where NaN marks a missing reading. JSON has
/// no NaN, so missing values travel as `null`.
mod missing_number {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn missing() -> f64 {
        f64::NAN
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_some(value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

impl StudentSignal {
    pub fn new(
        identifier: impl Into<String>,
        attendance_percentage: f64,
        academic_score: f64,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            attendance_percentage,
            academic_score,
            category_factors: BTreeMap::new(),
            flags: BTreeMap::new(),
        }
    }

    pub fn with_factor(
        mut self,
        category: impl Into<String>,
        factor: impl Into<String>,
        value: RawValue,
    ) -> Self {
        self.category_factors
            .entry(category.into())
            .or_default()
            .insert(factor.into(), value);
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into(), true);
        self
    }

    pub fn is_flag_set(&self, flag: &str) -> bool {
        self.flags.get(flag).copied().unwrap_or(false)
    }

    pub fn has_active_flags(&self) -> bool {
        self.flags.values().any(|active| *active)
    }
}

/// One factor converted to a unitless risk contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFactor {
    pub name: String,
    pub label: String,
    pub category: String,
    pub weight: f64,
    pub bonus: Option<f64>,
    /// In [0, 1]; 0.0 when the raw value is missing.
    pub contribution: f64,
    pub raw: Option<RawValue>,
}

impl NormalizedFactor {
    pub fn is_present(&self) -> bool {
        self.raw.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub label: String,
    pub sub_score: f64,
    /// Sorted by contribution, highest first.
    pub factors: Vec<NormalizedFactor>,
}

impl CategoryScore {
    pub fn top_factor(&self) -> Option<&NormalizedFactor> {
        self.factors
            .iter()
            .find(|factor| factor.is_present() && factor.contribution > 0.0)
    }
}

/// Fixed points a high-impact factor added on top of the weighted blend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedBonus {
    pub factor: String,
    pub label: String,
    pub category: String,
    pub points: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [
        RiskTier::Low,
        RiskTier::Medium,
        RiskTier::High,
        RiskTier::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "Low",
            RiskTier::Medium => "Medium",
            RiskTier::High => "High",
            RiskTier::Critical => "Critical",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of a threshold a raw value fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Below,
    Above,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::Below => f.write_str("below"),
            Comparison::Above => f.write_str("above"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorRef {
    pub name: String,
    pub label: String,
    pub raw: RawValue,
}

/// Structured explanation of a classification. `Display` renders the
/// default English sentence; presentation layers may render their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reason {
    Flag {
        flag: String,
        label: String,
        minimum_tier: Option<RiskTier>,
    },
    Threshold {
        factor: String,
        label: String,
        value: f64,
        comparison: Comparison,
        limit: f64,
        minimum_tier: RiskTier,
    },
    Category {
        category: String,
        label: String,
        sub_score: f64,
        top_factor: Option<FactorRef>,
    },
    HighImpact {
        factor: String,
        label: String,
        points: f64,
    },
    MainDriver {
        category: String,
        label: String,
        sub_score: f64,
    },
    NoSignificantRisk,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Flag {
                label,
                minimum_tier: Some(tier),
                ..
            } => write!(f, "{label}: special-case override forces at least {tier} risk."),
            Reason::Flag {
                label,
                minimum_tier: None,
                ..
            } => write!(f, "{label} is on record."),
            Reason::Threshold {
                label,
                value,
                comparison,
                limit,
                minimum_tier,
                ..
            } => write!(
                f,
                "{label} is {value} ({comparison} {limit}): \
                 override forces at least {minimum_tier} risk."
            ),
            Reason::Category {
                label,
                sub_score,
                top_factor: Some(top),
                ..
            } => write!(
                f,
                "{label} risk is {sub_score:.0}/100, led by {} ({}).",
                top.label, top.raw
            ),
            Reason::Category {
                label,
                sub_score,
                top_factor: None,
                ..
            } => write!(f, "{label} risk is {sub_score:.0}/100."),
            Reason::HighImpact { label, points, .. } => {
                write!(f, "{label} adds {points:.0} points to the composite score.")
            }
            Reason::MainDriver {
                label, sub_score, ..
            } => write!(
                f,
                "Composite score is driven mainly by {label} ({sub_score:.0}/100)."
            ),
            Reason::NoSignificantRisk => f.write_str("No significant risk factors detected."),
        }
    }
}

/// What produced a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Flag { flag: String },
    Category { category: String, factor: Option<String> },
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub category: String,
    /// 1 is the highest priority.
    pub priority: u32,
    pub rationale: String,
    pub trigger: Trigger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskResult {
    pub identifier: String,
    pub composite_score: f64,
    pub tier: RiskTier,
    pub reasons: Vec<Reason>,
    pub category_scores: Vec<CategoryScore>,
    pub recommendations: Vec<Recommendation>,
    pub computed_at: DateTime<Utc>,
}

impl RiskResult {
    pub fn reason_texts(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }
}

/// Per-tier counts. Merging is plain addition, so partial counts from any
/// number of workers can be combined in any order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

impl TierCounts {
    pub fn record(&mut self, tier: RiskTier) {
        match tier {
            RiskTier::Low => self.low += 1,
            RiskTier::Medium => self.medium += 1,
            RiskTier::High => self.high += 1,
            RiskTier::Critical => self.critical += 1,
        }
    }

    pub fn get(&self, tier: RiskTier) -> usize {
        match tier {
            RiskTier::Low => self.low,
            RiskTier::Medium => self.medium,
            RiskTier::High => self.high,
            RiskTier::Critical => self.critical,
        }
    }

    pub fn total(&self) -> usize {
        self.low + self.medium + self.high + self.critical
    }

    pub fn merge(self, other: TierCounts) -> TierCounts {
        TierCounts {
            low: self.low + other.low,
            medium: self.medium + other.medium,
            high: self.high + other.high,
            critical: self.critical + other.critical,
        }
    }
}

/// Population-level pressure on one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: String,
    pub label: String,
    pub average_sub_score: f64,
    pub notable_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationFailure {
    pub identifier: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    /// Successful results in input order.
    pub results: Vec<RiskResult>,
    pub tier_counts: TierCounts,
    /// Results at or above the alert tier, highest score first.
    pub critical_alerts: Vec<RiskResult>,
    pub errors: Vec<EvaluationFailure>,
    pub alert_threshold: RiskTier,
    pub generated_at: DateTime<Utc>,
}

impl AggregateReport {
    pub fn average_score(&self) -> f64 {
        if self.results.is_empty() {
            0.0
        } else {
            self.results.iter().map(|r| r.composite_score).sum::<f64>() / self.results.len() as f64
        }
    }

    /// Share of evaluated students at High or above, as a percentage.
    pub fn high_or_above_percentage(&self) -> f64 {
        let total = self.tier_counts.total();
        if total == 0 {
            0.0
        } else {
            (self.tier_counts.high + self.tier_counts.critical) as f64 / total as f64 * 100.0
        }
    }
}
