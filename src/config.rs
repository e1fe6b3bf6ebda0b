//! Engine configuration: factor definitions, category weights, tier
//! boundaries and intervention catalogues.
//!
//! Everything here is data. A configuration is validated once when it is
//! loaded and is read-only afterwards; every scoring function takes the
//! piece it needs by reference.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::models::{Comparison, RiskTier};

const BUNDLED: &str = include_str!("../config/default.toml");
const WEIGHT_TOLERANCE: f64 = 1e-6;

pub const ATTENDANCE_FACTOR: &str = "attendance_percentage";
pub const ACADEMIC_FACTOR: &str = "academic_score";

/// How a raw value becomes a [0, 1] risk contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FactorKind {
    /// Higher raw value means lower risk (attendance, marks).
    Percentage { good: f64, bad: f64 },
    /// Higher raw value means higher risk (stress, work hours).
    InvertedPercentage { good: f64, bad: f64 },
    Boolean,
    /// Level name (case-insensitive) to contribution.
    Ordinal { levels: BTreeMap<String, f64> },
}

impl FactorKind {
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FactorKind::Percentage { .. } | FactorKind::InvertedPercentage { .. }
        )
    }

    pub fn expected_value(&self) -> &'static str {
        match self {
            FactorKind::Percentage { .. } | FactorKind::InvertedPercentage { .. } => "numeric",
            FactorKind::Boolean => "boolean",
            FactorKind::Ordinal { .. } => "level",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorDef {
    pub name: String,
    pub label: String,
    pub category: String,
    pub weight: f64,
    pub kind: FactorKind,
    /// Points added to the composite score when this boolean factor is set.
    #[serde(default)]
    pub bonus: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDef {
    pub name: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorConfig {
    pub factors: Vec<FactorDef>,
    #[serde(default)]
    pub flags: Vec<FlagDef>,
}

impl FactorConfig {
    pub fn factor(&self, name: &str) -> Option<&FactorDef> {
        self.factors.iter().find(|factor| factor.name == name)
    }

    pub fn flag(&self, name: &str) -> Option<&FlagDef> {
        self.flags.iter().find(|flag| flag.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for factor in &self.factors {
            if !seen.insert(factor.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    name: factor.name.clone(),
                });
            }
            if !factor.weight.is_finite() || factor.weight <= 0.0 {
                return Err(ConfigError::InvalidFactorWeight {
                    factor: factor.name.clone(),
                    weight: factor.weight,
                });
            }
            validate_kind(factor)?;
            if let Some(bonus) = factor.bonus {
                let boolean = matches!(factor.kind, FactorKind::Boolean);
                if !boolean || !bonus.is_finite() || bonus <= 0.0 {
                    return Err(ConfigError::InvalidBonus {
                        factor: factor.name.clone(),
                    });
                }
            }
        }

        for core in [ATTENDANCE_FACTOR, ACADEMIC_FACTOR] {
            match self.factor(core) {
                Some(def) if def.kind.is_numeric() => {}
                _ => {
                    return Err(ConfigError::MissingCoreFactor {
                        factor: core.to_string(),
                    })
                }
            }
        }

        let mut seen_flags = HashSet::new();
        for flag in &self.flags {
            if !seen_flags.insert(flag.name.as_str()) || seen.contains(flag.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    name: flag.name.clone(),
                });
            }
        }
        Ok(())
    }
}

fn validate_kind(factor: &FactorDef) -> Result<()> {
    match &factor.kind {
        FactorKind::Percentage { good, bad } => {
            if !good.is_finite() || !bad.is_finite() || good <= bad {
                return Err(ConfigError::InvalidThresholds {
                    factor: factor.name.clone(),
                    good: *good,
                    bad: *bad,
                });
            }
        }
        FactorKind::InvertedPercentage { good, bad } => {
            if !good.is_finite() || !bad.is_finite() || bad <= good {
                return Err(ConfigError::InvalidThresholds {
                    factor: factor.name.clone(),
                    good: *good,
                    bad: *bad,
                });
            }
        }
        FactorKind::Boolean => {}
        FactorKind::Ordinal { levels } => {
            if levels.is_empty() {
                return Err(ConfigError::InvalidOrdinalTable {
                    factor: factor.name.clone(),
                    detail: "no levels".to_string(),
                });
            }
            if let Some((level, value)) = levels
                .iter()
                .find(|(_, value)| !(0.0..=1.0).contains(*value))
            {
                return Err(ConfigError::InvalidOrdinalTable {
                    factor: factor.name.clone(),
                    detail: format!("level `{level}` maps to {value}, outside [0, 1]"),
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub name: String,
    pub label: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    pub categories: Vec<CategoryDef>,
}

impl WeightConfig {
    pub fn category(&self, name: &str) -> Option<&CategoryDef> {
        self.categories.iter().find(|category| category.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(ConfigError::NoCategories);
        }
        let mut seen = HashSet::new();
        for category in &self.categories {
            if !seen.insert(category.name.as_str()) {
                return Err(ConfigError::Duplicate {
                    name: category.name.clone(),
                });
            }
            if !category.weight.is_finite() || category.weight < 0.0 {
                return Err(ConfigError::InvalidCategoryWeight {
                    category: category.name.clone(),
                    weight: category.weight,
                });
            }
        }
        let sum: f64 = self.categories.iter().map(|category| category.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::WeightSum { sum });
        }
        Ok(())
    }
}

/// A flag that forces a minimum tier regardless of the composite score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierOverride {
    pub flag: String,
    pub minimum: RiskTier,
}

/// A bound on a numeric factor's raw value that forces a minimum tier, such
/// as attendance below 60. Exactly one of `below` and `above` is set; both
/// comparisons are strict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverride {
    pub factor: String,
    #[serde(default)]
    pub below: Option<f64>,
    #[serde(default)]
    pub above: Option<f64>,
    pub minimum: RiskTier,
}

impl ThresholdOverride {
    /// The bound `value` crosses, if any.
    pub fn crossed_by(&self, value: f64) -> Option<(Comparison, f64)> {
        match (self.below, self.above) {
            (Some(limit), _) if value < limit => Some((Comparison::Below, limit)),
            (_, Some(limit)) if value > limit => Some((Comparison::Above, limit)),
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        let detail = match (self.below, self.above) {
            (Some(limit), None) | (None, Some(limit)) if limit.is_finite() => return Ok(()),
            (Some(_), None) | (None, Some(_)) => "bound is not finite",
            (Some(_), Some(_)) => "set either `below` or `above`, not both",
            (None, None) => "needs a `below` or `above` bound",
        };
        Err(ConfigError::InvalidThresholdOverride {
            factor: self.factor.clone(),
            detail: detail.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Lowest score classified Medium.
    pub medium: f64,
    /// Lowest score classified High.
    pub high: f64,
    /// Lowest score classified Critical.
    pub critical: f64,
    /// Categories scoring strictly above this are explained and acted on.
    #[serde(default = "default_notable_threshold")]
    pub notable_threshold: f64,
    #[serde(default = "default_max_category_reasons")]
    pub max_category_reasons: usize,
    #[serde(default)]
    pub overrides: Vec<TierOverride>,
    #[serde(default)]
    pub thresholds: Vec<ThresholdOverride>,
}

fn default_notable_threshold() -> f64 {
    50.0
}

fn default_max_category_reasons() -> usize {
    3
}

impl TierConfig {
    pub fn validate(&self) -> Result<()> {
        let ordered = self.medium > 0.0
            && self.medium < self.high
            && self.high < self.critical
            && self.critical <= 100.0;
        if !ordered {
            return Err(ConfigError::NonMonotonicTiers {
                medium: self.medium,
                high: self.high,
                critical: self.critical,
            });
        }
        if !(0.0..=100.0).contains(&self.notable_threshold) {
            return Err(ConfigError::InvalidNotableThreshold(self.notable_threshold));
        }
        for rule in &self.thresholds {
            rule.validate()?;
        }
        Ok(())
    }

    /// Maps a score to exactly one tier. Bands are half-open: `[medium, high)`
    /// is Medium and so on.
    pub fn tier_for(&self, score: f64) -> RiskTier {
        if score >= self.critical {
            RiskTier::Critical
        } else if score >= self.high {
            RiskTier::High
        } else if score >= self.medium {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    pub fn minimum_for(&self, flag: &str) -> Option<RiskTier> {
        self.overrides
            .iter()
            .filter(|rule| rule.flag == flag)
            .map(|rule| rule.minimum)
            .max()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationTemplate {
    pub title: String,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRecommendation {
    pub flag: String,
    pub category: String,
    pub title: String,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecommendations {
    pub category: String,
    /// Best candidate first.
    pub candidates: Vec<RecommendationTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationConfig {
    #[serde(default)]
    pub flags: Vec<FlagRecommendation>,
    #[serde(default)]
    pub categories: Vec<CategoryRecommendations>,
    pub fallback: RecommendationTemplate,
}

impl RecommendationConfig {
    pub fn for_flag(&self, flag: &str) -> Option<&FlagRecommendation> {
        self.flags.iter().find(|rec| rec.flag == flag)
    }

    pub fn candidates(&self, category: &str) -> &[RecommendationTemplate] {
        self.categories
            .iter()
            .find(|entry| entry.category == category)
            .map(|entry| entry.candidates.as_slice())
            .unwrap_or(&[])
    }

    pub fn validate(&self) -> Result<()> {
        if self.fallback.title.trim().is_empty() {
            return Err(ConfigError::EmptyRecommendationTitle {
                scope: "fallback".to_string(),
            });
        }
        for rec in &self.flags {
            if rec.title.trim().is_empty() {
                return Err(ConfigError::EmptyRecommendationTitle {
                    scope: rec.flag.clone(),
                });
            }
        }
        for entry in &self.categories {
            if entry.candidates.iter().any(|c| c.title.trim().is_empty()) {
                return Err(ConfigError::EmptyRecommendationTitle {
                    scope: entry.category.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Results at or above this tier are reported as critical alerts.
    #[serde(default = "default_alert_threshold")]
    pub threshold: RiskTier,
    /// Upper bound on worker threads for parallel batches.
    #[serde(default)]
    pub workers: Option<usize>,
}

fn default_alert_threshold() -> RiskTier {
    RiskTier::High
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: default_alert_threshold(),
            workers: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(flatten)]
    pub weights: WeightConfig,
    #[serde(flatten)]
    pub factors: FactorConfig,
    pub tiers: TierConfig,
    pub recommendations: RecommendationConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

impl EngineConfig {
    /// The scheme shipped in `config/default.toml`.
    pub fn bundled() -> Result<Self> {
        Self::from_toml_str(BUNDLED)
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_toml_str(&input)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Loads `path` when given, the bundled scheme otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::bundled()?),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;
        self.factors.validate()?;
        self.tiers.validate()?;
        self.recommendations.validate()?;

        for factor in &self.factors.factors {
            if self.weights.category(&factor.category).is_none() {
                return Err(ConfigError::UndeclaredCategory {
                    factor: factor.name.clone(),
                    category: factor.category.clone(),
                });
            }
        }

        for rule in &self.tiers.overrides {
            if self.factors.flag(&rule.flag).is_none() {
                return Err(ConfigError::UndeclaredFlag {
                    source_name: "tiers.overrides".to_string(),
                    flag: rule.flag.clone(),
                });
            }
        }

        for rule in &self.tiers.thresholds {
            let detail = match self.factors.factor(&rule.factor) {
                Some(def) if def.kind.is_numeric() => continue,
                Some(_) => "factor is not numeric",
                None => "factor is not declared",
            };
            return Err(ConfigError::InvalidThresholdOverride {
                factor: rule.factor.clone(),
                detail: detail.to_string(),
            });
        }

        let mut recommended = HashSet::new();
        for rec in &self.recommendations.flags {
            if self.factors.flag(&rec.flag).is_none() {
                return Err(ConfigError::UndeclaredFlag {
                    source_name: "recommendations.flags".to_string(),
                    flag: rec.flag.clone(),
                });
            }
            if !recommended.insert(rec.flag.as_str()) {
                return Err(ConfigError::Duplicate {
                    name: rec.flag.clone(),
                });
            }
            if self.weights.category(&rec.category).is_none() {
                return Err(ConfigError::UndeclaredRecommendationCategory {
                    category: rec.category.clone(),
                });
            }
        }
        for flag in &self.factors.flags {
            if !recommended.contains(flag.name.as_str()) {
                return Err(ConfigError::FlagWithoutRecommendation {
                    flag: flag.name.clone(),
                });
            }
        }

        for entry in &self.recommendations.categories {
            if self.weights.category(&entry.category).is_none() {
                return Err(ConfigError::UndeclaredRecommendationCategory {
                    category: entry.category.clone(),
                });
            }
        }

        if self.alerts.workers == Some(0) {
            return Err(ConfigError::InvalidWorkerCount);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundled() -> EngineConfig {
        EngineConfig::bundled().unwrap()
    }

    #[test]
    fn bundled_config_is_valid() {
        let config = bundled();
        let sum: f64 = config.weights.categories.iter().map(|c| c.weight).sum();
        assert!((sum - 1.0).abs() < 1e-9, "weights should sum to 1.0");
        assert!(config.factors.factor(ATTENDANCE_FACTOR).is_some());
        assert!(config.factors.factor(ACADEMIC_FACTOR).is_some());
        assert_eq!(config.alerts.threshold, RiskTier::High);
    }

    #[test]
    fn rejects_weights_that_do_not_sum_to_one() {
        let mut config = bundled();
        config.weights.categories[0].weight += 0.1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WeightSum { .. })
        ));
    }

    #[test]
    fn rejects_non_increasing_tier_boundaries() {
        let mut config = bundled();
        config.tiers.high = config.tiers.medium;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonMonotonicTiers { .. })
        ));

        let mut config = bundled();
        config.tiers.critical = 120.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_factor_in_undeclared_category() {
        let mut config = bundled();
        config.factors.factors[0].category = "sports".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UndeclaredCategory { .. })
        ));
    }

    #[test]
    fn rejects_inverted_thresholds_on_percentage_factor() {
        let mut config = bundled();
        let factor = config
            .factors
            .factors
            .iter_mut()
            .find(|f| f.name == ATTENDANCE_FACTOR)
            .unwrap();
        factor.kind = FactorKind::Percentage {
            good: 50.0,
            bad: 90.0,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThresholds { .. })
        ));
    }

    #[test]
    fn rejects_bonus_on_non_boolean_factor() {
        let mut config = bundled();
        let factor = config
            .factors
            .factors
            .iter_mut()
            .find(|f| f.name == ACADEMIC_FACTOR)
            .unwrap();
        factor.bonus = Some(10.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBonus { .. })
        ));
    }

    #[test]
    fn rejects_missing_core_factor() {
        let mut config = bundled();
        config.factors.factors.retain(|f| f.name != ATTENDANCE_FACTOR);
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingCoreFactor {
                factor: ATTENDANCE_FACTOR.to_string()
            })
        );
    }

    #[test]
    fn every_flag_needs_a_dedicated_recommendation() {
        let mut config = bundled();
        config.factors.flags.push(FlagDef {
            name: "custody_change".to_string(),
            label: "Custody change".to_string(),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FlagWithoutRecommendation { .. })
        ));
    }

    #[test]
    fn overrides_must_reference_declared_flags() {
        let mut config = bundled();
        config.tiers.overrides.push(TierOverride {
            flag: "previous_dropuot".to_string(),
            minimum: RiskTier::High,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UndeclaredFlag { .. })
        ));
    }

    #[test]
    fn threshold_overrides_need_one_finite_bound_on_a_numeric_factor() {
        let rule = |factor: &str, below: Option<f64>, above: Option<f64>| ThresholdOverride {
            factor: factor.to_string(),
            below,
            above,
            minimum: RiskTier::High,
        };
        let cases = [
            rule(ATTENDANCE_FACTOR, Some(60.0), Some(95.0)),
            rule(ATTENDANCE_FACTOR, None, None),
            rule(ATTENDANCE_FACTOR, Some(f64::NAN), None),
            rule("attendence_percentage", Some(60.0), None),
            rule("bullying", Some(0.5), None),
        ];
        for case in cases {
            let mut config = bundled();
            config.tiers.thresholds.push(case);
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidThresholdOverride { .. })
            ));
        }

        let mut config = bundled();
        config.tiers.thresholds.push(rule("stress_level", None, Some(8.0)));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn threshold_bounds_are_strict() {
        let below = ThresholdOverride {
            factor: ATTENDANCE_FACTOR.to_string(),
            below: Some(60.0),
            above: None,
            minimum: RiskTier::High,
        };
        assert_eq!(below.crossed_by(59.9), Some((Comparison::Below, 60.0)));
        assert_eq!(below.crossed_by(60.0), None);

        let above = ThresholdOverride {
            below: None,
            above: Some(8.0),
            ..below
        };
        assert_eq!(above.crossed_by(8.5), Some((Comparison::Above, 8.0)));
        assert_eq!(above.crossed_by(8.0), None);
    }

    #[test]
    fn bundled_config_forces_high_for_low_attendance_and_marks() {
        let tiers = bundled().tiers;
        let factors: Vec<&str> = tiers
            .thresholds
            .iter()
            .map(|rule| rule.factor.as_str())
            .collect();
        assert_eq!(factors, vec![ATTENDANCE_FACTOR, ACADEMIC_FACTOR]);
        assert!(tiers.thresholds.iter().all(|rule| rule.minimum == RiskTier::High));
    }

    #[test]
    fn tier_bands_are_half_open() {
        let tiers = bundled().tiers;
        assert_eq!(tiers.tier_for(0.0), RiskTier::Low);
        assert_eq!(tiers.tier_for(tiers.medium - 0.001), RiskTier::Low);
        assert_eq!(tiers.tier_for(tiers.medium), RiskTier::Medium);
        assert_eq!(tiers.tier_for(tiers.high), RiskTier::High);
        assert_eq!(tiers.tier_for(tiers.critical), RiskTier::Critical);
        assert_eq!(tiers.tier_for(100.0), RiskTier::Critical);
    }

    #[test]
    fn parse_errors_surface_as_config_errors() {
        assert!(matches!(
            EngineConfig::from_toml_str("tiers = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn loads_custom_config_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheme.toml");
        let custom = BUNDLED.replace("threshold = \"High\"", "threshold = \"Critical\"");
        std::fs::write(&path, custom).unwrap();

        let config = EngineConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.alerts.threshold, RiskTier::Critical);
    }
}
