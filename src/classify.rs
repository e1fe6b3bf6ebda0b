use crate::config::{FactorConfig, FlagDef, TierConfig};
use crate::models::{FactorRef, NormalizedFactor, RawValue, Reason, RiskTier, StudentSignal};
use crate::scorer::ScoreBreakdown;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tier: RiskTier,
    /// Tier implied by the score alone, before overrides.
    pub score_tier: RiskTier,
    /// Most significant first.
    pub reasons: Vec<Reason>,
}

impl Classification {
    pub fn was_overridden(&self) -> bool {
        self.tier > self.score_tier
    }
}

/// Maps a score to a tier, raises it to any minimum forced by the signal's
/// flags or by a raw value crossing a configured bound, and explains the
/// outcome.
pub fn classify(
    breakdown: &ScoreBreakdown,
    signal: &StudentSignal,
    factors: &FactorConfig,
    config: &TierConfig,
) -> Classification {
    let score_tier = config.tier_for(breakdown.composite_score);
    let active = active_flags(signal, factors);
    let crossed = crossed_thresholds(breakdown, config);
    let forced = active
        .iter()
        .filter_map(|flag| config.minimum_for(&flag.name))
        .chain(crossed.iter().filter_map(|reason| match reason {
            Reason::Threshold { minimum_tier, .. } => Some(*minimum_tier),
            _ => None,
        }))
        .max();
    let tier = forced.map_or(score_tier, |minimum| score_tier.max(minimum));

    if tier == RiskTier::Low && active.is_empty() {
        return Classification {
            tier,
            score_tier,
            reasons: vec![Reason::NoSignificantRisk],
        };
    }

    let mut reasons: Vec<Reason> = active
        .iter()
        .map(|flag| Reason::Flag {
            flag: flag.name.clone(),
            label: flag.label.clone(),
            minimum_tier: config.minimum_for(&flag.name),
        })
        .collect();
    reasons.extend(crossed);

    reasons.extend(
        breakdown
            .category_scores
            .iter()
            .filter(|category| category.sub_score > config.notable_threshold)
            .take(config.max_category_reasons)
            .map(|category| Reason::Category {
                category: category.category.clone(),
                label: category.label.clone(),
                sub_score: category.sub_score,
                top_factor: category.top_factor().and_then(|factor| {
                    factor.raw.clone().map(|raw| FactorRef {
                        name: factor.name.clone(),
                        label: factor.label.clone(),
                        raw,
                    })
                }),
            }),
    );

    reasons.extend(breakdown.bonuses.iter().map(|bonus| Reason::HighImpact {
        factor: bonus.factor.clone(),
        label: bonus.label.clone(),
        points: bonus.points,
    }));

    if reasons.is_empty() && tier > RiskTier::Low {
        if let Some(top) = breakdown.category_scores.first() {
            reasons.push(Reason::MainDriver {
                category: top.category.clone(),
                label: top.label.clone(),
                sub_score: top.sub_score,
            });
        }
    }

    Classification {
        tier,
        score_tier,
        reasons,
    }
}

/// One reason per threshold rule whose factor is present and out of bounds,
/// in rule order.
fn crossed_thresholds(breakdown: &ScoreBreakdown, config: &TierConfig) -> Vec<Reason> {
    config
        .thresholds
        .iter()
        .filter_map(|rule| {
            let factor = find_factor(breakdown, &rule.factor)?;
            let Some(RawValue::Number(value)) = factor.raw else {
                return None;
            };
            let (comparison, limit) = rule.crossed_by(value)?;
            Some(Reason::Threshold {
                factor: factor.name.clone(),
                label: factor.label.clone(),
                value,
                comparison,
                limit,
                minimum_tier: rule.minimum,
            })
        })
        .collect()
}

fn find_factor<'a>(breakdown: &'a ScoreBreakdown, name: &str) -> Option<&'a NormalizedFactor> {
    breakdown
        .category_scores
        .iter()
        .flat_map(|category| category.factors.iter())
        .find(|factor| factor.name == name)
}

/// Set flags in declaration order.
pub(crate) fn active_flags<'a>(
    signal: &StudentSignal,
    factors: &'a FactorConfig,
) -> Vec<&'a FlagDef> {
    factors
        .flags
        .iter()
        .filter(|flag| signal.is_flag_set(&flag.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{CategoryScore, Comparison};

    fn config() -> EngineConfig {
        EngineConfig::bundled().unwrap()
    }

    fn category(name: &str, sub_score: f64, top: Option<(&str, f64)>) -> CategoryScore {
        CategoryScore {
            category: name.to_string(),
            label: name.to_string(),
            sub_score,
            factors: top
                .map(|(factor, raw)| NormalizedFactor {
                    name: factor.to_string(),
                    label: factor.to_string(),
                    category: name.to_string(),
                    weight: 1.0,
                    bonus: None,
                    contribution: sub_score / 100.0,
                    raw: Some(RawValue::Number(raw)),
                })
                .into_iter()
                .collect(),
        }
    }

    fn breakdown(composite_score: f64, category_scores: Vec<CategoryScore>) -> ScoreBreakdown {
        ScoreBreakdown {
            composite_score,
            category_scores,
            bonuses: Vec::new(),
        }
    }

    #[test]
    fn low_score_without_flags_has_single_reason() {
        let config = config();
        let signal = StudentSignal::new("s", 95.0, 90.0);
        let result = classify(
            &breakdown(5.0, vec![category("academic", 10.0, None)]),
            &signal,
            &config.factors,
            &config.tiers,
        );
        assert_eq!(result.tier, RiskTier::Low);
        assert_eq!(result.reasons, vec![Reason::NoSignificantRisk]);
    }

    #[test]
    fn override_raises_but_never_lowers_tier() {
        let config = config();
        let signal = StudentSignal::new("s", 95.0, 90.0).with_flag("previous_dropout");

        let low = classify(&breakdown(5.0, vec![]), &signal, &config.factors, &config.tiers);
        assert_eq!(low.tier, RiskTier::Medium);
        assert!(low.was_overridden());
        assert_eq!(
            low.reasons[0].to_string(),
            "Previous dropout: special-case override forces at least Medium risk."
        );

        let high = classify(&breakdown(90.0, vec![]), &signal, &config.factors, &config.tiers);
        assert_eq!(high.tier, RiskTier::Critical);
        assert!(!high.was_overridden());
    }

    #[test]
    fn strongest_override_wins() {
        let config = config();
        let signal = StudentSignal::new("s", 95.0, 90.0)
            .with_flag("previous_dropout")
            .with_flag("substance_abuse");
        let result = classify(&breakdown(0.0, vec![]), &signal, &config.factors, &config.tiers);
        assert_eq!(result.tier, RiskTier::High);
        // declaration order: previous_dropout before substance_abuse
        assert!(matches!(
            &result.reasons[0],
            Reason::Flag { flag, .. } if flag == "previous_dropout"
        ));
        assert!(matches!(
            &result.reasons[1],
            Reason::Flag { flag, .. } if flag == "substance_abuse"
        ));
    }

    #[test]
    fn notable_categories_are_capped_at_three_and_keep_order() {
        let config = config();
        let signal = StudentSignal::new("s", 50.0, 40.0);
        let scores = vec![
            category("academic", 100.0, Some(("academic_score", 55.0))),
            category("attendance", 90.0, Some(("attendance_percentage", 65.0))),
            category("financial", 80.0, None),
            category("psychosocial", 70.0, None),
            category("environmental", 50.0, None),
        ];
        let result = classify(&breakdown(88.0, scores), &signal, &config.factors, &config.tiers);
        assert_eq!(result.tier, RiskTier::Critical);
        let texts: Vec<String> = result.reasons.iter().map(ToString::to_string).collect();
        assert_eq!(
            texts,
            vec![
                "academic risk is 100/100, led by academic_score (55).",
                "attendance risk is 90/100, led by attendance_percentage (65).",
                "financial risk is 80/100.",
            ]
        );
    }

    #[test]
    fn elevated_score_without_notable_category_names_main_driver() {
        let config = config();
        let signal = StudentSignal::new("s", 70.0, 60.0);
        let scores = vec![category("academic", 45.0, None), category("attendance", 40.0, None)];
        let result = classify(&breakdown(42.0, scores), &signal, &config.factors, &config.tiers);
        assert_eq!(result.tier, RiskTier::Medium);
        assert!(matches!(
            &result.reasons[..],
            [Reason::MainDriver { category, .. }] if category == "academic"
        ));
    }

    #[test]
    fn low_attendance_forces_high_tier_after_flag_reasons() {
        let config = config();
        let signal = StudentSignal::new("s", 55.0, 90.0).with_flag("housing_insecurity");
        let scores = vec![category("attendance", 87.5, Some(("attendance_percentage", 55.0)))];
        let result = classify(&breakdown(21.9, scores), &signal, &config.factors, &config.tiers);

        assert_eq!(result.score_tier, RiskTier::Low);
        assert_eq!(result.tier, RiskTier::High);
        assert!(result.was_overridden());
        assert!(matches!(
            &result.reasons[0],
            Reason::Flag { flag, .. } if flag == "housing_insecurity"
        ));
        assert_eq!(
            result.reasons[1],
            Reason::Threshold {
                factor: "attendance_percentage".to_string(),
                label: "attendance_percentage".to_string(),
                value: 55.0,
                comparison: Comparison::Below,
                limit: 60.0,
                minimum_tier: RiskTier::High,
            }
        );
    }

    #[test]
    fn values_on_the_bound_or_missing_do_not_trigger_thresholds() {
        let config = config();
        let signal = StudentSignal::new("s", 60.0, f64::NAN);
        let scores = vec![
            category("attendance", 75.0, Some(("attendance_percentage", 60.0))),
            category("academic", 0.0, None),
        ];
        let result = classify(&breakdown(18.75, scores), &signal, &config.factors, &config.tiers);
        assert_eq!(result.tier, RiskTier::Low);
        assert_eq!(result.reasons, vec![Reason::NoSignificantRisk]);
    }
}
