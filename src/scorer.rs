use crate::config::WeightConfig;
use crate::models::{AppliedBonus, CategoryScore, NormalizedFactor, RawValue};

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    /// Weighted blend plus bonuses, clamped to [0, 100].
    pub composite_score: f64,
    /// Highest sub-score first; ties keep category declaration order.
    pub category_scores: Vec<CategoryScore>,
    pub bonuses: Vec<AppliedBonus>,
}

/// Blends normalized factors into per-category sub-scores and a composite.
///
/// A category's sub-score is the weighted average of its *present* factors,
/// so a category with few populated factors is not diluted by the missing
/// ones. High-impact factors add their bonus after the blend.
pub fn score(factors: &[NormalizedFactor], config: &WeightConfig) -> ScoreBreakdown {
    let mut category_scores = Vec::with_capacity(config.categories.len());
    let mut blended = 0.0;

    for category in &config.categories {
        let mut members: Vec<NormalizedFactor> = factors
            .iter()
            .filter(|factor| factor.category == category.name)
            .cloned()
            .collect();

        let (weighted, total_weight) = members
            .iter()
            .filter(|factor| factor.is_present())
            .fold((0.0, 0.0), |(weighted, total), factor| {
                (weighted + factor.weight * factor.contribution, total + factor.weight)
            });
        let sub_score = if total_weight > 0.0 {
            (100.0 * weighted / total_weight).clamp(0.0, 100.0)
        } else {
            0.0
        };

        members.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));
        blended += category.weight * sub_score;
        category_scores.push(CategoryScore {
            category: category.name.clone(),
            label: category.label.clone(),
            sub_score,
            factors: members,
        });
    }

    let bonuses: Vec<AppliedBonus> = factors
        .iter()
        .filter_map(|factor| match (factor.bonus, &factor.raw) {
            (Some(points), Some(RawValue::Flag(true))) => Some(AppliedBonus {
                factor: factor.name.clone(),
                label: factor.label.clone(),
                category: factor.category.clone(),
                points,
            }),
            _ => None,
        })
        .collect();
    let bonus_points: f64 = bonuses.iter().map(|bonus| bonus.points).sum();

    category_scores.sort_by(|a, b| b.sub_score.total_cmp(&a.sub_score));

    ScoreBreakdown {
        composite_score: (blended + bonus_points).clamp(0.0, 100.0),
        category_scores,
        bonuses,
    }
}
