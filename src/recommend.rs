use std::collections::HashSet;

use crate::classify::active_flags;
use crate::config::{FactorConfig, RecommendationConfig, RecommendationTemplate, TierConfig};
use crate::models::{CategoryScore, Recommendation, RiskTier, StudentSignal, Trigger};

/// Builds the ranked intervention list for one student.
///
/// Flag recommendations come first in flag declaration order, then one
/// candidate per notable category in the order of `category_scores`. A title
/// is only ever used once. Ranks run from 1 in final order.
pub fn recommend(
    tier: RiskTier,
    category_scores: &[CategoryScore],
    signal: &StudentSignal,
    factors: &FactorConfig,
    tiers: &TierConfig,
    config: &RecommendationConfig,
) -> Vec<Recommendation> {
    let mut ranked = Ranked::default();

    for flag in active_flags(signal, factors) {
        if let Some(rec) = config.for_flag(&flag.name) {
            ranked.push(
                &rec.title,
                &rec.category,
                rec.rationale.clone(),
                Trigger::Flag {
                    flag: flag.name.clone(),
                },
            );
        }
    }

    for category in category_scores
        .iter()
        .filter(|category| category.sub_score > tiers.notable_threshold)
    {
        if let Some(candidate) = ranked.first_unused(config.candidates(&category.category)) {
            let candidate = candidate.clone();
            ranked.push_category(&candidate, category);
        }
    }

    if ranked.is_empty() && tier > RiskTier::Low {
        let top = category_scores.first();
        let candidate = top.and_then(|category| {
            ranked
                .first_unused(config.candidates(&category.category))
                .cloned()
                .map(|candidate| (candidate, category))
        });
        match candidate {
            Some((candidate, category)) => ranked.push_category(&candidate, category),
            None => ranked.push(
                &config.fallback.title,
                top.map_or("", |category| category.category.as_str()),
                config.fallback.rationale.clone(),
                Trigger::Fallback,
            ),
        }
    }

    ranked.items
}

#[derive(Default)]
struct Ranked {
    items: Vec<Recommendation>,
    titles: HashSet<String>,
}

impl Ranked {
    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn first_unused<'a>(
        &self,
        candidates: &'a [RecommendationTemplate],
    ) -> Option<&'a RecommendationTemplate> {
        candidates
            .iter()
            .find(|candidate| !self.titles.contains(&candidate.title))
    }

    fn push_category(&mut self, candidate: &RecommendationTemplate, category: &CategoryScore) {
        let top = category.top_factor();
        let detail = match top {
            Some(factor) => format!(
                "{} risk {:.0}/100, led by {}.",
                category.label, category.sub_score, factor.label
            ),
            None => format!("{} risk {:.0}/100.", category.label, category.sub_score),
        };
        self.push(
            &candidate.title,
            &category.category,
            format!("{} {}", candidate.rationale, detail),
            Trigger::Category {
                category: category.category.clone(),
                factor: top.map(|factor| factor.name.clone()),
            },
        );
    }

    fn push(&mut self, title: &str, category: &str, rationale: String, trigger: Trigger) {
        if !self.titles.insert(title.to_string()) {
            return;
        }
        self.items.push(Recommendation {
            title: title.to_string(),
            category: category.to_string(),
            priority: self.items.len() as u32 + 1,
            rationale,
            trigger,
        });
    }
}
