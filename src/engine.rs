use chrono::{DateTime, Utc};
use tracing::debug;

use crate::classify::classify;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::{RiskResult, StudentSignal};
use crate::normalize::normalize;
use crate::recommend::recommend;
use crate::scorer::score;

/// Evaluates one student, stamping the result with the current time.
pub fn evaluate_student(signal: &StudentSignal, config: &EngineConfig) -> Result<RiskResult> {
    config.validate()?;
    evaluate_at(signal, config, Utc::now())
}

/// Runs normalize, score, classify and recommend for one student. Pure:
/// the same inputs always produce the same result. `config` must already be
/// validated.
pub fn evaluate_at(
    signal: &StudentSignal,
    config: &EngineConfig,
    computed_at: DateTime<Utc>,
) -> Result<RiskResult> {
    let normalized = normalize(signal, &config.factors)?;
    let breakdown = score(&normalized, &config.weights);
    let classification = classify(&breakdown, signal, &config.factors, &config.tiers);
    let recommendations = recommend(
        classification.tier,
        &breakdown.category_scores,
        signal,
        &config.factors,
        &config.tiers,
        &config.recommendations,
    );

    debug!(
        student = %signal.identifier,
        score = breakdown.composite_score,
        tier = %classification.tier,
        overridden = classification.was_overridden(),
        recommendations = recommendations.len(),
        "evaluated student"
    );

    Ok(RiskResult {
        identifier: signal.identifier.clone(),
        composite_score: breakdown.composite_score,
        tier: classification.tier,
        reasons: classification.reasons,
        category_scores: breakdown.category_scores,
        recommendations,
        computed_at,
    })
}
