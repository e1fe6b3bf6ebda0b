use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::engine::evaluate_at;
use crate::error::{ConfigError, EvaluationError};
use crate::models::{AggregateReport, EvaluationFailure, RiskResult, StudentSignal, TierCounts};

/// How a batch is spread over threads. Results are identical either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    Sequential,
    /// `None` uses rayon's global pool.
    Parallel { workers: Option<usize> },
}

/// Evaluates a population sequentially, stamped with the current time.
pub fn evaluate_population(
    signals: &[StudentSignal],
    config: &EngineConfig,
) -> Result<AggregateReport, EvaluationError> {
    evaluate_population_with(signals, config, Execution::Sequential, Utc::now())
}

/// Evaluates every signal independently. A signal that fails is recorded in
/// `errors` and the batch carries on; the call itself only fails for an
/// invalid configuration or when every signal fails.
pub fn evaluate_population_with(
    signals: &[StudentSignal],
    config: &EngineConfig,
    execution: Execution,
    generated_at: DateTime<Utc>,
) -> Result<AggregateReport, EvaluationError> {
    config.validate()?;

    let evaluate = |signal: &StudentSignal| evaluate_at(signal, config, generated_at);
    let (outcomes, tier_counts): (Vec<Outcome>, TierCounts) = match execution {
        Execution::Sequential => {
            let outcomes: Vec<_> = signals.iter().map(evaluate).collect();
            let counts = outcomes.iter().fold(TierCounts::default(), count_outcome);
            (outcomes, counts)
        }
        Execution::Parallel { workers } => {
            let run = || {
                let outcomes: Vec<_> = signals.par_iter().map(evaluate).collect();
                let counts = outcomes
                    .par_iter()
                    .fold(TierCounts::default, count_outcome)
                    .reduce(TierCounts::default, TierCounts::merge);
                (outcomes, counts)
            };
            match workers {
                Some(threads) => rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|err| EvaluationError::WorkerPool(err.to_string()))?
                    .install(run),
                None => run(),
            }
        }
    };

    let mut results = Vec::with_capacity(outcomes.len());
    let mut errors = Vec::new();
    for (signal, outcome) in signals.iter().zip(outcomes) {
        match outcome {
            Ok(result) => results.push(result),
            Err(err) => {
                warn!(student = %signal.identifier, error = %err, "signal rejected");
                errors.push(EvaluationFailure {
                    identifier: signal.identifier.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    if results.is_empty() {
        if let Some(first) = errors.first() {
            return Err(EvaluationError::AllSignalsFailed {
                count: errors.len(),
                first: format!("{}: {}", first.identifier, first.error),
            });
        }
    }

    let threshold = config.alerts.threshold;
    let mut critical_alerts: Vec<RiskResult> = results
        .iter()
        .filter(|result| result.tier >= threshold)
        .cloned()
        .collect();
    critical_alerts.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then_with(|| a.identifier.cmp(&b.identifier))
    });

    info!(
        evaluated = results.len(),
        failed = errors.len(),
        alerts = critical_alerts.len(),
        low = tier_counts.low,
        medium = tier_counts.medium,
        high = tier_counts.high,
        critical = tier_counts.critical,
        "population evaluated"
    );

    Ok(AggregateReport {
        results,
        tier_counts,
        critical_alerts,
        errors,
        alert_threshold: threshold,
        generated_at,
    })
}

type Outcome = Result<RiskResult, ConfigError>;

fn count_outcome(mut counts: TierCounts, outcome: &Outcome) -> TierCounts {
    if let Ok(result) = outcome {
        counts.record(result.tier);
    }
    counts
}
