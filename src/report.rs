use std::fmt::Write;

use crate::models::{AggregateReport, CategorySummary, RiskResult, RiskTier};

pub fn summarize_by_category(
    results: &[RiskResult],
    notable_threshold: f64,
) -> Vec<CategorySummary> {
    let mut map: std::collections::HashMap<String, (String, usize, f64, usize)> =
        std::collections::HashMap::new();

    for result in results {
        for category in &result.category_scores {
            let entry = map
                .entry(category.category.clone())
                .or_insert_with(|| (category.label.clone(), 0, 0.0, 0));
            entry.1 += 1;
            entry.2 += category.sub_score;
            if category.sub_score > notable_threshold {
                entry.3 += 1;
            }
        }
    }

    let mut summaries: Vec<CategorySummary> = map
        .into_iter()
        .map(|(category, (label, count, total, notable_count))| CategorySummary {
            category,
            label,
            average_sub_score: if count == 0 {
                0.0
            } else {
                total / count as f64
            },
            notable_count,
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.average_sub_score
            .total_cmp(&a.average_sub_score)
            .then_with(|| a.category.cmp(&b.category))
    });
    summaries
}

pub fn build_report(
    scope: Option<&str>,
    report: &AggregateReport,
    notable_threshold: f64,
) -> String {
    let summaries = summarize_by_category(&report.results, notable_threshold);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all cohorts");

    let _ = writeln!(output, "# Dropout Early Warning Report");
    let _ = writeln!(
        output,
        "Generated for {} at {}",
        scope_label,
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Distribution");
    let _ = writeln!(
        output,
        "- Evaluated {} students, {} rejected",
        report.results.len(),
        report.errors.len()
    );

    if report.results.is_empty() {
        let _ = writeln!(output, "No students evaluated.");
    } else {
        for tier in RiskTier::ALL.iter().rev() {
            let _ = writeln!(output, "- {}: {}", tier, report.tier_counts.get(*tier));
        }
        let _ = writeln!(
            output,
            "- Average score {:.1}, {:.1}% at High or above",
            report.average_score(),
            report.high_or_above_percentage()
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alerts ({} and above)", report.alert_threshold);

    if report.critical_alerts.is_empty() {
        let _ = writeln!(output, "No students at or above the alert tier.");
    } else {
        for result in report.critical_alerts.iter() {
            let _ = writeln!(
                output,
                "- {} [{}] score {:.1}",
                result.identifier, result.tier, result.composite_score
            );
            for reason in result.reasons.iter().take(3) {
                let _ = writeln!(output, "  - {}", reason);
            }
            for rec in result.recommendations.iter() {
                let _ = writeln!(output, "  - Action {}: {}", rec.priority, rec.title);
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Category Pressure");

    if summaries.is_empty() {
        let _ = writeln!(output, "No category scores for this population.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: avg {:.1} ({} students notable)",
                summary.label, summary.average_sub_score, summary.notable_count
            );
        }
    }

    if !report.errors.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Rejected Signals");
        for failure in report.errors.iter() {
            let _ = writeln!(output, "- {}: {}", failure.identifier, failure.error);
        }
    }

    output
}

pub fn to_json(report: &AggregateReport) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
