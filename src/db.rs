use std::collections::BTreeMap;

use anyhow::Context;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::import::SignalRow;
use crate::models::{AggregateReport, RawValue, StudentSignal};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let rows = vec![
        SignalRow {
            signal: StudentSignal::new("GS-2026-001", 96.0, 91.0)
                .with_factor("financial", "financial_stress", RawValue::Number(2.0))
                .with_factor("environmental", "family_support", RawValue::Level("high".into())),
            full_name: Some("Avery Lee".to_string()),
            cohort: Some("2026".to_string()),
        },
        SignalRow {
            signal: StudentSignal::new("GS-2025-014", 52.0, 41.0)
                .with_factor("financial", "financial_stress", RawValue::Number(9.0))
                .with_factor("financial", "work_hours_per_week", RawValue::Number(32.0))
                .with_flag("previous_dropout"),
            full_name: Some("Jules Moreno".to_string()),
            cohort: Some("2025".to_string()),
        },
        SignalRow {
            signal: StudentSignal::new("GS-2026-027", 78.0, 63.0)
                .with_factor("psychosocial", "stress_level", RawValue::Number(8.0))
                .with_factor("psychosocial", "trauma_history", RawValue::Flag(true))
                .with_factor("attendance", "engagement_level", RawValue::Level("medium".into())),
            full_name: Some("Kiara Patel".to_string()),
            cohort: Some("2026".to_string()),
        },
    ];

    store_signals(pool, &rows, None).await
}

/// Upserts students and replaces their factor values and flags.
pub async fn store_signals(
    pool: &PgPool,
    rows: &[SignalRow],
    default_cohort: Option<&str>,
) -> anyhow::Result<usize> {
    let mut stored = 0usize;

    for row in rows {
        let signal = &row.signal;
        let mut tx = pool.begin().await?;

        let student_id: Uuid = sqlx::query(
            r#"
            INSERT INTO dropout_risk.students
            (id, student_code, full_name, cohort, attendance_percentage, academic_score)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (student_code) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                cohort = EXCLUDED.cohort,
                attendance_percentage = EXCLUDED.attendance_percentage,
                academic_score = EXCLUDED.academic_score,
                updated_at = now()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&signal.identifier)
        .bind(row.full_name.as_deref().unwrap_or(&signal.identifier))
        .bind(row.cohort.as_deref().or(default_cohort).unwrap_or("unassigned"))
        .bind(reported(signal.attendance_percentage))
        .bind(reported(signal.academic_score))
        .fetch_one(&mut *tx)
        .await?
        .try_get("id")?;

        sqlx::query("DELETE FROM dropout_risk.student_factors WHERE student_id = $1")
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM dropout_risk.student_flags WHERE student_id = $1")
            .bind(student_id)
            .execute(&mut *tx)
            .await?;

        for (category, factors) in &signal.category_factors {
            for (factor, value) in factors {
                if matches!(value, RawValue::Number(number) if !number.is_finite()) {
                    warn!(
                        student = %signal.identifier,
                        factor = %factor,
                        "skipping non-finite factor value"
                    );
                    continue;
                }
                sqlx::query(
                    r#"
                    INSERT INTO dropout_risk.student_factors (student_id, category, factor, value)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(student_id)
                .bind(category)
                .bind(factor)
                .bind(Json(value))
                .execute(&mut *tx)
                .await?;
            }
        }

        for (flag, active) in &signal.flags {
            sqlx::query(
                r#"
                INSERT INTO dropout_risk.student_flags (student_id, flag, active)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(student_id)
            .bind(flag)
            .bind(*active)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        stored += 1;
    }

    Ok(stored)
}

/// Builds fresh signals from stored student data, optionally for one cohort.
pub async fn fetch_signals(
    pool: &PgPool,
    cohort: Option<&str>,
) -> anyhow::Result<Vec<StudentSignal>> {
    let students = sqlx::query(
        r#"
        SELECT id, student_code, attendance_percentage, academic_score
        FROM dropout_risk.students
        WHERE $1::text IS NULL OR cohort = $1
        ORDER BY student_code
        "#,
    )
    .bind(cohort)
    .fetch_all(pool)
    .await?;

    let mut order = Vec::with_capacity(students.len());
    let mut signals: BTreeMap<Uuid, StudentSignal> = BTreeMap::new();
    for row in students {
        let id: Uuid = row.try_get("id")?;
        let code: String = row.try_get("student_code")?;
        let attendance: Option<f64> = row.try_get("attendance_percentage")?;
        let academic: Option<f64> = row.try_get("academic_score")?;
        order.push(id);
        signals.insert(
            id,
            StudentSignal::new(
                code,
                attendance.unwrap_or(f64::NAN),
                academic.unwrap_or(f64::NAN),
            ),
        );
    }

    let factors = sqlx::query(
        r#"
        SELECT f.student_id, f.category, f.factor, f.value
        FROM dropout_risk.student_factors f
        JOIN dropout_risk.students s ON s.id = f.student_id
        WHERE $1::text IS NULL OR s.cohort = $1
        "#,
    )
    .bind(cohort)
    .fetch_all(pool)
    .await?;

    for row in factors {
        let id: Uuid = row.try_get("student_id")?;
        let category: String = row.try_get("category")?;
        let factor: String = row.try_get("factor")?;
        let Json(value): Json<RawValue> = row
            .try_get("value")
            .with_context(|| format!("unreadable value for factor `{factor}`"))?;
        if let Some(signal) = signals.get_mut(&id) {
            signal
                .category_factors
                .entry(category)
                .or_default()
                .insert(factor, value);
        }
    }

    let flags = sqlx::query(
        r#"
        SELECT f.student_id, f.flag, f.active
        FROM dropout_risk.student_flags f
        JOIN dropout_risk.students s ON s.id = f.student_id
        WHERE $1::text IS NULL OR s.cohort = $1
        "#,
    )
    .bind(cohort)
    .fetch_all(pool)
    .await?;

    for row in flags {
        let id: Uuid = row.try_get("student_id")?;
        if let Some(signal) = signals.get_mut(&id) {
            signal
                .flags
                .insert(row.try_get("flag")?, row.try_get("active")?);
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|id| signals.remove(&id))
        .collect())
}

/// Missing core values are stored as NULL.
fn reported(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Persists every successful result of a batch. Returns the number stored.
pub async fn record_assessments(pool: &PgPool, report: &AggregateReport) -> anyhow::Result<usize> {
    let mut recorded = 0usize;

    for result in &report.results {
        let outcome = sqlx::query(
            r#"
            INSERT INTO dropout_risk.risk_assessments
            (id, student_id, composite_score, tier, reasons, recommendations, computed_at)
            SELECT $1, s.id, $3, $4, $5, $6, $7
            FROM dropout_risk.students s
            WHERE s.student_code = $2
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&result.identifier)
        .bind(result.composite_score)
        .bind(result.tier.as_str())
        .bind(Json(&result.reasons))
        .bind(Json(&result.recommendations))
        .bind(result.computed_at)
        .execute(pool)
        .await?;

        if outcome.rows_affected() > 0 {
            recorded += 1;
        }
    }

    Ok(recorded)
}
