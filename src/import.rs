use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context};
use tracing::warn;

use crate::config::{FactorConfig, FactorKind, ACADEMIC_FACTOR, ATTENDANCE_FACTOR};
use crate::models::{RawValue, StudentSignal};

/// Category given to CSV columns no factor is configured for, so the
/// normalizer rejects the affected students instead of dropping the data.
pub const UNASSIGNED_CATEGORY: &str = "unassigned";

const ID_COLUMN: &str = "student_id";
const FLAGS_COLUMN: &str = "flags";
const NAME_COLUMN: &str = "full_name";
const COHORT_COLUMN: &str = "cohort";

/// A signal plus the roster fields a CSV row may carry.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRow {
    pub signal: StudentSignal,
    pub full_name: Option<String>,
    pub cohort: Option<String>,
}

/// Reads a batch of signals. `.json` files hold an array of signals; any
/// other extension is read as CSV.
pub fn read_signals(path: &Path, factors: &FactorConfig) -> anyhow::Result<Vec<StudentSignal>> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let signals = serde_json::from_str(&input)
            .with_context(|| format!("invalid signal JSON in {}", path.display()))?;
        return Ok(signals);
    }

    Ok(read_csv_path(path, factors)?
        .into_iter()
        .map(|row| row.signal)
        .collect())
}

pub fn read_csv_path(path: &Path, factors: &FactorConfig) -> anyhow::Result<Vec<SignalRow>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    read_csv(file, factors)
        .with_context(|| format!("invalid signal CSV in {}", path.display()))
}

/// Wide CSV: one row per student, one column per factor. Empty and
/// non-finite cells are missing values; `flags` holds `;`-separated flag
/// names. A cell that does not parse as its factor's kind is kept as text
/// under the factor's category so the normalizer rejects that student alone.
pub fn read_csv<R: Read>(reader: R, factors: &FactorConfig) -> anyhow::Result<Vec<SignalRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    if !headers.iter().any(|header| header == ID_COLUMN) {
        bail!("missing `{ID_COLUMN}` column");
    }

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let line = index + 2;
        let mut row = SignalRow {
            signal: StudentSignal::new("", f64::NAN, f64::NAN),
            full_name: None,
            cohort: None,
        };

        for (column, cell) in headers.iter().zip(record.iter()) {
            match column {
                ID_COLUMN => row.signal.identifier = cell.to_string(),
                NAME_COLUMN => row.full_name = non_empty(cell),
                COHORT_COLUMN => row.cohort = non_empty(cell),
                FLAGS_COLUMN => {
                    for flag in cell.split(';').map(str::trim).filter(|f| !f.is_empty()) {
                        row.signal.flags.insert(flag.to_string(), true);
                    }
                }
                ATTENDANCE_FACTOR | ACADEMIC_FACTOR => {
                    let value = match parse_core(cell, column, line) {
                        Some(value) => value,
                        None => {
                            let category = factors
                                .factor(column)
                                .map_or(UNASSIGNED_CATEGORY, |def| def.category.as_str());
                            row.signal
                                .category_factors
                                .entry(category.to_string())
                                .or_default()
                                .insert(column.to_string(), RawValue::Level(cell.to_string()));
                            f64::NAN
                        }
                    };
                    if column == ATTENDANCE_FACTOR {
                        row.signal.attendance_percentage = value;
                    } else {
                        row.signal.academic_score = value;
                    }
                }
                _ if cell.is_empty() => {}
                name => {
                    let (category, value) = match factors.factor(name) {
                        Some(def) => (def.category.clone(), parse_cell(&def.kind, cell)),
                        None => (
                            UNASSIGNED_CATEGORY.to_string(),
                            Some(RawValue::Level(cell.to_string())),
                        ),
                    };
                    let Some(value) = value else {
                        warn!(line, column = name, cell, "non-finite value treated as missing");
                        continue;
                    };
                    row.signal
                        .category_factors
                        .entry(category)
                        .or_default()
                        .insert(name.to_string(), value);
                }
            }
        }

        if row.signal.identifier.is_empty() {
            bail!("line {line}: empty `{ID_COLUMN}`");
        }
        rows.push(row);
    }
    Ok(rows)
}

fn non_empty(cell: &str) -> Option<String> {
    (!cell.is_empty()).then(|| cell.to_string())
}

/// NaN for an empty or non-finite cell, `None` for text that is not a
/// number.
fn parse_core(cell: &str, column: &str, line: usize) -> Option<f64> {
    if cell.is_empty() {
        return Some(f64::NAN);
    }
    let value = cell.parse::<f64>().ok()?;
    if !value.is_finite() {
        warn!(line, column, cell, "non-finite value treated as missing");
        return Some(f64::NAN);
    }
    Some(value)
}

/// `None` for a non-finite number. Text that does not fit the factor's kind
/// is passed through as a level.
fn parse_cell(kind: &FactorKind, cell: &str) -> Option<RawValue> {
    let parsed = match kind {
        FactorKind::Percentage { .. } | FactorKind::InvertedPercentage { .. } => {
            cell.parse::<f64>().ok().map(RawValue::Number)
        }
        FactorKind::Boolean => match cell.to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(RawValue::Flag(true)),
            "false" | "no" | "n" | "0" => Some(RawValue::Flag(false)),
            _ => None,
        },
        FactorKind::Ordinal { .. } => None,
    };
    match parsed {
        Some(RawValue::Number(value)) if !value.is_finite() => None,
        Some(value) => Some(value),
        None => Some(RawValue::Level(cell.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::evaluate_population;
    use crate::config::EngineConfig;

    fn factors() -> FactorConfig {
        EngineConfig::bundled().unwrap().factors
    }

    const CSV: &str = "\
student_id,full_name,cohort,attendance_percentage,academic_score,financial_stress,bullying,family_support,flags
s-1,Avery Lee,2026,95,90,2,no,high,
s-2,Jules Moreno,2025,50,40,9,,low,previous_dropout;housing_insecurity
";

    #[test]
    fn reads_wide_csv_rows() {
        let rows = read_csv(CSV.as_bytes(), &factors()).unwrap();
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.full_name.as_deref(), Some("Avery Lee"));
        assert_eq!(first.signal.attendance_percentage, 95.0);
        assert_eq!(
            first.signal.category_factors["psychosocial"]["bullying"],
            RawValue::Flag(false)
        );
        assert!(first.signal.flags.is_empty());

        let second = &rows[1].signal;
        assert_eq!(
            second.category_factors["financial"]["financial_stress"],
            RawValue::Number(9.0)
        );
        assert!(!second.category_factors.contains_key("psychosocial"));
        assert!(second.is_flag_set("previous_dropout"));
        assert!(second.is_flag_set("housing_insecurity"));
    }

    #[test]
    fn unknown_columns_land_in_unassigned_category() {
        let csv = "student_id,attendance_percentage,academic_score,custom_xyz\ns-9,90,90,7\n";
        let rows = read_csv(csv.as_bytes(), &factors()).unwrap();
        assert_eq!(
            rows[0].signal.category_factors[UNASSIGNED_CATEGORY]["custom_xyz"],
            RawValue::Level("7".to_string())
        );
    }

    #[test]
    fn unparsable_cells_are_kept_as_text() {
        let csv = "\
student_id,attendance_percentage,academic_score,financial_stress,bullying
s-1,ninety,90,lots,maybe
";
        let rows = read_csv(csv.as_bytes(), &factors()).unwrap();
        let signal = &rows[0].signal;
        assert!(signal.attendance_percentage.is_nan());
        assert_eq!(
            signal.category_factors["attendance"]["attendance_percentage"],
            RawValue::Level("ninety".to_string())
        );
        assert_eq!(
            signal.category_factors["financial"]["financial_stress"],
            RawValue::Level("lots".to_string())
        );
        assert_eq!(
            signal.category_factors["psychosocial"]["bullying"],
            RawValue::Level("maybe".to_string())
        );
    }

    #[test]
    fn one_bad_row_only_rejects_that_student() {
        let csv = "\
student_id,attendance_percentage,academic_score,financial_stress
s-1,90,90,2
s-2,90,90,lots
s-3,50,40,9
s-4,eighty,90,2
";
        let signals: Vec<StudentSignal> = read_csv(csv.as_bytes(), &factors())
            .unwrap()
            .into_iter()
            .map(|row| row.signal)
            .collect();
        let report = evaluate_population(&signals, &EngineConfig::bundled().unwrap()).unwrap();

        let evaluated: Vec<&str> = report
            .results
            .iter()
            .map(|r| r.identifier.as_str())
            .collect();
        assert_eq!(evaluated, vec!["s-1", "s-3"]);
        let rejected: Vec<&str> = report
            .errors
            .iter()
            .map(|f| f.identifier.as_str())
            .collect();
        assert_eq!(rejected, vec!["s-2", "s-4"]);
        assert!(report.errors[0].error.contains("financial_stress"));
    }

    #[test]
    fn non_finite_cells_are_missing() {
        let csv = "\
student_id,attendance_percentage,academic_score,financial_stress,stress_level
s-1,NaN,,inf,7
";
        let rows = read_csv(csv.as_bytes(), &factors()).unwrap();
        let signal = &rows[0].signal;
        assert!(signal.attendance_percentage.is_nan());
        assert!(signal.academic_score.is_nan());
        assert!(!signal.category_factors.contains_key("financial"));
        assert_eq!(
            signal.category_factors["psychosocial"]["stress_level"],
            RawValue::Number(7.0)
        );
    }

    #[test]
    fn flags_split_on_semicolons_only() {
        let csv = "student_id,attendance_percentage,academic_score,flags\n\
                   s-1,90,90,\"previous_dropout; substance_abuse\"\n\
                   s-2,90,90,\"previous_dropout,substance_abuse\"\n";
        let rows = read_csv(csv.as_bytes(), &factors()).unwrap();
        assert!(rows[0].signal.is_flag_set("previous_dropout"));
        assert!(rows[0].signal.is_flag_set("substance_abuse"));
        assert!(rows[1].signal.is_flag_set("previous_dropout,substance_abuse"));
        assert!(!rows[1].signal.is_flag_set("previous_dropout"));
    }

    #[test]
    fn structural_problems_fail_the_file() {
        let csv = "attendance_percentage,academic_score\n90,90\n";
        assert!(read_csv(csv.as_bytes(), &factors()).is_err());

        let csv = "student_id,attendance_percentage,academic_score\ns-1,90,90\n,80,80\n";
        let err = read_csv(csv.as_bytes(), &factors()).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn reads_json_and_csv_files_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("signals.csv");
        std::fs::write(&csv_path, CSV).unwrap();
        let from_csv = read_signals(&csv_path, &factors()).unwrap();

        let json_path = dir.path().join("signals.json");
        std::fs::write(&json_path, serde_json::to_string(&from_csv).unwrap()).unwrap();
        let from_json = read_signals(&json_path, &factors()).unwrap();

        assert_eq!(from_csv, from_json);
    }

    #[test]
    fn signals_with_missing_core_values_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("signals.csv");
        std::fs::write(
            &csv_path,
            "student_id,attendance_percentage,academic_score,stress_level\ns-1,,71,8\n",
        )
        .unwrap();
        let from_csv = read_signals(&csv_path, &factors()).unwrap();

        let json_path = dir.path().join("signals.json");
        std::fs::write(&json_path, serde_json::to_string(&from_csv).unwrap()).unwrap();
        let from_json = read_signals(&json_path, &factors()).unwrap();

        assert_eq!(from_json.len(), 1);
        assert!(from_json[0].attendance_percentage.is_nan());
        assert_eq!(from_json[0].academic_score, 71.0);
        assert_eq!(from_json[0].category_factors, from_csv[0].category_factors);
    }
}
