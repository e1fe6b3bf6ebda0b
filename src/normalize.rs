use tracing::warn;

use crate::config::{FactorConfig, FactorDef, FactorKind, ACADEMIC_FACTOR, ATTENDANCE_FACTOR};
use crate::error::{ConfigError, Result};
use crate::models::{NormalizedFactor, RawValue, StudentSignal};

/// Converts a signal into one [`NormalizedFactor`] per configured factor, in
/// configuration order. Factors the signal does not carry come back with
/// `raw: None` and a zero contribution.
///
/// Rejects factors or flags the configuration does not declare, factors filed
/// under the wrong category, and values of the wrong kind. Out-of-range
/// numbers are clamped.
pub fn normalize(
    signal: &StudentSignal,
    config: &FactorConfig,
) -> Result<Vec<NormalizedFactor>> {
    check_known(signal, config)?;

    let mut normalized = Vec::with_capacity(config.factors.len());
    for def in &config.factors {
        let raw = raw_value(signal, def).filter(|raw| is_usable(signal, def, raw));
        let contribution = match &raw {
            Some(raw) => contribution(def, raw)?,
            None => 0.0,
        };
        normalized.push(NormalizedFactor {
            name: def.name.clone(),
            label: def.label.clone(),
            category: def.category.clone(),
            weight: def.weight,
            bonus: def.bonus,
            contribution,
            raw,
        });
    }
    Ok(normalized)
}

fn check_known(signal: &StudentSignal, config: &FactorConfig) -> Result<()> {
    for (category, factors) in &signal.category_factors {
        for (name, value) in factors {
            let Some(def) = config.factor(name) else {
                return Err(ConfigError::UnknownFactor {
                    factor: name.clone(),
                    category: category.clone(),
                });
            };
            if &def.category != category {
                return Err(ConfigError::CategoryMismatch {
                    factor: name.clone(),
                    expected: def.category.clone(),
                    found: category.clone(),
                });
            }
            let core = name == ATTENDANCE_FACTOR || name == ACADEMIC_FACTOR;
            if core && !matches!(value, RawValue::Number(_)) {
                return Err(ConfigError::ValueKindMismatch {
                    factor: name.clone(),
                    expected: def.kind.expected_value(),
                });
            }
        }
    }
    for flag in signal.flags.keys() {
        if config.flag(flag).is_none() {
            return Err(ConfigError::UnknownFlag { flag: flag.clone() });
        }
    }
    Ok(())
}

fn raw_value(signal: &StudentSignal, def: &FactorDef) -> Option<RawValue> {
    let core = match def.name.as_str() {
        ATTENDANCE_FACTOR => Some(signal.attendance_percentage),
        ACADEMIC_FACTOR => Some(signal.academic_score),
        _ => None,
    };
    if let Some(value) = core {
        if signal
            .category_factors
            .get(&def.category)
            .is_some_and(|factors| factors.contains_key(&def.name))
        {
            warn!(
                student = %signal.identifier,
                factor = %def.name,
                "ignoring duplicate core factor in category factors"
            );
        }
        return Some(RawValue::Number(value));
    }

    signal
        .category_factors
        .get(&def.category)
        .and_then(|factors| factors.get(&def.name))
        .cloned()
}

fn is_usable(signal: &StudentSignal, def: &FactorDef, raw: &RawValue) -> bool {
    match raw {
        RawValue::Number(value) if !value.is_finite() => {
            warn!(
                student = %signal.identifier,
                factor = %def.name,
                "non-finite value treated as missing"
            );
            false
        }
        _ => true,
    }
}

fn contribution(def: &FactorDef, raw: &RawValue) -> Result<f64> {
    let value = match (&def.kind, raw) {
        (FactorKind::Percentage { good, bad }, RawValue::Number(value)) => {
            (good - value) / (good - bad)
        }
        (FactorKind::InvertedPercentage { good, bad }, RawValue::Number(value)) => {
            (value - good) / (bad - good)
        }
        (FactorKind::Boolean, RawValue::Flag(set)) => {
            if *set {
                1.0
            } else {
                0.0
            }
        }
        (FactorKind::Ordinal { levels }, RawValue::Level(level)) => {
            let wanted = level.trim();
            levels
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
                .map(|(_, value)| *value)
                .ok_or_else(|| ConfigError::UnknownLevel {
                    factor: def.name.clone(),
                    level: level.clone(),
                })?
        }
        (kind, _) => {
            return Err(ConfigError::ValueKindMismatch {
                factor: def.name.clone(),
                expected: kind.expected_value(),
            })
        }
    };
    Ok(value.clamp(0.0, 1.0))
}
