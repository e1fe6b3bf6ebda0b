use thiserror::Error;

/// Invalid or incomplete configuration, or a signal that references
/// something the configuration does not know about.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("configuration declares no categories")]
    NoCategories,

    #[error("category weights must sum to 1.0, got {sum:.6}")]
    WeightSum { sum: f64 },

    #[error("category `{category}` has invalid weight {weight}")]
    InvalidCategoryWeight { category: String, weight: f64 },

    #[error("`{name}` is declared more than once")]
    Duplicate { name: String },

    #[error("factor `{factor}` references undeclared category `{category}`")]
    UndeclaredCategory { factor: String, category: String },

    #[error("factor `{factor}` has invalid weight {weight}")]
    InvalidFactorWeight { factor: String, weight: f64 },

    #[error("factor `{factor}` has invalid thresholds (good {good}, bad {bad})")]
    InvalidThresholds { factor: String, good: f64, bad: f64 },

    #[error("factor `{factor}` has an invalid ordinal table: {detail}")]
    InvalidOrdinalTable { factor: String, detail: String },

    #[error("factor `{factor}` carries a bonus but is not a valid high-impact boolean factor")]
    InvalidBonus { factor: String },

    #[error("core factor `{factor}` is not configured")]
    MissingCoreFactor { factor: String },

    #[error(
        "tier boundaries must satisfy 0 < medium < high < critical <= 100 \
         (got {medium}, {high}, {critical})"
    )]
    NonMonotonicTiers { medium: f64, high: f64, critical: f64 },

    #[error("threshold override on `{factor}` is invalid: {detail}")]
    InvalidThresholdOverride { factor: String, detail: String },

    #[error("notable threshold {0} is outside [0, 100]")]
    InvalidNotableThreshold(f64),

    #[error("`{source_name}` references undeclared flag `{flag}`")]
    UndeclaredFlag { source_name: String, flag: String },

    #[error("flag `{flag}` has no dedicated recommendation")]
    FlagWithoutRecommendation { flag: String },

    #[error("recommendations reference undeclared category `{category}`")]
    UndeclaredRecommendationCategory { category: String },

    #[error("recommendation in `{scope}` has an empty title")]
    EmptyRecommendationTitle { scope: String },

    #[error("worker pool size must be at least 1")]
    InvalidWorkerCount,

    #[error("unknown factor `{factor}` in category `{category}`")]
    UnknownFactor { factor: String, category: String },

    #[error("unknown flag `{flag}`")]
    UnknownFlag { flag: String },

    #[error("factor `{factor}` belongs to `{expected}`, signal filed it under `{found}`")]
    CategoryMismatch {
        factor: String,
        expected: String,
        found: String,
    },

    #[error("factor `{factor}` expects a {expected} value")]
    ValueKindMismatch {
        factor: String,
        expected: &'static str,
    },

    #[error("factor `{factor}` has no ordinal level `{level}`")]
    UnknownLevel { factor: String, level: String },
}

impl ConfigError {
    /// True for the unknown-factor rejection raised while normalizing a signal.
    pub fn is_unknown_factor(&self) -> bool {
        matches!(self, ConfigError::UnknownFactor { .. })
    }
}

/// Failures of a batch evaluation as a whole.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("all {count} signals failed evaluation; first failure: {first}")]
    AllSignalsFailed { count: usize, first: String },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
