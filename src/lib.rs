//! Dropout early-warning engine: normalizes heterogeneous student signals,
//! blends them into a bounded risk score, classifies the score into tiers
//! with override rules, and recommends ranked interventions.
//!
//! The scoring path (`normalize` → `scorer` → `classify` → `recommend`) is
//! pure and holds no state between calls. `import`, `db` and `report` are the
//! collaborators the command-line tool wires around it.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod import;
pub mod models;
pub mod normalize;
pub mod recommend;
pub mod report;
pub mod scorer;

pub use aggregate::{evaluate_population, evaluate_population_with, Execution};
pub use config::EngineConfig;
pub use engine::{evaluate_at, evaluate_student};
pub use error::{ConfigError, EvaluationError};
pub use models::{AggregateReport, RawValue, RiskResult, RiskTier, StudentSignal};
