use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use dropout_risk::aggregate::{evaluate_population_with, Execution};
use dropout_risk::config::EngineConfig;
use dropout_risk::models::StudentSignal;
use dropout_risk::{db, import, report};

#[derive(Parser)]
#[command(name = "dropout-risk")]
#[command(about = "Dropout early warning scoring for Group Scholar cohorts", long_about = None)]
struct Cli {
    /// Scoring scheme (TOML); the bundled scheme is used when omitted
    #[arg(long, global = true, env = "DROPOUT_RISK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("source")
        .args(["input", "cohort"])
        .required(true)
        .multiple(false)
))]
struct Source {
    /// Signals file (.json array or wide .csv)
    #[arg(long)]
    input: Option<PathBuf>,
    /// Load signals for a cohort from Postgres
    #[arg(long)]
    cohort: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import student signals from a CSV file into Postgres
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Cohort for rows without a cohort column
        #[arg(long)]
        cohort: Option<String>,
    },
    /// Score risk across a population
    Score {
        #[command(flatten)]
        source: Source,
        /// Evaluate students on a thread pool
        #[arg(long)]
        parallel: bool,
        /// Worker threads for --parallel (defaults to the config, then all cores)
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
        /// Persist results to Postgres
        #[arg(long)]
        record: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        source: Source,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Validate a scoring scheme
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;
    debug!(
        categories = config.weights.categories.len(),
        factors = config.factors.factors.len(),
        "configuration loaded"
    );

    match cli.command {
        Commands::InitDb => {
            db::init_db(&connect().await?).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let stored = db::seed(&connect().await?).await?;
            println!("Seeded {stored} students.");
        }
        Commands::Import { csv, cohort } => {
            let rows = import::read_csv_path(&csv, &config.factors)?;
            let stored = db::store_signals(&connect().await?, &rows, cohort.as_deref()).await?;
            println!("Imported {stored} students from {}.", csv.display());
        }
        Commands::Score {
            source,
            parallel,
            workers,
            limit,
            json,
            record,
        } => {
            let pool = if source.cohort.is_some() || record {
                Some(connect().await?)
            } else {
                None
            };
            let signals = load_signals(&source, &config, pool.as_ref()).await?;
            let execution = if parallel {
                Execution::Parallel {
                    workers: workers.or(config.alerts.workers),
                }
            } else {
                Execution::Sequential
            };
            let batch = evaluate_population_with(&signals, &config, execution, Utc::now())?;

            if let Some(pool) = pool.as_ref().filter(|_| record) {
                let recorded = db::record_assessments(pool, &batch).await?;
                eprintln!("Recorded {recorded} assessments.");
            }

            if json {
                println!("{}", report::to_json(&batch)?);
                return Ok(());
            }

            if batch.results.is_empty() {
                println!("No students found for this scope.");
                return Ok(());
            }

            let mut ranked: Vec<_> = batch.results.iter().collect();
            ranked.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score));

            println!("Top students by risk score:");
            for result in ranked.iter().take(limit) {
                let action = result
                    .recommendations
                    .first()
                    .map(|rec| rec.title.as_str())
                    .unwrap_or("none");
                println!(
                    "- {} {} score {:.2}, next action: {}",
                    result.identifier, result.tier, result.composite_score, action
                );
            }
            for failure in &batch.errors {
                println!("! {} rejected: {}", failure.identifier, failure.error);
            }
        }
        Commands::Report { source, out } => {
            let pool = match source.cohort {
                Some(_) => Some(connect().await?),
                None => None,
            };
            let signals = load_signals(&source, &config, pool.as_ref()).await?;
            let batch =
                evaluate_population_with(&signals, &config, Execution::Sequential, Utc::now())?;
            let markdown = report::build_report(
                source.cohort.as_deref(),
                &batch,
                config.tiers.notable_threshold,
            );
            std::fs::write(&out, markdown)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::CheckConfig => {
            let source = cli
                .config
                .as_deref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "bundled scheme".to_string());
            println!(
                "{source} is valid: {} categories, {} factors, {} flags, tiers at {}/{}/{}.",
                config.weights.categories.len(),
                config.factors.factors.len(),
                config.factors.flags.len(),
                config.tiers.medium,
                config.tiers.high,
                config.tiers.critical
            );
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn load_signals(
    source: &Source,
    config: &EngineConfig,
    pool: Option<&PgPool>,
) -> anyhow::Result<Vec<StudentSignal>> {
    match (&source.input, pool) {
        (Some(path), _) => import::read_signals(path, &config.factors),
        (None, Some(pool)) => db::fetch_signals(pool, source.cohort.as_deref()).await,
        (None, None) => anyhow::bail!("either --input or --cohort is required"),
    }
}
