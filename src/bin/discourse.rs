#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use discourse_features::cache::SqliteScoreCache;
use discourse_features::pipeline::{GenerateOverrides, Pipeline, SampleOutcome};
use discourse_features::PipelineConfig;

#[derive(Parser)]
#[command(name = "discourse", version, about = "Discourse feature pipeline CLI")]
struct Cli {
    /// Pipeline configuration (JSON)
    #[arg(long, global = true, env = "DISCOURSE_CONFIG", default_value = "pipeline.json")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flatten raw posts/comments into the base corpus
    Prepare,
    /// Draw train/validation labeling samples
    Sample,
    /// Validate the oracle against the labeled samples
    Validate {
        /// Restrict to these features (repeatable)
        #[arg(long = "feature")]
        features: Vec<String>,
    },
    /// Score the corpus, resuming from existing feature tables
    Generate {
        #[arg(long = "feature")]
        features: Vec<String>,
        /// Force pilot mode on
        #[arg(long, conflicts_with = "no_pilot")]
        pilot: bool,
        /// Force pilot mode off
        #[arg(long)]
        no_pilot: bool,
        /// Generate even without a passing validation verdict
        #[arg(long)]
        skip_gate: bool,
    },
    /// Join feature tables onto the corpus and filter by relevance
    Assemble,
    /// Export the score cache to JSONL
    CacheExport {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Prune the score cache (by age and/or size)
    CachePrune {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        max_age_days: Option<u64>,
        #[arg(long)]
        max_rows: Option<usize>,
    },
}

fn load_pipeline(path: &PathBuf) -> Result<Pipeline, Box<dyn std::error::Error>> {
    let config = PipelineConfig::load(path)?;
    Ok(Pipeline::new(config)?)
}

fn cache_path(config: &PathBuf, db: Option<PathBuf>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match db {
        Some(path) => Ok(path),
        None => Ok(load_pipeline(config)?.store().cache_path()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prepare => {
            let pipeline = load_pipeline(&cli.config)?;
            let stats = pipeline.prepare()?;
            println!(
                "{} records written ({} comments in, {} orphaned, {} noise, {} duplicates)",
                stats.records_out,
                stats.comments_in,
                stats.orphaned,
                stats.noise_comments + stats.noise_posts,
                stats.duplicates
            );
        }
        Commands::Sample => {
            let pipeline = load_pipeline(&cli.config)?;
            match pipeline.sample()? {
                SampleOutcome::AlreadyExists => {
                    println!("labeling samples already exist; nothing written");
                }
                SampleOutcome::Written {
                    train,
                    validation,
                    warnings,
                } => {
                    println!("wrote {train} train and {validation} validation records");
                    if !warnings.is_empty() {
                        println!(
                            "warnings: missing train ids {:?}, missing validation ids {:?}, shortfall {}",
                            warnings.missing_train_ids, warnings.missing_val_ids, warnings.shortfall
                        );
                    }
                }
            }
        }
        Commands::Validate { features } => {
            let pipeline = load_pipeline(&cli.config)?;
            let (oracle, usage) = pipeline.build_oracle()?;
            let summary = pipeline.validate(&oracle, &features).await?;
            for outcome in &summary.outcomes {
                let value = outcome
                    .metric_value
                    .map(|v| format!("{v:.4}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24} {:<20} {:>8}  threshold {:<6} {:?}",
                    outcome.feature.name(),
                    outcome.metric.name(),
                    value,
                    outcome.threshold,
                    outcome.verdict
                );
            }
            let totals = usage.totals();
            println!(
                "report: {} ({} calls, ${:.4})",
                summary.report_path.display(),
                totals.calls,
                totals.cost_usd()
            );
        }
        Commands::Generate {
            features,
            pilot,
            no_pilot,
            skip_gate,
        } => {
            let pipeline = load_pipeline(&cli.config)?;
            let (oracle, usage) = pipeline.build_oracle()?;
            let overrides = GenerateOverrides {
                pilot: if pilot {
                    Some(true)
                } else if no_pilot {
                    Some(false)
                } else {
                    None
                },
                skip_gate,
            };

            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; stopping before the next record");
                    flag.store(true, Ordering::Relaxed);
                }
            });

            let summaries = pipeline
                .generate(&oracle, &features, &overrides, Some(cancel.as_ref()))
                .await?;
            for s in &summaries {
                println!(
                    "{:<24} queued {:>6}  processed {:>6}  sentinels {:>4}  flushes {:>4}{}",
                    s.feature.name(),
                    s.queued,
                    s.processed,
                    s.failures,
                    s.flushes,
                    if s.cancelled { "  (cancelled)" } else { "" }
                );
            }
            let totals = usage.totals();
            println!("{} calls, ${:.4}", totals.calls, totals.cost_usd());
        }
        Commands::Assemble => {
            let pipeline = load_pipeline(&cli.config)?;
            let summary = pipeline.assemble()?;
            println!(
                "kept {} of {} records -> {}",
                summary.kept,
                summary.base_records,
                summary.path.display()
            );
        }
        Commands::CacheExport { db, out } => {
            let cache = SqliteScoreCache::new(cache_path(&cli.config, db)?)?;
            let rows = cache.export_jsonl(out).await?;
            println!("exported {rows} rows");
        }
        Commands::CachePrune {
            db,
            max_age_days,
            max_rows,
        } => {
            if max_age_days.is_none() && max_rows.is_none() {
                return Err("cache-prune requires --max-age-days and/or --max-rows".into());
            }
            if matches!(max_rows, Some(0)) {
                return Err("--max-rows must be >= 1".into());
            }
            let cache = SqliteScoreCache::new(cache_path(&cli.config, db)?)?;
            let stats = cache.prune(max_age_days, max_rows).await?;
            println!(
                "pruned {} rows; {} rows remain",
                stats.deleted, stats.remaining
            );
        }
    }

    Ok(())
}
