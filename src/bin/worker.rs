//! TransferScope worker CLI.
//!
//! Operator-facing job runner: seeding, signal derivation, candidate
//! generation, feature building, training, scoring, evaluation, the daily
//! pipeline, and store utilities. Exit code 0 on success, 1 on any abort.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transferscope_backend::jobs::daily::{run_daily, DailyOptions};
use transferscope_backend::jobs::predict::DEFAULT_MAX_PREDICTIONS_PER_PLAYER;
use transferscope_backend::jobs::train::DEFAULT_LOOKBACK_DAYS;
use transferscope_backend::jobs::{candidates, derive, evaluate, features, predict, seed, train, StopFlag};
use transferscope_backend::ml::ModelType;
use transferscope_backend::{Config, Store};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "transferscope-worker",
    version,
    about = "TransferScope worker - batch jobs for transfer intelligence"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load deterministic demo data
    #[command(name = "ingest:demo")]
    IngestDemo {
        #[arg(long)]
        as_of: Option<String>,
    },
    /// Build feature snapshots for all active players
    #[command(name = "features:build")]
    FeaturesBuild {
        #[arg(long)]
        as_of: Option<String>,
        #[arg(long, default_value_t = 90)]
        horizon: i64,
    },
    /// Train a prediction model
    #[command(name = "model:train")]
    ModelTrain {
        #[arg(long)]
        as_of: Option<String>,
        #[arg(long, default_value_t = 90)]
        horizon: i64,
        #[arg(long, default_value = "gradient_boosting")]
        model_type: String,
        #[arg(long, default_value_t = DEFAULT_LOOKBACK_DAYS)]
        lookback: i64,
    },
    /// List registered model versions
    #[command(name = "model:list")]
    ModelList {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Evaluate a model version over a backtest window
    #[command(name = "model:evaluate")]
    ModelEvaluate {
        #[arg(long)]
        model_version: String,
        /// Must match the version's trained horizon when given
        #[arg(long)]
        horizon: Option<i64>,
        #[arg(long, default_value_t = evaluate::DEFAULT_EVAL_LOOKBACK_DAYS)]
        lookback: i64,
    },
    /// Score all active players and persist snapshots
    #[command(name = "predict:run")]
    PredictRun {
        #[arg(long)]
        as_of: Option<String>,
        #[arg(long, default_value_t = 90)]
        horizon: i64,
        #[arg(long, default_value_t = DEFAULT_MAX_PREDICTIONS_PER_PLAYER)]
        max_candidates: usize,
    },
    /// Score a single player without persisting
    #[command(name = "predict:player")]
    PredictPlayer {
        player_id: Uuid,
        #[arg(long, default_value_t = 90)]
        horizon: i64,
    },
    /// Derive user signals from recent events
    #[command(name = "signals:derive")]
    SignalsDerive {
        #[arg(long, default_value = "24h")]
        window: String,
        #[arg(long)]
        as_of: Option<String>,
    },
    /// Generate candidate sets
    #[command(name = "candidates:generate")]
    CandidatesGenerate {
        #[arg(long)]
        as_of: Option<String>,
        #[arg(long, default_value_t = 90)]
        horizon: i64,
        #[arg(long)]
        player_id: Option<Uuid>,
    },
    /// Show recent candidate sets for a player
    #[command(name = "candidates:show")]
    CandidatesShow {
        player_id: Uuid,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Audit candidate sets across players
    #[command(name = "candidates:audit")]
    CandidatesAudit {
        #[arg(long)]
        as_of: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Run the daily pipeline: signals -> candidates -> features -> predict
    #[command(name = "daily:run")]
    DailyRun {
        #[arg(long, default_value_t = 90)]
        horizon: i64,
        #[arg(long)]
        skip_signals: bool,
        #[arg(long)]
        skip_candidates: bool,
        #[arg(long)]
        skip_features: bool,
        #[arg(long)]
        skip_predictions: bool,
    },
    /// Print table row counts
    #[command(name = "db:check")]
    DbCheck,
    /// Rebuild the market projection
    #[command(name = "refresh:views")]
    RefreshViews,
}

/// Accept RFC 3339 timestamps or plain dates; default to now.
fn parse_as_of(value: Option<&str>) -> Result<DateTime<Utc>> {
    let Some(raw) = value else {
        return Ok(Utc::now());
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    bail!("invalid as-of {raw:?}; use RFC 3339 or YYYY-MM-DD")
}

/// Window strings like `24h`, `7d`, `30m`.
fn parse_window(raw: &str) -> Result<Duration> {
    let (number, unit) = raw.split_at(raw.len().saturating_sub(1));
    let n: i64 = number
        .parse()
        .with_context(|| format!("invalid window {raw:?}"))?;
    match unit {
        "m" => Ok(Duration::minutes(n)),
        "h" => Ok(Duration::hours(n)),
        "d" => Ok(Duration::days(n)),
        _ => bail!("invalid window {raw:?}; use <n>m, <n>h or <n>d"),
    }
}

fn run_command(cli: Cli, config: Config, store: Store, stop: StopFlag) -> Result<()> {
    match cli.command {
        Command::IngestDemo { as_of } => {
            let now = parse_as_of(as_of.as_deref())?;
            let stats = seed::run_demo_seed(&store, now)?;
            println!(
                "seeded: {} competitions, {} clubs, {} players, {} transfers (+{} skipped), {} signals, {} user events",
                stats.competitions,
                stats.clubs,
                stats.players,
                stats.transfers,
                stats.transfers_skipped,
                stats.signals,
                stats.user_events
            );
        }
        Command::FeaturesBuild { as_of, horizon } => {
            let as_of = parse_as_of(as_of.as_deref())?;
            let stats = features::run_feature_build(&store, &config, as_of, horizon, &stop)?;
            println!(
                "feature build: {} players, {} vectors, {} errors{}",
                stats.players_processed,
                stats.vectors_built,
                stats.errors,
                if stats.cancelled { " (cancelled)" } else { "" }
            );
        }
        Command::ModelTrain {
            as_of,
            horizon,
            model_type,
            lookback,
        } => {
            let as_of = parse_as_of(as_of.as_deref())?;
            let model_type: ModelType = model_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let report = train::run_training(&store, &config, as_of, horizon, model_type, lookback)?;
            println!(
                "trained {} {} ({} train / {} test rows): {}",
                report.model_version.model_name,
                report.model_version.model_version,
                report.train_rows,
                report.test_rows,
                report.model_version.metrics
            );
        }
        Command::ModelList { limit } => {
            for version in store.list_model_versions(limit)? {
                println!(
                    "{:<22} {:<18} h{:<4} {:<10} samples={:<6} {}",
                    version.model_name,
                    version.model_version,
                    version.horizon_days,
                    version.status.as_str(),
                    version.training_samples,
                    version.message.unwrap_or_default()
                );
            }
        }
        Command::ModelEvaluate {
            model_version,
            horizon,
            lookback,
        } => {
            let version = store.require_model_version_by_name(&model_version)?;
            if let Some(horizon) = horizon {
                if horizon != version.horizon_days {
                    bail!(
                        "model {} was trained for a {}d horizon, not {}d",
                        model_version,
                        version.horizon_days,
                        horizon
                    );
                }
            }
            let window_end = Utc::now();
            let window_start = window_end - Duration::days(lookback);
            let eval =
                evaluate::run_evaluation(&store, &config, &version, window_start, window_end)?;
            println!(
                "evaluated {}: n={} auc_roc={:?} auc_pr={:?} log_loss={:?} brier={:?} slope={:?} ({} ms)",
                model_version,
                eval.n_samples,
                eval.auc_roc,
                eval.auc_pr,
                eval.log_loss,
                eval.brier,
                eval.calibration_slope,
                eval.duration_ms
            );
        }
        Command::PredictRun {
            as_of,
            horizon,
            max_candidates,
        } => {
            let as_of = parse_as_of(as_of.as_deref())?;
            let stats =
                predict::run_predictions(&store, &config, as_of, horizon, max_candidates, &stop)?;
            println!(
                "predictions ({}): {} players, {} snapshots, {} errors{}",
                stats.model_version,
                stats.players_processed,
                stats.predictions_created,
                stats.errors,
                if stats.cancelled { " (cancelled)" } else { "" }
            );
        }
        Command::PredictPlayer { player_id, horizon } => {
            let as_of = Utc::now();
            let scored = predict::predict_player(&store, &config, player_id, as_of, horizon)?;
            for (club_id, probability) in scored {
                let name = store
                    .get_club(club_id)?
                    .map(|c| c.name)
                    .unwrap_or_else(|| club_id.to_string());
                println!("{probability:.4}  {name}");
            }
        }
        Command::SignalsDerive { window, as_of } => {
            let as_of = parse_as_of(as_of.as_deref())?;
            let window = parse_window(&window)?;
            let stats = derive::run_signal_derivation(&store, &config, window, as_of)?;
            println!(
                "derived: {} attention, {} cooccurrence, {} watchlist, {} errors",
                stats.attention_signals,
                stats.cooccurrence_signals,
                stats.watchlist_signals,
                stats.errors
            );
        }
        Command::CandidatesGenerate {
            as_of,
            horizon,
            player_id,
        } => {
            let as_of = parse_as_of(as_of.as_deref())?;
            let stats = candidates::run_candidate_generation(
                &store, &config, as_of, horizon, player_id, &stop,
            )?;
            println!(
                "candidates: {} players, {} candidates, {} errors{}",
                stats.players_processed,
                stats.candidates_written,
                stats.errors,
                if stats.cancelled { " (cancelled)" } else { "" }
            );
        }
        Command::CandidatesShow { player_id, limit } => {
            let player = store.require_player(player_id)?;
            println!("candidate sets for {}:", player.name);
            for set in store.candidate_sets_for_player(player_id, limit)? {
                println!(
                    "  as_of={} horizon={}d total={} (league={} social={} attention={} fit={} random={})",
                    set.as_of,
                    set.horizon_days,
                    set.total_candidates,
                    set.source_counts.league,
                    set.source_counts.social,
                    set.source_counts.user_attention,
                    set.source_counts.constraint_fit,
                    set.source_counts.random
                );
                for candidate in &set.candidates {
                    let name = store
                        .get_club(candidate.club_id)?
                        .map(|c| c.name)
                        .unwrap_or_else(|| candidate.club_id.to_string());
                    println!(
                        "    {:<24} {:<14} {:.2}  {}",
                        name,
                        candidate.source.as_str(),
                        candidate.score,
                        candidate.reason
                    );
                }
            }
        }
        Command::CandidatesAudit { as_of, limit } => {
            let as_of = as_of.as_deref().map(|raw| parse_as_of(Some(raw))).transpose()?;
            for set in store.candidate_sets_audit(as_of, limit)? {
                let name = store
                    .get_player(set.player_id)?
                    .map(|p| p.name)
                    .unwrap_or_else(|| set.player_id.to_string());
                println!(
                    "{:<24} as_of={} horizon={}d total={} context={}",
                    name, set.as_of, set.horizon_days, set.total_candidates, set.player_context
                );
            }
        }
        Command::DailyRun {
            horizon,
            skip_signals,
            skip_candidates,
            skip_features,
            skip_predictions,
        } => {
            let report = run_daily(
                &store,
                &config,
                Utc::now(),
                DailyOptions {
                    horizon_days: horizon,
                    skip_signals,
                    skip_candidates,
                    skip_features,
                    skip_predictions,
                },
                &stop,
            )?;
            println!(
                "daily pipeline: ran {:?}, failed {:?}, skipped {:?}",
                report.stages_run, report.stages_failed, report.stages_skipped
            );
            if !report.all_succeeded() {
                bail!("daily pipeline had failed stages");
            }
        }
        Command::DbCheck => {
            for (table, rows) in store.table_counts()? {
                println!("{table:<24} {rows}");
            }
        }
        Command::RefreshViews => {
            let rows = store.refresh_market_view()?;
            println!("player_market_view refreshed: {rows} rows");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("transferscope_backend=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let stop = StopFlag::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("stop requested, finishing current unit");
                stop.stop();
            }
        });
    }

    let outcome = tokio::task::spawn_blocking(move || -> Result<()> {
        let config = Config::from_env()?;
        let store = Store::open(&config.database_path)?;
        run_command(cli, config, store, stop)
    })
    .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("job panicked: {e}");
            std::process::exit(1);
        }
    }
}
