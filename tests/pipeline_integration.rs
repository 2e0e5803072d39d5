//! End-to-end pipeline test over the demo world:
//! seed -> derive -> candidates -> features -> train -> predict -> evaluate.
//!
//! Uses an in-memory store and a temp directory for model artifacts; every
//! stage runs through the same entry points the worker CLI uses.

use chrono::{DateTime, Duration, Utc};
use transferscope_backend::jobs::{candidates, derive, evaluate, features, predict, seed, train, StopFlag};
use transferscope_backend::ml::ModelType;
use transferscope_backend::models::SignalType;
use transferscope_backend::store::MarketViewFilter;
use transferscope_backend::timeguard::{self, SignalEntity};
use transferscope_backend::{Config, Store};

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn test_config(model_dir: &std::path::Path) -> Config {
    Config {
        model_storage_path: model_dir.to_path_buf(),
        ..Config::default()
    }
}

#[test]
fn test_full_pipeline_from_seed_to_snapshots() {
    let store = Store::open_in_memory().unwrap();
    let model_dir = tempfile::tempdir().unwrap();
    let config = test_config(model_dir.path());
    let stop = StopFlag::new();
    let now = ts("2025-06-01T12:00:00Z");

    // Seed the demo world.
    let seeded = seed::run_demo_seed(&store, now).unwrap();
    assert!(seeded.players >= 20);
    assert!(seeded.transfers >= 15);

    // Derive user signals for the trailing day.
    let derived =
        derive::run_signal_derivation(&store, &config, Duration::hours(24), now).unwrap();
    assert!(derived.cooccurrence_signals > 0, "demo sessions must cooccur");
    assert_eq!(derived.errors, 0);

    // Candidate generation: every active player gets an auditable set.
    let generated =
        candidates::run_candidate_generation(&store, &config, now, 90, None, &stop).unwrap();
    assert_eq!(generated.errors, 0);
    assert_eq!(generated.players_processed, seeded.players);

    let audit = store.candidate_sets_audit(Some(now), 100).unwrap();
    assert_eq!(audit.len(), seeded.players);
    for set in &audit {
        assert!(set.total_candidates <= config.max_candidates);
        assert!(!set.candidates.is_empty());
        let counted = set.source_counts.league
            + set.source_counts.social
            + set.source_counts.user_attention
            + set.source_counts.constraint_fit
            + set.source_counts.random;
        assert_eq!(counted, set.total_candidates);
        for candidate in &set.candidates {
            assert!((0.0..=1.0).contains(&candidate.score));
            assert!(!candidate.reason.is_empty());
        }
    }

    // Feature snapshots for every candidate.
    let built = features::run_feature_build(&store, &config, now, 90, &stop).unwrap();
    assert_eq!(built.errors, 0);
    assert!(built.vectors_built > 0);

    // Train on eighteen months of seeded transfers.
    let report = train::run_training(
        &store,
        &config,
        now,
        90,
        ModelType::Logistic,
        train::DEFAULT_LOOKBACK_DAYS,
    )
    .unwrap();
    assert_eq!(report.model_version.model_name, "transfer_xgb_90d");
    assert!(report.model_version.training_samples >= 50);
    assert!(report.model_version.artifact_path.is_some());

    // Score with the trained model.
    let predicted = predict::run_predictions(&store, &config, now, 90, 10, &stop).unwrap();
    assert_eq!(predicted.errors, 0);
    assert!(predicted.predictions_created > 0);
    assert_eq!(predicted.model_version, report.model_version.model_version);

    // Snapshots hold the invariants the market view depends on.
    let players = store.active_players_with_club().unwrap();
    let sample = store
        .latest_predictions_for_player(players[0].id, Some(90), 10)
        .unwrap();
    assert!(!sample.is_empty());
    for snapshot in &sample {
        assert!((0.0..=1.0).contains(&snapshot.probability));
        assert!(snapshot.window_end > snapshot.window_start);
        let drivers = snapshot.drivers.as_object().unwrap();
        let total: f64 = drivers.values().filter_map(|v| v.as_f64()).sum();
        assert!(total <= 1.0 + 1e-6);
    }

    // The projection was refreshed at the end of the scoring run.
    assert!(store.market_view_populated().unwrap());
    let market = store
        .market_latest(&MarketViewFilter {
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert!(!market.is_empty());
    assert!(market.windows(2).all(|w| w[0].probability >= w[1].probability));

    // Evaluate the trained version over the last year of labels.
    let evaluation = evaluate::run_evaluation(
        &store,
        &config,
        &report.model_version,
        now - Duration::days(365),
        now,
    )
    .unwrap();
    assert!(evaluation.n_samples > 0);
    assert!(evaluation.log_loss.is_some());
    assert_eq!(
        evaluation.calibration_bins.as_array().unwrap().len(),
        10
    );
    let stored = store.evaluations_for_model(report.model_version.id).unwrap();
    assert_eq!(stored.len(), 1);
}

#[test]
fn test_rerun_is_idempotent_for_candidates_and_features() {
    let store = Store::open_in_memory().unwrap();
    let model_dir = tempfile::tempdir().unwrap();
    let config = test_config(model_dir.path());
    let stop = StopFlag::new();
    let now = ts("2025-06-01T12:00:00Z");

    seed::run_demo_seed(&store, now).unwrap();
    candidates::run_candidate_generation(&store, &config, now, 90, None, &stop).unwrap();
    features::run_feature_build(&store, &config, now, 90, &stop).unwrap();

    let players = store.active_players_with_club().unwrap();
    let player = players[0].id;
    let set_before = store.get_candidate_set(player, now, 90).unwrap().unwrap();
    let club = set_before.candidates[0].club_id;
    let snap_before = store.get_feature_snapshot(player, club, now).unwrap().unwrap();

    // Re-running the same as-of touches the same logical rows byte-for-byte.
    candidates::run_candidate_generation(&store, &config, now, 90, None, &stop).unwrap();
    features::run_feature_build(&store, &config, now, 90, &stop).unwrap();

    let set_after = store.get_candidate_set(player, now, 90).unwrap().unwrap();
    assert_eq!(
        serde_json::to_string(&set_before.candidates).unwrap(),
        serde_json::to_string(&set_after.candidates).unwrap()
    );
    let snap_after = store.get_feature_snapshot(player, club, now).unwrap().unwrap();
    assert_eq!(
        snap_before.features.to_string(),
        snap_after.features.to_string()
    );
}

#[test]
fn test_heuristic_fallback_produces_snapshots_without_a_model() {
    let store = Store::open_in_memory().unwrap();
    let model_dir = tempfile::tempdir().unwrap();
    let config = test_config(model_dir.path());
    let stop = StopFlag::new();
    let now = ts("2025-06-01T12:00:00Z");

    seed::run_demo_seed(&store, now).unwrap();

    let predicted = predict::run_predictions(&store, &config, now, 90, 10, &stop).unwrap();
    assert_eq!(predicted.model_version, "v0-heuristic");
    assert!(predicted.predictions_created > 0);
    assert_eq!(predicted.errors, 0);

    let players = store.active_players_with_club().unwrap();
    let sample = store
        .latest_predictions_for_player(players[0].id, Some(90), 10)
        .unwrap();
    assert!(!sample.is_empty());
    for snapshot in &sample {
        assert!(!snapshot.drivers.as_object().unwrap().is_empty());
    }
}

#[test]
fn test_derived_signals_are_visible_through_the_guards() {
    let store = Store::open_in_memory().unwrap();
    let config = Config::default();
    let now = ts("2025-06-01T12:00:00Z");

    seed::run_demo_seed(&store, now).unwrap();
    derive::run_signal_derivation(&store, &config, Duration::hours(24), now).unwrap();

    // The seeded sessions pair Felix Armand with Liverpool five times.
    let felix = store
        .search("Felix Armand", 1)
        .unwrap()
        .remove(0);
    let liverpool = store.search("Liverpool", 1).unwrap().remove(0);

    let score = timeguard::latest_num(
        &store,
        SignalEntity::Pair {
            player_id: felix.id,
            club_id: liverpool.id,
        },
        SignalType::UserDestinationCooccurrence,
        now,
    )
    .unwrap();
    assert_eq!(score, Some(50.0));

    // Nothing is visible one week before the derivation instant.
    let earlier = timeguard::latest_num(
        &store,
        SignalEntity::Pair {
            player_id: felix.id,
            club_id: liverpool.id,
        },
        SignalType::UserDestinationCooccurrence,
        now - Duration::days(7),
    )
    .unwrap();
    assert_eq!(earlier, None);
}
