//! Prediction scoring.
//!
//! Loads the newest usable model for the horizon (falling back to a
//! contract-and-league heuristic when none exists or the artifact cannot be
//! read), scores every active player's candidate destinations, and upserts
//! deterministic snapshots with driver attributions. The market-view
//! projection is refreshed at the end of the run.

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::jobs::candidates;
use crate::jobs::features::{build_feature_vector, ordered_values, FeatureVector, FEATURE_COLUMNS};
use crate::jobs::train::model_name_for_horizon;
use crate::jobs::StopFlag;
use crate::ml::ModelArtifact;
use crate::models::{snapshot_id, ModelStatus, PredictionSnapshot};
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_PREDICTIONS_PER_PLAYER: usize = 10;
const DRIVER_TOP_N: usize = 5;

/// A scoring backend. Two implementations: the trained model and the
/// heuristic fallback; chosen at run time.
pub trait Scorer {
    fn model_name(&self) -> &str;
    fn model_version(&self) -> &str;
    fn score(&self, features: &FeatureVector) -> f64;
    fn importances(&self) -> &BTreeMap<String, f64>;
}

/// Scores through a loaded artifact's preprocess-then-predict pipeline.
pub struct ModelScorer {
    artifact: ModelArtifact,
    name: String,
    version: String,
    importances: BTreeMap<String, f64>,
}

impl Scorer for ModelScorer {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn model_version(&self) -> &str {
        &self.version
    }

    fn score(&self, features: &FeatureVector) -> f64 {
        self.artifact.score_row(&ordered_values(features))
    }

    fn importances(&self) -> &BTreeMap<String, f64> {
        &self.importances
    }
}

/// Contract-months-remaining and same-league dominate; produces usable
/// snapshots and drivers in the no-trained-model state.
pub struct HeuristicScorer {
    name: String,
    importances: BTreeMap<String, f64>,
}

impl HeuristicScorer {
    pub fn new(horizon_days: i64) -> Self {
        let importances = [
            ("contract_months_remaining", 0.25),
            ("market_value", 0.20),
            ("user_destination_cooccurrence", 0.15),
            ("age", 0.10),
            ("same_league", 0.10),
            ("tier_difference", 0.10),
            ("social_mention_velocity", 0.10),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            name: model_name_for_horizon(horizon_days),
            importances,
        }
    }
}

impl Scorer for HeuristicScorer {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn model_version(&self) -> &str {
        "v0-heuristic"
    }

    fn score(&self, features: &FeatureVector) -> f64 {
        let contract_months = features
            .get("contract_months_remaining")
            .copied()
            .flatten()
            .unwrap_or(24.0);

        let mut probability: f64 = 0.1;
        if contract_months < 12.0 {
            probability += 0.3;
        } else if contract_months < 24.0 {
            probability += 0.15;
        }
        if features.get("same_league").copied().flatten() == Some(1.0) {
            probability += 0.05;
        }
        probability.min(0.95)
    }

    fn importances(&self) -> &BTreeMap<String, f64> {
        &self.importances
    }
}

/// Pick the scorer for a horizon: newest completed/deployed model, else the
/// heuristic. An unreadable artifact logs and falls back rather than failing
/// the run.
pub fn load_scorer(store: &Store, horizon_days: i64) -> Result<Box<dyn Scorer>> {
    let model_name = model_name_for_horizon(horizon_days);
    let latest = store.latest_model_version(
        &model_name,
        horizon_days,
        &[ModelStatus::Completed, ModelStatus::Deployed],
    )?;

    let Some(version) = latest else {
        info!(model = model_name, "no trained model, using heuristic scorer");
        return Ok(Box::new(HeuristicScorer::new(horizon_days)));
    };

    let Some(path) = version.artifact_path.as_deref() else {
        warn!(version = version.model_version, "model has no artifact path, using heuristic");
        return Ok(Box::new(HeuristicScorer::new(horizon_days)));
    };

    match ModelArtifact::load(std::path::Path::new(path)) {
        Ok(artifact) => {
            let importances = version
                .feature_importances
                .as_object()
                .map(|obj| {
                    obj.iter()
                        .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                        .collect()
                })
                .unwrap_or_default();
            Ok(Box::new(ModelScorer {
                artifact,
                name: model_name,
                version: version.model_version,
                importances,
            }))
        }
        Err(CoreError::ArtifactLoadFailure(msg)) => {
            warn!(
                version = version.model_version,
                error = msg,
                "artifact load failed, falling back to heuristic"
            );
            Ok(Box::new(HeuristicScorer::new(horizon_days)))
        }
        Err(e) => Err(e),
    }
}

/// Driver attribution: top features by importance x min-max-normalized value,
/// renormalized to sum to 1.
pub fn compute_drivers(
    features: &FeatureVector,
    importances: &BTreeMap<String, f64>,
) -> BTreeMap<String, f64> {
    let values: Vec<f64> = FEATURE_COLUMNS
        .iter()
        .map(|name| features.get(*name).copied().flatten().unwrap_or(0.0))
        .collect();

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = max - min;

    let mut contributions: Vec<(String, f64)> = FEATURE_COLUMNS
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            let importance = importances.get(*name).copied().unwrap_or(0.0);
            let normalized = if spread > 0.0 {
                (values[i] - min) / spread
            } else {
                0.5
            };
            let contribution = importance * normalized;
            (contribution > 0.0).then(|| (name.to_string(), contribution))
        })
        .collect();

    contributions.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    contributions.truncate(DRIVER_TOP_N);

    let total: f64 = contributions.iter().map(|(_, c)| c).sum();
    if total > 0.0 {
        for (_, c) in &mut contributions {
            *c /= total;
        }
    }
    contributions.into_iter().collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PredictStats {
    pub players_processed: usize,
    pub predictions_created: usize,
    pub errors: usize,
    pub cancelled: bool,
    pub model_version: String,
}

/// Score all active players for (as_of, horizon) and persist snapshots.
pub fn run_predictions(
    store: &Store,
    config: &Config,
    as_of: DateTime<Utc>,
    horizon_days: i64,
    max_predictions_per_player: usize,
    stop: &StopFlag,
) -> Result<PredictStats> {
    let scorer = load_scorer(store, horizon_days)?;
    info!(
        %as_of,
        horizon_days,
        model = scorer.model_name(),
        version = scorer.model_version(),
        "generating predictions"
    );

    let mut stats = PredictStats {
        model_version: scorer.model_version().to_string(),
        ..Default::default()
    };

    let window_start = as_of.date_naive();
    let window_end = window_start + Duration::days(horizon_days);

    for player in store.active_players_with_club()? {
        if stop.is_stopped() {
            stats.cancelled = true;
            warn!("prediction run cancelled, partial progress kept");
            break;
        }
        let Some(from_club_id) = player.current_club_id else {
            continue;
        };

        let result = (|| -> Result<usize> {
            let mut clubs = candidates::candidate_clubs_for_prediction(
                store, config, player.id, as_of, horizon_days,
            )?;
            clubs.truncate(max_predictions_per_player);

            let mut created = 0;
            for to_club_id in clubs {
                let features =
                    build_feature_vector(store, player.id, from_club_id, to_club_id, as_of)?;
                let probability = scorer.score(&features);
                let drivers = compute_drivers(&features, scorer.importances());

                store.upsert_snapshot(&PredictionSnapshot {
                    id: Uuid::new_v4(),
                    snapshot_id: snapshot_id(player.id, Some(to_club_id), horizon_days, as_of),
                    model_version: scorer.model_version().to_string(),
                    model_name: scorer.model_name().to_string(),
                    player_id: player.id,
                    from_club_id: Some(from_club_id),
                    to_club_id: Some(to_club_id),
                    horizon_days,
                    probability,
                    drivers: serde_json::to_value(&drivers)?,
                    features: Some(serde_json::to_value(&features)?),
                    as_of,
                    window_start,
                    window_end,
                    created_at: Utc::now(),
                })?;
                created += 1;
            }
            Ok(created)
        })();

        match result {
            Ok(created) => {
                stats.players_processed += 1;
                stats.predictions_created += created;
            }
            Err(e) => {
                warn!(player = %player.name, error = %e, "prediction failed for player");
                stats.errors += 1;
            }
        }
    }

    store.refresh_market_view()?;

    info!(
        players = stats.players_processed,
        predictions = stats.predictions_created,
        errors = stats.errors,
        "prediction run complete"
    );
    Ok(stats)
}

/// One player's ranked predictions, without persisting (CLI convenience).
pub fn predict_player(
    store: &Store,
    config: &Config,
    player_id: Uuid,
    as_of: DateTime<Utc>,
    horizon_days: i64,
) -> Result<Vec<(Uuid, f64)>> {
    let player = store.require_player(player_id)?;
    let from_club_id = player.current_club_id.ok_or_else(|| {
        CoreError::Validation(format!("player {} has no current club", player.name))
    })?;

    let scorer = load_scorer(store, horizon_days)?;
    let clubs =
        candidates::candidate_clubs_for_prediction(store, config, player_id, as_of, horizon_days)?;

    let mut scored = Vec::with_capacity(clubs.len());
    for to_club_id in clubs {
        let features = build_feature_vector(store, player_id, from_club_id, to_club_id, as_of)?;
        scored.push((to_club_id, scorer.score(&features)));
    }
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features_with(pairs: &[(&str, Option<f64>)]) -> FeatureVector {
        let mut map = FeatureVector::new();
        for name in FEATURE_COLUMNS {
            map.insert(name.to_string(), None);
        }
        for (name, value) in pairs {
            map.insert(name.to_string(), *value);
        }
        map
    }

    #[test]
    fn test_heuristic_scorer_contract_and_league_terms() {
        let scorer = HeuristicScorer::new(90);

        let expiring = features_with(&[
            ("contract_months_remaining", Some(6.0)),
            ("same_league", Some(1.0)),
        ]);
        assert!((scorer.score(&expiring) - 0.45).abs() < 1e-9);

        let secure = features_with(&[("contract_months_remaining", Some(48.0))]);
        assert!((scorer.score(&secure) - 0.1).abs() < 1e-9);

        // Missing contract months defaults to a mid-contract 24.
        let unknown = features_with(&[]);
        assert!((scorer.score(&unknown) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_drivers_top_five_sum_to_one() {
        let scorer = HeuristicScorer::new(90);
        let features = features_with(&[
            ("contract_months_remaining", Some(6.0)),
            ("market_value", Some(50_000_000.0)),
            ("age", Some(24.0)),
            ("same_league", Some(1.0)),
            ("tier_difference", Some(0.0)),
            ("social_mention_velocity", Some(4.0)),
            ("user_destination_cooccurrence", Some(40.0)),
        ]);

        let drivers = compute_drivers(&features, scorer.importances());
        assert!(!drivers.is_empty());
        assert!(drivers.len() <= DRIVER_TOP_N);
        let total: f64 = drivers.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(drivers.values().all(|&v| v >= 0.0));
        // Market value dwarfs every other raw value, so its normalized
        // contribution leads.
        assert!(drivers.contains_key("market_value"));
    }

    #[test]
    fn test_drivers_constant_vector_splits_by_importance() {
        let scorer = HeuristicScorer::new(90);
        // Every value missing: the min-max spread collapses, normalization
        // falls back to 0.5 and contributions follow importances alone.
        let features = features_with(&[]);
        let drivers = compute_drivers(&features, scorer.importances());
        assert_eq!(drivers.len(), DRIVER_TOP_N);
        let total: f64 = drivers.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(drivers.contains_key("contract_months_remaining"));
    }
}
