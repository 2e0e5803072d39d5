//! Model training.
//!
//! Assembles the leakage-checked training frame, fits preprocessing on the
//! training split only, trains the configured classifier, and registers the
//! run in `model_versions` with its artifact on disk. Deterministic for a
//! fixed store, as-of and seed.

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::jobs::features::{
    build_training_frame, ordered_values, TrainingFrame, UniformNegativeSampler, FEATURE_COLUMNS,
};
use crate::ml::{
    metrics, GbdtModel, GbdtParams, LogisticModel, LogisticParams, MedianImputer, ModelArtifact,
    ModelType, StandardScaler, TrainedModel,
};
use crate::models::{ModelStatus, ModelVersion};
use crate::store::Store;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_LOOKBACK_DAYS: i64 = 730;

/// Prediction models are named per horizon; scoring looks them up by this.
pub fn model_name_for_horizon(horizon_days: i64) -> String {
    format!("transfer_xgb_{horizon_days}d")
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub model_version: ModelVersion,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// Extract the fixed ordered matrix from the frame. A column absent from a
/// row is treated as missing and warned about once.
fn prepare_matrix(frame: &TrainingFrame) -> (Vec<Vec<Option<f64>>>, Vec<f64>) {
    let mut warned: Vec<&str> = Vec::new();
    let mut x = Vec::with_capacity(frame.rows.len());
    let mut y = Vec::with_capacity(frame.rows.len());

    for row in &frame.rows {
        for name in FEATURE_COLUMNS {
            if !row.features.contains_key(name) && !warned.contains(&name) {
                warn!(feature = name, "feature missing from frame, filling with 0");
                warned.push(name);
            }
        }
        x.push(ordered_values(&row.features));
        y.push(row.label);
    }
    (x, y)
}

/// Stratified index split: each class contributes `test_fraction` to the
/// held-out set, shuffled by the run seed.
fn stratified_split(y: &[f64], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [0.0, 1.0] {
        let mut indices: Vec<usize> = y
            .iter()
            .enumerate()
            .filter(|(_, &label)| label == class)
            .map(|(i, _)| i)
            .collect();
        indices.shuffle(&mut rng);
        let n_test = ((indices.len() as f64) * test_fraction).round() as usize;
        // Keep at least one example of each present class in training.
        let n_test = n_test.min(indices.len().saturating_sub(1));
        test.extend(indices.drain(..n_test));
        train.extend(indices);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Train and register a model for `horizon_days` as of `as_of`.
pub fn run_training(
    store: &Store,
    config: &Config,
    as_of: DateTime<Utc>,
    horizon_days: i64,
    model_type: ModelType,
    lookback_days: i64,
) -> Result<TrainReport> {
    let model_name = model_name_for_horizon(horizon_days);
    let model_version_str = format!("v{}", as_of.format("%Y%m%d%H%M%S"));
    info!(
        model = model_name,
        version = model_version_str,
        ?model_type,
        horizon_days,
        lookback_days,
        "training model"
    );

    let sampler = UniformNegativeSampler {
        seed: config.random_seed,
    };
    let frame = build_training_frame(
        store,
        as_of.date_naive(),
        lookback_days,
        horizon_days,
        &sampler,
    )?;

    if frame.rows.len() < config.min_training_samples {
        let message = format!(
            "{} samples below minimum {}",
            frame.rows.len(),
            config.min_training_samples
        );
        store.register_model_version(&ModelVersion {
            id: Uuid::new_v4(),
            model_name: model_name.clone(),
            model_version: model_version_str.clone(),
            horizon_days,
            training_as_of: as_of,
            training_samples: frame.rows.len() as i64,
            positive_samples: frame.positives as i64,
            feature_names: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
            metrics: json!({}),
            feature_importances: json!({}),
            artifact_path: None,
            status: ModelStatus::Failed,
            message: Some(message.clone()),
            created_at: Utc::now(),
        })?;
        return Err(CoreError::InsufficientData(message));
    }

    let (x, y) = prepare_matrix(&frame);
    let (train_idx, test_idx) = stratified_split(&y, config.test_split, config.random_seed);

    let x_train: Vec<Vec<Option<f64>>> = train_idx.iter().map(|&i| x[i].clone()).collect();
    let y_train: Vec<f64> = train_idx.iter().map(|&i| y[i]).collect();
    let x_test: Vec<Vec<Option<f64>>> = test_idx.iter().map(|&i| x[i].clone()).collect();
    let y_test: Vec<f64> = test_idx.iter().map(|&i| y[i]).collect();

    // Preprocessing statistics come from the training split only.
    let imputer = MedianImputer::fit(&x_train, FEATURE_COLUMNS.len());
    let scaler = StandardScaler::fit(&imputer.transform(&x_train), FEATURE_COLUMNS.len());

    let x_train_prep = scaler.transform(&imputer.transform(&x_train));
    let x_test_prep = scaler.transform(&imputer.transform(&x_test));

    let model = match model_type {
        ModelType::Logistic => TrainedModel::Logistic(LogisticModel::train(
            &x_train_prep,
            &y_train,
            &LogisticParams::default(),
        )),
        ModelType::GradientBoosting => TrainedModel::Gbdt(GbdtModel::train(
            &x_train_prep,
            &y_train,
            &GbdtParams::default(),
        )),
    };

    let y_prob: Vec<f64> = x_test_prep.iter().map(|row| model.predict_proba(row)).collect();
    let held_out = metrics::threshold_metrics(&y_test, &y_prob, 0.5);
    let auc = metrics::auc_roc(&y_test, &y_prob);

    let importances: BTreeMap<String, f64> = FEATURE_COLUMNS
        .iter()
        .map(|s| s.to_string())
        .zip(model.feature_importances())
        .collect();

    let artifact = ModelArtifact {
        model,
        imputer,
        scaler,
        feature_names: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
        model_version: model_version_str.clone(),
        horizon_days,
        created_at: Utc::now(),
    };
    let artifact_path =
        ModelArtifact::path_for(&config.model_storage_path, &model_name, &model_version_str);
    artifact.save(&artifact_path)?;

    let metrics_json = json!({
        "accuracy": held_out.accuracy,
        "precision": held_out.precision,
        "recall": held_out.recall,
        "f1": held_out.f1,
        "auc_roc": auc,
        "train_rows": train_idx.len(),
        "test_rows": test_idx.len(),
        "skipped_leakage": frame.skipped_leakage,
    });

    let version = ModelVersion {
        id: Uuid::new_v4(),
        model_name,
        model_version: model_version_str,
        horizon_days,
        training_as_of: as_of,
        training_samples: frame.rows.len() as i64,
        positive_samples: frame.positives as i64,
        feature_names: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
        metrics: metrics_json,
        feature_importances: serde_json::to_value(&importances)?,
        artifact_path: Some(artifact_path.display().to_string()),
        status: ModelStatus::Completed,
        message: None,
        created_at: Utc::now(),
    };
    store.register_model_version(&version)?;

    info!(
        version = version.model_version,
        samples = version.training_samples,
        positives = version.positive_samples,
        accuracy = held_out.accuracy,
        auc = ?auc,
        "training complete"
    );

    Ok(TrainReport {
        model_version: version,
        train_rows: train_idx.len(),
        test_rows: test_idx.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stratified_split_preserves_classes() {
        let y: Vec<f64> = (0..100).map(|i| if i < 20 { 1.0 } else { 0.0 }).collect();
        let (train, test) = stratified_split(&y, 0.2, 42);

        assert_eq!(train.len() + test.len(), 100);
        let test_pos = test.iter().filter(|&&i| y[i] == 1.0).count();
        assert_eq!(test_pos, 4);
        let train_pos = train.iter().filter(|&&i| y[i] == 1.0).count();
        assert_eq!(train_pos, 16);

        // Deterministic under the same seed, different under another.
        let (train2, _) = stratified_split(&y, 0.2, 42);
        assert_eq!(train, train2);
        let (train3, _) = stratified_split(&y, 0.2, 43);
        assert_ne!(train, train3);
    }

    #[test]
    fn test_insufficient_data_registers_failed_version() {
        let store = Store::open_in_memory().unwrap();
        let config = Config::default();
        let as_of = DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        // Empty store: zero training rows.
        let result = run_training(
            &store,
            &config,
            as_of,
            90,
            ModelType::Logistic,
            DEFAULT_LOOKBACK_DAYS,
        );
        assert!(matches!(result, Err(CoreError::InsufficientData(_))));

        let versions = store.list_model_versions(10).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].status, ModelStatus::Failed);
        assert!(versions[0].message.as_deref().unwrap().contains("below minimum"));
    }
}
