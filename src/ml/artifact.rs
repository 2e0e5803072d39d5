//! The on-disk model bundle.
//!
//! Everything scoring needs travels together: the fitted model, the imputer
//! and scaler statistics, the ordered feature names, and the version
//! metadata. Serialized with serde to `<storage>/<model_name>/<version>.bin`;
//! the encoding is deterministic for a given artifact.

use super::{MedianImputer, StandardScaler, TrainedModel};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model: TrainedModel,
    pub imputer: MedianImputer,
    pub scaler: StandardScaler,
    pub feature_names: Vec<String>,
    pub model_version: String,
    pub horizon_days: i64,
    pub created_at: DateTime<Utc>,
}

impl ModelArtifact {
    /// Path under `storage` for a (model_name, version) pair.
    pub fn path_for(storage: &Path, model_name: &str, model_version: &str) -> PathBuf {
        storage.join(model_name).join(format!("{model_version}.bin"))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Any failure here maps to `ArtifactLoadFailure`; the scorer reacts by
    /// falling back to the heuristic.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            CoreError::ArtifactLoadFailure(format!("read {}: {e}", path.display()))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            CoreError::ArtifactLoadFailure(format!("decode {}: {e}", path.display()))
        })
    }

    /// Preprocess one raw feature row and predict.
    pub fn score_row(&self, raw: &[Option<f64>]) -> f64 {
        let imputed = self.imputer.transform_row(raw);
        let scaled = self.scaler.transform_row(&imputed);
        self.model.predict_proba(&scaled)
    }

    /// Importances keyed by feature name.
    pub fn importances_by_name(&self) -> Vec<(String, f64)> {
        self.feature_names
            .iter()
            .cloned()
            .zip(self.model.feature_importances())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{LogisticModel, LogisticParams};

    fn toy_artifact() -> ModelArtifact {
        let x = vec![vec![1.0, 0.0], vec![-1.0, 0.0], vec![1.2, 0.1], vec![-1.2, -0.1]];
        let y = vec![1.0, 0.0, 1.0, 0.0];
        let model = LogisticModel::train(&x, &y, &LogisticParams::default());

        ModelArtifact {
            model: TrainedModel::Logistic(model),
            imputer: MedianImputer {
                medians: vec![0.0, 0.0],
            },
            scaler: StandardScaler {
                means: vec![0.0, 0.0],
                stds: vec![1.0, 1.0],
            },
            feature_names: vec!["a".to_string(), "b".to_string()],
            model_version: "v20250101000000".to_string(),
            horizon_days: 90,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_load_round_trip_preserves_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = toy_artifact();
        let path = ModelArtifact::path_for(dir.path(), "transfer_xgb_90d", "v20250101000000");

        artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();

        let row = vec![Some(0.8), None];
        assert_eq!(artifact.score_row(&row), loaded.score_row(&row));
        assert_eq!(loaded.feature_names, artifact.feature_names);
    }

    #[test]
    fn test_missing_artifact_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope/missing.bin");
        match ModelArtifact::load(&path) {
            Err(CoreError::ArtifactLoadFailure(_)) => {}
            other => panic!("expected ArtifactLoadFailure, got {other:?}"),
        }
    }
}
