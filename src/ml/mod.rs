//! In-crate ML: preprocessing, two binary classifiers, evaluation metrics,
//! and the serialized artifact bundle.
//!
//! The models are deliberately small and deterministic: a class-balanced
//! logistic regression trained by gradient descent, and gradient-boosted
//! regression trees on the logistic loss. Both expose probabilities and
//! normalized feature importances through one enum.

pub mod artifact;
pub mod gbdt;
pub mod logistic;
pub mod metrics;
pub mod preprocess;

pub use artifact::ModelArtifact;
pub use gbdt::{GbdtModel, GbdtParams};
pub use logistic::{LogisticModel, LogisticParams};
pub use preprocess::{MedianImputer, StandardScaler};

use serde::{Deserialize, Serialize};

/// Which classifier a training run fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Logistic,
    GradientBoosting,
}

impl std::str::FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logistic" => Ok(Self::Logistic),
            "gradient_boosting" | "gbdt" => Ok(Self::GradientBoosting),
            other => Err(format!("unknown model type: {other}")),
        }
    }
}

/// A fitted classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TrainedModel {
    Logistic(LogisticModel),
    Gbdt(GbdtModel),
}

impl TrainedModel {
    /// Probability of the positive class for one preprocessed row.
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        match self {
            Self::Logistic(m) => m.predict_proba(row),
            Self::Gbdt(m) => m.predict_proba(row),
        }
    }

    /// Per-feature importances, non-negative, summing to 1 (all zeros when
    /// the model learned nothing).
    pub fn feature_importances(&self) -> Vec<f64> {
        match self {
            Self::Logistic(m) => m.feature_importances(),
            Self::Gbdt(m) => m.feature_importances(),
        }
    }
}

/// Normalize a non-negative vector to sum to 1; leaves all-zero input as is.
pub(crate) fn normalize_importances(mut raw: Vec<f64>) -> Vec<f64> {
    let total: f64 = raw.iter().sum();
    if total > 0.0 {
        for v in &mut raw {
            *v /= total;
        }
    }
    raw
}
