//! Model evaluation.
//!
//! Rebuilds a labeled dataset over an evaluation window, scores it through
//! the stored artifact, and persists one `model_evaluations` row carrying
//! discrimination, calibration, threshold-sweep and per-season backtest
//! metrics.

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::jobs::features::{
    build_training_frame, ordered_values, TrainingRow, UniformNegativeSampler,
};
use crate::ml::{metrics, ModelArtifact};
use crate::models::{ModelEvaluation, ModelVersion};
use crate::store::Store;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_EVAL_LOOKBACK_DAYS: i64 = 365;

/// Football season (Aug-Jul) containing a date, labeled e.g. "2024/25".
fn season_of(date: NaiveDate) -> String {
    let start_year = if date.month() >= 8 {
        date.year()
    } else {
        date.year() - 1
    };
    format!("{}/{:02}", start_year, (start_year + 1) % 100)
}

fn score_rows(artifact: &ModelArtifact, rows: &[&TrainingRow]) -> (Vec<f64>, Vec<f64>) {
    let mut y_true = Vec::with_capacity(rows.len());
    let mut y_prob = Vec::with_capacity(rows.len());
    for row in rows {
        y_true.push(row.label);
        y_prob.push(artifact.score_row(&ordered_values(&row.features)));
    }
    (y_true, y_prob)
}

/// Evaluate `model_version` over `[window_start, window_end]` and persist
/// the result.
pub fn run_evaluation(
    store: &Store,
    config: &Config,
    version: &ModelVersion,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<ModelEvaluation> {
    let started = Instant::now();

    let artifact_path = version.artifact_path.as_deref().ok_or_else(|| {
        CoreError::ArtifactLoadFailure(format!(
            "model version {} has no artifact",
            version.model_version
        ))
    })?;
    let artifact = ModelArtifact::load(std::path::Path::new(artifact_path))?;

    info!(
        version = version.model_version,
        %window_start,
        %window_end,
        "evaluating model"
    );

    let lookback_days = (window_end - window_start).num_days().max(1);
    let sampler = UniformNegativeSampler {
        seed: config.random_seed,
    };
    let frame = build_training_frame(
        store,
        window_end.date_naive(),
        lookback_days,
        version.horizon_days,
        &sampler,
    )?;
    if frame.rows.is_empty() {
        return Err(CoreError::InsufficientData(
            "no labeled rows in evaluation window".into(),
        ));
    }

    let all_rows: Vec<&TrainingRow> = frame.rows.iter().collect();
    let (y_true, y_prob) = score_rows(&artifact, &all_rows);

    let auc_roc = metrics::auc_roc(&y_true, &y_prob);
    let auc_pr = metrics::auc_pr(&y_true, &y_prob);
    let log_loss = metrics::log_loss(&y_true, &y_prob);
    let brier = metrics::brier_score(&y_true, &y_prob);
    let at_half = metrics::threshold_metrics(&y_true, &y_prob, 0.5);
    let calibration = metrics::calibration(&y_true, &y_prob, 10);

    // Threshold sweep 0.1..0.9.
    let sweep: Vec<_> = (1..=9)
        .map(|i| {
            let t = i as f64 / 10.0;
            let m = metrics::threshold_metrics(&y_true, &y_prob, t);
            json!({
                "threshold": t,
                "accuracy": m.accuracy,
                "precision": m.precision,
                "recall": m.recall,
                "f1": m.f1,
            })
        })
        .collect();

    // Backtest per football season: rows grouped by the season of the
    // transfer they label (feature_date + horizon).
    let mut by_season: BTreeMap<String, Vec<&TrainingRow>> = BTreeMap::new();
    for row in &frame.rows {
        let transfer_date = row.feature_date + Duration::days(version.horizon_days);
        by_season.entry(season_of(transfer_date)).or_default().push(row);
    }
    let backtest: Vec<_> = by_season
        .iter()
        .map(|(season, rows)| {
            let (season_true, season_prob) = score_rows(&artifact, rows);
            let positives = season_true.iter().filter(|&&y| y > 0.5).count();
            json!({
                "season": season,
                "n_samples": rows.len(),
                "n_positive": positives,
                "auc_roc": metrics::auc_roc(&season_true, &season_prob),
                "log_loss": metrics::log_loss(&season_true, &season_prob),
                "brier": metrics::brier_score(&season_true, &season_prob),
            })
        })
        .collect();

    let n_positive = y_true.iter().filter(|&&y| y > 0.5).count();
    let evaluation = ModelEvaluation {
        id: Uuid::new_v4(),
        model_version_id: version.id,
        eval_type: "backtest".to_string(),
        eval_name: format!(
            "{} {} to {}",
            version.model_version,
            window_start.date_naive(),
            window_end.date_naive()
        ),
        window_start,
        window_end,
        n_samples: y_true.len() as i64,
        n_positive: n_positive as i64,
        auc_roc,
        auc_pr,
        log_loss: Some(log_loss),
        brier: Some(brier),
        accuracy: Some(at_half.accuracy),
        precision: Some(at_half.precision),
        recall: Some(at_half.recall),
        f1: Some(at_half.f1),
        calibration_slope: Some(calibration.slope),
        calibration_intercept: Some(calibration.intercept),
        calibration_bins: serde_json::to_value(&calibration.bins)?,
        confusion: json!({
            "tp": at_half.confusion.tp,
            "fp": at_half.confusion.fp,
            "tn": at_half.confusion.tn,
            "fn": at_half.confusion.fn_,
        }),
        thresholds: json!(sweep),
        backtest_by_season: json!(backtest),
        duration_ms: started.elapsed().as_millis() as i64,
        created_at: Utc::now(),
    };
    store.insert_model_evaluation(&evaluation)?;

    info!(
        version = version.model_version,
        samples = evaluation.n_samples,
        auc = ?evaluation.auc_roc,
        slope = ?evaluation.calibration_slope,
        duration_ms = evaluation.duration_ms,
        "evaluation complete"
    );
    Ok(evaluation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_season_boundaries_follow_august() {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(season_of(date(2024, 8, 1)), "2024/25");
        assert_eq!(season_of(date(2025, 7, 31)), "2024/25");
        assert_eq!(season_of(date(2025, 8, 1)), "2025/26");
        assert_eq!(season_of(date(2025, 1, 15)), "2024/25");
        assert_eq!(season_of(date(1999, 9, 1)), "1999/00");
    }
}
