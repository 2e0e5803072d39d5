//! ML bookkeeping: model versions, evaluations, cached feature vectors.

use super::{fmt_ts, fmt_uuid, parse_json, parse_ts, parse_uuid, Store};
use crate::error::{CoreError, Result};
use crate::models::{FeatureSnapshot, ModelEvaluation, ModelStatus, ModelVersion};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

const MODEL_COLS: &str = "id, model_name, model_version, horizon_days, training_as_of, \
     training_samples, positive_samples, feature_names_json, metrics_json, \
     feature_importances_json, artifact_path, status, message, created_at";

fn row_to_model_version(row: &Row) -> rusqlite::Result<ModelVersion> {
    let feature_names_json: String = row.get(7)?;
    let feature_names: Vec<String> = serde_json::from_str(&feature_names_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ModelVersion {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        model_name: row.get(1)?,
        model_version: row.get(2)?,
        horizon_days: row.get(3)?,
        training_as_of: parse_ts(&row.get::<_, String>(4)?)?,
        training_samples: row.get(5)?,
        positive_samples: row.get(6)?,
        feature_names,
        metrics: parse_json(&row.get::<_, String>(8)?)?,
        feature_importances: parse_json(&row.get::<_, String>(9)?)?,
        artifact_path: row.get(10)?,
        status: row.get::<_, String>(11)?.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, e.into())
        })?,
        message: row.get(12)?,
        created_at: parse_ts(&row.get::<_, String>(13)?)?,
    })
}

impl Store {
    /// Register (or refresh) a training run keyed by (model_name, version).
    pub fn register_model_version(&self, version: &ModelVersion) -> Result<()> {
        let feature_names_json = serde_json::to_string(&version.feature_names)?;

        let conn = self.lock();
        conn.execute(
            &format!(
                "INSERT INTO model_versions ({MODEL_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(model_name, model_version) DO UPDATE SET
                    horizon_days = excluded.horizon_days,
                    training_as_of = excluded.training_as_of,
                    training_samples = excluded.training_samples,
                    positive_samples = excluded.positive_samples,
                    feature_names_json = excluded.feature_names_json,
                    metrics_json = excluded.metrics_json,
                    feature_importances_json = excluded.feature_importances_json,
                    artifact_path = excluded.artifact_path,
                    status = excluded.status,
                    message = excluded.message"
            ),
            params![
                fmt_uuid(version.id),
                version.model_name,
                version.model_version,
                version.horizon_days,
                fmt_ts(version.training_as_of),
                version.training_samples,
                version.positive_samples,
                feature_names_json,
                version.metrics.to_string(),
                version.feature_importances.to_string(),
                version.artifact_path,
                version.status.as_str(),
                version.message,
                fmt_ts(version.created_at),
            ],
        )?;
        Ok(())
    }

    /// Most recent model for (name, horizon) whose status is one of `statuses`.
    pub fn latest_model_version(
        &self,
        model_name: &str,
        horizon_days: i64,
        statuses: &[ModelStatus],
    ) -> Result<Option<ModelVersion>> {
        let status_list = statuses
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MODEL_COLS} FROM model_versions
             WHERE model_name = ?1 AND horizon_days = ?2 AND status IN ({status_list})
             ORDER BY created_at DESC
             LIMIT 1"
        ))?;
        let row = stmt
            .query_row(params![model_name, horizon_days], row_to_model_version)
            .optional()?;
        Ok(row)
    }

    pub fn get_model_version_by_name(
        &self,
        model_version: &str,
    ) -> Result<Option<ModelVersion>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MODEL_COLS} FROM model_versions WHERE model_version = ?1
             ORDER BY created_at DESC LIMIT 1"
        ))?;
        let row = stmt
            .query_row([model_version], row_to_model_version)
            .optional()?;
        Ok(row)
    }

    pub fn require_model_version_by_name(&self, model_version: &str) -> Result<ModelVersion> {
        self.get_model_version_by_name(model_version)?
            .ok_or_else(|| CoreError::NotFound(format!("model version {model_version}")))
    }

    pub fn list_model_versions(&self, limit: usize) -> Result<Vec<ModelVersion>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MODEL_COLS} FROM model_versions ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map([limit as i64], row_to_model_version)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn insert_model_evaluation(&self, eval: &ModelEvaluation) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO model_evaluations
                (id, model_version_id, eval_type, eval_name, window_start, window_end,
                 n_samples, n_positive, auc_roc, auc_pr, log_loss, brier, accuracy,
                 precision, recall, f1, calibration_slope, calibration_intercept,
                 calibration_bins_json, confusion_json, thresholds_json, backtest_json,
                 duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
            params![
                fmt_uuid(eval.id),
                fmt_uuid(eval.model_version_id),
                eval.eval_type,
                eval.eval_name,
                fmt_ts(eval.window_start),
                fmt_ts(eval.window_end),
                eval.n_samples,
                eval.n_positive,
                eval.auc_roc,
                eval.auc_pr,
                eval.log_loss,
                eval.brier,
                eval.accuracy,
                eval.precision,
                eval.recall,
                eval.f1,
                eval.calibration_slope,
                eval.calibration_intercept,
                eval.calibration_bins.to_string(),
                eval.confusion.to_string(),
                eval.thresholds.to_string(),
                eval.backtest_by_season.to_string(),
                eval.duration_ms,
                fmt_ts(eval.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn evaluations_for_model(&self, model_version_id: Uuid) -> Result<Vec<ModelEvaluation>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, model_version_id, eval_type, eval_name, window_start, window_end,
                    n_samples, n_positive, auc_roc, auc_pr, log_loss, brier, accuracy,
                    precision, recall, f1, calibration_slope, calibration_intercept,
                    calibration_bins_json, confusion_json, thresholds_json, backtest_json,
                    duration_ms, created_at
             FROM model_evaluations
             WHERE model_version_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map([fmt_uuid(model_version_id)], |row| {
                Ok(ModelEvaluation {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    model_version_id: parse_uuid(&row.get::<_, String>(1)?)?,
                    eval_type: row.get(2)?,
                    eval_name: row.get(3)?,
                    window_start: parse_ts(&row.get::<_, String>(4)?)?,
                    window_end: parse_ts(&row.get::<_, String>(5)?)?,
                    n_samples: row.get(6)?,
                    n_positive: row.get(7)?,
                    auc_roc: row.get(8)?,
                    auc_pr: row.get(9)?,
                    log_loss: row.get(10)?,
                    brier: row.get(11)?,
                    accuracy: row.get(12)?,
                    precision: row.get(13)?,
                    recall: row.get(14)?,
                    f1: row.get(15)?,
                    calibration_slope: row.get(16)?,
                    calibration_intercept: row.get(17)?,
                    calibration_bins: parse_json(&row.get::<_, String>(18)?)?,
                    confusion: parse_json(&row.get::<_, String>(19)?)?,
                    thresholds: parse_json(&row.get::<_, String>(20)?)?,
                    backtest_by_season: parse_json(&row.get::<_, String>(21)?)?,
                    duration_ms: row.get(22)?,
                    created_at: parse_ts(&row.get::<_, String>(23)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Idempotent cache write keyed by (player, candidate club, as_of).
    pub fn upsert_feature_snapshot(&self, snapshot: &FeatureSnapshot) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO feature_snapshots
                (id, player_id, candidate_club_id, as_of, features_json, feature_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(player_id, candidate_club_id, as_of) DO UPDATE SET
                features_json = excluded.features_json,
                feature_version = excluded.feature_version",
            params![
                fmt_uuid(snapshot.id),
                fmt_uuid(snapshot.player_id),
                fmt_uuid(snapshot.candidate_club_id),
                fmt_ts(snapshot.as_of),
                snapshot.features.to_string(),
                snapshot.feature_version,
                fmt_ts(snapshot.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_feature_snapshot(
        &self,
        player_id: Uuid,
        candidate_club_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> Result<Option<FeatureSnapshot>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, player_id, candidate_club_id, as_of, features_json, feature_version, created_at
             FROM feature_snapshots
             WHERE player_id = ?1 AND candidate_club_id = ?2 AND as_of = ?3",
        )?;
        let row = stmt
            .query_row(
                params![
                    fmt_uuid(player_id),
                    fmt_uuid(candidate_club_id),
                    fmt_ts(as_of)
                ],
                |row| {
                    Ok(FeatureSnapshot {
                        id: parse_uuid(&row.get::<_, String>(0)?)?,
                        player_id: parse_uuid(&row.get::<_, String>(1)?)?,
                        candidate_club_id: parse_uuid(&row.get::<_, String>(2)?)?,
                        as_of: parse_ts(&row.get::<_, String>(3)?)?,
                        features: parse_json(&row.get::<_, String>(4)?)?,
                        feature_version: row.get(5)?,
                        created_at: parse_ts(&row.get::<_, String>(6)?)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
