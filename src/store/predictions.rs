//! Prediction snapshot history.
//!
//! Append-only in spirit: each scoring run writes new `snapshot_id`s (the
//! as-of stamp is part of the id), and re-running the same as-of refreshes
//! the payload of the identical logical row.

use super::{fmt_date, fmt_ts, fmt_uuid, parse_date, parse_json, parse_ts, parse_uuid, Store};
use crate::error::{CoreError, Result};
use crate::models::PredictionSnapshot;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use std::collections::HashSet;
use uuid::Uuid;

const SNAPSHOT_COLS: &str = "id, snapshot_id, model_version, model_name, player_id, from_club_id, \
     to_club_id, horizon_days, probability, drivers_json, features_json, as_of, window_start, \
     window_end, created_at";

fn row_to_snapshot(row: &Row) -> rusqlite::Result<PredictionSnapshot> {
    Ok(PredictionSnapshot {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        snapshot_id: row.get(1)?,
        model_version: row.get(2)?,
        model_name: row.get(3)?,
        player_id: parse_uuid(&row.get::<_, String>(4)?)?,
        from_club_id: row
            .get::<_, Option<String>>(5)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
        to_club_id: row
            .get::<_, Option<String>>(6)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
        horizon_days: row.get(7)?,
        probability: row.get(8)?,
        drivers: parse_json(&row.get::<_, String>(9)?)?,
        features: row
            .get::<_, Option<String>>(10)?
            .map(|s| parse_json(&s))
            .transpose()?,
        as_of: parse_ts(&row.get::<_, String>(11)?)?,
        window_start: parse_date(&row.get::<_, String>(12)?)?,
        window_end: parse_date(&row.get::<_, String>(13)?)?,
        created_at: parse_ts(&row.get::<_, String>(14)?)?,
    })
}

fn validate_snapshot(snapshot: &PredictionSnapshot) -> Result<()> {
    if !(0.0..=1.0).contains(&snapshot.probability) {
        return Err(CoreError::Validation(format!(
            "probability {} outside [0, 1]",
            snapshot.probability
        )));
    }
    if snapshot.horizon_days <= 0 {
        return Err(CoreError::Validation(format!(
            "horizon_days {} must be positive",
            snapshot.horizon_days
        )));
    }
    if snapshot.window_end <= snapshot.window_start {
        return Err(CoreError::Validation(format!(
            "window_end {} not after window_start {}",
            snapshot.window_end, snapshot.window_start
        )));
    }
    if let Some(drivers) = snapshot.drivers.as_object() {
        let mut total = 0.0;
        for (name, v) in drivers {
            let contribution = v.as_f64().ok_or_else(|| {
                CoreError::Validation(format!("driver {name} is not numeric"))
            })?;
            if contribution < 0.0 {
                return Err(CoreError::Validation(format!(
                    "driver {name} contribution {contribution} is negative"
                )));
            }
            total += contribution;
        }
        // Small epsilon for the renormalized sum.
        if total > 1.0 + 1e-6 {
            return Err(CoreError::Validation(format!(
                "driver contributions sum to {total} > 1"
            )));
        }
    } else {
        return Err(CoreError::Validation("drivers_json must be an object".into()));
    }
    Ok(())
}

impl Store {
    /// Insert, or refresh the payload of the same logical snapshot.
    pub fn upsert_snapshot(&self, snapshot: &PredictionSnapshot) -> Result<()> {
        validate_snapshot(snapshot)?;

        let conn = self.lock();
        conn.execute(
            &format!(
                "INSERT INTO prediction_snapshots ({SNAPSHOT_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(snapshot_id) DO UPDATE SET
                    probability = excluded.probability,
                    drivers_json = excluded.drivers_json,
                    features_json = excluded.features_json"
            ),
            params![
                fmt_uuid(snapshot.id),
                snapshot.snapshot_id,
                snapshot.model_version,
                snapshot.model_name,
                fmt_uuid(snapshot.player_id),
                snapshot.from_club_id.map(fmt_uuid),
                snapshot.to_club_id.map(fmt_uuid),
                snapshot.horizon_days,
                snapshot.probability,
                snapshot.drivers.to_string(),
                snapshot.features.as_ref().map(|f| f.to_string()),
                fmt_ts(snapshot.as_of),
                fmt_date(snapshot.window_start),
                fmt_date(snapshot.window_end),
                fmt_ts(snapshot.created_at),
            ],
        )?;
        Ok(())
    }

    /// Latest snapshot per distinct destination for a player, highest
    /// probability first.
    pub fn latest_predictions_for_player(
        &self,
        player_id: Uuid,
        horizon_days: Option<i64>,
        max_destinations: usize,
    ) -> Result<Vec<PredictionSnapshot>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SNAPSHOT_COLS} FROM prediction_snapshots
             WHERE player_id = ?1
               AND (?2 IS NULL OR horizon_days = ?2)
             ORDER BY as_of DESC, probability DESC"
        ))?;
        let rows = stmt
            .query_map(params![fmt_uuid(player_id), horizon_days], row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        // Keep the max-as_of row per destination, then rank by probability.
        let mut seen: HashSet<(Option<Uuid>, i64)> = HashSet::new();
        let mut latest: Vec<PredictionSnapshot> = Vec::new();
        for snapshot in rows {
            if seen.insert((snapshot.to_club_id, snapshot.horizon_days)) {
                latest.push(snapshot);
            }
        }
        latest.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        latest.truncate(max_destinations);
        Ok(latest)
    }

    /// Prediction history for the read surface, newest as-of first.
    pub fn prediction_history(
        &self,
        player_id: Uuid,
        as_of: Option<DateTime<Utc>>,
        horizon_days: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PredictionSnapshot>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SNAPSHOT_COLS} FROM prediction_snapshots
             WHERE player_id = ?1
               AND (?2 IS NULL OR as_of <= ?2)
               AND (?3 IS NULL OR horizon_days = ?3)
             ORDER BY as_of DESC, probability DESC
             LIMIT ?4"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    fmt_uuid(player_id),
                    as_of.map(fmt_ts),
                    horizon_days,
                    limit as i64
                ],
                row_to_snapshot,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Latest outgoing predictions for an origin club (one row per
    /// (player, destination), max as_of), highest probability first.
    pub fn latest_predictions_out_of_club(
        &self,
        club_id: Uuid,
        limit: usize,
    ) -> Result<Vec<PredictionSnapshot>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SNAPSHOT_COLS} FROM prediction_snapshots
             WHERE from_club_id = ?1
             ORDER BY as_of DESC, probability DESC"
        ))?;
        let rows = stmt
            .query_map([fmt_uuid(club_id)], row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        let mut seen: HashSet<(Uuid, Option<Uuid>, i64)> = HashSet::new();
        let mut latest: Vec<PredictionSnapshot> = Vec::new();
        for snapshot in rows {
            if seen.insert((snapshot.player_id, snapshot.to_club_id, snapshot.horizon_days)) {
                latest.push(snapshot);
            }
        }
        latest.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        latest.truncate(limit);
        Ok(latest)
    }

    /// Latest incoming predictions for a destination club (one row per
    /// player, max as_of), highest probability first.
    pub fn latest_predictions_into_club(
        &self,
        club_id: Uuid,
        limit: usize,
    ) -> Result<Vec<PredictionSnapshot>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SNAPSHOT_COLS} FROM prediction_snapshots
             WHERE to_club_id = ?1
             ORDER BY as_of DESC, probability DESC"
        ))?;
        let rows = stmt
            .query_map([fmt_uuid(club_id)], row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        let mut seen: HashSet<(Uuid, i64)> = HashSet::new();
        let mut latest: Vec<PredictionSnapshot> = Vec::new();
        for snapshot in rows {
            if seen.insert((snapshot.player_id, snapshot.horizon_days)) {
                latest.push(snapshot);
            }
        }
        latest.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        latest.truncate(limit);
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{snapshot_id, Club, Competition, Player};
    use serde_json::json;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn fixture(store: &Store) -> (Uuid, Uuid, Uuid) {
        let comp = Competition {
            id: Uuid::new_v4(),
            name: "Bundesliga".to_string(),
            country: "Germany".to_string(),
            tier: 1,
        };
        store.upsert_competition(&comp).unwrap();
        let from = Club {
            id: Uuid::new_v4(),
            name: "Dortmund".to_string(),
            country: "Germany".to_string(),
            competition_id: Some(comp.id),
        };
        let to = Club {
            id: Uuid::new_v4(),
            name: "Bayern".to_string(),
            country: "Germany".to_string(),
            competition_id: Some(comp.id),
        };
        store.upsert_club(&from).unwrap();
        store.upsert_club(&to).unwrap();
        let player = Player {
            id: Uuid::new_v4(),
            name: "Test Player".to_string(),
            date_of_birth: None,
            nationality: None,
            position: None,
            current_club_id: Some(from.id),
            contract_until: None,
            is_active: true,
        };
        store.upsert_player(&player).unwrap();
        (player.id, from.id, to.id)
    }

    fn snapshot(player: Uuid, from: Uuid, to: Uuid, as_of: DateTime<Utc>, p: f64) -> PredictionSnapshot {
        PredictionSnapshot {
            id: Uuid::new_v4(),
            snapshot_id: snapshot_id(player, Some(to), 90, as_of),
            model_version: "v1".to_string(),
            model_name: "transfer_xgb_90d".to_string(),
            player_id: player,
            from_club_id: Some(from),
            to_club_id: Some(to),
            horizon_days: 90,
            probability: p,
            drivers: json!({"contract_months_remaining": 0.6, "market_value": 0.4}),
            features: None,
            as_of,
            window_start: as_of.date_naive(),
            window_end: as_of.date_naive() + chrono::Duration::days(90),
            created_at: as_of,
        }
    }

    #[test]
    fn test_upsert_refreshes_payload_for_same_snapshot_id() {
        let store = Store::open_in_memory().unwrap();
        let (player, from, to) = fixture(&store);
        let as_of = ts("2025-01-15T06:00:00Z");

        store
            .upsert_snapshot(&snapshot(player, from, to, as_of, 0.3))
            .unwrap();
        store
            .upsert_snapshot(&snapshot(player, from, to, as_of, 0.42))
            .unwrap();

        let rows = store
            .prediction_history(player, None, Some(90), 10)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].probability - 0.42).abs() < 1e-9);
    }

    #[test]
    fn test_latest_predictions_consume_max_as_of_only() {
        let store = Store::open_in_memory().unwrap();
        let (player, from, to) = fixture(&store);

        store
            .upsert_snapshot(&snapshot(player, from, to, ts("2025-01-10T06:00:00Z"), 0.5))
            .unwrap();
        store
            .upsert_snapshot(&snapshot(player, from, to, ts("2025-01-15T06:00:00Z"), 0.2))
            .unwrap();

        let latest = store
            .latest_predictions_for_player(player, Some(90), 10)
            .unwrap();
        assert_eq!(latest.len(), 1);
        // Ordered by as_of: the newer, lower-probability row wins.
        assert!((latest[0].probability - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_validation_rejects_bad_drivers() {
        let store = Store::open_in_memory().unwrap();
        let (player, from, to) = fixture(&store);
        let as_of = ts("2025-01-15T06:00:00Z");

        let mut bad = snapshot(player, from, to, as_of, 0.3);
        bad.drivers = json!({"a": 0.8, "b": 0.5});
        assert!(matches!(
            store.upsert_snapshot(&bad),
            Err(CoreError::Validation(_))
        ));

        let mut negative = snapshot(player, from, to, as_of, 0.3);
        negative.drivers = json!({"a": -0.1});
        assert!(matches!(
            store.upsert_snapshot(&negative),
            Err(CoreError::Validation(_))
        ));
    }
}
