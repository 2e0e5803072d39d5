//! The `player_market_view` projection.
//!
//! Collapses, per (player, to_club, horizon), the max-as_of prediction joined
//! with the latest market-value and contract signals. Rebuilt on demand: the
//! staged rebuild assembles rows into a side table and swaps inside one
//! transaction; if staging fails the in-place rebuild runs instead. Purely a
//! read-latency cache, never a source of truth.

use super::{fmt_ts, fmt_uuid, parse_json, parse_ts, parse_uuid, Store};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// One row of the projection, denormalized for the read surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRow {
    pub snapshot_id: String,
    pub player_id: Uuid,
    pub player_name: String,
    pub player_position: Option<String>,
    pub from_club_id: Option<Uuid>,
    pub from_club_name: Option<String>,
    pub to_club_id: Option<Uuid>,
    pub to_club_name: Option<String>,
    pub competition_id: Option<Uuid>,
    pub horizon_days: i64,
    pub probability: f64,
    pub drivers: serde_json::Value,
    pub model_version: String,
    pub model_name: String,
    pub as_of: DateTime<Utc>,
    pub market_value: Option<f64>,
    pub contract_months_remaining: Option<f64>,
}

/// Filters for the `/market/latest` read.
#[derive(Debug, Clone, Default)]
pub struct MarketViewFilter {
    pub competition_id: Option<Uuid>,
    pub club_id: Option<Uuid>,
    pub horizon_days: Option<i64>,
    pub min_probability: Option<f64>,
    pub limit: usize,
}

// Latest prediction per (player, to_club, horizon) joined with reference
// names and the latest player signals. `IS` handles NULL to_club keys.
const VIEW_SELECT_SQL: &str = "
    SELECT
        ps.snapshot_id,
        ps.player_id,
        p.name,
        p.position,
        ps.from_club_id,
        fc.name,
        ps.to_club_id,
        tc.name,
        tc.competition_id,
        ps.horizon_days,
        ps.probability,
        ps.drivers_json,
        ps.model_version,
        ps.model_name,
        ps.as_of,
        ps.window_start,
        ps.window_end,
        (SELECT value_num FROM signal_events s
          WHERE s.player_id = ps.player_id AND s.entity_type = 'player'
            AND s.signal_type = 'market_value'
          ORDER BY s.effective_from DESC, s.observed_at DESC LIMIT 1),
        (SELECT value_num FROM signal_events s
          WHERE s.player_id = ps.player_id AND s.entity_type = 'player'
            AND s.signal_type = 'contract_months_remaining'
          ORDER BY s.effective_from DESC, s.observed_at DESC LIMIT 1)
    FROM prediction_snapshots ps
    JOIN players p ON p.id = ps.player_id
    LEFT JOIN clubs fc ON fc.id = ps.from_club_id
    LEFT JOIN clubs tc ON tc.id = ps.to_club_id
    WHERE ps.as_of = (
        SELECT MAX(ps2.as_of) FROM prediction_snapshots ps2
        WHERE ps2.player_id = ps.player_id
          AND ps2.to_club_id IS ps.to_club_id
          AND ps2.horizon_days = ps.horizon_days
    )";

impl Store {
    /// Rebuild the projection. Staged swap preferred; in-place as fallback.
    /// Returns the number of rows in the refreshed view.
    pub fn refresh_market_view(&self) -> Result<usize> {
        match self.refresh_market_view_staged() {
            Ok(rows) => {
                info!(rows, "player_market_view refreshed (staged)");
                Ok(rows)
            }
            Err(staged_err) => {
                warn!(error = %staged_err, "staged view refresh failed, rebuilding in place");
                let rows = self.refresh_market_view_blocking()?;
                info!(rows, "player_market_view refreshed (blocking)");
                Ok(rows)
            }
        }
    }

    fn refresh_market_view_staged(&self) -> Result<usize> {
        let refreshed_at = fmt_ts(Utc::now());
        let conn = self.lock();

        conn.execute_batch(
            "DROP TABLE IF EXISTS player_market_view_staging;
             CREATE TABLE player_market_view_staging AS
             SELECT * FROM player_market_view WHERE 0;",
        )?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO player_market_view_staging
                 SELECT v.*, ?1 FROM ({VIEW_SELECT_SQL}) v"
            ),
            [&refreshed_at],
        )?;
        // Swap under one transaction so readers never see a half-built view.
        conn.execute_batch(
            "BEGIN IMMEDIATE;
             DELETE FROM player_market_view;
             INSERT INTO player_market_view SELECT * FROM player_market_view_staging;
             DROP TABLE player_market_view_staging;
             COMMIT;",
        )?;
        Ok(inserted)
    }

    fn refresh_market_view_blocking(&self) -> Result<usize> {
        let refreshed_at = fmt_ts(Utc::now());
        let conn = self.lock();
        // A failed staged refresh may have left a transaction open.
        let _ = conn.execute("ROLLBACK", []);
        conn.execute("BEGIN IMMEDIATE", [])?;
        conn.execute("DELETE FROM player_market_view", [])?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO player_market_view
                 SELECT v.*, ?1 FROM ({VIEW_SELECT_SQL}) v"
            ),
            [&refreshed_at],
        );
        match inserted {
            Ok(rows) => {
                conn.execute("COMMIT", [])?;
                Ok(rows)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e.into())
            }
        }
    }

    /// Ranked probability rows from the projection.
    pub fn market_latest(&self, filter: &MarketViewFilter) -> Result<Vec<MarketRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT snapshot_id, player_id, player_name, player_position, from_club_id,
                    from_club_name, to_club_id, to_club_name, competition_id, horizon_days,
                    probability, drivers_json, model_version, model_name, as_of,
                    market_value, contract_months_remaining
             FROM player_market_view
             WHERE (?1 IS NULL OR competition_id = ?1)
               AND (?2 IS NULL OR to_club_id = ?2 OR from_club_id = ?2)
               AND (?3 IS NULL OR horizon_days = ?3)
               AND (?4 IS NULL OR probability >= ?4)
             ORDER BY probability DESC, player_name
             LIMIT ?5",
        )?;
        let rows = stmt
            .query_map(
                params![
                    filter.competition_id.map(fmt_uuid),
                    filter.club_id.map(fmt_uuid),
                    filter.horizon_days,
                    filter.min_probability,
                    filter.limit as i64
                ],
                row_to_market_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Whether the projection holds any rows (readers fall back to direct
    /// queries when it has never been refreshed).
    pub fn market_view_populated(&self) -> Result<bool> {
        let conn = self.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM player_market_view", [], |row| {
                row.get(0)
            })?;
        Ok(count > 0)
    }
}

fn row_to_market_row(row: &Row) -> rusqlite::Result<MarketRow> {
    Ok(MarketRow {
        snapshot_id: row.get(0)?,
        player_id: parse_uuid(&row.get::<_, String>(1)?)?,
        player_name: row.get(2)?,
        player_position: row.get(3)?,
        from_club_id: row
            .get::<_, Option<String>>(4)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
        from_club_name: row.get(5)?,
        to_club_id: row
            .get::<_, Option<String>>(6)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
        to_club_name: row.get(7)?,
        competition_id: row
            .get::<_, Option<String>>(8)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
        horizon_days: row.get(9)?,
        probability: row.get(10)?,
        drivers: parse_json(&row.get::<_, String>(11)?)?,
        model_version: row.get(12)?,
        model_name: row.get(13)?,
        as_of: parse_ts(&row.get::<_, String>(14)?)?,
        market_value: row.get(15)?,
        contract_months_remaining: row.get(16)?,
    })
}
