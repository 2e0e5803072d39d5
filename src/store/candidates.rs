//! Auditable candidate sets.
//!
//! One row per (player, as_of, horizon); regeneration upserts the payload so
//! the audit trail always shows the most recent computation for that key.

use super::{fmt_ts, fmt_uuid, parse_json, parse_ts, parse_uuid, Store};
use crate::error::Result;
use crate::models::{Candidate, CandidateSet, SourceCounts};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

const CANDIDATE_COLS: &str = "id, player_id, as_of, horizon_days, from_club_id, total_candidates, \
     league_count, social_count, user_attention_count, constraint_fit_count, random_count, \
     candidates_json, player_context_json, created_at";

fn row_to_candidate_set(row: &Row) -> rusqlite::Result<CandidateSet> {
    let candidates_json: String = row.get(11)?;
    let candidates: Vec<Candidate> = serde_json::from_str(&candidates_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(CandidateSet {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        player_id: parse_uuid(&row.get::<_, String>(1)?)?,
        as_of: parse_ts(&row.get::<_, String>(2)?)?,
        horizon_days: row.get(3)?,
        from_club_id: parse_uuid(&row.get::<_, String>(4)?)?,
        total_candidates: row.get::<_, i64>(5)? as usize,
        source_counts: SourceCounts {
            league: row.get::<_, i64>(6)? as usize,
            social: row.get::<_, i64>(7)? as usize,
            user_attention: row.get::<_, i64>(8)? as usize,
            constraint_fit: row.get::<_, i64>(9)? as usize,
            random: row.get::<_, i64>(10)? as usize,
        },
        candidates,
        player_context: parse_json(&row.get::<_, String>(12)?)?,
        created_at: parse_ts(&row.get::<_, String>(13)?)?,
    })
}

impl Store {
    /// Insert or refresh the set for (player, as_of, horizon).
    pub fn upsert_candidate_set(&self, set: &CandidateSet) -> Result<()> {
        let candidates_json = serde_json::to_string(&set.candidates)?;

        let conn = self.lock();
        conn.execute(
            &format!(
                "INSERT INTO candidate_sets ({CANDIDATE_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(player_id, as_of, horizon_days) DO UPDATE SET
                    from_club_id = excluded.from_club_id,
                    total_candidates = excluded.total_candidates,
                    league_count = excluded.league_count,
                    social_count = excluded.social_count,
                    user_attention_count = excluded.user_attention_count,
                    constraint_fit_count = excluded.constraint_fit_count,
                    random_count = excluded.random_count,
                    candidates_json = excluded.candidates_json,
                    player_context_json = excluded.player_context_json"
            ),
            params![
                fmt_uuid(set.id),
                fmt_uuid(set.player_id),
                fmt_ts(set.as_of),
                set.horizon_days,
                fmt_uuid(set.from_club_id),
                set.total_candidates as i64,
                set.source_counts.league as i64,
                set.source_counts.social as i64,
                set.source_counts.user_attention as i64,
                set.source_counts.constraint_fit as i64,
                set.source_counts.random as i64,
                candidates_json,
                set.player_context.to_string(),
                fmt_ts(set.created_at),
            ],
        )?;
        Ok(())
    }

    /// Cache lookup for the exact (player, as_of, horizon) triple.
    pub fn get_candidate_set(
        &self,
        player_id: Uuid,
        as_of: DateTime<Utc>,
        horizon_days: i64,
    ) -> Result<Option<CandidateSet>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {CANDIDATE_COLS} FROM candidate_sets
             WHERE player_id = ?1 AND as_of = ?2 AND horizon_days = ?3"
        ))?;
        let row = stmt
            .query_row(
                params![fmt_uuid(player_id), fmt_ts(as_of), horizon_days],
                row_to_candidate_set,
            )
            .optional()?;
        Ok(row)
    }

    /// Recent sets for one player, newest as-of first.
    pub fn candidate_sets_for_player(
        &self,
        player_id: Uuid,
        limit: usize,
    ) -> Result<Vec<CandidateSet>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {CANDIDATE_COLS} FROM candidate_sets
             WHERE player_id = ?1
             ORDER BY as_of DESC, horizon_days
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![fmt_uuid(player_id), limit as i64], row_to_candidate_set)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Audit listing across players, optionally pinned to one as-of.
    pub fn candidate_sets_audit(
        &self,
        as_of: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CandidateSet>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {CANDIDATE_COLS} FROM candidate_sets
             WHERE (?1 IS NULL OR as_of = ?1)
             ORDER BY as_of DESC, player_id
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![as_of.map(fmt_ts), limit as i64], row_to_candidate_set)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
