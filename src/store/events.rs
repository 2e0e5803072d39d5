//! User interaction events and the aggregate queries the signal derivation
//! rides on.
//!
//! Every aggregate here carries `occurred_at <= as_of` so no consumer can see
//! user behavior from after the as-of instant. The single-entity variants are
//! exposed through `crate::timeguard`.

use super::{fmt_ts, fmt_uuid, parse_json, parse_ts, parse_uuid, Store};
use crate::error::Result;
use crate::models::UserEvent;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

/// Per-player view counts in the two halves of a derivation window.
#[derive(Debug, Clone, Copy)]
pub struct AttentionCounts {
    pub player_id: Uuid,
    pub recent: i64,
    pub older: i64,
}

/// Distinct sessions that saw both a player and a club.
#[derive(Debug, Clone, Copy)]
pub struct CooccurrenceCount {
    pub player_id: Uuid,
    pub club_id: Uuid,
    pub sessions: i64,
}

impl Store {
    pub fn insert_user_event(&self, event: &UserEvent) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO user_events
                (id, user_anon_id, session_id, event_type, player_id, club_id,
                 occurred_at, device_type, country_code, props_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                fmt_uuid(event.id),
                event.user_anon_id,
                event.session_id,
                event.event_type.as_str(),
                event.player_id.map(fmt_uuid),
                event.club_id.map(fmt_uuid),
                fmt_ts(event.occurred_at),
                event.device_type,
                event.country_code,
                event.props.as_ref().map(|p| p.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn recent_user_events(&self, limit: usize) -> Result<Vec<UserEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, user_anon_id, session_id, event_type, player_id, club_id,
                    occurred_at, device_type, country_code, props_json
             FROM user_events
             ORDER BY occurred_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(UserEvent {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    user_anon_id: row.get(1)?,
                    session_id: row.get(2)?,
                    event_type: row.get::<_, String>(3)?.parse().map_err(|e: String| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            rusqlite::types::Type::Text,
                            e.into(),
                        )
                    })?,
                    player_id: row
                        .get::<_, Option<String>>(4)?
                        .map(|s| parse_uuid(&s))
                        .transpose()?,
                    club_id: row
                        .get::<_, Option<String>>(5)?
                        .map(|s| parse_uuid(&s))
                        .transpose()?,
                    occurred_at: parse_ts(&row.get::<_, String>(6)?)?,
                    device_type: row.get(7)?,
                    country_code: row.get(8)?,
                    props: row
                        .get::<_, Option<String>>(9)?
                        .map(|s| parse_json(&s))
                        .transpose()?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Attention-event counts per player, split at the window midpoint:
    /// recent = (midpoint, as_of], older = [window_start, midpoint].
    pub(crate) fn attention_counts_all(
        &self,
        window_start: DateTime<Utc>,
        midpoint: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<AttentionCounts>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT player_id,
                    SUM(CASE WHEN occurred_at > ?2 THEN 1 ELSE 0 END) AS recent,
                    SUM(CASE WHEN occurred_at <= ?2 THEN 1 ELSE 0 END) AS older
             FROM user_events
             WHERE player_id IS NOT NULL
               AND event_type IN ('player_view', 'watchlist_add', 'share')
               AND occurred_at >= ?1
               AND occurred_at <= ?3
             GROUP BY player_id",
        )?;
        let rows = stmt
            .query_map(
                params![fmt_ts(window_start), fmt_ts(midpoint), fmt_ts(as_of)],
                |row| {
                    Ok(AttentionCounts {
                        player_id: parse_uuid(&row.get::<_, String>(0)?)?,
                        recent: row.get(1)?,
                        older: row.get(2)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Single-player variant of `attention_counts_all`.
    pub(crate) fn attention_counts_for_player(
        &self,
        player_id: Uuid,
        window_start: DateTime<Utc>,
        midpoint: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> Result<(i64, i64)> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT SUM(CASE WHEN occurred_at > ?3 THEN 1 ELSE 0 END),
                    SUM(CASE WHEN occurred_at <= ?3 THEN 1 ELSE 0 END)
             FROM user_events
             WHERE player_id = ?1
               AND event_type IN ('player_view', 'watchlist_add', 'share')
               AND occurred_at >= ?2
               AND occurred_at <= ?4",
        )?;
        let (recent, older): (Option<i64>, Option<i64>) = stmt.query_row(
            params![
                fmt_uuid(player_id),
                fmt_ts(window_start),
                fmt_ts(midpoint),
                fmt_ts(as_of)
            ],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((recent.unwrap_or(0), older.unwrap_or(0)))
    }

    /// Sessions containing a player interaction and a club view, per
    /// (player, club) pair, within [window_start, as_of].
    pub(crate) fn cooccurrence_counts_all(
        &self,
        window_start: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<CooccurrenceCount>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "WITH player_sessions AS (
                SELECT DISTINCT session_id, player_id
                FROM user_events
                WHERE player_id IS NOT NULL
                  AND event_type IN ('player_view', 'watchlist_add')
                  AND occurred_at >= ?1
                  AND occurred_at <= ?2
             ),
             club_sessions AS (
                SELECT DISTINCT session_id, club_id
                FROM user_events
                WHERE club_id IS NOT NULL
                  AND event_type = 'club_view'
                  AND occurred_at >= ?1
                  AND occurred_at <= ?2
             )
             SELECT ps.player_id, cs.club_id, COUNT(DISTINCT ps.session_id)
             FROM player_sessions ps
             JOIN club_sessions cs ON cs.session_id = ps.session_id
             GROUP BY ps.player_id, cs.club_id",
        )?;
        let rows = stmt
            .query_map(params![fmt_ts(window_start), fmt_ts(as_of)], |row| {
                Ok(CooccurrenceCount {
                    player_id: parse_uuid(&row.get::<_, String>(0)?)?,
                    club_id: parse_uuid(&row.get::<_, String>(1)?)?,
                    sessions: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Single-pair variant of `cooccurrence_counts_all`.
    pub(crate) fn cooccurrence_count_for_pair(
        &self,
        player_id: Uuid,
        club_id: Uuid,
        window_start: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT COUNT(DISTINCT ue.session_id)
             FROM user_events ue
             WHERE ue.club_id = ?2
               AND ue.event_type = 'club_view'
               AND ue.occurred_at >= ?3
               AND ue.occurred_at <= ?4
               AND ue.session_id IN (
                    SELECT session_id FROM user_events
                    WHERE player_id = ?1
                      AND event_type IN ('player_view', 'watchlist_add')
                      AND occurred_at >= ?3
                      AND occurred_at <= ?4
               )",
        )?;
        let sessions: i64 = stmt.query_row(
            params![
                fmt_uuid(player_id),
                fmt_uuid(club_id),
                fmt_ts(window_start),
                fmt_ts(as_of)
            ],
            |row| row.get(0),
        )?;
        Ok(sessions)
    }

    /// Watchlist additions per player within [window_start, as_of].
    pub(crate) fn watchlist_add_counts_all(
        &self,
        window_start: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, i64)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT player_id, COUNT(*)
             FROM user_events
             WHERE player_id IS NOT NULL
               AND event_type = 'watchlist_add'
               AND occurred_at >= ?1
               AND occurred_at <= ?2
             GROUP BY player_id",
        )?;
        let rows = stmt
            .query_map(params![fmt_ts(window_start), fmt_ts(as_of)], |row| {
                Ok((parse_uuid(&row.get::<_, String>(0)?)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
