//! Bitemporal signal stream.
//!
//! Append-only: updates are forbidden, corrections are new rows with a later
//! `effective_from`. Writing a signal with `observed_at` in the future is
//! allowed; as-of reads filter it out until it becomes visible.
//!
//! The as-of predicate lives in exactly one query here
//! (`latest_signal_asof` / `player_signals_window_asof`) and is only reachable
//! through `crate::timeguard` — call sites never inline time filters.

use super::{fmt_ts, fmt_uuid, parse_json, parse_ts, parse_uuid, Store};
use crate::error::{CoreError, Result};
use crate::models::{EntityType, NewSignalEvent, SignalEvent, SignalType, SignalValue};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

/// The value of a signal as known at some as-of instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalAt {
    pub value: SignalValue,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
    pub effective_from: DateTime<Utc>,
}

const SIGNAL_COLS: &str = "id, entity_type, player_id, club_id, signal_type, value_num, \
     value_text, value_json, source, source_id, confidence, observed_at, effective_from, \
     effective_to, created_at";

fn value_columns(value: &SignalValue) -> (Option<f64>, Option<String>, Option<String>) {
    match value {
        SignalValue::Num(v) => (Some(*v), None, None),
        SignalValue::Text(s) => (None, Some(s.clone()), None),
        SignalValue::Json(j) => (None, None, Some(j.to_string())),
    }
}

fn value_from_columns(
    num: Option<f64>,
    text: Option<String>,
    json: Option<String>,
) -> rusqlite::Result<SignalValue> {
    match (num, text, json) {
        (Some(v), None, None) => Ok(SignalValue::Num(v)),
        (None, Some(s), None) => Ok(SignalValue::Text(s)),
        (None, None, Some(j)) => Ok(SignalValue::Json(parse_json(&j)?)),
        _ => Err(rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Null,
            "signal row must populate exactly one value column".into(),
        )),
    }
}

fn row_to_signal(row: &Row) -> rusqlite::Result<SignalEvent> {
    let entity_type: String = row.get(1)?;
    let signal_type: String = row.get(4)?;
    Ok(SignalEvent {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        entity_type: entity_type.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
        })?,
        player_id: row
            .get::<_, Option<String>>(2)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
        club_id: row
            .get::<_, Option<String>>(3)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
        signal_type: signal_type.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
        })?,
        value: value_from_columns(row.get(5)?, row.get(6)?, row.get(7)?)?,
        source: row.get(8)?,
        source_id: row.get(9)?,
        confidence: row.get(10)?,
        observed_at: parse_ts(&row.get::<_, String>(11)?)?,
        effective_from: parse_ts(&row.get::<_, String>(12)?)?,
        effective_to: row
            .get::<_, Option<String>>(13)?
            .map(|s| parse_ts(&s))
            .transpose()?,
        created_at: parse_ts(&row.get::<_, String>(14)?)?,
    })
}

fn validate_signal(new: &NewSignalEvent) -> Result<()> {
    let consistent = match new.entity_type {
        EntityType::Player => new.player_id.is_some() && new.club_id.is_none(),
        EntityType::Club => new.club_id.is_some() && new.player_id.is_none(),
        EntityType::Pair => new.player_id.is_some() && new.club_id.is_some(),
    };
    if !consistent {
        return Err(CoreError::Validation(format!(
            "entity ids inconsistent with entity_type {}",
            new.entity_type.as_str()
        )));
    }
    if !(0.0..=1.0).contains(&new.confidence) {
        return Err(CoreError::Validation(format!(
            "confidence {} outside [0, 1]",
            new.confidence
        )));
    }
    if let Some(to) = new.effective_to {
        if to <= new.effective_from {
            return Err(CoreError::Validation(format!(
                "effective_to {to} not after effective_from {}",
                new.effective_from
            )));
        }
    }
    Ok(())
}

impl Store {
    /// Append one observation. Never updates an existing row.
    pub fn insert_signal(&self, new: &NewSignalEvent) -> Result<SignalEvent> {
        validate_signal(new)?;

        let event = SignalEvent {
            id: Uuid::new_v4(),
            entity_type: new.entity_type,
            player_id: new.player_id,
            club_id: new.club_id,
            signal_type: new.signal_type,
            value: new.value.clone(),
            source: new.source.clone(),
            source_id: new.source_id.clone(),
            confidence: new.confidence,
            observed_at: new.observed_at,
            effective_from: new.effective_from,
            effective_to: new.effective_to,
            created_at: Utc::now(),
        };

        let (value_num, value_text, value_json) = value_columns(&event.value);

        let conn = self.lock();
        conn.execute(
            &format!(
                "INSERT INTO signal_events ({SIGNAL_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                fmt_uuid(event.id),
                event.entity_type.as_str(),
                event.player_id.map(fmt_uuid),
                event.club_id.map(fmt_uuid),
                event.signal_type.as_str(),
                value_num,
                value_text,
                value_json,
                event.source,
                event.source_id,
                event.confidence,
                fmt_ts(event.observed_at),
                fmt_ts(event.effective_from),
                event.effective_to.map(fmt_ts),
                fmt_ts(event.created_at),
            ],
        )?;
        Ok(event)
    }

    /// The canonical bitemporal as-of read.
    ///
    /// Among rows with `observed_at <= as_of AND effective_from <= as_of AND
    /// (effective_to IS NULL OR effective_to > as_of)`, returns the one
    /// maximizing `effective_from` (ties broken by `observed_at`).
    ///
    /// Routed exclusively through `crate::timeguard`.
    pub(crate) fn latest_signal_asof(
        &self,
        entity_type: EntityType,
        player_id: Option<Uuid>,
        club_id: Option<Uuid>,
        signal_type: SignalType,
        as_of: DateTime<Utc>,
    ) -> Result<Option<SignalAt>> {
        let as_of_s = fmt_ts(as_of);
        let conn = self.lock();

        let map = |row: &Row| -> rusqlite::Result<SignalAt> {
            Ok(SignalAt {
                value: value_from_columns(row.get(0)?, row.get(1)?, row.get(2)?)?,
                confidence: row.get(3)?,
                observed_at: parse_ts(&row.get::<_, String>(4)?)?,
                effective_from: parse_ts(&row.get::<_, String>(5)?)?,
            })
        };

        let result = match entity_type {
            EntityType::Player => {
                let player = player_id.ok_or_else(|| {
                    CoreError::Validation("player as-of read without player_id".into())
                })?;
                let mut stmt = conn.prepare_cached(
                    "SELECT value_num, value_text, value_json, confidence, observed_at, effective_from
                     FROM signal_events
                     WHERE entity_type = 'player'
                       AND player_id = ?1
                       AND signal_type = ?2
                       AND observed_at <= ?3
                       AND effective_from <= ?3
                       AND (effective_to IS NULL OR effective_to > ?3)
                     ORDER BY effective_from DESC, observed_at DESC
                     LIMIT 1",
                )?;
                stmt.query_row(params![fmt_uuid(player), signal_type.as_str(), as_of_s], map)
                    .optional()?
            }
            EntityType::Club => {
                let club = club_id.ok_or_else(|| {
                    CoreError::Validation("club as-of read without club_id".into())
                })?;
                let mut stmt = conn.prepare_cached(
                    "SELECT value_num, value_text, value_json, confidence, observed_at, effective_from
                     FROM signal_events
                     WHERE entity_type = 'club'
                       AND club_id = ?1
                       AND signal_type = ?2
                       AND observed_at <= ?3
                       AND effective_from <= ?3
                       AND (effective_to IS NULL OR effective_to > ?3)
                     ORDER BY effective_from DESC, observed_at DESC
                     LIMIT 1",
                )?;
                stmt.query_row(params![fmt_uuid(club), signal_type.as_str(), as_of_s], map)
                    .optional()?
            }
            EntityType::Pair => {
                let (player, club) = match (player_id, club_id) {
                    (Some(p), Some(c)) => (p, c),
                    _ => {
                        return Err(CoreError::Validation(
                            "pair as-of read requires player_id and club_id".into(),
                        ))
                    }
                };
                let mut stmt = conn.prepare_cached(
                    "SELECT value_num, value_text, value_json, confidence, observed_at, effective_from
                     FROM signal_events
                     WHERE entity_type = 'pair'
                       AND player_id = ?1
                       AND club_id = ?2
                       AND signal_type = ?3
                       AND observed_at <= ?4
                       AND effective_from <= ?4
                       AND (effective_to IS NULL OR effective_to > ?4)
                     ORDER BY effective_from DESC, observed_at DESC
                     LIMIT 1",
                )?;
                stmt.query_row(
                    params![fmt_uuid(player), fmt_uuid(club), signal_type.as_str(), as_of_s],
                    map,
                )
                .optional()?
            }
        };
        Ok(result)
    }

    /// All of a player's signal rows (player and pair entities) whose
    /// `effective_from` lies in `[window_start, as_of]` and that were known
    /// by `as_of`. Ascending by `effective_from`.
    ///
    /// Routed exclusively through `crate::timeguard`.
    pub(crate) fn player_signals_window_asof(
        &self,
        player_id: Uuid,
        window_start: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<SignalEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SIGNAL_COLS} FROM signal_events
             WHERE player_id = ?1
               AND observed_at <= ?2
               AND effective_from <= ?2
               AND effective_from >= ?3
             ORDER BY effective_from ASC, observed_at ASC"
        ))?;
        let rows = stmt
            .query_map(
                params![fmt_uuid(player_id), fmt_ts(as_of), fmt_ts(window_start)],
                row_to_signal,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Clubs that share a pair signal of `signal_type` with the player, among
    /// rows visible at `as_of`. Sorted for deterministic iteration.
    ///
    /// Routed exclusively through `crate::timeguard`.
    pub(crate) fn pair_partner_clubs_asof(
        &self,
        player_id: Uuid,
        signal_type: SignalType,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT club_id FROM signal_events
             WHERE entity_type = 'pair'
               AND player_id = ?1
               AND signal_type = ?2
               AND observed_at <= ?3
               AND effective_from <= ?3
               AND (effective_to IS NULL OR effective_to > ?3)
             ORDER BY club_id",
        )?;
        let rows = stmt
            .query_map(
                params![fmt_uuid(player_id), signal_type.as_str(), fmt_ts(as_of)],
                |row| parse_uuid(&row.get::<_, String>(0)?),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Signal history for the read surface. When `as_of` is given, only rows
    /// already known and effective by that instant are returned.
    pub fn signal_history(
        &self,
        player_id: Uuid,
        as_of: Option<DateTime<Utc>>,
        signal_type: Option<SignalType>,
        limit: usize,
    ) -> Result<Vec<SignalEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SIGNAL_COLS} FROM signal_events
             WHERE player_id = ?1
               AND (?2 IS NULL OR (observed_at <= ?2 AND effective_from <= ?2))
               AND (?3 IS NULL OR signal_type = ?3)
             ORDER BY effective_from DESC, observed_at DESC
             LIMIT ?4"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    fmt_uuid(player_id),
                    as_of.map(fmt_ts),
                    signal_type.map(|t| t.as_str()),
                    limit as i64
                ],
                row_to_signal,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Club, Competition, Player};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn fixture(store: &Store) -> (Uuid, Uuid) {
        let comp = Competition {
            id: Uuid::new_v4(),
            name: "La Liga".to_string(),
            country: "Spain".to_string(),
            tier: 1,
        };
        store.upsert_competition(&comp).unwrap();
        let club = Club {
            id: Uuid::new_v4(),
            name: "Real Madrid".to_string(),
            country: "Spain".to_string(),
            competition_id: Some(comp.id),
        };
        store.upsert_club(&club).unwrap();
        let player = Player {
            id: Uuid::new_v4(),
            name: "Test Player".to_string(),
            date_of_birth: None,
            nationality: None,
            position: None,
            current_club_id: Some(club.id),
            contract_until: None,
            is_active: true,
        };
        store.upsert_player(&player).unwrap();
        (player.id, club.id)
    }

    fn player_signal(
        player: Uuid,
        signal_type: SignalType,
        value: f64,
        observed_at: DateTime<Utc>,
        effective_from: DateTime<Utc>,
    ) -> NewSignalEvent {
        NewSignalEvent {
            entity_type: EntityType::Player,
            player_id: Some(player),
            club_id: None,
            signal_type,
            value: SignalValue::Num(value),
            source: "test".to_string(),
            source_id: None,
            confidence: 0.9,
            observed_at,
            effective_from,
            effective_to: None,
        }
    }

    #[test]
    fn test_entity_consistency_enforced_on_write() {
        let store = Store::open_in_memory().unwrap();
        let (player, club) = fixture(&store);

        let mut bad = player_signal(
            player,
            SignalType::MarketValue,
            1.0,
            ts("2025-01-10T12:00:00Z"),
            ts("2025-01-10T12:00:00Z"),
        );
        bad.club_id = Some(club);
        assert!(matches!(
            store.insert_signal(&bad),
            Err(CoreError::Validation(_))
        ));

        let mut bad_conf = player_signal(
            player,
            SignalType::MarketValue,
            1.0,
            ts("2025-01-10T12:00:00Z"),
            ts("2025-01-10T12:00:00Z"),
        );
        bad_conf.confidence = 1.5;
        assert!(matches!(
            store.insert_signal(&bad_conf),
            Err(CoreError::Validation(_))
        ));

        let mut bad_range = player_signal(
            player,
            SignalType::MarketValue,
            1.0,
            ts("2025-01-10T12:00:00Z"),
            ts("2025-01-10T12:00:00Z"),
        );
        bad_range.effective_to = Some(ts("2025-01-10T12:00:00Z"));
        assert!(matches!(
            store.insert_signal(&bad_range),
            Err(CoreError::Validation(_))
        ));
    }

    /// The literal scenario from the system's contract: a later observation
    /// of the same effective instant must stay invisible until observed.
    #[test]
    fn test_asof_read_ignores_late_observation() {
        let store = Store::open_in_memory().unwrap();
        let (player, _) = fixture(&store);

        store
            .insert_signal(&player_signal(
                player,
                SignalType::MarketValue,
                50_000_000.0,
                ts("2025-01-10T12:00:00Z"),
                ts("2025-01-10T12:00:00Z"),
            ))
            .unwrap();
        store
            .insert_signal(&player_signal(
                player,
                SignalType::MarketValue,
                100_000_000.0,
                ts("2025-01-20T12:00:00Z"),
                ts("2025-01-10T12:00:00Z"),
            ))
            .unwrap();

        let at = store
            .latest_signal_asof(
                EntityType::Player,
                Some(player),
                None,
                SignalType::MarketValue,
                ts("2025-01-15T12:00:00Z"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(at.value.as_num(), Some(50_000_000.0));

        // After the second observation lands, the corrected value wins.
        let later = store
            .latest_signal_asof(
                EntityType::Player,
                Some(player),
                None,
                SignalType::MarketValue,
                ts("2025-01-21T12:00:00Z"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(later.value.as_num(), Some(100_000_000.0));
    }

    #[test]
    fn test_asof_boundaries_are_inclusive_exclusive() {
        let store = Store::open_in_memory().unwrap();
        let (player, _) = fixture(&store);

        let mut sig = player_signal(
            player,
            SignalType::ContractMonthsRemaining,
            18.0,
            ts("2025-01-10T12:00:00Z"),
            ts("2025-01-10T12:00:00Z"),
        );
        sig.effective_to = Some(ts("2025-02-01T00:00:00Z"));
        store.insert_signal(&sig).unwrap();

        let read = |as_of: &str| {
            store
                .latest_signal_asof(
                    EntityType::Player,
                    Some(player),
                    None,
                    SignalType::ContractMonthsRemaining,
                    ts(as_of),
                )
                .unwrap()
        };

        // as_of exactly equal to observed_at/effective_from includes the row.
        assert!(read("2025-01-10T12:00:00Z").is_some());
        // One microsecond later still includes it.
        assert!(read("2025-01-10T12:00:00.000001Z").is_some());
        // One microsecond earlier excludes it.
        assert!(read("2025-01-10T11:59:59.999999Z").is_none());
        // as_of equal to effective_to excludes it (strict >).
        assert!(read("2025-02-01T00:00:00Z").is_none());
        assert!(read("2025-01-31T23:59:59.999999Z").is_some());
    }
}
