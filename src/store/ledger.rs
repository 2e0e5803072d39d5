//! Append-only transfer ledger.
//!
//! Rows are immutable once written. The only update path is `supersede`,
//! which appends a corrected row and flips `is_superseded` on the old one.
//! There is no upsert on this table anywhere in the codebase.

use super::{fmt_date, fmt_ts, fmt_uuid, parse_date, parse_ts, parse_uuid, Store};
use crate::error::{CoreError, Result};
use crate::models::TransferEvent;
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;
use uuid::Uuid;

const TRANSFER_COLS: &str = "id, event_id, player_id, from_club_id, to_club_id, transfer_type, \
     transfer_date, fee_amount, fee_currency, fee_amount_eur, fee_type, contract_start, \
     contract_end, loan_end_date, option_to_buy, option_fee_eur, obligation_to_buy, \
     obligation_fee_eur, sell_on_percent, buy_back_clause, buy_back_fee_eur, source, \
     source_confidence, created_at, is_superseded, superseded_by";

fn row_to_transfer(row: &Row) -> rusqlite::Result<TransferEvent> {
    Ok(TransferEvent {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        event_id: row.get(1)?,
        player_id: parse_uuid(&row.get::<_, String>(2)?)?,
        from_club_id: row
            .get::<_, Option<String>>(3)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
        to_club_id: parse_uuid(&row.get::<_, String>(4)?)?,
        transfer_type: row
            .get::<_, String>(5)?
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                e.into(),
            ))?,
        transfer_date: parse_date(&row.get::<_, String>(6)?)?,
        fee_amount: row.get(7)?,
        fee_currency: row.get(8)?,
        fee_amount_eur: row.get(9)?,
        fee_type: row
            .get::<_, String>(10)?
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(
                10,
                rusqlite::types::Type::Text,
                e.into(),
            ))?,
        contract_start: row
            .get::<_, Option<String>>(11)?
            .map(|s| parse_date(&s))
            .transpose()?,
        contract_end: row
            .get::<_, Option<String>>(12)?
            .map(|s| parse_date(&s))
            .transpose()?,
        loan_end_date: row
            .get::<_, Option<String>>(13)?
            .map(|s| parse_date(&s))
            .transpose()?,
        option_to_buy: row.get::<_, i64>(14)? != 0,
        option_fee_eur: row.get(15)?,
        obligation_to_buy: row.get::<_, i64>(16)? != 0,
        obligation_fee_eur: row.get(17)?,
        sell_on_percent: row.get(18)?,
        buy_back_clause: row.get::<_, i64>(19)? != 0,
        buy_back_fee_eur: row.get(20)?,
        source: row.get(21)?,
        source_confidence: row.get(22)?,
        created_at: parse_ts(&row.get::<_, String>(23)?)?,
        is_superseded: row.get::<_, i64>(24)? != 0,
        superseded_by: row
            .get::<_, Option<String>>(25)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
    })
}

fn validate_transfer(event: &TransferEvent) -> Result<()> {
    if !(0.0..=1.0).contains(&event.source_confidence) {
        return Err(CoreError::Validation(format!(
            "source_confidence {} outside [0, 1]",
            event.source_confidence
        )));
    }
    if let Some(pct) = event.sell_on_percent {
        if !(0.0..=100.0).contains(&pct) {
            return Err(CoreError::Validation(format!(
                "sell_on_percent {pct} outside [0, 100]"
            )));
        }
    }
    Ok(())
}

impl Store {
    /// Strict insert. A duplicate `event_id` is a Conflict, never an update.
    pub fn insert_transfer(&self, event: &TransferEvent) -> Result<()> {
        validate_transfer(event)?;

        let conn = self.lock();
        let exists: Option<String> = conn
            .query_row(
                "SELECT id FROM transfer_events WHERE event_id = ?1",
                [&event.event_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(CoreError::Conflict(format!(
                "transfer event {} already exists",
                event.event_id
            )));
        }

        conn.execute(
            &format!(
                "INSERT INTO transfer_events ({TRANSFER_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)"
            ),
            params![
                fmt_uuid(event.id),
                event.event_id,
                fmt_uuid(event.player_id),
                event.from_club_id.map(fmt_uuid),
                fmt_uuid(event.to_club_id),
                event.transfer_type.as_str(),
                fmt_date(event.transfer_date),
                event.fee_amount,
                event.fee_currency,
                event.fee_amount_eur,
                event.fee_type.as_str(),
                event.contract_start.map(fmt_date),
                event.contract_end.map(fmt_date),
                event.loan_end_date.map(fmt_date),
                event.option_to_buy as i64,
                event.option_fee_eur,
                event.obligation_to_buy as i64,
                event.obligation_fee_eur,
                event.sell_on_percent,
                event.buy_back_clause as i64,
                event.buy_back_fee_eur,
                event.source,
                event.source_confidence,
                fmt_ts(event.created_at),
                event.is_superseded as i64,
                event.superseded_by.map(fmt_uuid),
            ],
        )?;
        Ok(())
    }

    /// Append a correction and mark the old row superseded by it.
    ///
    /// The old row must exist and must not already be superseded; history is
    /// never rewritten.
    pub fn supersede_transfer(&self, old_event_id: &str, correction: &TransferEvent) -> Result<()> {
        validate_transfer(correction)?;

        let old = self
            .get_transfer_by_event_id(old_event_id)?
            .ok_or_else(|| CoreError::NotFound(format!("transfer event {old_event_id}")))?;
        if old.is_superseded {
            return Err(CoreError::Conflict(format!(
                "transfer event {old_event_id} is already superseded"
            )));
        }

        self.insert_transfer(correction)?;

        let conn = self.lock();
        conn.execute(
            "UPDATE transfer_events SET is_superseded = 1, superseded_by = ?1 WHERE id = ?2",
            params![fmt_uuid(correction.id), fmt_uuid(old.id)],
        )?;
        Ok(())
    }

    pub fn get_transfer_by_event_id(&self, event_id: &str) -> Result<Option<TransferEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRANSFER_COLS} FROM transfer_events WHERE event_id = ?1"
        ))?;
        let row = stmt.query_row([event_id], row_to_transfer).optional()?;
        Ok(row)
    }

    fn get_transfer_by_id(&self, id: Uuid) -> Result<Option<TransferEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRANSFER_COLS} FROM transfer_events WHERE id = ?1"
        ))?;
        let row = stmt.query_row([fmt_uuid(id)], row_to_transfer).optional()?;
        Ok(row)
    }

    /// Walk the supersede chain to its terminal (non-superseded) row.
    ///
    /// The chain is a shallow DAG with forward pointers only; a cycle is a
    /// corruption and reported as Conflict.
    pub fn resolve_transfer_terminal(&self, event_id: &str) -> Result<TransferEvent> {
        let mut current = self
            .get_transfer_by_event_id(event_id)?
            .ok_or_else(|| CoreError::NotFound(format!("transfer event {event_id}")))?;

        let mut seen: HashSet<Uuid> = HashSet::new();
        seen.insert(current.id);

        while let Some(next_id) = current.superseded_by {
            if !seen.insert(next_id) {
                return Err(CoreError::Conflict(format!(
                    "supersede cycle detected at transfer event {event_id}"
                )));
            }
            current = self
                .get_transfer_by_id(next_id)?
                .ok_or_else(|| CoreError::NotFound(format!("transfer event row {next_id}")))?;
        }
        Ok(current)
    }

    /// Full history for a player, newest first, superseded rows included.
    pub fn transfers_for_player(&self, player_id: Uuid) -> Result<Vec<TransferEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRANSFER_COLS} FROM transfer_events
             WHERE player_id = ?1
             ORDER BY transfer_date DESC, created_at DESC"
        ))?;
        let rows = stmt
            .query_map([fmt_uuid(player_id)], row_to_transfer)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Non-superseded transfers into a club since `since`, newest first.
    pub fn transfers_into_club(&self, club_id: Uuid, since: NaiveDate) -> Result<Vec<TransferEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRANSFER_COLS} FROM transfer_events
             WHERE to_club_id = ?1 AND transfer_date >= ?2 AND is_superseded = 0
             ORDER BY transfer_date DESC"
        ))?;
        let rows = stmt
            .query_map(params![fmt_uuid(club_id), fmt_date(since)], row_to_transfer)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Non-superseded transfers out of a club since `since`, newest first.
    pub fn transfers_out_of_club(
        &self,
        club_id: Uuid,
        since: NaiveDate,
    ) -> Result<Vec<TransferEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRANSFER_COLS} FROM transfer_events
             WHERE from_club_id = ?1 AND transfer_date >= ?2 AND is_superseded = 0
             ORDER BY transfer_date DESC"
        ))?;
        let rows = stmt
            .query_map(params![fmt_uuid(club_id), fmt_date(since)], row_to_transfer)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Label candidates for training: completed moves inside the window,
    /// not superseded, with a known origin club, of a movement type that
    /// represents a real transfer decision.
    pub fn training_positives(
        &self,
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> Result<Vec<TransferEvent>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TRANSFER_COLS} FROM transfer_events
             WHERE transfer_date >= ?1 AND transfer_date <= ?2
               AND is_superseded = 0
               AND from_club_id IS NOT NULL
               AND transfer_type IN ('permanent', 'loan', 'loan_with_option')
             ORDER BY transfer_date"
        ))?;
        let rows = stmt
            .query_map(
                params![fmt_date(window_start), fmt_date(window_end)],
                row_to_transfer,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        transfer_event_id, Club, Competition, FeeType, Player, TransferType,
    };
    use chrono::Utc;

    fn fixture(store: &Store) -> (Uuid, Uuid, Uuid) {
        let comp = Competition {
            id: Uuid::new_v4(),
            name: "Serie A".to_string(),
            country: "Italy".to_string(),
            tier: 1,
        };
        store.upsert_competition(&comp).unwrap();
        let from = Club {
            id: Uuid::new_v4(),
            name: "Juventus".to_string(),
            country: "Italy".to_string(),
            competition_id: Some(comp.id),
        };
        let to = Club {
            id: Uuid::new_v4(),
            name: "Inter".to_string(),
            country: "Italy".to_string(),
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

    fn transfer(player: Uuid, from: Uuid, to: Uuid, fee: Option<f64>) -> TransferEvent {
        let date = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        TransferEvent {
            id: Uuid::new_v4(),
            event_id: transfer_event_id(date, player, Some(from)),
            player_id: player,
            from_club_id: Some(from),
            to_club_id: to,
            transfer_type: TransferType::Permanent,
            transfer_date: date,
            fee_amount: fee,
            fee_currency: fee.map(|_| "EUR".to_string()),
            fee_amount_eur: fee,
            fee_type: FeeType::Reported,
            contract_start: None,
            contract_end: None,
            loan_end_date: None,
            option_to_buy: false,
            option_fee_eur: None,
            obligation_to_buy: false,
            obligation_fee_eur: None,
            sell_on_percent: None,
            buy_back_clause: false,
            buy_back_fee_eur: None,
            source: "test".to_string(),
            source_confidence: 0.9,
            created_at: Utc::now(),
            is_superseded: false,
            superseded_by: None,
        }
    }

    #[test]
    fn test_duplicate_event_id_is_conflict() {
        let store = Store::open_in_memory().unwrap();
        let (player, from, to) = fixture(&store);

        let ev = transfer(player, from, to, Some(40_000_000.0));
        store.insert_transfer(&ev).unwrap();

        let mut dup = transfer(player, from, to, Some(45_000_000.0));
        dup.id = Uuid::new_v4();
        match store.insert_transfer(&dup) {
            Err(CoreError::Conflict(_)) => {}
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_supersede_chain_terminates_at_unsuperseded_row() {
        let store = Store::open_in_memory().unwrap();
        let (player, from, to) = fixture(&store);

        let original = transfer(player, from, to, Some(40_000_000.0));
        store.insert_transfer(&original).unwrap();

        let mut correction = transfer(player, from, to, Some(47_500_000.0));
        correction.event_id = format!("{}-r1", original.event_id);
        store
            .supersede_transfer(&original.event_id, &correction)
            .unwrap();

        let old = store
            .get_transfer_by_event_id(&original.event_id)
            .unwrap()
            .unwrap();
        assert!(old.is_superseded);
        assert_eq!(old.superseded_by, Some(correction.id));

        let terminal = store.resolve_transfer_terminal(&original.event_id).unwrap();
        assert_eq!(terminal.id, correction.id);
        assert!(!terminal.is_superseded);
        assert_eq!(terminal.fee_amount_eur, Some(47_500_000.0));

        // Correcting the already-superseded row again is rejected.
        let mut second = transfer(player, from, to, Some(50_000_000.0));
        second.event_id = format!("{}-r2", original.event_id);
        assert!(matches!(
            store.supersede_transfer(&original.event_id, &second),
            Err(CoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_training_positives_filters_types_and_superseded() {
        let store = Store::open_in_memory().unwrap();
        let (player, from, to) = fixture(&store);

        let ev = transfer(player, from, to, Some(40_000_000.0));
        store.insert_transfer(&ev).unwrap();

        let mut retirement = transfer(player, from, to, None);
        retirement.event_id = format!("{}-ret", ev.event_id);
        retirement.transfer_type = TransferType::Retirement;
        store.insert_transfer(&retirement).unwrap();

        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 12, 31).unwrap();
        let positives = store.training_positives(start, end).unwrap();
        assert_eq!(positives.len(), 1);
        assert_eq!(positives[0].transfer_type, TransferType::Permanent);
    }
}
