//! Reference data: competitions, clubs, players.
//!
//! Mutated only through admin writes and the demo seeder. The player hint
//! columns (`current_club_id`, `contract_until`) are refreshed here and
//! nowhere else.

use super::{fmt_date, fmt_uuid, parse_date, parse_uuid, Store};
use crate::error::{CoreError, Result};
use crate::models::{Club, Competition, Player};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One ranked row of the fuzzy search union.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub kind: String,
    pub id: Uuid,
    pub name: String,
    pub detail: Option<String>,
}

fn row_to_player(row: &Row) -> rusqlite::Result<Player> {
    Ok(Player {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        date_of_birth: row
            .get::<_, Option<String>>(2)?
            .map(|s| parse_date(&s))
            .transpose()?,
        nationality: row.get(3)?,
        position: row.get(4)?,
        current_club_id: row
            .get::<_, Option<String>>(5)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
        contract_until: row
            .get::<_, Option<String>>(6)?
            .map(|s| parse_date(&s))
            .transpose()?,
        is_active: row.get::<_, i64>(7)? != 0,
    })
}

const PLAYER_COLS: &str =
    "id, name, date_of_birth, nationality, position, current_club_id, contract_until, is_active";

fn row_to_club(row: &Row) -> rusqlite::Result<Club> {
    Ok(Club {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        country: row.get(2)?,
        competition_id: row
            .get::<_, Option<String>>(3)?
            .map(|s| parse_uuid(&s))
            .transpose()?,
    })
}

impl Store {
    pub fn upsert_competition(&self, competition: &Competition) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO competitions (id, name, country, tier) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                country = excluded.country,
                tier = excluded.tier",
            params![
                fmt_uuid(competition.id),
                competition.name,
                competition.country,
                competition.tier
            ],
        )?;
        Ok(())
    }

    pub fn get_competition(&self, id: Uuid) -> Result<Option<Competition>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("SELECT id, name, country, tier FROM competitions WHERE id = ?1")?;
        let row = stmt
            .query_row([fmt_uuid(id)], |row| {
                Ok(Competition {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    name: row.get(1)?,
                    country: row.get(2)?,
                    tier: row.get(3)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    pub fn list_competitions(&self) -> Result<Vec<Competition>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("SELECT id, name, country, tier FROM competitions ORDER BY tier, name")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Competition {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    name: row.get(1)?,
                    country: row.get(2)?,
                    tier: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn upsert_club(&self, club: &Club) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO clubs (id, name, country, competition_id) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                country = excluded.country,
                competition_id = excluded.competition_id",
            params![
                fmt_uuid(club.id),
                club.name,
                club.country,
                club.competition_id.map(fmt_uuid)
            ],
        )?;
        Ok(())
    }

    pub fn get_club(&self, id: Uuid) -> Result<Option<Club>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached("SELECT id, name, country, competition_id FROM clubs WHERE id = ?1")?;
        let row = stmt.query_row([fmt_uuid(id)], row_to_club).optional()?;
        Ok(row)
    }

    pub fn require_club(&self, id: Uuid) -> Result<Club> {
        self.get_club(id)?
            .ok_or_else(|| CoreError::NotFound(format!("club {id}")))
    }

    /// Tier of a club, derived through its competition.
    pub fn club_tier(&self, club_id: Uuid) -> Result<Option<i32>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT comp.tier FROM clubs c
             JOIN competitions comp ON comp.id = c.competition_id
             WHERE c.id = ?1",
        )?;
        let tier = stmt
            .query_row([fmt_uuid(club_id)], |row| row.get::<_, i32>(0))
            .optional()?;
        Ok(tier)
    }

    pub fn clubs_in_competition(&self, competition_id: Uuid) -> Result<Vec<Club>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, country, competition_id FROM clubs
             WHERE competition_id = ?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map([fmt_uuid(competition_id)], row_to_club)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Clubs whose competition tier is at most `max_tier`, with the tier.
    pub fn clubs_up_to_tier(&self, max_tier: i32) -> Result<Vec<(Club, i32)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT c.id, c.name, c.country, c.competition_id, comp.tier
             FROM clubs c
             JOIN competitions comp ON comp.id = c.competition_id
             WHERE comp.tier <= ?1
             ORDER BY comp.tier, c.name",
        )?;
        let rows = stmt
            .query_map([max_tier], |row| Ok((row_to_club(row)?, row.get::<_, i32>(4)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn upsert_player(&self, player: &Player) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO players
                (id, name, date_of_birth, nationality, position, current_club_id, contract_until, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                date_of_birth = excluded.date_of_birth,
                nationality = excluded.nationality,
                position = excluded.position,
                current_club_id = excluded.current_club_id,
                contract_until = excluded.contract_until,
                is_active = excluded.is_active",
            params![
                fmt_uuid(player.id),
                player.name,
                player.date_of_birth.map(fmt_date),
                player.nationality,
                player.position,
                player.current_club_id.map(fmt_uuid),
                player.contract_until.map(fmt_date),
                player.is_active as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_player(&self, id: Uuid) -> Result<Option<Player>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {PLAYER_COLS} FROM players WHERE id = ?1"))?;
        let row = stmt.query_row([fmt_uuid(id)], row_to_player).optional()?;
        Ok(row)
    }

    pub fn require_player(&self, id: Uuid) -> Result<Player> {
        self.get_player(id)?
            .ok_or_else(|| CoreError::NotFound(format!("player {id}")))
    }

    /// The population every batch job iterates: active players with a club.
    pub fn active_players_with_club(&self) -> Result<Vec<Player>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {PLAYER_COLS} FROM players
             WHERE is_active = 1 AND current_club_id IS NOT NULL
             ORDER BY name"
        ))?;
        let rows = stmt
            .query_map([], row_to_player)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Current squad of a club (reference-data view, hint-column based).
    pub fn squad(&self, club_id: Uuid) -> Result<Vec<Player>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {PLAYER_COLS} FROM players
             WHERE current_club_id = ?1 AND is_active = 1
             ORDER BY name"
        ))?;
        let rows = stmt
            .query_map([fmt_uuid(club_id)], row_to_player)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All club ids, sorted for deterministic iteration.
    pub fn all_club_ids(&self) -> Result<Vec<Uuid>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("SELECT id FROM clubs ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| parse_uuid(&row.get::<_, String>(0)?))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Fuzzy ranked union of players and clubs.
    ///
    /// Rank: exact name first, then prefix, then substring; ties break on
    /// name. Case-insensitive.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Ok(Vec::new());
        }

        let exact = q.clone();
        let prefix = format!("{q}%");
        let contains = format!("%{q}%");

        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT kind, id, name, detail, rank FROM (
                SELECT 'player' AS kind, p.id AS id, p.name AS name,
                       p.position AS detail,
                       CASE
                         WHEN lower(p.name) = ?1 THEN 0
                         WHEN lower(p.name) LIKE ?2 THEN 1
                         ELSE 2
                       END AS rank
                FROM players p
                WHERE lower(p.name) LIKE ?3
                UNION ALL
                SELECT 'club' AS kind, c.id AS id, c.name AS name,
                       c.country AS detail,
                       CASE
                         WHEN lower(c.name) = ?1 THEN 0
                         WHEN lower(c.name) LIKE ?2 THEN 1
                         ELSE 2
                       END AS rank
                FROM clubs c
                WHERE lower(c.name) LIKE ?3
             )
             ORDER BY rank, name
             LIMIT ?4",
        )?;

        let rows = stmt
            .query_map(params![exact, prefix, contains, limit as i64], |row| {
                Ok(SearchHit {
                    kind: row.get(0)?,
                    id: parse_uuid(&row.get::<_, String>(1)?)?,
                    name: row.get(2)?,
                    detail: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fixture_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        let comp = Competition {
            id: Uuid::new_v4(),
            name: "Premier League".to_string(),
            country: "England".to_string(),
            tier: 1,
        };
        store.upsert_competition(&comp).unwrap();

        let club = Club {
            id: Uuid::new_v4(),
            name: "Arsenal".to_string(),
            country: "England".to_string(),
            competition_id: Some(comp.id),
        };
        store.upsert_club(&club).unwrap();

        let player = Player {
            id: Uuid::new_v4(),
            name: "Bukayo Saka".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(2001, 9, 5),
            nationality: Some("England".to_string()),
            position: Some("RW".to_string()),
            current_club_id: Some(club.id),
            contract_until: NaiveDate::from_ymd_opt(2027, 6, 30),
            is_active: true,
        };
        store.upsert_player(&player).unwrap();
        store
    }

    #[test]
    fn test_club_tier_via_competition() {
        let store = fixture_store();
        let clubs = store.clubs_up_to_tier(1).unwrap();
        assert_eq!(clubs.len(), 1);
        assert_eq!(clubs[0].1, 1);
        assert_eq!(store.club_tier(clubs[0].0.id).unwrap(), Some(1));
    }

    #[test]
    fn test_search_ranks_prefix_before_substring() {
        let store = fixture_store();
        let comp = store.list_competitions().unwrap().remove(0);
        let other = Club {
            id: Uuid::new_v4(),
            name: "Arse FC".to_string(),
            country: "England".to_string(),
            competition_id: Some(comp.id),
        };
        store.upsert_club(&other).unwrap();

        let hits = store.search("arse", 10).unwrap();
        assert!(hits.len() >= 2);
        // Both are prefix matches; exact beats prefix elsewhere, here order
        // falls back to name.
        assert!(hits.iter().any(|h| h.name == "Arsenal"));

        let hits = store.search("saka", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, "player");
    }

    #[test]
    fn test_active_players_with_club() {
        let store = fixture_store();
        let players = store.active_players_with_club().unwrap();
        assert_eq!(players.len(), 1);

        let mut p = players[0].clone();
        p.is_active = false;
        store.upsert_player(&p).unwrap();
        assert!(store.active_players_with_club().unwrap().is_empty());
    }
}
