//! Demo data seeding.
//!
//! Builds a small, deterministic world: the big-five leagues plus two lower
//! English tiers, a spread of clubs and players, eighteen months of transfer
//! history, a signal stream dense enough to light up every candidate source,
//! and a week of user sessions for the derivation job.
//!
//! Ids are UUIDv5 over stable names, so re-running upserts reference data in
//! place; ledger rows are skipped when already present (the ledger stays
//! strict insert-only even here).

use crate::error::Result;
use crate::models::{
    transfer_event_id, Club, Competition, EntityType, FeeType, NewSignalEvent, Player,
    SignalType, SignalValue, TransferEvent, TransferType, UserEvent, UserEventType,
};
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

const SEED_SOURCE: &str = "tl_demo_seed";

fn stable_id(kind: &str, name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{kind}:{name}").as_bytes())
}

// (name, country, tier)
const COMPETITIONS: [(&str, &str, i32); 7] = [
    ("Premier League", "England", 1),
    ("La Liga", "Spain", 1),
    ("Serie A", "Italy", 1),
    ("Bundesliga", "Germany", 1),
    ("Ligue 1", "France", 1),
    ("Championship", "England", 2),
    ("League One", "England", 3),
];

// (name, country, competition, league position, points per game, net spend)
const CLUBS: [(&str, &str, &str, f64, f64, f64); 24] = [
    ("Arsenal", "England", "Premier League", 1.0, 2.3, 120_000_000.0),
    ("Manchester City", "England", "Premier League", 2.0, 2.2, 150_000_000.0),
    ("Liverpool", "England", "Premier League", 3.0, 2.1, 80_000_000.0),
    ("Chelsea", "England", "Premier League", 5.0, 1.8, 200_000_000.0),
    ("Newcastle", "England", "Premier League", 7.0, 1.6, 90_000_000.0),
    ("Brighton", "England", "Premier League", 9.0, 1.4, -20_000_000.0),
    ("Real Madrid", "Spain", "La Liga", 1.0, 2.4, 100_000_000.0),
    ("Barcelona", "Spain", "La Liga", 2.0, 2.2, 60_000_000.0),
    ("Atletico Madrid", "Spain", "La Liga", 3.0, 2.0, 40_000_000.0),
    ("Sevilla", "Spain", "La Liga", 8.0, 1.3, 10_000_000.0),
    ("Inter", "Italy", "Serie A", 1.0, 2.3, 30_000_000.0),
    ("Juventus", "Italy", "Serie A", 3.0, 2.0, 70_000_000.0),
    ("Napoli", "Italy", "Serie A", 4.0, 1.9, 25_000_000.0),
    ("Milan", "Italy", "Serie A", 5.0, 1.8, 45_000_000.0),
    ("Bayern Munich", "Germany", "Bundesliga", 1.0, 2.5, 110_000_000.0),
    ("Leverkusen", "Germany", "Bundesliga", 2.0, 2.3, 35_000_000.0),
    ("Dortmund", "Germany", "Bundesliga", 3.0, 2.0, 50_000_000.0),
    ("PSG", "France", "Ligue 1", 1.0, 2.6, 130_000_000.0),
    ("Marseille", "France", "Ligue 1", 3.0, 1.9, 20_000_000.0),
    ("Monaco", "France", "Ligue 1", 4.0, 1.8, 15_000_000.0),
    ("Leeds", "England", "Championship", 1.0, 2.1, 25_000_000.0),
    ("Leicester", "England", "Championship", 2.0, 2.0, 30_000_000.0),
    ("Birmingham", "England", "League One", 1.0, 2.2, 12_000_000.0),
    ("Bolton", "England", "League One", 4.0, 1.7, 3_000_000.0),
];

// (name, club, position, birth y/m/d, nationality, market value,
//  contract months remaining, goals last 10, assists last 10)
#[allow(clippy::type_complexity)]
const PLAYERS: [(&str, &str, &str, (i32, u32, u32), &str, f64, f64, f64, f64); 22] = [
    ("Theo Marchand", "Arsenal", "ST", (2000, 7, 21), "France", 85_000_000.0, 18.0, 7.0, 2.0),
    ("Iker Soldado", "Real Madrid", "RW", (2002, 3, 14), "Spain", 120_000_000.0, 42.0, 6.0, 5.0),
    ("Luca Ferretti", "Inter", "CM", (1998, 11, 2), "Italy", 55_000_000.0, 10.0, 2.0, 4.0),
    ("Jonas Brandt", "Leverkusen", "AM", (2001, 5, 30), "Germany", 70_000_000.0, 30.0, 5.0, 7.0),
    ("Sam Whitlow", "Brighton", "CB", (1999, 1, 12), "England", 35_000_000.0, 8.0, 1.0, 0.0),
    ("Mateo Vidal", "Barcelona", "DM", (1997, 9, 8), "Spain", 48_000_000.0, 22.0, 0.0, 2.0),
    ("Ruben Costa", "Chelsea", "LW", (2003, 2, 19), "Portugal", 62_000_000.0, 54.0, 4.0, 3.0),
    ("Felix Armand", "PSG", "ST", (2000, 12, 3), "France", 95_000_000.0, 15.0, 9.0, 1.0),
    ("Oliver Dahl", "Newcastle", "GK", (1996, 6, 25), "Denmark", 28_000_000.0, 26.0, 0.0, 0.0),
    ("Marco Bellini", "Napoli", "RB", (1999, 4, 17), "Italy", 32_000_000.0, 11.0, 1.0, 3.0),
    ("Noah Verbeek", "Dortmund", "LB", (2002, 8, 9), "Netherlands", 40_000_000.0, 36.0, 0.0, 4.0),
    ("Tomas Herrera", "Atletico Madrid", "CB", (1995, 10, 22), "Uruguay", 25_000_000.0, 6.0, 0.0, 0.0),
    ("Leon Kraus", "Bayern Munich", "CM", (1998, 3, 5), "Germany", 60_000_000.0, 20.0, 3.0, 6.0),
    ("Andre Fontaine", "Monaco", "RW", (2004, 1, 28), "France", 45_000_000.0, 33.0, 5.0, 4.0),
    ("Jack Merrick", "Leeds", "ST", (2001, 11, 16), "England", 18_000_000.0, 14.0, 8.0, 1.0),
    ("Santi Roca", "Sevilla", "AM", (2000, 2, 7), "Spain", 30_000_000.0, 9.0, 3.0, 5.0),
    ("Pavel Novak", "Milan", "DM", (1997, 7, 31), "Czechia", 27_000_000.0, 17.0, 1.0, 1.0),
    ("Emile Roux", "Marseille", "LW", (2003, 6, 11), "France", 38_000_000.0, 28.0, 4.0, 2.0),
    ("Kofi Mensah", "Liverpool", "RW", (2002, 9, 23), "Ghana", 58_000_000.0, 40.0, 6.0, 3.0),
    ("Bruno Esteves", "Juventus", "CB", (1996, 12, 14), "Portugal", 22_000_000.0, 12.0, 0.0, 1.0),
    ("Dylan Hart", "Leicester", "CM", (2000, 4, 3), "England", 15_000_000.0, 19.0, 2.0, 3.0),
    ("Victor Lindqvist", "Manchester City", "AM", (1999, 8, 27), "Sweden", 90_000_000.0, 48.0, 7.0, 8.0),
];

// (player, from club, to club = player's current club, months ago, fee)
const TRANSFERS: [(&str, &str, &str, i64, f64); 15] = [
    ("Theo Marchand", "Monaco", "Arsenal", 14, 60_000_000.0),
    ("Iker Soldado", "Sevilla", "Real Madrid", 20, 80_000_000.0),
    ("Luca Ferretti", "Juventus", "Inter", 8, 35_000_000.0),
    ("Jonas Brandt", "Dortmund", "Leverkusen", 11, 40_000_000.0),
    ("Sam Whitlow", "Leeds", "Brighton", 17, 20_000_000.0),
    ("Mateo Vidal", "Atletico Madrid", "Barcelona", 6, 30_000_000.0),
    ("Ruben Costa", "Marseille", "Chelsea", 13, 45_000_000.0),
    ("Felix Armand", "Liverpool", "PSG", 9, 70_000_000.0),
    ("Marco Bellini", "Milan", "Napoli", 16, 18_000_000.0),
    ("Noah Verbeek", "Leicester", "Dortmund", 10, 22_000_000.0),
    ("Leon Kraus", "Leverkusen", "Bayern Munich", 19, 50_000_000.0),
    ("Andre Fontaine", "Marseille", "Monaco", 7, 25_000_000.0),
    ("Jack Merrick", "Bolton", "Leeds", 12, 8_000_000.0),
    ("Santi Roca", "Barcelona", "Sevilla", 15, 15_000_000.0),
    ("Emile Roux", "Monaco", "Marseille", 5, 20_000_000.0),
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedStats {
    pub competitions: usize,
    pub clubs: usize,
    pub players: usize,
    pub transfers: usize,
    pub transfers_skipped: usize,
    pub signals: usize,
    pub user_events: usize,
}

fn signal(
    entity_type: EntityType,
    player_id: Option<Uuid>,
    club_id: Option<Uuid>,
    signal_type: SignalType,
    value: SignalValue,
    at: DateTime<Utc>,
) -> NewSignalEvent {
    NewSignalEvent {
        entity_type,
        player_id,
        club_id,
        signal_type,
        value,
        source: SEED_SOURCE.to_string(),
        source_id: None,
        confidence: 0.9,
        observed_at: at,
        effective_from: at,
        effective_to: None,
    }
}

/// Load the demo world as of `now`.
pub fn run_demo_seed(store: &Store, now: DateTime<Utc>) -> Result<SeedStats> {
    info!(%now, "seeding demo data");
    let mut stats = SeedStats::default();

    for (name, country, tier) in COMPETITIONS {
        store.upsert_competition(&Competition {
            id: stable_id("competition", name),
            name: name.to_string(),
            country: country.to_string(),
            tier,
        })?;
        stats.competitions += 1;
    }

    for (name, country, competition, position, ppg, net_spend) in CLUBS {
        let club_id = stable_id("club", name);
        store.upsert_club(&Club {
            id: club_id,
            name: name.to_string(),
            country: country.to_string(),
            competition_id: Some(stable_id("competition", competition)),
        })?;
        stats.clubs += 1;

        let observed = now - Duration::days(2);
        for (signal_type, value) in [
            (SignalType::ClubLeaguePosition, position),
            (SignalType::ClubPointsPerGame, ppg),
            (SignalType::ClubNetSpend12m, net_spend),
        ] {
            store.insert_signal(&signal(
                EntityType::Club,
                None,
                Some(club_id),
                signal_type,
                SignalValue::Num(value),
                observed,
            ))?;
            stats.signals += 1;
        }
    }

    for (name, club, position, (by, bm, bd), nationality, market_value, contract_months, goals, assists) in
        PLAYERS
    {
        let player_id = stable_id("player", name);
        store.upsert_player(&Player {
            id: player_id,
            name: name.to_string(),
            date_of_birth: chrono::NaiveDate::from_ymd_opt(by, bm, bd),
            nationality: Some(nationality.to_string()),
            position: Some(position.to_string()),
            current_club_id: Some(stable_id("club", club)),
            contract_until: Some(
                (now + Duration::days((contract_months * 30.4) as i64)).date_naive(),
            ),
            is_active: true,
        })?;
        stats.players += 1;

        let observed = now - Duration::days(2);
        for (signal_type, value) in [
            (SignalType::MarketValue, market_value),
            (SignalType::ContractMonthsRemaining, contract_months),
            (SignalType::GoalsLast10, goals),
            (SignalType::AssistsLast10, assists),
            (SignalType::MinutesLast5, 380.0),
        ] {
            store.insert_signal(&signal(
                EntityType::Player,
                Some(player_id),
                None,
                signal_type,
                SignalValue::Num(value),
                observed,
            ))?;
            stats.signals += 1;
        }
        store.insert_signal(&signal(
            EntityType::Player,
            Some(player_id),
            None,
            SignalType::InjuriesStatus,
            SignalValue::Text("fit".to_string()),
            observed,
        ))?;
        stats.signals += 1;
    }

    // A few in-window movements for the what-changed detector.
    let week_ago = now - Duration::days(6);
    let yesterday = now - Duration::days(1);
    for (player, signal_type, old_value, new_value) in [
        ("Theo Marchand", SignalType::MarketValue, 70_000_000.0, 85_000_000.0),
        ("Sam Whitlow", SignalType::ContractMonthsRemaining, 8.0, 5.0),
        ("Felix Armand", SignalType::GoalsLast10, 6.0, 9.0),
    ] {
        let player_id = stable_id("player", player);
        store.insert_signal(&signal(
            EntityType::Player,
            Some(player_id),
            None,
            signal_type,
            SignalValue::Num(old_value),
            week_ago,
        ))?;
        store.insert_signal(&signal(
            EntityType::Player,
            Some(player_id),
            None,
            signal_type,
            SignalValue::Num(new_value),
            yesterday,
        ))?;
        stats.signals += 2;
    }

    // Social co-mention pairs feeding the social candidate source.
    for (player, club, velocity) in [
        ("Theo Marchand", "Real Madrid", 6.5),
        ("Theo Marchand", "PSG", 4.0),
        ("Luca Ferretti", "Manchester City", 5.0),
        ("Felix Armand", "Liverpool", 7.0),
        ("Sam Whitlow", "Newcastle", 3.0),
    ] {
        store.insert_signal(&signal(
            EntityType::Pair,
            Some(stable_id("player", player)),
            Some(stable_id("club", club)),
            SignalType::SocialMentionVelocity,
            SignalValue::Num(velocity),
            yesterday,
        ))?;
        stats.signals += 1;
    }

    for (player, from, to, months_ago, fee) in TRANSFERS {
        let player_id = stable_id("player", player);
        let transfer_date = (now - Duration::days(months_ago * 30)).date_naive();
        let from_club = stable_id("club", from);
        let event_id = transfer_event_id(transfer_date, player_id, Some(from_club));

        if store.get_transfer_by_event_id(&event_id)?.is_some() {
            stats.transfers_skipped += 1;
            continue;
        }
        store.insert_transfer(&TransferEvent {
            id: Uuid::new_v4(),
            event_id,
            player_id,
            from_club_id: Some(from_club),
            to_club_id: stable_id("club", to),
            transfer_type: TransferType::Permanent,
            transfer_date,
            fee_amount: Some(fee),
            fee_currency: Some("EUR".to_string()),
            fee_amount_eur: Some(fee),
            fee_type: FeeType::Confirmed,
            contract_start: Some(transfer_date),
            contract_end: Some(transfer_date + Duration::days(4 * 365)),
            loan_end_date: None,
            option_to_buy: false,
            option_fee_eur: None,
            obligation_to_buy: false,
            obligation_fee_eur: None,
            sell_on_percent: None,
            buy_back_clause: false,
            buy_back_fee_eur: None,
            source: SEED_SOURCE.to_string(),
            source_confidence: 1.0,
            created_at: Utc::now(),
            is_superseded: false,
            superseded_by: None,
        })?;
        stats.transfers += 1;
    }

    // A week of browsing sessions: each pair below shares a session viewing
    // the player and a destination club, repeated across distinct sessions.
    let session_pairs = [
        ("Theo Marchand", "Real Madrid", 4),
        ("Theo Marchand", "PSG", 3),
        ("Luca Ferretti", "Manchester City", 3),
        ("Sam Whitlow", "Newcastle", 2),
        ("Felix Armand", "Liverpool", 5),
        ("Jack Merrick", "Newcastle", 2),
    ];
    for (player, club, sessions) in session_pairs {
        let player_id = stable_id("player", player);
        let club_id = stable_id("club", club);
        for s in 0..sessions {
            let session_id = format!("demo-{player}-{club}-{s}");
            let base = now - Duration::hours(4 + s as i64 * 9);
            store.insert_user_event(&UserEvent {
                id: Uuid::new_v4(),
                user_anon_id: format!("demo-user-{s}"),
                session_id: session_id.clone(),
                event_type: UserEventType::PlayerView,
                player_id: Some(player_id),
                club_id: None,
                occurred_at: base,
                device_type: Some("mobile".to_string()),
                country_code: Some("GB".to_string()),
                props: None,
            })?;
            store.insert_user_event(&UserEvent {
                id: Uuid::new_v4(),
                user_anon_id: format!("demo-user-{s}"),
                session_id,
                event_type: UserEventType::ClubView,
                player_id: None,
                club_id: Some(club_id),
                occurred_at: base + Duration::minutes(3),
                device_type: Some("mobile".to_string()),
                country_code: Some("GB".to_string()),
                props: None,
            })?;
            stats.user_events += 2;
        }
    }

    info!(
        competitions = stats.competitions,
        clubs = stats.clubs,
        players = stats.players,
        transfers = stats.transfers,
        signals = stats.signals,
        user_events = stats.user_events,
        "demo seed complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_is_idempotent_for_reference_and_strict_for_ledger() {
        let store = Store::open_in_memory().unwrap();
        let now = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let first = run_demo_seed(&store, now).unwrap();
        assert_eq!(first.transfers, TRANSFERS.len());
        assert_eq!(first.transfers_skipped, 0);
        assert_eq!(first.players, PLAYERS.len());

        let second = run_demo_seed(&store, now).unwrap();
        // Ledger rows are never upserted: the re-run skips them all.
        assert_eq!(second.transfers, 0);
        assert_eq!(second.transfers_skipped, TRANSFERS.len());

        // Reference rows stayed single.
        let players = store.active_players_with_club().unwrap();
        assert_eq!(players.len(), PLAYERS.len());
    }

    #[test]
    fn test_seed_supports_training_sample_minimum() {
        // 15 positives and 3 negatives each clear the default minimum of 50.
        assert!(TRANSFERS.len() * 4 >= 50);
    }
}
