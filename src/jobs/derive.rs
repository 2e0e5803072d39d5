//! Signal derivation from user events.
//!
//! Derives weak signals from user behavior and appends them to the signal
//! stream with source `tl_user_derived`:
//!
//! - `user_attention_velocity`: how quickly attention is growing for a player
//! - `user_destination_cooccurrence`: clubs viewed in the same sessions as a
//!   player (a leading indicator of a rumored destination)
//! - `user_watchlist_adds`: raw watchlist additions in the window
//!
//! Re-running for the same as-of appends new rows; prior rows are never
//! touched (the as-of read picks the latest, so the derivation is idempotent
//! in effect).

use crate::config::Config;
use crate::error::Result;
use crate::models::{EntityType, NewSignalEvent, SignalType, SignalValue};
use crate::store::Store;
use crate::timeguard::{attention_velocity, cooccurrence_score};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DERIVED_SOURCE: &str = "tl_user_derived";

/// Cooccurrence looks much further back than attention: sessions accumulate
/// slowly compared to view spikes.
pub const COOCCURRENCE_WINDOW_FACTOR: i32 = 7;

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeriveStats {
    pub attention_signals: usize,
    pub cooccurrence_signals: usize,
    pub watchlist_signals: usize,
    pub errors: usize,
}

/// Derive all user signals for the window ending at `as_of`.
pub fn run_signal_derivation(
    store: &Store,
    config: &Config,
    window: Duration,
    as_of: DateTime<Utc>,
) -> Result<DeriveStats> {
    info!(
        as_of = %as_of,
        window_hours = window.num_hours(),
        "deriving user signals"
    );

    let mut stats = DeriveStats::default();
    let confidence = config.derived_signal_confidence;

    derive_attention(store, window, as_of, confidence, &mut stats)?;
    derive_cooccurrence(store, window, as_of, confidence, &mut stats)?;
    derive_watchlist_adds(store, window, as_of, confidence, &mut stats)?;

    info!(
        attention = stats.attention_signals,
        cooccurrence = stats.cooccurrence_signals,
        watchlist = stats.watchlist_signals,
        errors = stats.errors,
        "signal derivation complete"
    );
    Ok(stats)
}

fn derive_attention(
    store: &Store,
    window: Duration,
    as_of: DateTime<Utc>,
    confidence: f64,
    stats: &mut DeriveStats,
) -> Result<()> {
    let window_start = as_of - window;
    let midpoint = as_of - window / 2;

    let counts = store.attention_counts_all(window_start, midpoint, as_of)?;
    debug!(players = counts.len(), "players with attention events in window");

    for c in counts {
        let Some(velocity) = attention_velocity(c.recent, c.older) else {
            continue;
        };
        let write = write_derived(
            store,
            EntityType::Player,
            Some(c.player_id),
            None,
            SignalType::UserAttentionVelocity,
            velocity,
            confidence,
            as_of,
        );
        match write {
            Ok(()) => stats.attention_signals += 1,
            Err(e) => {
                warn!(player = %c.player_id, error = %e, "failed to write attention signal");
                stats.errors += 1;
            }
        }
    }
    Ok(())
}

fn derive_cooccurrence(
    store: &Store,
    window: Duration,
    as_of: DateTime<Utc>,
    confidence: f64,
    stats: &mut DeriveStats,
) -> Result<()> {
    let long_window = window * COOCCURRENCE_WINDOW_FACTOR;
    let counts = store.cooccurrence_counts_all(as_of - long_window, as_of)?;
    debug!(pairs = counts.len(), "player/club pairs with session cooccurrence");

    for c in counts {
        let Some(score) = cooccurrence_score(c.sessions) else {
            continue;
        };
        let write = write_derived(
            store,
            EntityType::Pair,
            Some(c.player_id),
            Some(c.club_id),
            SignalType::UserDestinationCooccurrence,
            score,
            confidence,
            as_of,
        );
        match write {
            Ok(()) => stats.cooccurrence_signals += 1,
            Err(e) => {
                warn!(
                    player = %c.player_id,
                    club = %c.club_id,
                    error = %e,
                    "failed to write cooccurrence signal"
                );
                stats.errors += 1;
            }
        }
    }
    Ok(())
}

fn derive_watchlist_adds(
    store: &Store,
    window: Duration,
    as_of: DateTime<Utc>,
    confidence: f64,
    stats: &mut DeriveStats,
) -> Result<()> {
    let counts = store.watchlist_add_counts_all(as_of - window, as_of)?;

    for (player_id, count) in counts {
        let write = write_derived(
            store,
            EntityType::Player,
            Some(player_id),
            None,
            SignalType::UserWatchlistAdds,
            count as f64,
            confidence,
            as_of,
        );
        match write {
            Ok(()) => stats.watchlist_signals += 1,
            Err(e) => {
                warn!(player = %player_id, error = %e, "failed to write watchlist signal");
                stats.errors += 1;
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_derived(
    store: &Store,
    entity_type: EntityType,
    player_id: Option<Uuid>,
    club_id: Option<Uuid>,
    signal_type: SignalType,
    value: f64,
    confidence: f64,
    as_of: DateTime<Utc>,
) -> Result<()> {
    store.insert_signal(&NewSignalEvent {
        entity_type,
        player_id,
        club_id,
        signal_type,
        value: SignalValue::Num(value),
        source: DERIVED_SOURCE.to_string(),
        source_id: None,
        confidence,
        observed_at: as_of,
        effective_from: as_of,
        effective_to: None,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Club, Competition, Player, UserEvent, UserEventType};
    use crate::timeguard::{latest_num, SignalEntity};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn fixture(store: &Store) -> (Uuid, Uuid) {
        let comp = Competition {
            id: Uuid::new_v4(),
            name: "Eredivisie".to_string(),
            country: "Netherlands".to_string(),
            tier: 1,
        };
        store.upsert_competition(&comp).unwrap();
        let club = Club {
            id: Uuid::new_v4(),
            name: "Ajax".to_string(),
            country: "Netherlands".to_string(),
            competition_id: Some(comp.id),
        };
        store.upsert_club(&club).unwrap();
        let player = Player {
            id: Uuid::new_v4(),
            name: "Derive Test".to_string(),
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

    fn view(store: &Store, player: Uuid, session: &str, at: &str) {
        store
            .insert_user_event(&UserEvent {
                id: Uuid::new_v4(),
                user_anon_id: format!("u-{session}"),
                session_id: session.to_string(),
                event_type: UserEventType::PlayerView,
                player_id: Some(player),
                club_id: None,
                occurred_at: ts(at),
                device_type: None,
                country_code: None,
                props: None,
            })
            .unwrap();
    }

    #[test]
    fn test_attention_signal_written_with_derived_source() {
        let store = Store::open_in_memory().unwrap();
        let config = Config::default();
        let (player, _) = fixture(&store);
        let as_of = ts("2025-01-15T12:00:00Z");

        // One view in the older half, three in the recent half.
        view(&store, player, "s1", "2025-01-14T14:00:00Z");
        view(&store, player, "s2", "2025-01-15T02:00:00Z");
        view(&store, player, "s3", "2025-01-15T04:00:00Z");
        view(&store, player, "s4", "2025-01-15T06:00:00Z");

        let stats =
            run_signal_derivation(&store, &config, Duration::hours(24), as_of).unwrap();
        assert_eq!(stats.attention_signals, 1);
        assert_eq!(stats.errors, 0);

        // velocity = min(10, (3+1)/(1+1)) * 100 = 200
        let value = latest_num(
            &store,
            SignalEntity::Player(player),
            SignalType::UserAttentionVelocity,
            as_of,
        )
        .unwrap();
        assert_eq!(value, Some(200.0));
    }

    #[test]
    fn test_derivation_below_threshold_writes_nothing() {
        let store = Store::open_in_memory().unwrap();
        let config = Config::default();
        let (player, _) = fixture(&store);

        view(&store, player, "s1", "2025-01-15T02:00:00Z");
        view(&store, player, "s2", "2025-01-15T04:00:00Z");

        let stats = run_signal_derivation(
            &store,
            &config,
            Duration::hours(24),
            ts("2025-01-15T12:00:00Z"),
        )
        .unwrap();
        assert_eq!(stats.attention_signals, 0);
        assert_eq!(stats.cooccurrence_signals, 0);
    }

    #[test]
    fn test_rerun_appends_rows_without_overwriting() {
        let store = Store::open_in_memory().unwrap();
        let config = Config::default();
        let (player, _) = fixture(&store);
        let as_of = ts("2025-01-15T12:00:00Z");

        for (i, at) in ["2025-01-15T02:00:00Z", "2025-01-15T04:00:00Z", "2025-01-15T06:00:00Z"]
            .iter()
            .enumerate()
        {
            view(&store, player, &format!("s{i}"), at);
        }

        run_signal_derivation(&store, &config, Duration::hours(24), as_of).unwrap();
        run_signal_derivation(&store, &config, Duration::hours(24), as_of).unwrap();

        let history = store
            .signal_history(player, None, Some(SignalType::UserAttentionVelocity), 10)
            .unwrap();
        assert_eq!(history.len(), 2);
        // Both rows carry the same derived value; the as-of read stays stable.
        assert_eq!(history[0].value, history[1].value);
    }
}
