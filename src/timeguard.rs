//! Time-travel guards.
//!
//! Every read that feeds the feature builder or the what-changed detector
//! goes through this module. The bitemporal contract:
//!
//! - `observed_at <= as_of`: the observer knew the fact by the as-of instant
//! - `effective_from <= as_of`: the fact had begun to hold
//! - `effective_to IS NULL OR effective_to > as_of`: it was still holding
//!
//! Both timestamps matter. `observed_at > as_of` means "we didn't know yet",
//! which is distinct from `effective_from > as_of` ("it wasn't true yet");
//! either one makes the row invisible at `as_of`. User events are guarded on
//! `occurred_at <= as_of`.
//!
//! Call sites never inline these predicates; the canonical SQL lives behind
//! `Store::latest_signal_asof` and the user-event aggregates, reachable only
//! from here.

use crate::error::{CoreError, Result};
use crate::models::{EntityType, SignalEvent, SignalType};
use crate::store::{SignalAt, Store};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

/// Entity coordinate for an as-of signal read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEntity {
    Player(Uuid),
    Club(Uuid),
    Pair { player_id: Uuid, club_id: Uuid },
}

impl SignalEntity {
    fn parts(self) -> (EntityType, Option<Uuid>, Option<Uuid>) {
        match self {
            Self::Player(p) => (EntityType::Player, Some(p), None),
            Self::Club(c) => (EntityType::Club, None, Some(c)),
            Self::Pair { player_id, club_id } => {
                (EntityType::Pair, Some(player_id), Some(club_id))
            }
        }
    }
}

/// Derived user-behavior values computed on the fly at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedKind {
    AttentionVelocity,
    DestinationCooccurrence,
}

/// Minimum interaction volume before a derived value is trusted.
pub const MIN_ATTENTION_EVENTS: i64 = 3;
pub const MIN_COOCCURRENCE_SESSIONS: i64 = 2;

/// The value known as of `as_of` for one entity and signal type, or None.
pub fn latest_signal(
    store: &Store,
    entity: SignalEntity,
    signal_type: SignalType,
    as_of: DateTime<Utc>,
) -> Result<Option<SignalAt>> {
    let (entity_type, player_id, club_id) = entity.parts();
    let result = store.latest_signal_asof(entity_type, player_id, club_id, signal_type, as_of)?;

    if let Some(ref at) = result {
        // The SQL filters already guarantee this; the validator stays as a
        // second line of defense during training-data assembly and debugging.
        validate_signal_time_travel(at.observed_at, at.effective_from, as_of)?;
    }
    Ok(result)
}

/// Numeric shortcut over `latest_signal`.
pub fn latest_num(
    store: &Store,
    entity: SignalEntity,
    signal_type: SignalType,
    as_of: DateTime<Utc>,
) -> Result<Option<f64>> {
    Ok(latest_signal(store, entity, signal_type, as_of)?.and_then(|at| at.value.as_num()))
}

/// Attention-velocity / cooccurrence computed over user events with
/// `occurred_at <= as_of`, looking back `window` from `as_of`.
pub fn derived_user_value(
    store: &Store,
    player_id: Uuid,
    club_id: Option<Uuid>,
    kind: DerivedKind,
    as_of: DateTime<Utc>,
    window: Duration,
) -> Result<Option<f64>> {
    match kind {
        DerivedKind::AttentionVelocity => {
            let window_start = as_of - window;
            let midpoint = as_of - window / 2;
            let (recent, older) =
                store.attention_counts_for_player(player_id, window_start, midpoint, as_of)?;
            Ok(attention_velocity(recent, older))
        }
        DerivedKind::DestinationCooccurrence => {
            let club = club_id.ok_or_else(|| {
                CoreError::Validation("destination cooccurrence requires a club".into())
            })?;
            let window_start = as_of - window;
            let sessions =
                store.cooccurrence_count_for_pair(player_id, club, window_start, as_of)?;
            Ok(cooccurrence_score(sessions))
        }
    }
}

/// Velocity of attention growth: ratio of recent-half to older-half event
/// counts, capped at 10, scaled to an integer 0..=1000. None below the
/// minimum event volume.
pub fn attention_velocity(recent: i64, older: i64) -> Option<f64> {
    if recent + older < MIN_ATTENTION_EVENTS {
        return None;
    }
    let velocity = ((recent + 1) as f64 / (older + 1) as f64).min(10.0);
    Some((velocity * 100.0).floor())
}

/// Session-cooccurrence score: 10 per distinct session, capped at 100.
/// None below the minimum session count.
pub fn cooccurrence_score(sessions: i64) -> Option<f64> {
    if sessions < MIN_COOCCURRENCE_SESSIONS {
        return None;
    }
    Some(((sessions * 10).min(100)) as f64)
}

/// Clubs that, as of `as_of`, share a pair signal of `signal_type` with the
/// player. Used by the candidate sources to enumerate scored destinations.
pub fn pair_partner_clubs(
    store: &Store,
    player_id: Uuid,
    signal_type: SignalType,
    as_of: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    store.pair_partner_clubs_asof(player_id, signal_type, as_of)
}

/// A player's signal rows whose `effective_from` falls inside the trailing
/// window, restricted to what was known by `as_of`. Ascending by
/// `effective_from`; feeds the what-changed detector.
pub fn signal_window(
    store: &Store,
    player_id: Uuid,
    as_of: DateTime<Utc>,
    window: Duration,
) -> Result<Vec<SignalEvent>> {
    store.player_signals_window_asof(player_id, as_of - window, as_of)
}

/// Reject any signal timestamps from after the as-of instant (strict `<=`).
pub fn validate_signal_time_travel(
    observed_at: DateTime<Utc>,
    effective_from: DateTime<Utc>,
    as_of: DateTime<Utc>,
) -> Result<()> {
    if observed_at > as_of {
        return Err(CoreError::TimeTravelViolation(format!(
            "observed_at {observed_at} is after as_of {as_of}; the observation was not yet known"
        )));
    }
    if effective_from > as_of {
        return Err(CoreError::TimeTravelViolation(format!(
            "effective_from {effective_from} is after as_of {as_of}; the fact was not yet true"
        )));
    }
    Ok(())
}

/// Reject training labels whose features could see the outcome.
///
/// For a transfer on date T with horizon H, features must be extracted at
/// exactly T - H; any `feature_date >= transfer_date` leaks the label.
pub fn validate_training_label_time_travel(
    transfer_date: NaiveDate,
    feature_date: NaiveDate,
    horizon_days: i64,
) -> Result<()> {
    if feature_date >= transfer_date {
        return Err(CoreError::DataLeakage(format!(
            "feature_date {feature_date} is at or after transfer_date {transfer_date} \
             (horizon {horizon_days}d); features must predate the transfer"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Club, Competition, NewSignalEvent, Player, SignalValue, UserEvent, UserEventType};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_signal_validator_strict_at_boundary() {
        let t = ts("2025-01-15T12:00:00Z");
        // Equality on both axes is allowed.
        assert!(validate_signal_time_travel(t, t, t).is_ok());
        // One microsecond of future knowledge is rejected.
        let future = t + Duration::microseconds(1);
        assert!(matches!(
            validate_signal_time_travel(future, t, t),
            Err(CoreError::TimeTravelViolation(_))
        ));
        assert!(matches!(
            validate_signal_time_travel(t, future, t),
            Err(CoreError::TimeTravelViolation(_))
        ));
    }

    #[test]
    fn test_label_validator_rejects_equal_and_later_feature_dates() {
        let transfer = date("2025-03-15");
        // The canonical relation: feature_date = transfer_date - horizon.
        assert!(validate_training_label_time_travel(transfer, date("2024-12-15"), 90).is_ok());
        // Equality leaks.
        assert!(matches!(
            validate_training_label_time_travel(transfer, transfer, 90),
            Err(CoreError::DataLeakage(_))
        ));
        // Later leaks.
        assert!(matches!(
            validate_training_label_time_travel(transfer, date("2025-04-01"), 90),
            Err(CoreError::DataLeakage(_))
        ));
    }

    #[test]
    fn test_attention_velocity_thresholds_and_cap() {
        assert_eq!(attention_velocity(1, 1), None);
        assert_eq!(attention_velocity(2, 1), Some(150.0));
        // Ratio capped at 10 -> 1000.
        assert_eq!(attention_velocity(100, 0), Some(1000.0));
    }

    #[test]
    fn test_cooccurrence_score_thresholds_and_cap() {
        assert_eq!(cooccurrence_score(1), None);
        assert_eq!(cooccurrence_score(2), Some(20.0));
        assert_eq!(cooccurrence_score(50), Some(100.0));
    }

    fn fixture(store: &Store) -> (Uuid, Uuid) {
        let comp = Competition {
            id: Uuid::new_v4(),
            name: "Ligue 1".to_string(),
            country: "France".to_string(),
            tier: 1,
        };
        store.upsert_competition(&comp).unwrap();
        let club = Club {
            id: Uuid::new_v4(),
            name: "PSG".to_string(),
            country: "France".to_string(),
            competition_id: Some(comp.id),
        };
        store.upsert_club(&club).unwrap();
        let player = Player {
            id: Uuid::new_v4(),
            name: "Guard Test".to_string(),
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

    /// Inserting a future-observed row anywhere in the store must not change
    /// what `latest_signal` returns for an earlier as-of.
    #[test]
    fn test_future_observation_is_invisible() {
        let store = Store::open_in_memory().unwrap();
        let (player, _) = fixture(&store);

        store
            .insert_signal(&NewSignalEvent {
                entity_type: EntityType::Player,
                player_id: Some(player),
                club_id: None,
                signal_type: SignalType::MarketValue,
                value: SignalValue::Num(50_000_000.0),
                source: "test".into(),
                source_id: None,
                confidence: 0.9,
                observed_at: ts("2025-01-10T12:00:00Z"),
                effective_from: ts("2025-01-10T12:00:00Z"),
                effective_to: None,
            })
            .unwrap();

        let as_of = ts("2025-01-15T12:00:00Z");
        let before = latest_num(
            &store,
            SignalEntity::Player(player),
            SignalType::MarketValue,
            as_of,
        )
        .unwrap();
        assert_eq!(before, Some(50_000_000.0));

        // Write a row observed after as_of (write side allows this).
        store
            .insert_signal(&NewSignalEvent {
                entity_type: EntityType::Player,
                player_id: Some(player),
                club_id: None,
                signal_type: SignalType::MarketValue,
                value: SignalValue::Num(90_000_000.0),
                source: "test".into(),
                source_id: None,
                confidence: 0.9,
                observed_at: ts("2025-02-01T00:00:00Z"),
                effective_from: ts("2025-01-01T00:00:00Z"),
                effective_to: None,
            })
            .unwrap();

        let after = latest_num(
            &store,
            SignalEntity::Player(player),
            SignalType::MarketValue,
            as_of,
        )
        .unwrap();
        assert_eq!(after, Some(50_000_000.0));
    }

    #[test]
    fn test_derived_user_value_respects_as_of() {
        let store = Store::open_in_memory().unwrap();
        let (player, club) = fixture(&store);

        let add_event = |session: &str, event_type: UserEventType, at: &str, with_club: bool| {
            store
                .insert_user_event(&UserEvent {
                    id: Uuid::new_v4(),
                    user_anon_id: format!("u-{session}"),
                    session_id: session.to_string(),
                    event_type,
                    player_id: if with_club { None } else { Some(player) },
                    club_id: if with_club { Some(club) } else { None },
                    occurred_at: ts(at),
                    device_type: None,
                    country_code: None,
                    props: None,
                })
                .unwrap();
        };

        // Two sessions view both the player and the club before as_of.
        for session in ["s1", "s2"] {
            add_event(session, UserEventType::PlayerView, "2025-01-10T10:00:00Z", false);
            add_event(session, UserEventType::ClubView, "2025-01-10T11:00:00Z", true);
        }
        // A third cooccurring session lands after as_of and must not count.
        add_event("s3", UserEventType::PlayerView, "2025-01-20T10:00:00Z", false);
        add_event("s3", UserEventType::ClubView, "2025-01-20T11:00:00Z", true);

        let as_of = ts("2025-01-15T00:00:00Z");
        let score = derived_user_value(
            &store,
            player,
            Some(club),
            DerivedKind::DestinationCooccurrence,
            as_of,
            Duration::days(30),
        )
        .unwrap();
        assert_eq!(score, Some(20.0));
    }
}
