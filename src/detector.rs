//! What-changed detector.
//!
//! Scans a player's signal stream over a trailing window and surfaces the
//! deltas that matter, classified by a fixed per-type threshold table. Reads
//! go through the time-travel guards like every other consumer.

use crate::error::Result;
use crate::models::{SignalEvent, SignalType, SignalValue};
use crate::store::Store;
use crate::timeguard;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const DEFAULT_WINDOW_DAYS: i64 = 7;
const MAX_DELTAS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Alert,
}

/// One significant change in a player's signal stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDelta {
    pub signal_type: SignalType,
    pub severity: Severity,
    pub description: String,
    pub old_value: Option<f64>,
    pub new_value: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

/// Deltas for `player_id` over the last `days`, at most ten, alerts first.
pub fn what_changed(
    store: &Store,
    player_id: Uuid,
    days: i64,
    now: DateTime<Utc>,
) -> Result<Vec<SignalDelta>> {
    let signals = timeguard::signal_window(store, player_id, now, Duration::days(days))?;

    // Group by type; the window query is already ascending by effective_from.
    let mut by_type: BTreeMap<&'static str, Vec<&SignalEvent>> = BTreeMap::new();
    for signal in &signals {
        by_type.entry(signal.signal_type.as_str()).or_default().push(signal);
    }

    let mut deltas = Vec::new();
    for rows in by_type.values() {
        if rows.len() >= 2 {
            let first = rows[0];
            let last = rows[rows.len() - 1];
            if let Some(delta) = classify(first, last) {
                deltas.push(delta);
            }
        } else if rows.len() == 1 {
            // A lone non-fit injury report is itself an alert.
            let only = rows[0];
            if only.signal_type == SignalType::InjuriesStatus {
                if let SignalValue::Text(status) = &only.value {
                    if status != "fit" {
                        deltas.push(SignalDelta {
                            signal_type: SignalType::InjuriesStatus,
                            severity: Severity::Alert,
                            description: format!("Injury reported: {status}"),
                            old_value: None,
                            new_value: None,
                            observed_at: only.observed_at,
                        });
                    }
                }
            }
        }
    }

    deltas.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.observed_at.cmp(&a.observed_at))
    });
    deltas.truncate(MAX_DELTAS);
    Ok(deltas)
}

/// The threshold table. Returns None when the change is below every bar.
fn classify(first: &SignalEvent, last: &SignalEvent) -> Option<SignalDelta> {
    match first.signal_type {
        SignalType::InjuriesStatus => classify_injury(first, last),
        _ => {
            let old = first.value.as_num()?;
            let new = last.value.as_num()?;
            let (severity, description) = match first.signal_type {
                SignalType::ContractMonthsRemaining => classify_contract(old, new)?,
                SignalType::MarketValue => classify_market_value(old, new)?,
                SignalType::SocialMentionVelocity => {
                    classify_velocity(old, new, "Social mentions", 0.5, 2.0)?
                }
                SignalType::UserAttentionVelocity => {
                    classify_velocity(old, new, "User attention", 1.0, 3.0)?
                }
                SignalType::GoalsLast10 => {
                    classify_counting(old, new, "Goals in last 10")?
                }
                SignalType::AssistsLast10 => {
                    classify_counting(old, new, "Assists in last 10")?
                }
                SignalType::ClubLeaguePosition => classify_league_position(old, new)?,
                _ => return None,
            };
            Some(SignalDelta {
                signal_type: first.signal_type,
                severity,
                description,
                old_value: Some(old),
                new_value: Some(new),
                observed_at: last.observed_at,
            })
        }
    }
}

fn classify_contract(old: f64, new: f64) -> Option<(Severity, String)> {
    // Only the downward crossing through six months triggers.
    if old > 6.0 && new <= 6.0 {
        Some((
            Severity::Alert,
            format!("Contract down to {} months remaining", new as i64),
        ))
    } else {
        None
    }
}

fn classify_market_value(old: f64, new: f64) -> Option<(Severity, String)> {
    if old <= 0.0 {
        return None;
    }
    let change = (new - old) / old;
    let severity = if change.abs() > 0.20 {
        Severity::Alert
    } else if change.abs() >= 0.10 {
        Severity::Warning
    } else {
        return None;
    };
    let direction = if change > 0.0 { "up" } else { "down" };
    Some((
        severity,
        format!(
            "Market value {direction} {:.0}% to \u{20ac}{:.1}M",
            change.abs() * 100.0,
            new / 1_000_000.0
        ),
    ))
}

fn classify_injury(first: &SignalEvent, last: &SignalEvent) -> Option<SignalDelta> {
    let old = first.value.as_text()?;
    let new = last.value.as_text()?;
    if old == new {
        return None;
    }
    let (severity, description) = if old == "fit" {
        (Severity::Alert, format!("Injury status changed: {new}"))
    } else {
        (
            Severity::Info,
            format!("Injury status changed from {old} to {new}"),
        )
    };
    Some(SignalDelta {
        signal_type: SignalType::InjuriesStatus,
        severity,
        description,
        old_value: None,
        new_value: None,
        observed_at: last.observed_at,
    })
}

fn classify_velocity(
    old: f64,
    new: f64,
    label: &str,
    warning_increase: f64,
    alert_ratio: f64,
) -> Option<(Severity, String)> {
    if old <= 0.0 {
        return None;
    }
    let increase = (new - old) / old;
    let severity = if new > old * alert_ratio {
        Severity::Alert
    } else if increase >= warning_increase {
        Severity::Warning
    } else {
        return None;
    };
    Some((
        severity,
        format!("{label} up {:.0}% over the window", increase * 100.0),
    ))
}

fn classify_counting(old: f64, new: f64, label: &str) -> Option<(Severity, String)> {
    if (new - old).abs() < 2.0 {
        return None;
    }
    let direction = if new > old { "up" } else { "down" };
    Some((
        Severity::Info,
        format!("{label} {direction} from {} to {}", old as i64, new as i64),
    ))
}

fn classify_league_position(old: f64, new: f64) -> Option<(Severity, String)> {
    let shift = (new - old).abs();
    let severity = if shift >= 5.0 {
        Severity::Warning
    } else if shift >= 3.0 {
        Severity::Info
    } else {
        return None;
    };
    // Lower position number is better.
    let direction = if new < old { "climbed" } else { "dropped" };
    Some((
        severity,
        format!("Club {direction} from {} to {} in the table", old as i64, new as i64),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Club, Competition, EntityType, NewSignalEvent, Player};

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn fixture(store: &Store) -> Uuid {
        let comp = Competition {
            id: Uuid::new_v4(),
            name: "Primeira Liga".to_string(),
            country: "Portugal".to_string(),
            tier: 1,
        };
        store.upsert_competition(&comp).unwrap();
        let club = Club {
            id: Uuid::new_v4(),
            name: "Benfica".to_string(),
            country: "Portugal".to_string(),
            competition_id: Some(comp.id),
        };
        store.upsert_club(&club).unwrap();
        let player = Player {
            id: Uuid::new_v4(),
            name: "Delta Test".to_string(),
            date_of_birth: None,
            nationality: None,
            position: None,
            current_club_id: Some(club.id),
            contract_until: None,
            is_active: true,
        };
        store.upsert_player(&player).unwrap();
        player.id
    }

    fn put_num(store: &Store, player: Uuid, signal_type: SignalType, value: f64, at: &str) {
        store
            .insert_signal(&NewSignalEvent {
                entity_type: EntityType::Player,
                player_id: Some(player),
                club_id: None,
                signal_type,
                value: SignalValue::Num(value),
                source: "test".into(),
                source_id: None,
                confidence: 0.9,
                observed_at: ts(at),
                effective_from: ts(at),
                effective_to: None,
            })
            .unwrap();
    }

    fn put_text(store: &Store, player: Uuid, value: &str, at: &str) {
        store
            .insert_signal(&NewSignalEvent {
                entity_type: EntityType::Player,
                player_id: Some(player),
                club_id: None,
                signal_type: SignalType::InjuriesStatus,
                value: SignalValue::Text(value.to_string()),
                source: "test".into(),
                source_id: None,
                confidence: 0.9,
                observed_at: ts(at),
                effective_from: ts(at),
                effective_to: None,
            })
            .unwrap();
    }

    #[test]
    fn test_quiet_window_yields_no_deltas() {
        let store = Store::open_in_memory().unwrap();
        let player = fixture(&store);
        let now = ts("2025-01-15T12:00:00Z");

        // Two market values, 5% apart: below every bar.
        put_num(&store, player, SignalType::MarketValue, 50_000_000.0, "2025-01-10T00:00:00Z");
        put_num(&store, player, SignalType::MarketValue, 52_500_000.0, "2025-01-14T00:00:00Z");

        let deltas = what_changed(&store, player, 7, now).unwrap();
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_contract_crossing_six_months_is_alert() {
        let store = Store::open_in_memory().unwrap();
        let player = fixture(&store);
        let now = ts("2025-01-15T12:00:00Z");

        put_num(
            &store,
            player,
            SignalType::ContractMonthsRemaining,
            8.0,
            "2025-01-09T00:00:00Z",
        );
        put_num(
            &store,
            player,
            SignalType::ContractMonthsRemaining,
            5.0,
            "2025-01-14T00:00:00Z",
        );

        let deltas = what_changed(&store, player, 7, now).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].severity, Severity::Alert);
        assert_eq!(deltas[0].description, "Contract down to 5 months remaining");
    }

    #[test]
    fn test_single_non_fit_injury_row_is_alert() {
        let store = Store::open_in_memory().unwrap();
        let player = fixture(&store);
        let now = ts("2025-01-15T12:00:00Z");

        put_text(&store, player, "hamstring strain", "2025-01-13T00:00:00Z");

        let deltas = what_changed(&store, player, 7, now).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].severity, Severity::Alert);
        assert!(deltas[0].description.contains("hamstring strain"));
    }

    #[test]
    fn test_market_value_thresholds_and_ordering() {
        let store = Store::open_in_memory().unwrap();
        let player = fixture(&store);
        let now = ts("2025-01-15T12:00:00Z");

        // +25% market value: alert.
        put_num(&store, player, SignalType::MarketValue, 60_000_000.0, "2025-01-09T00:00:00Z");
        put_num(&store, player, SignalType::MarketValue, 75_000_000.0, "2025-01-14T00:00:00Z");
        // Goals +2: info.
        put_num(&store, player, SignalType::GoalsLast10, 2.0, "2025-01-09T01:00:00Z");
        put_num(&store, player, SignalType::GoalsLast10, 4.0, "2025-01-14T01:00:00Z");

        let deltas = what_changed(&store, player, 7, now).unwrap();
        assert_eq!(deltas.len(), 2);
        // Alerts sort before infos.
        assert_eq!(deltas[0].severity, Severity::Alert);
        assert!(deltas[0].description.contains("\u{20ac}75.0M"));
        assert_eq!(deltas[1].severity, Severity::Info);
    }

    #[test]
    fn test_fit_to_injured_transition_is_alert_and_within_alerts_recent_first() {
        let store = Store::open_in_memory().unwrap();
        let player = fixture(&store);
        let now = ts("2025-01-15T12:00:00Z");

        put_text(&store, player, "fit", "2025-01-10T00:00:00Z");
        put_text(&store, player, "knock", "2025-01-14T00:00:00Z");

        let deltas = what_changed(&store, player, 7, now).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].severity, Severity::Alert);
        assert_eq!(deltas[0].description, "Injury status changed: knock");
    }
}
