//! Point-in-time feature building.
//!
//! Builds the fixed 21-key vector for a (player, from_club, to_club) triple
//! at an as-of instant. Every value is read through the time-travel guards;
//! missing values stay None here so imputation statistics can be versioned
//! with the model that consumes them.

use crate::config::Config;
use crate::error::Result;
use crate::jobs::candidates::{self, age_years};
use crate::jobs::StopFlag;
use crate::models::{FeatureSnapshot, SignalType, TransferEvent};
use crate::store::Store;
use crate::timeguard::{self, SignalEntity};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The fixed, ordered feature list. The order is part of the model contract;
/// artifacts carry it and scoring replays it.
pub const FEATURE_COLUMNS: [&str; 21] = [
    "market_value",
    "contract_months_remaining",
    "goals_last_10",
    "assists_last_10",
    "minutes_last_5",
    "social_mention_velocity",
    "user_attention_velocity",
    "age",
    "position_encoded",
    "from_club_league_position",
    "from_club_points_per_game",
    "from_club_net_spend_12m",
    "from_club_tier",
    "to_club_league_position",
    "to_club_points_per_game",
    "to_club_net_spend_12m",
    "to_club_tier",
    "same_country",
    "same_league",
    "tier_difference",
    "user_destination_cooccurrence",
];

pub const FEATURE_VERSION: &str = "v1";

/// Ordinal encoding of playing positions, goalkeeper to striker.
const POSITION_ENCODING: [(&str, f64); 10] = [
    ("GK", 1.0),
    ("CB", 2.0),
    ("LB", 3.0),
    ("RB", 4.0),
    ("DM", 5.0),
    ("CM", 6.0),
    ("AM", 7.0),
    ("LW", 8.0),
    ("RW", 9.0),
    ("ST", 10.0),
];

/// A built vector. BTreeMap keeps serialization deterministic, which makes
/// re-running a build byte-equal on upserted rows.
pub type FeatureVector = BTreeMap<String, Option<f64>>;

pub fn position_encoded(position: Option<&str>) -> Option<f64> {
    let position = position?;
    POSITION_ENCODING
        .iter()
        .find(|(name, _)| *name == position)
        .map(|(_, code)| *code)
}

/// Values in `FEATURE_COLUMNS` order, for the model input array.
pub fn ordered_values(vector: &FeatureVector) -> Vec<Option<f64>> {
    FEATURE_COLUMNS
        .iter()
        .map(|name| vector.get(*name).copied().flatten())
        .collect()
}

fn player_num(
    store: &Store,
    player_id: Uuid,
    signal_type: SignalType,
    as_of: DateTime<Utc>,
) -> Result<Option<f64>> {
    timeguard::latest_num(store, SignalEntity::Player(player_id), signal_type, as_of)
}

struct ClubBlock {
    league_position: Option<f64>,
    points_per_game: Option<f64>,
    net_spend_12m: Option<f64>,
    tier: Option<f64>,
    country: Option<String>,
    competition_id: Option<Uuid>,
}

fn club_block(store: &Store, club_id: Uuid, as_of: DateTime<Utc>) -> Result<ClubBlock> {
    let club = store.get_club(club_id)?;
    let tier = store.club_tier(club_id)?.map(f64::from);
    let entity = SignalEntity::Club(club_id);
    Ok(ClubBlock {
        league_position: timeguard::latest_num(
            store,
            entity,
            SignalType::ClubLeaguePosition,
            as_of,
        )?,
        points_per_game: timeguard::latest_num(
            store,
            entity,
            SignalType::ClubPointsPerGame,
            as_of,
        )?,
        net_spend_12m: timeguard::latest_num(store, entity, SignalType::ClubNetSpend12m, as_of)?,
        tier,
        country: club.as_ref().map(|c| c.country.clone()),
        competition_id: club.and_then(|c| c.competition_id),
    })
}

/// Build the dense feature vector for (player, from, to) as known at `as_of`.
pub fn build_feature_vector(
    store: &Store,
    player_id: Uuid,
    from_club_id: Uuid,
    to_club_id: Uuid,
    as_of: DateTime<Utc>,
) -> Result<FeatureVector> {
    let player = store.require_player(player_id)?;
    let mut features = FeatureVector::new();

    features.insert(
        "market_value".into(),
        player_num(store, player_id, SignalType::MarketValue, as_of)?,
    );
    features.insert(
        "contract_months_remaining".into(),
        player_num(store, player_id, SignalType::ContractMonthsRemaining, as_of)?,
    );
    features.insert(
        "goals_last_10".into(),
        player_num(store, player_id, SignalType::GoalsLast10, as_of)?,
    );
    features.insert(
        "assists_last_10".into(),
        player_num(store, player_id, SignalType::AssistsLast10, as_of)?,
    );
    features.insert(
        "minutes_last_5".into(),
        player_num(store, player_id, SignalType::MinutesLast5, as_of)?,
    );
    features.insert(
        "social_mention_velocity".into(),
        player_num(store, player_id, SignalType::SocialMentionVelocity, as_of)?,
    );
    features.insert(
        "user_attention_velocity".into(),
        player_num(store, player_id, SignalType::UserAttentionVelocity, as_of)?,
    );
    features.insert(
        "age".into(),
        player.date_of_birth.map(|dob| age_years(dob, as_of)),
    );
    features.insert(
        "position_encoded".into(),
        position_encoded(player.position.as_deref()),
    );

    let from = club_block(store, from_club_id, as_of)?;
    features.insert("from_club_league_position".into(), from.league_position);
    features.insert("from_club_points_per_game".into(), from.points_per_game);
    features.insert("from_club_net_spend_12m".into(), from.net_spend_12m);
    features.insert("from_club_tier".into(), from.tier);

    let to = club_block(store, to_club_id, as_of)?;
    features.insert("to_club_league_position".into(), to.league_position);
    features.insert("to_club_points_per_game".into(), to.points_per_game);
    features.insert("to_club_net_spend_12m".into(), to.net_spend_12m);
    features.insert("to_club_tier".into(), to.tier);

    let same_country = match (&from.country, &to.country) {
        (Some(a), Some(b)) => Some(if a == b { 1.0 } else { 0.0 }),
        _ => None,
    };
    features.insert("same_country".into(), same_country);

    let same_league = match (from.competition_id, to.competition_id) {
        (Some(a), Some(b)) => Some(if a == b { 1.0 } else { 0.0 }),
        _ => None,
    };
    features.insert("same_league".into(), same_league);

    let tier_difference = match (from.tier, to.tier) {
        (Some(f), Some(t)) => Some(t - f),
        _ => None,
    };
    features.insert("tier_difference".into(), tier_difference);

    features.insert(
        "user_destination_cooccurrence".into(),
        timeguard::latest_num(
            store,
            SignalEntity::Pair {
                player_id,
                club_id: to_club_id,
            },
            SignalType::UserDestinationCooccurrence,
            as_of,
        )?,
    );

    Ok(features)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureBuildStats {
    pub players_processed: usize,
    pub vectors_built: usize,
    pub errors: usize,
    pub cancelled: bool,
}

/// Bulk build: candidates per active player, one cached vector per
/// (player, candidate, as_of). Idempotent for a fixed store and as-of.
pub fn run_feature_build(
    store: &Store,
    config: &Config,
    as_of: DateTime<Utc>,
    horizon_days: i64,
    stop: &StopFlag,
) -> Result<FeatureBuildStats> {
    info!(%as_of, horizon_days, "building feature snapshots");
    let mut stats = FeatureBuildStats::default();

    for player in store.active_players_with_club()? {
        if stop.is_stopped() {
            stats.cancelled = true;
            warn!("feature build cancelled, partial progress kept");
            break;
        }
        let Some(from_club_id) = player.current_club_id else {
            continue;
        };

        let result = (|| -> Result<usize> {
            let clubs = candidates::candidate_clubs_for_prediction(
                store, config, player.id, as_of, horizon_days,
            )?;
            let mut built = 0;
            for to_club_id in clubs {
                let vector = build_feature_vector(store, player.id, from_club_id, to_club_id, as_of)?;
                store.upsert_feature_snapshot(&FeatureSnapshot {
                    id: Uuid::new_v4(),
                    player_id: player.id,
                    candidate_club_id: to_club_id,
                    as_of,
                    features: serde_json::to_value(&vector)?,
                    feature_version: FEATURE_VERSION.to_string(),
                    created_at: Utc::now(),
                })?;
                built += 1;
            }
            Ok(built)
        })();

        match result {
            Ok(built) => {
                stats.players_processed += 1;
                stats.vectors_built += built;
            }
            Err(e) => {
                warn!(player = %player.name, error = %e, "feature build failed for player");
                stats.errors += 1;
            }
        }
    }

    info!(
        players = stats.players_processed,
        vectors = stats.vectors_built,
        errors = stats.errors,
        "feature build complete"
    );
    Ok(stats)
}

// ============================================================================
// Training-set assembly
// ============================================================================

/// One labeled example.
#[derive(Debug, Clone)]
pub struct TrainingRow {
    pub player_id: Uuid,
    pub to_club_id: Uuid,
    pub feature_date: NaiveDate,
    pub label: f64,
    pub features: FeatureVector,
}

#[derive(Debug, Clone, Default)]
pub struct TrainingFrame {
    pub rows: Vec<TrainingRow>,
    pub positives: usize,
    pub skipped_leakage: usize,
}

/// Pluggable negative sampling. Swapping implementations must not change the
/// training call surface.
pub trait NegativeSampler {
    fn sample(&self, store: &Store, positive: &TransferEvent, n: usize) -> Result<Vec<Uuid>>;
}

/// Uniform draw from clubs that are neither origin nor destination, seeded
/// per positive so the frame is reproducible.
pub struct UniformNegativeSampler {
    pub seed: u64,
}

impl NegativeSampler for UniformNegativeSampler {
    fn sample(&self, store: &Store, positive: &TransferEvent, n: usize) -> Result<Vec<Uuid>> {
        let pool: Vec<Uuid> = store
            .all_club_ids()?
            .into_iter()
            .filter(|id| Some(*id) != positive.from_club_id && *id != positive.to_club_id)
            .collect();

        let (hi, lo) = positive.player_id.as_u64_pair();
        let day_component = positive
            .transfer_date
            .signed_duration_since(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default())
            .num_days() as u64;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ hi ^ lo ^ day_component);

        Ok(pool.choose_multiple(&mut rng, n).copied().collect())
    }
}

/// Number of sampled negatives per positive.
pub const NEGATIVES_PER_POSITIVE: usize = 3;

/// Assemble the labeled frame for training at `t_train`.
///
/// Positives are completed moves inside the lookback window; each yields a
/// vector at exactly `transfer_date - horizon` (leakage-checked) plus sampled
/// negative destinations at the same feature date.
pub fn build_training_frame(
    store: &Store,
    t_train: NaiveDate,
    lookback_days: i64,
    horizon_days: i64,
    sampler: &dyn NegativeSampler,
) -> Result<TrainingFrame> {
    let window_start = t_train - Duration::days(lookback_days);
    let positives = store.training_positives(window_start, t_train)?;
    info!(
        count = positives.len(),
        %window_start,
        %t_train,
        horizon_days,
        "assembling training frame"
    );

    let mut frame = TrainingFrame::default();

    for transfer in &positives {
        let Some(from_club_id) = transfer.from_club_id else {
            continue;
        };
        let feature_date = transfer.transfer_date - Duration::days(horizon_days);

        if let Err(e) = timeguard::validate_training_label_time_travel(
            transfer.transfer_date,
            feature_date,
            horizon_days,
        ) {
            warn!(event = %transfer.event_id, error = %e, "skipping leaky training label");
            frame.skipped_leakage += 1;
            continue;
        }

        let as_of = feature_date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);

        match build_feature_vector(store, transfer.player_id, from_club_id, transfer.to_club_id, as_of)
        {
            Ok(features) => {
                frame.rows.push(TrainingRow {
                    player_id: transfer.player_id,
                    to_club_id: transfer.to_club_id,
                    feature_date,
                    label: 1.0,
                    features,
                });
                frame.positives += 1;
            }
            Err(e) => {
                warn!(event = %transfer.event_id, error = %e, "positive vector failed");
                continue;
            }
        }

        for negative_club in sampler.sample(store, transfer, NEGATIVES_PER_POSITIVE)? {
            match build_feature_vector(store, transfer.player_id, from_club_id, negative_club, as_of)
            {
                Ok(features) => frame.rows.push(TrainingRow {
                    player_id: transfer.player_id,
                    to_club_id: negative_club,
                    feature_date,
                    label: 0.0,
                    features,
                }),
                Err(e) => {
                    debug!(event = %transfer.event_id, error = %e, "negative vector failed");
                }
            }
        }
    }

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        transfer_event_id, Club, Competition, EntityType, FeeType, NewSignalEvent, Player,
        SignalValue, TransferType,
    };

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    struct Fixture {
        store: Store,
        player: Uuid,
        from_club: Uuid,
        to_club: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Store::open_in_memory().unwrap();
        let comp_en = Competition {
            id: Uuid::new_v4(),
            name: "Premier League".to_string(),
            country: "England".to_string(),
            tier: 1,
        };
        let comp_es = Competition {
            id: Uuid::new_v4(),
            name: "La Liga".to_string(),
            country: "Spain".to_string(),
            tier: 1,
        };
        store.upsert_competition(&comp_en).unwrap();
        store.upsert_competition(&comp_es).unwrap();

        let from_club = Club {
            id: Uuid::new_v4(),
            name: "Arsenal".to_string(),
            country: "England".to_string(),
            competition_id: Some(comp_en.id),
        };
        let to_club = Club {
            id: Uuid::new_v4(),
            name: "Barcelona".to_string(),
            country: "Spain".to_string(),
            competition_id: Some(comp_es.id),
        };
        store.upsert_club(&from_club).unwrap();
        store.upsert_club(&to_club).unwrap();

        let player = Player {
            id: Uuid::new_v4(),
            name: "Feature Test".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(2000, 7, 21),
            nationality: Some("England".to_string()),
            position: Some("RW".to_string()),
            current_club_id: Some(from_club.id),
            contract_until: None,
            is_active: true,
        };
        store.upsert_player(&player).unwrap();

        Fixture {
            store,
            player: player.id,
            from_club: from_club.id,
            to_club: to_club.id,
        }
    }

    #[test]
    fn test_vector_has_all_columns_with_nulls_preserved() {
        let f = fixture();
        let as_of = ts("2025-01-21T00:00:00Z");

        let vector =
            build_feature_vector(&f.store, f.player, f.from_club, f.to_club, as_of).unwrap();

        assert_eq!(vector.len(), FEATURE_COLUMNS.len());
        for name in FEATURE_COLUMNS {
            assert!(vector.contains_key(name), "missing {name}");
        }
        // No signals loaded: market value stays None rather than 0.
        assert_eq!(vector["market_value"], None);
        // dob 2000-07-21 at 2025-01-21: about 24.5 years.
        let age = vector["age"].unwrap();
        assert!((age - 24.5).abs() < 0.05, "age was {age}");
        assert_eq!(vector["position_encoded"], Some(9.0));
        assert_eq!(vector["same_country"], Some(0.0));
        assert_eq!(vector["same_league"], Some(0.0));
        assert_eq!(vector["tier_difference"], Some(0.0));
    }

    #[test]
    fn test_vector_reads_are_as_of_bounded() {
        let f = fixture();

        f.store
            .insert_signal(&NewSignalEvent {
                entity_type: EntityType::Player,
                player_id: Some(f.player),
                club_id: None,
                signal_type: SignalType::MarketValue,
                value: SignalValue::Num(60_000_000.0),
                source: "test".into(),
                source_id: None,
                confidence: 1.0,
                observed_at: ts("2025-01-10T00:00:00Z"),
                effective_from: ts("2025-01-10T00:00:00Z"),
                effective_to: None,
            })
            .unwrap();

        let before = build_feature_vector(
            &f.store,
            f.player,
            f.from_club,
            f.to_club,
            ts("2025-01-09T00:00:00Z"),
        )
        .unwrap();
        assert_eq!(before["market_value"], None);

        let after = build_feature_vector(
            &f.store,
            f.player,
            f.from_club,
            f.to_club,
            ts("2025-01-10T00:00:00Z"),
        )
        .unwrap();
        assert_eq!(after["market_value"], Some(60_000_000.0));
    }

    #[test]
    fn test_training_frame_feature_dates_and_negatives() {
        let f = fixture();

        // Scatter a few more clubs for the negative pool.
        let comp = f.store.list_competitions().unwrap().remove(0);
        for name in ["Chelsea", "Liverpool", "Newcastle", "Brighton"] {
            f.store
                .upsert_club(&Club {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    country: "England".to_string(),
                    competition_id: Some(comp.id),
                })
                .unwrap();
        }

        let transfer_date = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        f.store
            .insert_transfer(&TransferEvent {
                id: Uuid::new_v4(),
                event_id: transfer_event_id(transfer_date, f.player, Some(f.from_club)),
                player_id: f.player,
                from_club_id: Some(f.from_club),
                to_club_id: f.to_club,
                transfer_type: TransferType::Permanent,
                transfer_date,
                fee_amount: Some(50_000_000.0),
                fee_currency: Some("EUR".into()),
                fee_amount_eur: Some(50_000_000.0),
                fee_type: FeeType::Confirmed,
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
                source: "test".into(),
                source_confidence: 1.0,
                created_at: Utc::now(),
                is_superseded: false,
                superseded_by: None,
            })
            .unwrap();

        let sampler = UniformNegativeSampler { seed: 42 };
        let t_train = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let frame = build_training_frame(&f.store, t_train, 365, 90, &sampler).unwrap();

        assert_eq!(frame.positives, 1);
        assert_eq!(frame.skipped_leakage, 0);
        // 1 positive + 3 negatives.
        assert_eq!(frame.rows.len(), 1 + NEGATIVES_PER_POSITIVE);

        let positive = &frame.rows[0];
        assert_eq!(positive.label, 1.0);
        // transfer 2025-03-15 with horizon 90 -> features at 2024-12-15.
        assert_eq!(
            positive.feature_date,
            NaiveDate::from_ymd_opt(2024, 12, 15).unwrap()
        );

        // Negatives never include origin or destination, and are reproducible.
        for row in &frame.rows[1..] {
            assert_eq!(row.label, 0.0);
            assert_ne!(row.to_club_id, f.from_club);
            assert_ne!(row.to_club_id, f.to_club);
        }
        let again = build_training_frame(&f.store, t_train, 365, 90, &sampler).unwrap();
        let ids: Vec<_> = frame.rows.iter().map(|r| r.to_club_id).collect();
        let ids2: Vec<_> = again.rows.iter().map(|r| r.to_club_id).collect();
        assert_eq!(ids, ids2);
    }
}
