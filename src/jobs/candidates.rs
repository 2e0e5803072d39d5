//! Candidate destination generation.
//!
//! For a (player, as_of, horizon) triple, produces an ordered, deduplicated
//! list of plausible destination clubs, each carrying its source, a score in
//! [0, 1] and a human-readable reason. The whole set plus per-source counts
//! and the player's as-of context is persisted to `candidate_sets` for audit.
//!
//! Sources are independent units sharing one trait and composed via a fixed
//! ordered list; deduplication is first-source-wins. The random source and
//! nothing else draws randomness, seeded from (player, as_of) so the set is
//! reproducible.

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::models::{
    Candidate, CandidateSet, CandidateSource, Club, Competition, Player, SignalType, SourceCounts,
};
use crate::store::Store;
use crate::timeguard::{self, SignalEntity};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The big-five competitions scanned by the league source beyond the
/// player's own league.
pub const TOP_FIVE_LEAGUES: [&str; 5] = [
    "Premier League",
    "La Liga",
    "Serie A",
    "Bundesliga",
    "Ligue 1",
];

/// League position treated as "unknown / bottom of table".
const MISSING_LEAGUE_POSITION: f64 = 99.0;

/// Per-source caps and thresholds.
#[derive(Debug, Clone)]
pub struct CandidateConfig {
    pub max_total: usize,
    pub max_same_league: usize,
    pub top_league_take: usize,
    pub max_social: usize,
    pub social_threshold: f64,
    pub max_user_attention: usize,
    pub attention_threshold: f64,
    pub max_constraint_fit: usize,
    pub max_random: usize,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            max_total: 20,
            max_same_league: 8,
            top_league_take: 6,
            max_social: 5,
            social_threshold: 2.0,
            max_user_attention: 5,
            attention_threshold: 3.0,
            max_constraint_fit: 5,
            max_random: 5,
        }
    }
}

impl CandidateConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_total: config.max_candidates,
            ..Self::default()
        }
    }
}

/// Everything a source needs to score destinations.
pub struct SourceContext<'a> {
    pub store: &'a Store,
    pub player: &'a Player,
    pub current_club: &'a Club,
    pub as_of: DateTime<Utc>,
    pub config: &'a CandidateConfig,
    /// Clubs already taken by earlier sources; only the random source uses
    /// this to avoid wasting its picks.
    pub selected: &'a HashSet<Uuid>,
}

/// One pluggable candidate source. Adding a source means implementing this
/// and appending to the list in `generate_candidate_set`.
pub trait DestinationSource {
    fn source(&self) -> CandidateSource;
    fn generate(&self, ctx: &SourceContext<'_>) -> Result<Vec<Candidate>>;
}

// ============================================================================
// League source
// ============================================================================

/// Top clubs from the player's own league plus the heads of the big-five
/// tables, ranked by the `club_league_position` signal at as-of.
pub struct LeagueSource;

impl LeagueSource {
    fn ranked_clubs(
        ctx: &SourceContext<'_>,
        competition: &Competition,
        exclude: Uuid,
    ) -> Result<Vec<(Club, f64)>> {
        let clubs = ctx.store.clubs_in_competition(competition.id)?;
        let mut ranked = Vec::with_capacity(clubs.len());
        for club in clubs {
            if club.id == exclude {
                continue;
            }
            let position = timeguard::latest_num(
                ctx.store,
                SignalEntity::Club(club.id),
                SignalType::ClubLeaguePosition,
                ctx.as_of,
            )?
            .unwrap_or(MISSING_LEAGUE_POSITION);
            ranked.push((club, position));
        }
        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        Ok(ranked)
    }
}

impl DestinationSource for LeagueSource {
    fn source(&self) -> CandidateSource {
        CandidateSource::League
    }

    fn generate(&self, ctx: &SourceContext<'_>) -> Result<Vec<Candidate>> {
        let mut out = Vec::new();

        let own_competition = match ctx.current_club.competition_id {
            Some(id) => ctx.store.get_competition(id)?,
            None => None,
        };

        if let Some(ref comp) = own_competition {
            for (club, position) in Self::ranked_clubs(ctx, comp, ctx.current_club.id)?
                .into_iter()
                .take(ctx.config.max_same_league)
            {
                let score = (1.0 - position / 20.0).clamp(0.0, 1.0);
                out.push(Candidate {
                    club_id: club.id,
                    source: CandidateSource::League,
                    score,
                    reason: format!("Top {} in {}", position as i64, comp.name),
                });
            }
        }

        for comp in ctx.store.list_competitions()? {
            if !TOP_FIVE_LEAGUES.contains(&comp.name.as_str()) {
                continue;
            }
            if own_competition.as_ref().map(|c| c.id) == Some(comp.id) {
                continue;
            }
            for (club, position) in Self::ranked_clubs(ctx, &comp, ctx.current_club.id)?
                .into_iter()
                .take(ctx.config.top_league_take)
            {
                let score = (0.8 - position / 30.0).clamp(0.0, 1.0);
                out.push(Candidate {
                    club_id: club.id,
                    source: CandidateSource::League,
                    score,
                    reason: format!("Top {} in {}", position as i64, comp.name),
                });
            }
        }

        Ok(out)
    }
}

// ============================================================================
// Social source
// ============================================================================

/// Clubs co-mentioned with the player on social media above a velocity
/// threshold, read from the pair `social_mention_velocity` signal.
pub struct SocialSource;

impl DestinationSource for SocialSource {
    fn source(&self) -> CandidateSource {
        CandidateSource::Social
    }

    fn generate(&self, ctx: &SourceContext<'_>) -> Result<Vec<Candidate>> {
        let clubs = timeguard::pair_partner_clubs(
            ctx.store,
            ctx.player.id,
            SignalType::SocialMentionVelocity,
            ctx.as_of,
        )?;

        let mut scored = Vec::new();
        for club_id in clubs {
            if club_id == ctx.current_club.id {
                continue;
            }
            let Some(velocity) = timeguard::latest_num(
                ctx.store,
                SignalEntity::Pair {
                    player_id: ctx.player.id,
                    club_id,
                },
                SignalType::SocialMentionVelocity,
                ctx.as_of,
            )?
            else {
                continue;
            };
            if velocity < ctx.config.social_threshold {
                continue;
            }
            scored.push(Candidate {
                club_id,
                source: CandidateSource::Social,
                score: (velocity / 10.0).min(1.0),
                reason: format!("Social co-mention velocity {velocity:.1}"),
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.club_id.cmp(&b.club_id))
        });
        scored.truncate(ctx.config.max_social);
        Ok(scored)
    }
}

// ============================================================================
// User-attention source
// ============================================================================

/// Clubs users browse in the same sessions as the player, read from the
/// derived pair `user_destination_cooccurrence` signal.
pub struct UserAttentionSource;

impl DestinationSource for UserAttentionSource {
    fn source(&self) -> CandidateSource {
        CandidateSource::UserAttention
    }

    fn generate(&self, ctx: &SourceContext<'_>) -> Result<Vec<Candidate>> {
        let clubs = timeguard::pair_partner_clubs(
            ctx.store,
            ctx.player.id,
            SignalType::UserDestinationCooccurrence,
            ctx.as_of,
        )?;

        let mut scored = Vec::new();
        for club_id in clubs {
            if club_id == ctx.current_club.id {
                continue;
            }
            let Some(value) = timeguard::latest_num(
                ctx.store,
                SignalEntity::Pair {
                    player_id: ctx.player.id,
                    club_id,
                },
                SignalType::UserDestinationCooccurrence,
                ctx.as_of,
            )?
            else {
                continue;
            };
            if value < ctx.config.attention_threshold {
                continue;
            }
            scored.push(Candidate {
                club_id,
                source: CandidateSource::UserAttention,
                score: (value / 100.0).min(1.0),
                reason: format!("User attention cooccurrence {value:.0}"),
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.club_id.cmp(&b.club_id))
        });
        scored.truncate(ctx.config.max_user_attention);
        Ok(scored)
    }
}

// ============================================================================
// Constraint-fit source
// ============================================================================

/// Clubs in the top two tiers whose squad composition and finances fit the
/// player: thin cover in the position, an ageing position group, and a fee
/// the club's recent net spend can absorb.
pub struct ConstraintFitSource;

impl ConstraintFitSource {
    fn fit_score(
        ctx: &SourceContext<'_>,
        club: &Club,
        tier: i32,
        market_value: Option<f64>,
    ) -> Result<Option<(f64, String)>> {
        let position = match ctx.player.position.as_deref() {
            Some(p) => p,
            None => return Ok(None),
        };

        let mut score: f64 = 0.0;
        let mut reasons: Vec<String> = Vec::new();

        let squad = ctx.store.squad(club.id)?;
        let in_position: Vec<_> = squad
            .iter()
            .filter(|p| p.position.as_deref() == Some(position))
            .collect();

        if in_position.len() <= 2 {
            score += 0.4;
            reasons.push(format!("needs {position} cover"));
        } else if in_position.len() <= 3 {
            score += 0.2;
            reasons.push(format!("thin at {position}"));
        }

        let ages: Vec<f64> = in_position
            .iter()
            .filter_map(|p| p.date_of_birth)
            .map(|dob| age_years(dob, ctx.as_of))
            .collect();
        if !ages.is_empty() {
            let avg = ages.iter().sum::<f64>() / ages.len() as f64;
            if avg >= 30.0 {
                score += 0.3;
                reasons.push(format!("ageing {position} group"));
            }
        }

        let net_spend = timeguard::latest_num(
            ctx.store,
            SignalEntity::Club(club.id),
            SignalType::ClubNetSpend12m,
            ctx.as_of,
        )?;
        if let (Some(spend), Some(value)) = (net_spend, market_value) {
            if spend > 0.0 && value <= 0.3 * spend {
                score += 0.3;
                reasons.push("affordable within net spend".to_string());
            }
        }

        if tier == 1 {
            score += 0.1;
        }

        if score > 0.3 {
            Ok(Some((score.min(1.0), reasons.join(", "))))
        } else {
            Ok(None)
        }
    }
}

impl DestinationSource for ConstraintFitSource {
    fn source(&self) -> CandidateSource {
        CandidateSource::ConstraintFit
    }

    fn generate(&self, ctx: &SourceContext<'_>) -> Result<Vec<Candidate>> {
        let market_value = timeguard::latest_num(
            ctx.store,
            SignalEntity::Player(ctx.player.id),
            SignalType::MarketValue,
            ctx.as_of,
        )?;

        let mut scored = Vec::new();
        for (club, tier) in ctx.store.clubs_up_to_tier(2)? {
            if club.id == ctx.current_club.id {
                continue;
            }
            if let Some((score, reason)) = Self::fit_score(ctx, &club, tier, market_value)? {
                scored.push(Candidate {
                    club_id: club.id,
                    source: CandidateSource::ConstraintFit,
                    score,
                    reason,
                });
            }
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.club_id.cmp(&b.club_id))
        });
        scored.truncate(ctx.config.max_constraint_fit);
        Ok(scored)
    }
}

// ============================================================================
// Random source
// ============================================================================

/// Uniform sample of top-three-tier clubs not already selected. Keeps the
/// candidate pool honest for calibration; deterministic per (player, as_of).
pub struct RandomSource;

/// Seed derived from the triple so regeneration reproduces the sample.
fn candidate_seed(player_id: Uuid, as_of: DateTime<Utc>) -> u64 {
    let (hi, lo) = player_id.as_u64_pair();
    hi ^ lo ^ (as_of.timestamp_micros() as u64)
}

impl DestinationSource for RandomSource {
    fn source(&self) -> CandidateSource {
        CandidateSource::Random
    }

    fn generate(&self, ctx: &SourceContext<'_>) -> Result<Vec<Candidate>> {
        let pool: Vec<Uuid> = ctx
            .store
            .clubs_up_to_tier(3)?
            .into_iter()
            .map(|(club, _)| club.id)
            .filter(|id| *id != ctx.current_club.id && !ctx.selected.contains(id))
            .collect();

        let mut rng = ChaCha8Rng::seed_from_u64(candidate_seed(ctx.player.id, ctx.as_of));
        let picks = pool
            .choose_multiple(&mut rng, ctx.config.max_random)
            .copied()
            .collect::<Vec<_>>();

        Ok(picks
            .into_iter()
            .map(|club_id| Candidate {
                club_id,
                source: CandidateSource::Random,
                score: 0.1,
                reason: "Calibration sample".to_string(),
            })
            .collect())
    }
}

// ============================================================================
// Composition
// ============================================================================

/// Age in years at `as_of`, on a 365.25-day year.
pub fn age_years(dob: chrono::NaiveDate, as_of: DateTime<Utc>) -> f64 {
    let days = (as_of.date_naive() - dob).num_days();
    days as f64 / 365.25
}

/// Generate (or fetch the cached) candidate set for the triple.
pub fn generate_candidate_set(
    store: &Store,
    config: &Config,
    player_id: Uuid,
    as_of: DateTime<Utc>,
    horizon_days: i64,
) -> Result<CandidateSet> {
    if let Some(cached) = store.get_candidate_set(player_id, as_of, horizon_days)? {
        debug!(player = %player_id, %as_of, horizon_days, "candidate set cache hit");
        return Ok(cached);
    }

    let player = store.require_player(player_id)?;
    let current_club_id = player.current_club_id.ok_or_else(|| {
        CoreError::Validation(format!("player {} has no current club", player.name))
    })?;
    let current_club = store.require_club(current_club_id)?;
    let candidate_config = CandidateConfig::from_config(config);

    let sources: [&dyn DestinationSource; 5] = [
        &LeagueSource,
        &SocialSource,
        &UserAttentionSource,
        &ConstraintFitSource,
        &RandomSource,
    ];

    let mut selected: HashSet<Uuid> = HashSet::new();
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut counts = SourceCounts::default();

    for source in sources {
        let ctx = SourceContext {
            store,
            player: &player,
            current_club: &current_club,
            as_of,
            config: &candidate_config,
            selected: &selected,
        };
        let generated = match source.generate(&ctx) {
            Ok(list) => list,
            Err(e) => {
                warn!(
                    player = %player.name,
                    source = source.source().as_str(),
                    error = %e,
                    "candidate source failed, continuing"
                );
                continue;
            }
        };
        for candidate in generated {
            // First source wins on duplicates.
            if selected.insert(candidate.club_id) {
                counts.bump(candidate.source);
                candidates.push(candidate);
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.club_id.cmp(&b.club_id))
    });
    if candidates.len() > candidate_config.max_total {
        for dropped in &candidates[candidate_config.max_total..] {
            match dropped.source {
                CandidateSource::League => counts.league -= 1,
                CandidateSource::Social => counts.social -= 1,
                CandidateSource::UserAttention => counts.user_attention -= 1,
                CandidateSource::ConstraintFit => counts.constraint_fit -= 1,
                CandidateSource::Random => counts.random -= 1,
            }
        }
        candidates.truncate(candidate_config.max_total);
    }

    let player_context = player_context_json(store, &player, &current_club, as_of)?;

    let set = CandidateSet {
        id: Uuid::new_v4(),
        player_id,
        as_of,
        horizon_days,
        from_club_id: current_club.id,
        total_candidates: candidates.len(),
        source_counts: counts,
        candidates,
        player_context,
        created_at: Utc::now(),
    };
    store.upsert_candidate_set(&set)?;

    info!(
        player = %player.name,
        total = set.total_candidates,
        league = set.source_counts.league,
        social = set.source_counts.social,
        user_attention = set.source_counts.user_attention,
        constraint_fit = set.source_counts.constraint_fit,
        random = set.source_counts.random,
        "candidate set generated"
    );
    Ok(set)
}

/// Candidate club ids in stored (score) order, for the scorer.
pub fn candidate_clubs_for_prediction(
    store: &Store,
    config: &Config,
    player_id: Uuid,
    as_of: DateTime<Utc>,
    horizon_days: i64,
) -> Result<Vec<Uuid>> {
    let set = generate_candidate_set(store, config, player_id, as_of, horizon_days)?;
    Ok(set.candidates.iter().map(|c| c.club_id).collect())
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CandidateGenStats {
    pub players_processed: usize,
    pub candidates_written: usize,
    pub errors: usize,
    pub cancelled: bool,
}

/// Batch generation across active players (or one player when pinned).
pub fn run_candidate_generation(
    store: &Store,
    config: &Config,
    as_of: DateTime<Utc>,
    horizon_days: i64,
    only_player: Option<Uuid>,
    stop: &crate::jobs::StopFlag,
) -> Result<CandidateGenStats> {
    let players = match only_player {
        Some(id) => vec![store.require_player(id)?],
        None => store.active_players_with_club()?,
    };
    info!(players = players.len(), %as_of, horizon_days, "generating candidate sets");

    let mut stats = CandidateGenStats::default();
    for player in players {
        if stop.is_stopped() {
            stats.cancelled = true;
            warn!("candidate generation cancelled, partial progress kept");
            break;
        }
        if player.current_club_id.is_none() {
            continue;
        }
        match generate_candidate_set(store, config, player.id, as_of, horizon_days) {
            Ok(set) => {
                stats.players_processed += 1;
                stats.candidates_written += set.total_candidates;
            }
            Err(e) => {
                warn!(player = %player.name, error = %e, "candidate generation failed");
                stats.errors += 1;
            }
        }
    }
    Ok(stats)
}

fn player_context_json(
    store: &Store,
    player: &Player,
    current_club: &Club,
    as_of: DateTime<Utc>,
) -> Result<serde_json::Value> {
    let market_value = timeguard::latest_num(
        store,
        SignalEntity::Player(player.id),
        SignalType::MarketValue,
        as_of,
    )?;
    let contract_months = timeguard::latest_num(
        store,
        SignalEntity::Player(player.id),
        SignalType::ContractMonthsRemaining,
        as_of,
    )?;
    let age = player
        .date_of_birth
        .map(|dob| (age_years(dob, as_of) * 10.0).round() / 10.0);

    Ok(json!({
        "name": player.name,
        "position": player.position,
        "club": current_club.name,
        "age": age,
        "market_value": market_value,
        "contract_months_remaining": contract_months,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, NewSignalEvent, SignalValue};
    use chrono::NaiveDate;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    struct Fixture {
        store: Store,
        config: Config,
        player: Uuid,
        own_league_clubs: Vec<Uuid>,
    }

    /// A league of five clubs (current + 4 others) with table positions.
    fn fixture() -> Fixture {
        let store = Store::open_in_memory().unwrap();
        let comp = Competition {
            id: Uuid::new_v4(),
            name: "Premier League".to_string(),
            country: "England".to_string(),
            tier: 1,
        };
        store.upsert_competition(&comp).unwrap();

        let mut clubs = Vec::new();
        for (i, name) in ["Arsenal", "Chelsea", "Liverpool", "Spurs", "Villa"]
            .iter()
            .enumerate()
        {
            let club = Club {
                id: Uuid::new_v4(),
                name: name.to_string(),
                country: "England".to_string(),
                competition_id: Some(comp.id),
            };
            store.upsert_club(&club).unwrap();
            store
                .insert_signal(&NewSignalEvent {
                    entity_type: EntityType::Club,
                    player_id: None,
                    club_id: Some(club.id),
                    signal_type: SignalType::ClubLeaguePosition,
                    value: SignalValue::Num((i + 1) as f64),
                    source: "test".into(),
                    source_id: None,
                    confidence: 1.0,
                    observed_at: ts("2025-01-01T00:00:00Z"),
                    effective_from: ts("2025-01-01T00:00:00Z"),
                    effective_to: None,
                })
                .unwrap();
            clubs.push(club.id);
        }

        let player = Player {
            id: Uuid::new_v4(),
            name: "Candidate Test".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(2000, 7, 21),
            nationality: Some("England".to_string()),
            position: Some("ST".to_string()),
            current_club_id: Some(clubs[4]),
            contract_until: None,
            is_active: true,
        };
        store.upsert_player(&player).unwrap();

        Fixture {
            store,
            config: Config::default(),
            player: player.id,
            own_league_clubs: clubs,
        }
    }

    #[test]
    fn test_league_source_ranks_by_table_position_and_excludes_current() {
        let f = fixture();
        let as_of = ts("2025-01-15T00:00:00Z");

        let set =
            generate_candidate_set(&f.store, &f.config, f.player, as_of, 90).unwrap();

        // Four same-league candidates (current club excluded) and up to five
        // random ones; union stays within the cap.
        assert!(set.total_candidates <= 20);
        assert_eq!(set.source_counts.league, 4);

        let league: Vec<_> = set
            .candidates
            .iter()
            .filter(|c| c.source == CandidateSource::League)
            .collect();
        // Best table position scores highest: 1 - 1/20.
        let top = league
            .iter()
            .find(|c| c.club_id == f.own_league_clubs[0])
            .unwrap();
        assert!((top.score - 0.95).abs() < 1e-9);
        assert_eq!(top.reason, "Top 1 in Premier League");
        assert!(league.iter().all(|c| c.club_id != f.own_league_clubs[4]));
    }

    #[test]
    fn test_candidate_set_is_cached_and_deterministic() {
        let f = fixture();
        let as_of = ts("2025-01-15T00:00:00Z");

        let first = generate_candidate_set(&f.store, &f.config, f.player, as_of, 90).unwrap();
        let second = generate_candidate_set(&f.store, &f.config, f.player, as_of, 90).unwrap();

        assert_eq!(first.id, second.id);
        let ids: Vec<_> = first.candidates.iter().map(|c| c.club_id).collect();
        let ids2: Vec<_> = second.candidates.iter().map(|c| c.club_id).collect();
        assert_eq!(ids, ids2);
    }

    #[test]
    fn test_social_source_respects_threshold_and_dedup() {
        let f = fixture();
        let as_of = ts("2025-01-15T00:00:00Z");

        // Strong co-mention with the league leader (already a league pick).
        f.store
            .insert_signal(&NewSignalEvent {
                entity_type: EntityType::Pair,
                player_id: Some(f.player),
                club_id: Some(f.own_league_clubs[0]),
                signal_type: SignalType::SocialMentionVelocity,
                value: SignalValue::Num(6.0),
                source: "test".into(),
                source_id: None,
                confidence: 0.8,
                observed_at: ts("2025-01-10T00:00:00Z"),
                effective_from: ts("2025-01-10T00:00:00Z"),
                effective_to: None,
            })
            .unwrap();
        // Below threshold with another club.
        f.store
            .insert_signal(&NewSignalEvent {
                entity_type: EntityType::Pair,
                player_id: Some(f.player),
                club_id: Some(f.own_league_clubs[1]),
                signal_type: SignalType::SocialMentionVelocity,
                value: SignalValue::Num(1.0),
                source: "test".into(),
                source_id: None,
                confidence: 0.8,
                observed_at: ts("2025-01-10T00:00:00Z"),
                effective_from: ts("2025-01-10T00:00:00Z"),
                effective_to: None,
            })
            .unwrap();

        let set = generate_candidate_set(&f.store, &f.config, f.player, as_of, 90).unwrap();
        // League saw the club first, so social contributes nothing new.
        assert_eq!(set.source_counts.social, 0);
        let leader = set
            .candidates
            .iter()
            .find(|c| c.club_id == f.own_league_clubs[0])
            .unwrap();
        assert_eq!(leader.source, CandidateSource::League);
    }

    #[test]
    fn test_player_context_carries_as_of_reads() {
        let f = fixture();
        let as_of = ts("2025-01-21T00:00:00Z");

        f.store
            .insert_signal(&NewSignalEvent {
                entity_type: EntityType::Player,
                player_id: Some(f.player),
                club_id: None,
                signal_type: SignalType::MarketValue,
                value: SignalValue::Num(80_000_000.0),
                source: "test".into(),
                source_id: None,
                confidence: 1.0,
                observed_at: ts("2025-01-10T00:00:00Z"),
                effective_from: ts("2025-01-10T00:00:00Z"),
                effective_to: None,
            })
            .unwrap();

        let set = generate_candidate_set(&f.store, &f.config, f.player, as_of, 90).unwrap();
        let ctx = set.player_context;
        assert_eq!(ctx["market_value"], 80_000_000.0);
        // dob 2000-07-21 at 2025-01-21 is ~24.5 years.
        let age = ctx["age"].as_f64().unwrap();
        assert!((age - 24.5).abs() < 0.05, "age was {age}");
    }
}
