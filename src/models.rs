//! Domain model for the transfer-intelligence backend.
//!
//! Four layers of truth:
//! - Reference data (competitions, clubs, players)
//! - Ledger (completed transfers, append-only, supersede-only corrections)
//! - Signals (bitemporal observation stream)
//! - Market (prediction snapshots + auditable candidate sets)

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Reference data
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: Uuid,
    pub name: String,
    pub country: String,
    /// 1 = top flight. Clubs inherit their tier through this.
    pub tier: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Club {
    pub id: Uuid,
    pub name: String,
    pub country: String,
    pub competition_id: Option<Uuid>,
}

/// A player row.
///
/// `current_club_id` and `contract_until` are denormalized hints written only
/// on admin/reference writes. The ledger and the contract signals are the
/// truth; the feature builder never reads these columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: Uuid,
    pub name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub nationality: Option<String>,
    pub position: Option<String>,
    pub current_club_id: Option<Uuid>,
    pub contract_until: Option<NaiveDate>,
    pub is_active: bool,
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    Permanent,
    Loan,
    LoanWithOption,
    LoanWithObligation,
    FreeTransfer,
    ContractExpiry,
    YouthPromotion,
    Retirement,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Loan => "loan",
            Self::LoanWithOption => "loan_with_option",
            Self::LoanWithObligation => "loan_with_obligation",
            Self::FreeTransfer => "free_transfer",
            Self::ContractExpiry => "contract_expiry",
            Self::YouthPromotion => "youth_promotion",
            Self::Retirement => "retirement",
        }
    }
}

impl FromStr for TransferType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permanent" => Ok(Self::Permanent),
            "loan" => Ok(Self::Loan),
            "loan_with_option" => Ok(Self::LoanWithOption),
            "loan_with_obligation" => Ok(Self::LoanWithObligation),
            "free_transfer" => Ok(Self::FreeTransfer),
            "contract_expiry" => Ok(Self::ContractExpiry),
            "youth_promotion" => Ok(Self::YouthPromotion),
            "retirement" => Ok(Self::Retirement),
            other => Err(format!("unknown transfer type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeType {
    Confirmed,
    Reported,
    Estimated,
    Undisclosed,
    Free,
}

impl FeeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Reported => "reported",
            Self::Estimated => "estimated",
            Self::Undisclosed => "undisclosed",
            Self::Free => "free",
        }
    }
}

impl FromStr for FeeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "reported" => Ok(Self::Reported),
            "estimated" => Ok(Self::Estimated),
            "undisclosed" => Ok(Self::Undisclosed),
            "free" => Ok(Self::Free),
            other => Err(format!("unknown fee type: {other}")),
        }
    }
}

/// An immutable fact about a completed transfer.
///
/// Rows are never updated in place. A correction appends a new row and flips
/// `is_superseded` on the old one, with `superseded_by` pointing forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEvent {
    pub id: Uuid,
    /// Deterministic natural key: `TL-YYYYMMDD-<player-short>-<from-short|ORIGIN>`.
    pub event_id: String,
    pub player_id: Uuid,
    pub from_club_id: Option<Uuid>,
    pub to_club_id: Uuid,
    pub transfer_type: TransferType,
    pub transfer_date: NaiveDate,
    pub fee_amount: Option<f64>,
    pub fee_currency: Option<String>,
    pub fee_amount_eur: Option<f64>,
    pub fee_type: FeeType,
    pub contract_start: Option<NaiveDate>,
    pub contract_end: Option<NaiveDate>,
    pub loan_end_date: Option<NaiveDate>,
    pub option_to_buy: bool,
    pub option_fee_eur: Option<f64>,
    pub obligation_to_buy: bool,
    pub obligation_fee_eur: Option<f64>,
    pub sell_on_percent: Option<f64>,
    pub buy_back_clause: bool,
    pub buy_back_fee_eur: Option<f64>,
    pub source: String,
    pub source_confidence: f64,
    pub created_at: DateTime<Utc>,
    pub is_superseded: bool,
    pub superseded_by: Option<Uuid>,
}

/// Build the deterministic ledger event id.
pub fn transfer_event_id(
    transfer_date: NaiveDate,
    player_id: Uuid,
    from_club_id: Option<Uuid>,
) -> String {
    let player_short = short_id(player_id);
    let from_short = from_club_id
        .map(short_id)
        .unwrap_or_else(|| "ORIGIN".to_string());
    format!(
        "TL-{}-{}-{}",
        transfer_date.format("%Y%m%d"),
        player_short,
        from_short
    )
}

/// First 8 hex chars of a UUID, used in deterministic natural keys.
pub fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

// ============================================================================
// Signals
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Player,
    Club,
    Pair,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Club => "club",
            Self::Pair => "pair",
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "player" => Ok(Self::Player),
            "club" => Ok(Self::Club),
            "pair" => Ok(Self::Pair),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

/// Closed set of observation kinds. Adding a kind is a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    MinutesLast5,
    InjuriesStatus,
    GoalsLast10,
    AssistsLast10,
    ClubLeaguePosition,
    ClubPointsPerGame,
    ClubNetSpend12m,
    ContractMonthsRemaining,
    WageEstimate,
    MarketValue,
    ReleaseClause,
    SocialMentionVelocity,
    SocialSentiment,
    UserAttentionVelocity,
    UserDestinationCooccurrence,
    UserWatchlistAdds,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MinutesLast5 => "minutes_last_5",
            Self::InjuriesStatus => "injuries_status",
            Self::GoalsLast10 => "goals_last_10",
            Self::AssistsLast10 => "assists_last_10",
            Self::ClubLeaguePosition => "club_league_position",
            Self::ClubPointsPerGame => "club_points_per_game",
            Self::ClubNetSpend12m => "club_net_spend_12m",
            Self::ContractMonthsRemaining => "contract_months_remaining",
            Self::WageEstimate => "wage_estimate",
            Self::MarketValue => "market_value",
            Self::ReleaseClause => "release_clause",
            Self::SocialMentionVelocity => "social_mention_velocity",
            Self::SocialSentiment => "social_sentiment",
            Self::UserAttentionVelocity => "user_attention_velocity",
            Self::UserDestinationCooccurrence => "user_destination_cooccurrence",
            Self::UserWatchlistAdds => "user_watchlist_adds",
        }
    }

    pub const ALL: [SignalType; 16] = [
        Self::MinutesLast5,
        Self::InjuriesStatus,
        Self::GoalsLast10,
        Self::AssistsLast10,
        Self::ClubLeaguePosition,
        Self::ClubPointsPerGame,
        Self::ClubNetSpend12m,
        Self::ContractMonthsRemaining,
        Self::WageEstimate,
        Self::MarketValue,
        Self::ReleaseClause,
        Self::SocialMentionVelocity,
        Self::SocialSentiment,
        Self::UserAttentionVelocity,
        Self::UserDestinationCooccurrence,
        Self::UserWatchlistAdds,
    ];
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown signal type: {s}"))
    }
}

/// Polymorphic signal payload. Storage is three nullable columns; in memory
/// exactly one variant is ever populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalValue {
    Num(f64),
    Text(String),
    Json(serde_json::Value),
}

impl SignalValue {
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Self::Num(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One bitemporal observation.
///
/// `observed_at` is when the observer learned the fact; `effective_from` is
/// when the fact began to hold; `effective_to` is an exclusive upper bound
/// (None = still holding). Rows are append-only; corrections are new rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub player_id: Option<Uuid>,
    pub club_id: Option<Uuid>,
    pub signal_type: SignalType,
    pub value: SignalValue,
    pub source: String,
    pub source_id: Option<String>,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to append a signal; the store assigns id/created_at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSignalEvent {
    pub entity_type: EntityType,
    pub player_id: Option<Uuid>,
    pub club_id: Option<Uuid>,
    pub signal_type: SignalType,
    pub value: SignalValue,
    pub source: String,
    pub source_id: Option<String>,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
}

// ============================================================================
// Market
// ============================================================================

/// Append-only probability output of one scoring run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionSnapshot {
    pub id: Uuid,
    /// Deterministic: `SNAP-<player-short>-<to-short|ANY>-H<H>-<as-of stamp>`.
    pub snapshot_id: String,
    pub model_version: String,
    pub model_name: String,
    pub player_id: Uuid,
    pub from_club_id: Option<Uuid>,
    /// None means "any destination".
    pub to_club_id: Option<Uuid>,
    pub horizon_days: i64,
    pub probability: f64,
    /// feature -> normalized contribution; entries sum to <= 1.
    pub drivers: serde_json::Value,
    /// The frozen input vector, for audit.
    pub features: Option<serde_json::Value>,
    pub as_of: DateTime<Utc>,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Build the deterministic snapshot id.
///
/// The stamp carries microseconds so two scoring runs inside the same second
/// cannot collide.
pub fn snapshot_id(
    player_id: Uuid,
    to_club_id: Option<Uuid>,
    horizon_days: i64,
    as_of: DateTime<Utc>,
) -> String {
    let to_short = to_club_id
        .map(short_id)
        .unwrap_or_else(|| "ANY".to_string());
    format!(
        "SNAP-{}-{}-H{}-{}",
        short_id(player_id),
        to_short,
        horizon_days,
        as_of.format("%Y%m%d%H%M%S%6f")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    League,
    Social,
    UserAttention,
    ConstraintFit,
    Random,
}

impl CandidateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::League => "league",
            Self::Social => "social",
            Self::UserAttention => "user_attention",
            Self::ConstraintFit => "constraint_fit",
            Self::Random => "random",
        }
    }
}

/// One scored destination inside a candidate set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub club_id: Uuid,
    pub source: CandidateSource,
    pub score: f64,
    pub reason: String,
}

/// Auditable record of the destinations considered for one
/// (player, as_of, horizon). Unique on that triple; regeneration refreshes
/// the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSet {
    pub id: Uuid,
    pub player_id: Uuid,
    pub as_of: DateTime<Utc>,
    pub horizon_days: i64,
    pub from_club_id: Uuid,
    pub total_candidates: usize,
    pub source_counts: SourceCounts,
    pub candidates: Vec<Candidate>,
    pub player_context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SourceCounts {
    pub league: usize,
    pub social: usize,
    pub user_attention: usize,
    pub constraint_fit: usize,
    pub random: usize,
}

impl SourceCounts {
    pub fn bump(&mut self, source: CandidateSource) {
        match source {
            CandidateSource::League => self.league += 1,
            CandidateSource::Social => self.social += 1,
            CandidateSource::UserAttention => self.user_attention += 1,
            CandidateSource::ConstraintFit => self.constraint_fit += 1,
            CandidateSource::Random => self.random += 1,
        }
    }
}

// ============================================================================
// UX
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserEventType {
    PageView,
    PlayerView,
    ClubView,
    TransferView,
    PredictionView,
    WatchlistAdd,
    WatchlistRemove,
    Search,
    Share,
    FilterApply,
    ComparisonView,
}

impl UserEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageView => "page_view",
            Self::PlayerView => "player_view",
            Self::ClubView => "club_view",
            Self::TransferView => "transfer_view",
            Self::PredictionView => "prediction_view",
            Self::WatchlistAdd => "watchlist_add",
            Self::WatchlistRemove => "watchlist_remove",
            Self::Search => "search",
            Self::Share => "share",
            Self::FilterApply => "filter_apply",
            Self::ComparisonView => "comparison_view",
        }
    }
}

impl FromStr for UserEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page_view" => Ok(Self::PageView),
            "player_view" => Ok(Self::PlayerView),
            "club_view" => Ok(Self::ClubView),
            "transfer_view" => Ok(Self::TransferView),
            "prediction_view" => Ok(Self::PredictionView),
            "watchlist_add" => Ok(Self::WatchlistAdd),
            "watchlist_remove" => Ok(Self::WatchlistRemove),
            "search" => Ok(Self::Search),
            "share" => Ok(Self::Share),
            "filter_apply" => Ok(Self::FilterApply),
            "comparison_view" => Ok(Self::ComparisonView),
            other => Err(format!("unknown user event type: {other}")),
        }
    }
}

/// Pseudonymous interaction event, consumed by signal derivation and the
/// what-changed detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEvent {
    pub id: Uuid,
    pub user_anon_id: String,
    pub session_id: String,
    pub event_type: UserEventType,
    pub player_id: Option<Uuid>,
    pub club_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    pub device_type: Option<String>,
    pub country_code: Option<String>,
    pub props: Option<serde_json::Value>,
}

// ============================================================================
// ML bookkeeping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Training,
    Completed,
    Failed,
    Deployed,
    Archived,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Training => "training",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Deployed => "deployed",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for ModelStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "training" => Ok(Self::Training),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "deployed" => Ok(Self::Deployed),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown model status: {other}")),
        }
    }
}

/// A registered training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: Uuid,
    pub model_name: String,
    pub model_version: String,
    pub horizon_days: i64,
    pub training_as_of: DateTime<Utc>,
    pub training_samples: i64,
    pub positive_samples: i64,
    pub feature_names: Vec<String>,
    pub metrics: serde_json::Value,
    pub feature_importances: serde_json::Value,
    pub artifact_path: Option<String>,
    pub status: ModelStatus,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One evaluation run against a model version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub id: Uuid,
    pub model_version_id: Uuid,
    pub eval_type: String,
    pub eval_name: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub n_samples: i64,
    pub n_positive: i64,
    pub auc_roc: Option<f64>,
    pub auc_pr: Option<f64>,
    pub log_loss: Option<f64>,
    pub brier: Option<f64>,
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub calibration_slope: Option<f64>,
    pub calibration_intercept: Option<f64>,
    pub calibration_bins: serde_json::Value,
    pub confusion: serde_json::Value,
    pub thresholds: serde_json::Value,
    pub backtest_by_season: serde_json::Value,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Idempotent cache row of a built feature vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub id: Uuid,
    pub player_id: Uuid,
    pub candidate_club_id: Uuid,
    pub as_of: DateTime<Utc>,
    pub features: serde_json::Value,
    pub feature_version: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_event_id_shape() {
        let player = Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap();
        let from = Uuid::parse_str("deadbeef-0000-0000-0000-000000000000").unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();

        let id = transfer_event_id(date, player, Some(from));
        assert_eq!(id, "TL-20250315-a1b2c3d4-deadbeef");

        let origin = transfer_event_id(date, player, None);
        assert_eq!(origin, "TL-20250315-a1b2c3d4-ORIGIN");
    }

    #[test]
    fn test_snapshot_id_microsecond_stamp() {
        let player = Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap();
        let as_of = DateTime::parse_from_rfc3339("2025-01-15T12:00:00.000123Z")
            .unwrap()
            .with_timezone(&Utc);

        let id = snapshot_id(player, None, 90, as_of);
        assert_eq!(id, "SNAP-a1b2c3d4-ANY-H90-20250115120000000123");

        // A different microsecond yields a different id.
        let later = as_of + chrono::Duration::microseconds(1);
        assert_ne!(id, snapshot_id(player, None, 90, later));
    }

    #[test]
    fn test_signal_type_round_trip() {
        for t in SignalType::ALL {
            assert_eq!(t.as_str().parse::<SignalType>().unwrap(), t);
        }
        assert!("not_a_signal".parse::<SignalType>().is_err());
    }
}
