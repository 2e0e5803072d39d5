//! SQLite-backed temporal store.
//!
//! One connection behind a mutex, WAL mode, prepared-statement caching.
//! Write discipline per table:
//! - ledger / signals / user events / predictions: append-only (predictions
//!   upsert only their payload on snapshot_id conflict)
//! - candidate sets / feature snapshots: upsert by composite natural key
//! - reference data: admin upserts
//!
//! The `player_market_view` projection is a plain table rebuilt on demand; it
//! exists purely for read latency and is never a source of truth.

mod candidates;
mod events;
mod ledger;
mod market_view;
mod ml;
mod predictions;
mod reference;
mod signals;

pub use events::{AttentionCounts, CooccurrenceCount};
pub use market_view::{MarketRow, MarketViewFilter};
pub use reference::SearchHit;
pub use signals::SignalAt;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA temp_store = MEMORY;

-- ===========================================================================
-- Reference data
-- ===========================================================================

CREATE TABLE IF NOT EXISTS competitions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    country TEXT NOT NULL,
    tier INTEGER NOT NULL CHECK (tier >= 1)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS clubs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    country TEXT NOT NULL,
    competition_id TEXT REFERENCES competitions(id)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS ix_clubs_competition ON clubs(competition_id);
CREATE INDEX IF NOT EXISTS ix_clubs_name ON clubs(name);

CREATE TABLE IF NOT EXISTS players (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    date_of_birth TEXT,
    nationality TEXT,
    position TEXT,
    current_club_id TEXT REFERENCES clubs(id),
    contract_until TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS ix_players_club ON players(current_club_id);
CREATE INDEX IF NOT EXISTS ix_players_name ON players(name);

-- ===========================================================================
-- Ledger
-- ===========================================================================

CREATE TABLE IF NOT EXISTS transfer_events (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL UNIQUE,
    player_id TEXT NOT NULL REFERENCES players(id),
    from_club_id TEXT REFERENCES clubs(id),
    to_club_id TEXT NOT NULL REFERENCES clubs(id),
    transfer_type TEXT NOT NULL,
    transfer_date TEXT NOT NULL,
    fee_amount REAL,
    fee_currency TEXT,
    fee_amount_eur REAL,
    fee_type TEXT NOT NULL,
    contract_start TEXT,
    contract_end TEXT,
    loan_end_date TEXT,
    option_to_buy INTEGER NOT NULL DEFAULT 0,
    option_fee_eur REAL,
    obligation_to_buy INTEGER NOT NULL DEFAULT 0,
    obligation_fee_eur REAL,
    sell_on_percent REAL CHECK (sell_on_percent IS NULL OR (sell_on_percent >= 0 AND sell_on_percent <= 100)),
    buy_back_clause INTEGER NOT NULL DEFAULT 0,
    buy_back_fee_eur REAL,
    source TEXT NOT NULL,
    source_confidence REAL NOT NULL CHECK (source_confidence >= 0 AND source_confidence <= 1),
    created_at TEXT NOT NULL,
    is_superseded INTEGER NOT NULL DEFAULT 0,
    superseded_by TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS ix_transfer_events_player ON transfer_events(player_id, transfer_date);
CREATE INDEX IF NOT EXISTS ix_transfer_events_date ON transfer_events(transfer_date);
CREATE INDEX IF NOT EXISTS ix_transfer_events_to_club ON transfer_events(to_club_id, transfer_date);
CREATE INDEX IF NOT EXISTS ix_transfer_events_from_club ON transfer_events(from_club_id, transfer_date);

-- ===========================================================================
-- Signals (bitemporal, append-only)
-- ===========================================================================

CREATE TABLE IF NOT EXISTS signal_events (
    id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    player_id TEXT REFERENCES players(id),
    club_id TEXT REFERENCES clubs(id),
    signal_type TEXT NOT NULL,
    value_num REAL,
    value_text TEXT,
    value_json TEXT,
    source TEXT NOT NULL,
    source_id TEXT,
    confidence REAL NOT NULL DEFAULT 1.0 CHECK (confidence >= 0 AND confidence <= 1),
    observed_at TEXT NOT NULL,
    effective_from TEXT NOT NULL,
    effective_to TEXT,
    created_at TEXT NOT NULL,
    CHECK (
        (entity_type = 'player' AND player_id IS NOT NULL AND club_id IS NULL) OR
        (entity_type = 'club' AND club_id IS NOT NULL AND player_id IS NULL) OR
        (entity_type = 'pair' AND player_id IS NOT NULL AND club_id IS NOT NULL)
    ),
    CHECK (effective_to IS NULL OR effective_to > effective_from),
    CHECK (
        (value_num IS NOT NULL AND value_text IS NULL AND value_json IS NULL) OR
        (value_num IS NULL AND value_text IS NOT NULL AND value_json IS NULL) OR
        (value_num IS NULL AND value_text IS NULL AND value_json IS NOT NULL)
    )
) WITHOUT ROWID;

-- Time-travel composites: the as-of scan is (entity, type) then range filters.
CREATE INDEX IF NOT EXISTS ix_signal_events_player_asof
    ON signal_events(player_id, signal_type, effective_from, effective_to);
CREATE INDEX IF NOT EXISTS ix_signal_events_club_asof
    ON signal_events(club_id, signal_type, effective_from, effective_to);
CREATE INDEX IF NOT EXISTS ix_signal_events_pair_asof
    ON signal_events(player_id, club_id, signal_type, effective_from);
CREATE INDEX IF NOT EXISTS ix_signal_events_observed ON signal_events(observed_at);

-- ===========================================================================
-- Market
-- ===========================================================================

CREATE TABLE IF NOT EXISTS prediction_snapshots (
    id TEXT PRIMARY KEY,
    snapshot_id TEXT NOT NULL UNIQUE,
    model_version TEXT NOT NULL,
    model_name TEXT NOT NULL,
    player_id TEXT NOT NULL REFERENCES players(id),
    from_club_id TEXT REFERENCES clubs(id),
    to_club_id TEXT REFERENCES clubs(id),
    horizon_days INTEGER NOT NULL CHECK (horizon_days > 0),
    probability REAL NOT NULL CHECK (probability >= 0 AND probability <= 1),
    drivers_json TEXT NOT NULL,
    features_json TEXT,
    as_of TEXT NOT NULL,
    window_start TEXT NOT NULL,
    window_end TEXT NOT NULL,
    created_at TEXT NOT NULL,
    CHECK (window_end > window_start)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS ix_prediction_snapshots_latest
    ON prediction_snapshots(player_id, to_club_id, horizon_days, as_of);
CREATE INDEX IF NOT EXISTS ix_prediction_snapshots_as_of ON prediction_snapshots(as_of);

CREATE TABLE IF NOT EXISTS candidate_sets (
    id TEXT PRIMARY KEY,
    player_id TEXT NOT NULL REFERENCES players(id),
    as_of TEXT NOT NULL,
    horizon_days INTEGER NOT NULL,
    from_club_id TEXT NOT NULL REFERENCES clubs(id),
    total_candidates INTEGER NOT NULL,
    league_count INTEGER NOT NULL DEFAULT 0,
    social_count INTEGER NOT NULL DEFAULT 0,
    user_attention_count INTEGER NOT NULL DEFAULT 0,
    constraint_fit_count INTEGER NOT NULL DEFAULT 0,
    random_count INTEGER NOT NULL DEFAULT 0,
    candidates_json TEXT NOT NULL,
    player_context_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (player_id, as_of, horizon_days)
) WITHOUT ROWID;

-- ===========================================================================
-- UX
-- ===========================================================================

CREATE TABLE IF NOT EXISTS user_events (
    id TEXT PRIMARY KEY,
    user_anon_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    player_id TEXT REFERENCES players(id),
    club_id TEXT REFERENCES clubs(id),
    occurred_at TEXT NOT NULL,
    device_type TEXT,
    country_code TEXT,
    props_json TEXT
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS ix_user_events_player_type_time
    ON user_events(player_id, event_type, occurred_at);
CREATE INDEX IF NOT EXISTS ix_user_events_club_type_time
    ON user_events(club_id, event_type, occurred_at);
CREATE INDEX IF NOT EXISTS ix_user_events_session ON user_events(session_id);

-- ===========================================================================
-- ML bookkeeping
-- ===========================================================================

CREATE TABLE IF NOT EXISTS model_versions (
    id TEXT PRIMARY KEY,
    model_name TEXT NOT NULL,
    model_version TEXT NOT NULL,
    horizon_days INTEGER NOT NULL,
    training_as_of TEXT NOT NULL,
    training_samples INTEGER NOT NULL DEFAULT 0,
    positive_samples INTEGER NOT NULL DEFAULT 0,
    feature_names_json TEXT NOT NULL DEFAULT '[]',
    metrics_json TEXT NOT NULL DEFAULT '{}',
    feature_importances_json TEXT NOT NULL DEFAULT '{}',
    artifact_path TEXT,
    status TEXT NOT NULL,
    message TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (model_name, model_version)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS model_evaluations (
    id TEXT PRIMARY KEY,
    model_version_id TEXT NOT NULL REFERENCES model_versions(id),
    eval_type TEXT NOT NULL,
    eval_name TEXT NOT NULL,
    window_start TEXT NOT NULL,
    window_end TEXT NOT NULL,
    n_samples INTEGER NOT NULL,
    n_positive INTEGER NOT NULL,
    auc_roc REAL,
    auc_pr REAL,
    log_loss REAL,
    brier REAL,
    accuracy REAL,
    precision REAL,
    recall REAL,
    f1 REAL,
    calibration_slope REAL,
    calibration_intercept REAL,
    calibration_bins_json TEXT NOT NULL DEFAULT '[]',
    confusion_json TEXT NOT NULL DEFAULT '{}',
    thresholds_json TEXT NOT NULL DEFAULT '[]',
    backtest_json TEXT NOT NULL DEFAULT '[]',
    duration_ms INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS ix_model_evaluations_version ON model_evaluations(model_version_id);

CREATE TABLE IF NOT EXISTS feature_snapshots (
    id TEXT PRIMARY KEY,
    player_id TEXT NOT NULL REFERENCES players(id),
    candidate_club_id TEXT NOT NULL REFERENCES clubs(id),
    as_of TEXT NOT NULL,
    features_json TEXT NOT NULL,
    feature_version TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (player_id, candidate_club_id, as_of)
) WITHOUT ROWID;

-- ===========================================================================
-- Derived projection (rebuilt on demand, never a source of truth)
-- ===========================================================================

CREATE TABLE IF NOT EXISTS player_market_view (
    snapshot_id TEXT NOT NULL,
    player_id TEXT NOT NULL,
    player_name TEXT NOT NULL,
    player_position TEXT,
    from_club_id TEXT,
    from_club_name TEXT,
    to_club_id TEXT,
    to_club_name TEXT,
    competition_id TEXT,
    horizon_days INTEGER NOT NULL,
    probability REAL NOT NULL,
    drivers_json TEXT NOT NULL,
    model_version TEXT NOT NULL,
    model_name TEXT NOT NULL,
    as_of TEXT NOT NULL,
    window_start TEXT NOT NULL,
    window_end TEXT NOT NULL,
    market_value REAL,
    contract_months_remaining REAL,
    refreshed_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_player_market_view_key
    ON player_market_view(player_id, to_club_id, horizon_days);
CREATE INDEX IF NOT EXISTS ix_player_market_view_prob
    ON player_market_view(probability DESC);
"#;

/// Handle to the relational store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("failed to open database at {path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!(path, "store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize database schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Row counts per table, for `db:check` and the health endpoint.
    pub fn table_counts(&self) -> crate::error::Result<Vec<(String, i64)>> {
        const TABLES: &[&str] = &[
            "competitions",
            "clubs",
            "players",
            "transfer_events",
            "signal_events",
            "prediction_snapshots",
            "candidate_sets",
            "user_events",
            "model_versions",
            "model_evaluations",
            "feature_snapshots",
            "player_market_view",
        ];

        let conn = self.lock();
        let mut out = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?;
            out.push((table.to_string(), count));
        }
        Ok(out)
    }

    /// Cheap liveness probe.
    pub fn ping(&self) -> crate::error::Result<()> {
        let conn = self.lock();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

// ============================================================================
// Column codecs: timestamps are RFC 3339 UTC with fixed microsecond precision
// so lexicographic order equals chronological order; dates are YYYY-MM-DD.
// ============================================================================

pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_date(s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn fmt_uuid(id: Uuid) -> String {
    id.to_string()
}

pub(crate) fn parse_uuid(s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_json(s: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_codec_round_trip() {
        let ts = DateTime::parse_from_rfc3339("2025-01-15T12:00:00.000123Z")
            .unwrap()
            .with_timezone(&Utc);
        let s = fmt_ts(ts);
        assert_eq!(s, "2025-01-15T12:00:00.000123Z");
        assert_eq!(parse_ts(&s).unwrap(), ts);
    }

    #[test]
    fn test_timestamp_text_order_is_chronological() {
        let a = fmt_ts(
            DateTime::parse_from_rfc3339("2025-01-15T12:00:00.000000Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        let b = fmt_ts(
            DateTime::parse_from_rfc3339("2025-01-15T12:00:00.000001Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        assert!(a < b);
    }

    #[test]
    fn test_open_in_memory_applies_schema() {
        let store = Store::open_in_memory().unwrap();
        let counts = store.table_counts().unwrap();
        assert!(counts.iter().any(|(t, _)| t == "signal_events"));
        assert!(counts.iter().all(|(_, c)| *c == 0));
    }
}
