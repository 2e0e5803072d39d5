//! Error kinds shared across the store, jobs, and HTTP surface.

use thiserror::Error;

/// The failure vocabulary of the core.
///
/// Batch jobs catch per-unit errors, count them, and continue; the HTTP layer
/// maps kinds to status codes (see `api::ApiError`).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Entity-consistency or range constraint violated on write.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Natural-key reuse, e.g. a ledger event_id that already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    /// A read-side guard saw data from after the as-of instant. Should be
    /// unreachable through the store because every as-of query filters.
    #[error("time-travel violation: {0}")]
    TimeTravelViolation(String),

    /// Training-side: a feature date at or after its label's transfer date.
    #[error("data leakage: {0}")]
    DataLeakage(String),

    /// Training sample count below the configured minimum.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// Model artifact missing or unreadable; the scorer falls back to the
    /// heuristic and logs.
    #[error("artifact load failure: {0}")]
    ArtifactLoadFailure(String),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
