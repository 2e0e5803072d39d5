//! TransferScope backend library.
//!
//! A transfer-intelligence backend: a bitemporal signal store and append-only
//! transfer ledger underneath a point-in-time-correct ML pipeline (candidate
//! generation, feature building, training, scoring, evaluation), a
//! what-changed detector, and a thin HTTP read surface.

pub mod api;
pub mod config;
pub mod detector;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod ml;
pub mod models;
pub mod store;
pub mod timeguard;

pub use config::Config;
pub use error::CoreError;
pub use store::Store;
