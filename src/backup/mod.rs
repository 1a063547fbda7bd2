//! Durable per-actor backup.
//!
//! The runtime writes through the narrow [`BackupStore`] interface; the
//! SQLite implementation in [`sqlite`] is the production store, while
//! [`memory`] records calls for property-level verification in tests.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::BackupError;

/// Backup selection derived from the caller-facing integer mode:
/// negative disables persistence, zero persists without rotation, positive
/// persists with rotation keeping at most that many rows in the primary log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackupMode {
    /// No store is constructed; persistence calls upstream are no-ops.
    Disabled,
    /// Persist without rotation.
    Persist,
    /// Persist and rotate, keeping at most this many rows in the primary log.
    Rotate(u64),
}

impl From<i64> for BackupMode {
    fn from(mode: i64) -> Self {
        match mode {
            m if m < 0 => BackupMode::Disabled,
            0 => BackupMode::Persist,
            m => BackupMode::Rotate(m as u64),
        }
    }
}

/// Abstract durable log written by one actor.
///
/// Call order per actor lifetime: one `start`, zero or more `insert`s, one
/// `stop`, then `close`.
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Record the actor's start timestamp. Called exactly once, before any
    /// insert.
    async fn start(&self, at: DateTime<Utc>) -> Result<(), BackupError>;

    /// Append one message payload. Safe to call from concurrent producers;
    /// each row lands atomically.
    async fn insert(&self, payload: &str) -> Result<(), BackupError>;

    /// Record the actor's end timestamp.
    async fn stop(&self, at: DateTime<Utc>) -> Result<(), BackupError>;

    /// Release the underlying resources. Idempotent.
    async fn close(&self);
}

/// Wire form of one persisted message: `{"message": "<payload>"}`.
#[derive(Serialize)]
pub(crate) struct LogMessage<'a> {
    pub message: &'a str,
}

/// Decode a JSON payload read back from a backup log.
pub fn json_decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, BackupError> {
    serde_json::from_slice(data).map_err(BackupError::Encode)
}
