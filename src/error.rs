use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the actor runtime.
#[derive(Error, Debug)]
pub enum ActorError {
    /// Requested mailbox capacity is negative.
    #[error("channel buffer size {0} is invalid")]
    ChannelBuffer(i64),

    /// The actor was cancelled or its mailbox closed before the send landed.
    #[error("channel in closed state")]
    ChannelClosed,

    /// The name is already taken by a live actor, or a deregistration was
    /// attempted for a name the registry does not know.
    #[error("register actor failed: {0}")]
    RegisterActor(String),

    /// Lookup miss by name or uuid.
    #[error("actor not registered")]
    RetrieveActor,

    /// Failure in the durable backup store.
    #[error(transparent)]
    Backup(#[from] BackupError),
}

/// Errors from the durable backup store.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Opening the store or creating its schema failed.
    #[error("backup store open failed: {0}")]
    Init(#[source] sqlx::Error),

    /// The configured store path exists but is not a directory.
    #[error("backup path {0} is an existing file")]
    NotADirectory(PathBuf),

    /// Filesystem error while preparing the store layout.
    #[error("backup store io error: {0}")]
    Io(#[from] std::io::Error),

    /// A query against the store failed.
    #[error("backup query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// Encoding a message payload for storage failed.
    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
