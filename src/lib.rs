//! In-process actor runtime with named registration, idle tracking, and
//! per-actor durable backup.
//!
//! An actor is a named unit of computation with a bounded mailbox and a
//! single handler task. Actors register under a process-wide (or
//! test-local) [`ActorSystem`], are addressable by name or uuid, report how
//! long they have been idle, and can persist every backed-up message plus
//! their lifecycle timestamps to a per-actor SQLite log with bounded-size
//! rotation.
//!
//! ```no_run
//! use troupe::{Actor, CancellationToken};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), troupe::ActorError> {
//!     let ctx = CancellationToken::new();
//!
//!     let lead = troupe::spawn(
//!         &ctx,
//!         "lead",
//!         3,
//!         |actor: Actor<String>| async move {
//!             while let Some(line) = actor.recv().await {
//!                 println!("{line}");
//!             }
//!         },
//!         -1,
//!     )
//!     .await?;
//!
//!     lead.send("i am the lead role!".to_string()).await?;
//!
//!     troupe::cleanup();
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod actors;
pub mod backup;
pub mod error;
mod idle;
pub mod logging;
mod mailbox;
pub mod system;

pub use actor::{Actor, ActorState};
pub use backup::{BackupMode, BackupStore};
pub use error::{ActorError, BackupError};
pub use logging::set_level;
pub use system::{cleanup, get, get_by_name, get_by_uuid, spawn, system, ActorSystem};

// Re-exported so callers can build parent contexts without naming tokio-util.
pub use tokio_util::sync::CancellationToken;

/// Structured-log field identifying this runtime.
pub(crate) const SERVICE: &str = "troupe";
