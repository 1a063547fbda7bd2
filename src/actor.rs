//! Actor handle and per-actor shared state.
//!
//! An [`Actor`] is a cheap-to-clone handle; every clone addresses the same
//! mailbox, cancellation token, and lifecycle. The handler task receives one
//! of these handles and drives [`Actor::recv`]; producers obtain clones from
//! the registry and call [`Actor::send`].

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backup::BackupStore;
use crate::error::ActorError;
use crate::mailbox::Mailbox;

/// Lifecycle state of an actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ActorState {
    /// Constructed and registered; the handler task has not started yet.
    Spawning = 0,
    /// The handler is running.
    Running = 1,
    /// The handler has returned; teardown is in progress.
    Draining = 2,
    /// Teardown finished; the registry no longer knows this actor.
    Terminated = 3,
}

impl ActorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ActorState::Spawning,
            1 => ActorState::Running,
            2 => ActorState::Draining,
            _ => ActorState::Terminated,
        }
    }
}

/// State shared between the handle clones and the runtime tasks.
pub(crate) struct ActorShared<M> {
    pub(crate) name: String,
    pub(crate) uuid: Uuid,
    pub(crate) token: CancellationToken,
    pub(crate) mailbox: Mailbox<M>,
    /// Nanoseconds since the last successful send.
    pub(crate) idle: AtomicU64,
    /// Nudged on every successful send so the idle tracker restarts its tick.
    pub(crate) idle_reset: Notify,
    pub(crate) state: AtomicU8,
    pub(crate) start_time: OnceLock<DateTime<Utc>>,
    pub(crate) end_time: OnceLock<DateTime<Utc>>,
    pub(crate) store: Option<Arc<dyn BackupStore>>,
}

impl<M> ActorShared<M> {
    pub(crate) fn set_state(&self, state: ActorState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Handle to a live actor.
pub struct Actor<M> {
    pub(crate) shared: Arc<ActorShared<M>>,
}

impl<M> Clone for Actor<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<M> std::fmt::Debug for Actor<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.shared.name)
            .field("uuid", &self.shared.uuid)
            .field("state", &ActorState::from_u8(self.shared.state.load(Ordering::Acquire)))
            .finish()
    }
}

impl<M: Send + 'static> Actor<M> {
    /// Caller-chosen name, unique among live actors.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// System-generated identity, never reused.
    pub fn uuid(&self) -> Uuid {
        self.shared.uuid
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ActorState {
        ActorState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Time since the last successful send, in idle-tick granularity.
    pub fn idle(&self) -> Duration {
        Duration::from_nanos(self.shared.idle.load(Ordering::Relaxed))
    }

    /// Timestamp taken just before the handler ran.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.shared.start_time.get().copied()
    }

    /// Timestamp taken after the handler returned.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.shared.end_time.get().copied()
    }

    /// Resolves once the actor has been cancelled.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.shared.token.cancelled()
    }

    /// Deliver a message into the actor's mailbox.
    ///
    /// Fails fast with [`ActorError::ChannelClosed`] once the actor has been
    /// cancelled or its mailbox closed; otherwise waits for mailbox space (or
    /// a ready consumer at capacity 0) while racing the cancellation token.
    /// A successful send resets the idle counter.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        if self.shared.token.is_cancelled() {
            return Err(ActorError::ChannelClosed);
        }

        let pushed = tokio::select! {
            _ = self.shared.token.cancelled() => Err(ActorError::ChannelClosed),
            res = self.shared.mailbox.push(msg) => res,
        };
        pushed?;

        self.reset_idle();

        debug!(
            service = crate::SERVICE,
            actor = %self.shared.name,
            uuid = %self.shared.uuid,
            "send"
        );

        Ok(())
    }

    /// Next message from the mailbox, or `None` once the actor is cancelled.
    ///
    /// Cancellation races in-flight deliveries: queued messages may or may
    /// not drain before `None` is observed.
    pub async fn recv(&self) -> Option<M> {
        tokio::select! {
            _ = self.shared.token.cancelled() => None,
            msg = self.shared.mailbox.pop() => msg,
        }
    }

    /// Persist a message to the backup store, then deliver it in-memory.
    ///
    /// Store failures are logged and reported, but delivery is still
    /// attempted: the in-memory contract stays primary. Without a store
    /// (backup disabled) this is exactly [`Actor::send`].
    pub async fn backup(&self, msg: M) -> Result<(), ActorError>
    where
        M: AsRef<str>,
    {
        let persisted = match &self.shared.store {
            Some(store) => store
                .insert(msg.as_ref())
                .await
                .map_err(ActorError::from),
            None => Ok(()),
        };

        if let Err(err) = &persisted {
            warn!(
                service = crate::SERVICE,
                actor = %self.shared.name,
                uuid = %self.shared.uuid,
                error = %err,
                "backup insert failed"
            );
        }

        self.send(msg).await?;

        persisted
    }

    fn reset_idle(&self) {
        self.shared.idle.store(0, Ordering::Relaxed);
        self.shared.idle_reset.notify_one();
    }
}
