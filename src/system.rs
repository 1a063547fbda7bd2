//! Actor registry and lifecycle orchestration.
//!
//! An [`ActorSystem`] owns the two registry maps (name to uuid, uuid to
//! handle) behind a single readers-writer lock and drives the spawn path:
//! validate, build, register, run. A process-wide default system backs the
//! crate-level convenience functions; tests build isolated instances.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicU8};
use std::sync::{Arc, LazyLock, OnceLock, RwLock};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actor::{Actor, ActorShared, ActorState};
use crate::backup::sqlite::SqliteStore;
use crate::backup::{BackupMode, BackupStore};
use crate::error::ActorError;
use crate::idle;
use crate::mailbox::Mailbox;

/// Entry in the registry's authoritative uuid map.
struct RegistryEntry {
    name: String,
    token: CancellationToken,
    /// Type-erased `Actor<M>` clone; typed lookup downcasts it back.
    handle: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct Registry {
    by_name: HashMap<String, Uuid>,
    by_uuid: HashMap<Uuid, RegistryEntry>,
}

/// Registry and spawner for a set of actors.
///
/// Cheap to clone; all clones share the same registry. Name uniqueness is
/// enforced per system.
#[derive(Clone, Default)]
pub struct ActorSystem {
    registry: Arc<RwLock<Registry>>,
}

impl ActorSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct, register, and run a new actor.
    ///
    /// `buffer` is the mailbox capacity (0 means rendezvous; negative is
    /// rejected with [`ActorError::ChannelBuffer`]). `backup` selects
    /// persistence: negative disables it, zero persists without rotation,
    /// positive persists and rotates keeping that many rows in the primary
    /// log.
    ///
    /// The handler runs on its own task and owns the receiving side of the
    /// mailbox; when it returns (or panics, or observes cancellation) the
    /// actor deregisters, stamps its end time, and closes its store. On any
    /// error nothing stays registered or running.
    pub async fn spawn<M, F, Fut>(
        &self,
        parent: &CancellationToken,
        name: &str,
        buffer: i64,
        handler: F,
        backup: i64,
    ) -> Result<Actor<M>, ActorError>
    where
        M: Send + 'static,
        F: FnOnce(Actor<M>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if buffer < 0 {
            return Err(ActorError::ChannelBuffer(buffer));
        }

        let uuid = Uuid::new_v4();
        let token = parent.child_token();

        let store = match BackupMode::from(backup) {
            BackupMode::Disabled => None,
            mode => {
                let store: Arc<dyn BackupStore> =
                    SqliteStore::open(name, uuid, mode, &token).await?;
                Some(store)
            }
        };

        self.spawn_inner(token, name, uuid, buffer as usize, handler, store)
            .await
    }

    /// Same as [`ActorSystem::spawn`] with a caller-supplied backup store.
    ///
    /// The rotation behavior, if any, is the store's own business; the
    /// runtime only drives the `start`/`insert`/`stop`/`close` lifecycle.
    pub async fn spawn_with_store<M, F, Fut>(
        &self,
        parent: &CancellationToken,
        name: &str,
        buffer: i64,
        handler: F,
        store: Arc<dyn BackupStore>,
    ) -> Result<Actor<M>, ActorError>
    where
        M: Send + 'static,
        F: FnOnce(Actor<M>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if buffer < 0 {
            return Err(ActorError::ChannelBuffer(buffer));
        }

        let uuid = Uuid::new_v4();
        let token = parent.child_token();

        self.spawn_inner(token, name, uuid, buffer as usize, handler, Some(store))
            .await
    }

    async fn spawn_inner<M, F, Fut>(
        &self,
        token: CancellationToken,
        name: &str,
        uuid: Uuid,
        capacity: usize,
        handler: F,
        store: Option<Arc<dyn BackupStore>>,
    ) -> Result<Actor<M>, ActorError>
    where
        M: Send + 'static,
        F: FnOnce(Actor<M>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let actor = Actor {
            shared: Arc::new(ActorShared {
                name: name.to_string(),
                uuid,
                token,
                mailbox: Mailbox::new(capacity),
                idle: AtomicU64::new(0),
                idle_reset: Notify::new(),
                state: AtomicU8::new(ActorState::Spawning as u8),
                start_time: OnceLock::new(),
                end_time: OnceLock::new(),
                store,
            }),
        };

        if let Err(err) = self.register(&actor) {
            // Unwind everything built so far; no orphan state may remain.
            actor.shared.token.cancel();
            actor.shared.mailbox.close();
            if let Some(store) = &actor.shared.store {
                store.close().await;
            }
            return Err(err);
        }

        let system = self.clone();
        let handle = actor.clone();
        tokio::spawn(run_actor(system, handle, handler));

        Ok(actor)
    }

    /// Look up a live actor by name.
    pub fn get<M: Send + 'static>(&self, name: &str) -> Result<Actor<M>, ActorError> {
        let registry = self.registry.read().unwrap();

        let found = registry
            .by_name
            .get(name)
            .and_then(|uuid| registry.by_uuid.get(uuid))
            .and_then(|entry| entry.handle.downcast_ref::<Actor<M>>());

        match found {
            Some(handle) => {
                debug!(service = crate::SERVICE, actor = name, "actor retrieved");
                Ok(handle.clone())
            }
            None => {
                warn!(
                    service = crate::SERVICE,
                    actor = name,
                    "get actor by name failed"
                );
                Err(ActorError::RetrieveActor)
            }
        }
    }

    /// Look up a live actor by identity.
    pub fn get_by_uuid<M: Send + 'static>(&self, uuid: Uuid) -> Result<Actor<M>, ActorError> {
        let registry = self.registry.read().unwrap();

        let found = registry
            .by_uuid
            .get(&uuid)
            .and_then(|entry| entry.handle.downcast_ref::<Actor<M>>());

        match found {
            Some(handle) => {
                debug!(service = crate::SERVICE, uuid = %uuid, "actor retrieved");
                Ok(handle.clone())
            }
            None => {
                warn!(
                    service = crate::SERVICE,
                    uuid = %uuid,
                    "get actor by uuid failed"
                );
                Err(ActorError::RetrieveActor)
            }
        }
    }

    /// Number of live actors.
    pub fn len(&self) -> usize {
        self.registry.read().unwrap().by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every registered actor and flush the log facade.
    ///
    /// Cancellation only fires each actor's token; the registry entries are
    /// removed later by each actor's own teardown, so holding the read lock
    /// for the whole pass is safe. Callers are expected to allow a grace
    /// period before process exit; this does not wait for handler drain.
    pub fn cleanup(&self) {
        {
            let registry = self.registry.read().unwrap();

            info!(service = crate::SERVICE, "actor service cleanup");

            for entry in registry.by_uuid.values() {
                entry.token.cancel();
                info!(
                    service = crate::SERVICE,
                    actor = %entry.name,
                    "actor closed due to cleanup"
                );
            }
        }

        crate::logging::flush();
    }

    fn register<M: Send + 'static>(&self, actor: &Actor<M>) -> Result<(), ActorError> {
        let mut registry = self.registry.write().unwrap();

        if registry.by_name.contains_key(actor.name()) {
            error!(
                service = crate::SERVICE,
                actor = %actor.name(),
                uuid = %actor.uuid(),
                "register actor failed: name taken"
            );
            return Err(ActorError::RegisterActor(actor.name().to_string()));
        }

        registry
            .by_name
            .insert(actor.name().to_string(), actor.uuid());
        registry.by_uuid.insert(
            actor.uuid(),
            RegistryEntry {
                name: actor.name().to_string(),
                token: actor.shared.token.clone(),
                handle: Box::new(actor.clone()),
            },
        );

        info!(
            service = crate::SERVICE,
            actor = %actor.name(),
            uuid = %actor.uuid(),
            "actor registered"
        );

        Ok(())
    }

    fn deregister(&self, name: &str, uuid: Uuid) -> Result<(), ActorError> {
        let mut registry = self.registry.write().unwrap();

        if !registry.by_name.contains_key(name) {
            error!(
                service = crate::SERVICE,
                actor = name,
                uuid = %uuid,
                "deregister actor failed: name unknown"
            );
            return Err(ActorError::RegisterActor(name.to_string()));
        }

        registry.by_uuid.remove(&uuid);
        registry.by_name.remove(name);

        info!(
            service = crate::SERVICE,
            actor = name,
            uuid = %uuid,
            "actor deregistered"
        );

        Ok(())
    }
}

/// Host one actor: stamp its start, run the handler to completion, then
/// tear down exactly once.
async fn run_actor<M, F, Fut>(system: ActorSystem, actor: Actor<M>, handler: F)
where
    M: Send + 'static,
    F: FnOnce(Actor<M>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let shared = actor.shared.clone();

    let started = Utc::now();
    let _ = shared.start_time.set(started);
    debug!(
        service = crate::SERVICE,
        actor = %shared.name,
        uuid = %shared.uuid,
        time = %started.to_rfc3339(),
        "actor start time"
    );
    if let Some(store) = &shared.store {
        if let Err(err) = store.start(started).await {
            error!(
                service = crate::SERVICE,
                actor = %shared.name,
                uuid = %shared.uuid,
                error = %err,
                "backup start stamp failed"
            );
        }
    }

    let idle_tracker = tokio::spawn(idle::run(shared.clone(), idle::IDLE_TICK));

    shared.set_state(ActorState::Running);

    if let Err(panic) = AssertUnwindSafe(handler(actor.clone())).catch_unwind().await {
        error!(
            service = crate::SERVICE,
            actor = %shared.name,
            uuid = %shared.uuid,
            reason = panic_message(panic.as_ref()),
            "actor handler panic"
        );
    }

    shared.set_state(ActorState::Draining);

    // Deregister before the task finishes so observers never retrieve an
    // actor whose handler has already returned.
    let _ = system.deregister(&shared.name, shared.uuid);

    shared.token.cancel();
    shared.mailbox.close();

    let ended = Utc::now();
    let _ = shared.end_time.set(ended);
    debug!(
        service = crate::SERVICE,
        actor = %shared.name,
        uuid = %shared.uuid,
        time = %ended.to_rfc3339(),
        "actor end time"
    );

    if let Some(store) = &shared.store {
        if let Err(err) = store.stop(ended).await {
            error!(
                service = crate::SERVICE,
                actor = %shared.name,
                uuid = %shared.uuid,
                error = %err,
                "backup end stamp failed"
            );
        }
        store.close().await;
    }

    let _ = idle_tracker.await;

    shared.set_state(ActorState::Terminated);
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

static DEFAULT_SYSTEM: LazyLock<ActorSystem> = LazyLock::new(ActorSystem::new);

/// The process-wide default system backing the crate-level functions.
pub fn system() -> &'static ActorSystem {
    &DEFAULT_SYSTEM
}

/// Construct, register, and run an actor on the default system.
/// See [`ActorSystem::spawn`].
pub async fn spawn<M, F, Fut>(
    parent: &CancellationToken,
    name: &str,
    buffer: i64,
    handler: F,
    backup: i64,
) -> Result<Actor<M>, ActorError>
where
    M: Send + 'static,
    F: FnOnce(Actor<M>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    DEFAULT_SYSTEM.spawn(parent, name, buffer, handler, backup).await
}

/// Look up an actor by name on the default system.
pub fn get<M: Send + 'static>(name: &str) -> Result<Actor<M>, ActorError> {
    DEFAULT_SYSTEM.get(name)
}

/// Alias of [`get`].
pub fn get_by_name<M: Send + 'static>(name: &str) -> Result<Actor<M>, ActorError> {
    DEFAULT_SYSTEM.get(name)
}

/// Look up an actor by identity on the default system.
pub fn get_by_uuid<M: Send + 'static>(uuid: Uuid) -> Result<Actor<M>, ActorError> {
    DEFAULT_SYSTEM.get_by_uuid(uuid)
}

/// Cancel every actor registered on the default system and flush logs.
pub fn cleanup() {
    DEFAULT_SYSTEM.cleanup();
}
