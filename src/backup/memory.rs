//! In-memory [`BackupStore`] that records every call it receives.
//!
//! Meant for tests and for runs where durable IO is unwanted: rotation
//! bounds and lifecycle ordering can be asserted against the recorded
//! events instead of a database file.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backup::BackupStore;
use crate::error::BackupError;

/// One recorded call against a [`MemoryStore`].
#[derive(Clone, Debug, PartialEq)]
pub enum StoreEvent {
    Start(DateTime<Utc>),
    Insert(String),
    Stop(DateTime<Utc>),
    Close,
}

/// Store that keeps every call in an in-process event list.
#[derive(Default)]
pub struct MemoryStore {
    events: Mutex<Vec<StoreEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, in call order.
    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of recorded inserts.
    pub fn insert_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| matches!(event, StoreEvent::Insert(_)))
            .count()
    }
}

#[async_trait]
impl BackupStore for MemoryStore {
    async fn start(&self, at: DateTime<Utc>) -> Result<(), BackupError> {
        self.events.lock().unwrap().push(StoreEvent::Start(at));
        Ok(())
    }

    async fn insert(&self, payload: &str) -> Result<(), BackupError> {
        self.events
            .lock()
            .unwrap()
            .push(StoreEvent::Insert(payload.to_string()));
        Ok(())
    }

    async fn stop(&self, at: DateTime<Utc>) -> Result<(), BackupError> {
        self.events.lock().unwrap().push(StoreEvent::Stop(at));
        Ok(())
    }

    async fn close(&self) {
        self.events.lock().unwrap().push(StoreEvent::Close);
    }
}
