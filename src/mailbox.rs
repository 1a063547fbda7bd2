use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ActorError;

/// Bounded FIFO message queue owned by a single actor.
///
/// Capacity 0 builds a rendezvous channel: a push completes only once the
/// consumer is ready to take the message. The closed flag latches exactly
/// once; after [`Mailbox::close`] every push fails fast with
/// [`ActorError::ChannelClosed`].
pub(crate) struct Mailbox<M> {
    tx: flume::Sender<M>,
    rx: flume::Receiver<M>,
    closed: AtomicBool,
}

impl<M: Send + 'static> Mailbox<M> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self {
            tx,
            rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue a message, waiting for space (or for a ready consumer at
    /// capacity 0).
    pub async fn push(&self, msg: M) -> Result<(), ActorError> {
        if self.is_closed() {
            return Err(ActorError::ChannelClosed);
        }

        self.tx
            .send_async(msg)
            .await
            .map_err(|_| ActorError::ChannelClosed)
    }

    /// Dequeue the next message in FIFO order.
    pub async fn pop(&self) -> Option<M> {
        self.rx.recv_async().await.ok()
    }

    /// Latch the mailbox closed. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
