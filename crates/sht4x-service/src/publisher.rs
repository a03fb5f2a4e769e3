//! The seam between the reporting pipeline and the broker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

/// Sink for formatted readings.
///
/// Publishing never fails from the caller's point of view: implementations
/// log and drop messages they cannot deliver.
#[async_trait]
pub trait Publisher: Send {
    /// Publish `payload` on `topic`.
    fn publish(&self, topic: &str, payload: &str);

    /// Release the connection. Must be safe to call more than once.
    async fn disconnect(&mut self);
}

/// A message captured by [`MemoryPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
}

/// Publisher that records messages in memory.
///
/// Clones share the same log, so a test can keep a handle after moving the
/// publisher into a supervisor.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    messages: Arc<Mutex<Vec<Published>>>,
    disconnected: Arc<AtomicBool>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, oldest first.
    pub fn messages(&self) -> Vec<Published> {
        self.lock().clone()
    }

    /// Number of messages published so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether `disconnect` has been called.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Published>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    fn publish(&self, topic: &str, payload: &str) {
        self.lock().push(Published {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    async fn disconnect(&mut self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}
