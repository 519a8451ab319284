//! Event fan-out to subscribers
//!
//! Each subscriber owns a bounded queue. Publishing only ever calls
//! `try_send`, so a slow or stuck subscriber never holds up the registry
//! mutation that produced the event. A subscriber whose queue is full is
//! evicted on the spot rather than handed a gap: its stream ends, the
//! transport behind it closes, and the client reconnects to a fresh snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::types::{ConnectionEvent, EventMessage};

/// Per-subscriber queue depth
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct Inner {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Arc<EventMessage>>>>,
    next_subscriber_id: AtomicU64,
    sequence_counter: AtomicU64,
    queue_capacity: usize,
}

/// Publish/subscribe hub for connection events
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

/// Receiving end of one subscription; unsubscribes on drop
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<EventMessage>>,
    hub: Weak<Inner>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a broadcaster whose subscriber queues hold `queue_capacity` events
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(1),
                sequence_counter: AtomicU64::new(0),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        self.inner
            .subscribers
            .lock()
            .insert(id, tx);
        debug!(subscriber = id, "subscribed");
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber; unknown ids are ignored
    pub fn unsubscribe(&self, id: u64) {
        self.inner.unsubscribe(id);
    }

    /// Enqueue `event` for every current subscriber
    ///
    /// A subscriber that cannot take the event is evicted, so every
    /// subscriber still attached afterwards has received every event since it
    /// subscribed. Returns the sequence id assigned to the event.
    pub fn publish(&self, event: ConnectionEvent) -> u64 {
        let seq = self.inner.sequence_counter.fetch_add(1, Ordering::SeqCst);
        let kind = event.kind();
        let msg = Arc::new(EventMessage {
            event,
            sequence_id: seq,
            timestamp: chrono::Utc::now().timestamp(),
        });

        let mut subscribers = self.inner.subscribers.lock();
        let mut evicted = Vec::new();
        for (id, tx) in subscribers.iter() {
            match tx.try_send(Arc::clone(&msg)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = id, sequence_id = seq, "subscriber queue full, evicting");
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => evicted.push(*id),
            }
        }
        for id in &evicted {
            subscribers.remove(id);
        }
        debug!(
            event_type = kind,
            sequence_id = seq,
            recipients = subscribers.len(),
            "published event"
        );
        seq
    }

    /// Sequence id the next event will get
    pub fn current_sequence_id(&self) -> u64 {
        self.inner.sequence_counter.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn unsubscribe(&self, id: u64) {
        if self.subscribers.lock().remove(&id).is_some() {
            debug!(subscriber = id, "unsubscribed");
        }
    }
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event; `None` once the subscriber has been evicted
    pub async fn recv(&mut self) -> Option<Arc<EventMessage>> {
        self.rx.recv().await
    }

    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<Arc<EventMessage>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}
