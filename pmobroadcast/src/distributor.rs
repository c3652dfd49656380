//! Distributor: fan-out of chunks to every subscribed endpoint
//!
//! Each subscriber owns a bounded queue. Delivery is a non-blocking
//! try-enqueue per endpoint: when a queue is full the chunk is dropped for
//! that endpoint only, so a stalled listener never slows the pacer or the
//! other listeners.
//!
//! The subscriber set sits behind a `std::sync::RwLock`. `deliver` takes the
//! read lock, `subscribe`/`unsubscribe` take the write lock, and no lock is
//! ever held across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::chunk::Chunk;

pub type SubscriberId = u64;

/// Outcome of a single try-enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// Queue full: the chunk is skipped for this endpoint
    Dropped,
    /// Endpoint gone or unsubscribed
    Closed,
}

/// Producer half of a subscriber queue
#[derive(Debug)]
pub struct ChunkQueue {
    tx: mpsc::Sender<Chunk>,
    closed: CancellationToken,
}

impl ChunkQueue {
    fn new(capacity: usize) -> (Self, mpsc::Receiver<Chunk>, CancellationToken) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        (
            Self {
                tx,
                closed: closed.clone(),
            },
            rx,
            closed,
        )
    }

    /// Never waits: a full queue yields `Dropped`
    pub fn try_enqueue(&self, chunk: Chunk) -> Delivery {
        if self.closed.is_cancelled() {
            return Delivery::Closed;
        }
        match self.tx.try_send(chunk) {
            Ok(()) => Delivery::Accepted,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Consumer half, owned by a listener session
#[derive(Debug)]
pub struct Endpoint {
    id: SubscriberId,
    rx: mpsc::Receiver<Chunk>,
    closed: CancellationToken,
}

impl Endpoint {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next chunk, or `None` once the endpoint is unsubscribed
    ///
    /// Chunks still buffered at unsubscribe time are discarded.
    pub async fn recv(&mut self) -> Option<Chunk> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            chunk = self.rx.recv() => chunk,
        }
    }

    pub fn try_recv(&mut self) -> Option<Chunk> {
        if self.closed.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Per-call delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub accepted: usize,
    pub dropped: usize,
    pub closed: usize,
}

/// Cumulative counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DistributorStats {
    pub subscribers: usize,
    pub queue_capacity: usize,
    pub chunks: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub subscribes: u64,
    pub unsubscribes: u64,
}

#[derive(Debug)]
struct Inner {
    subscribers: RwLock<HashMap<SubscriberId, ChunkQueue>>,
    capacity: usize,
    next_id: AtomicU64,
    chunks: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    subscribes: AtomicU64,
    unsubscribes: AtomicU64,
}

/// Cloneable handle on the shared subscriber set
#[derive(Debug, Clone)]
pub struct Distributor {
    inner: Arc<Inner>,
}

impl Distributor {
    /// `capacity` is the number of chunks each endpoint may buffer
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
                chunks: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                subscribes: AtomicU64::new(0),
                unsubscribes: AtomicU64::new(0),
            }),
        }
    }

    fn read_set(&self) -> RwLockReadGuard<'_, HashMap<SubscriberId, ChunkQueue>> {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_set(&self) -> RwLockWriteGuard<'_, HashMap<SubscriberId, ChunkQueue>> {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Adds a new endpoint; it receives only chunks delivered from now on
    pub fn subscribe(&self) -> Endpoint {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, rx, closed) = ChunkQueue::new(self.inner.capacity);
        self.write_set().insert(id, queue);
        self.inner.subscribes.fetch_add(1, Ordering::Relaxed);
        debug!(subscriber = id, "Subscriber added");
        Endpoint { id, rx, closed }
    }

    /// Removes an endpoint and closes its queue
    ///
    /// Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.write_set().remove(&id);
        match removed {
            Some(queue) => {
                queue.close();
                self.inner.unsubscribes.fetch_add(1, Ordering::Relaxed);
                debug!(subscriber = id, "Subscriber removed");
                true
            }
            None => false,
        }
    }

    /// Offers `chunk` to every current subscriber without waiting
    pub fn deliver(&self, chunk: Chunk) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut stale = Vec::new();

        {
            let set = self.read_set();
            for (id, queue) in set.iter() {
                match queue.try_enqueue(chunk.clone()) {
                    Delivery::Accepted => report.accepted += 1,
                    Delivery::Dropped => {
                        trace!(subscriber = id, sequence = chunk.sequence(), "Queue full, chunk dropped");
                        report.dropped += 1;
                    }
                    Delivery::Closed => {
                        report.closed += 1;
                        stale.push(*id);
                    }
                }
            }
        }

        // Endpoints dropped without unsubscribing
        for id in stale {
            self.unsubscribe(id);
        }

        self.inner.chunks.fetch_add(1, Ordering::Relaxed);
        self.inner
            .delivered
            .fetch_add(report.accepted as u64, Ordering::Relaxed);
        self.inner
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.read_set().len()
    }

    /// Unsubscribes everybody (shutdown)
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.write_set().drain().collect();
        for (_, queue) in &drained {
            queue.close();
        }
        self.inner
            .unsubscribes
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained.len()
    }

    pub fn stats(&self) -> DistributorStats {
        DistributorStats {
            subscribers: self.subscriber_count(),
            queue_capacity: self.inner.capacity,
            chunks: self.inner.chunks.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            subscribes: self.inner.subscribes.load(Ordering::Relaxed),
            unsubscribes: self.inner.unsubscribes.load(Ordering::Relaxed),
        }
    }
}
