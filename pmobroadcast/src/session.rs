//! Listener Session: bridges one network connection to the distributor
//!
//! Lifecycle: `Connecting → Subscribed → Streaming → Terminating → Closed`.
//! Whatever the exit path (queue closed, write failure, cancellation, or the
//! session future being dropped), the cleanup runs exactly once: unsubscribe,
//! close the connection, release the listener slot.

use std::io;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::distributor::{Distributor, Endpoint, SubscriberId};
use crate::registry::{ListenerGuard, ListenerRegistry};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Connecting,
    Subscribed,
    Streaming,
    Terminating,
    Closed,
}

/// Why the streaming loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Unsubscribed elsewhere (e.g. station shutdown)
    QueueClosed,
    /// The peer stopped accepting data
    WriteFailed(io::ErrorKind),
    /// Client disconnect or request cancelled
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub end: SessionEnd,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
}

/// Scoped cleanup, also run from `Drop`
struct SessionCleanup {
    distributor: Distributor,
    registry: ListenerRegistry,
    id: SubscriberId,
    unsubscribed: bool,
    listener: Option<ListenerGuard>,
    state: watch::Sender<SessionState>,
}

impl SessionCleanup {
    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn unsubscribe(&mut self) {
        if !self.unsubscribed {
            self.unsubscribed = true;
            self.set_state(SessionState::Terminating);
            self.distributor.unsubscribe(self.id);
        }
    }

    fn release(&mut self) {
        self.unsubscribe();
        if self.listener.take().is_some() {
            self.set_state(SessionState::Closed);
            info!(
                listener = self.id,
                listeners = self.registry.current(),
                "Listener disconnected"
            );
        }
    }
}

impl Drop for SessionCleanup {
    fn drop(&mut self) {
        self.release();
    }
}

/// One listener's subscription
pub struct ListenerSession {
    endpoint: Endpoint,
    cleanup: SessionCleanup,
}

impl ListenerSession {
    /// Registers the listener, then subscribes it
    pub fn start(distributor: &Distributor, registry: &ListenerRegistry) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);

        let listener = registry.enter();
        let endpoint = distributor.subscribe();
        state.send_replace(SessionState::Subscribed);

        info!(
            listener = endpoint.id(),
            listeners = registry.current(),
            "🎧 Listener connected"
        );

        Self {
            cleanup: SessionCleanup {
                distributor: distributor.clone(),
                registry: registry.clone(),
                id: endpoint.id(),
                unsubscribed: false,
                listener: Some(listener),
                state,
            },
            endpoint,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.endpoint.id()
    }

    pub fn state(&self) -> SessionState {
        *self.cleanup.state.borrow()
    }

    /// Follows state transitions, including after the session is consumed
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.cleanup.state.subscribe()
    }

    /// Streams chunks to `writer` until the queue closes, a write fails, or
    /// `cancel` fires
    pub async fn run<W>(mut self, mut writer: W, cancel: CancellationToken) -> SessionReport
    where
        W: AsyncWrite + Unpin,
    {
        self.cleanup.set_state(SessionState::Streaming);
        let mut chunks_sent = 0u64;
        let mut bytes_sent = 0u64;

        let end = loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                next = self.endpoint.recv() => match next {
                    Some(chunk) => chunk,
                    None => break SessionEnd::QueueClosed,
                },
            };

            let write = async {
                writer.write_all(chunk.data()).await?;
                writer.flush().await
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                res = write => {
                    if let Err(e) = res {
                        debug!(listener = self.id(), "Write failed: {}", e);
                        break SessionEnd::WriteFailed(e.kind());
                    }
                }
            }

            chunks_sent += 1;
            bytes_sent += chunk.len() as u64;
        };

        self.cleanup.unsubscribe();
        if !matches!(end, SessionEnd::WriteFailed(_)) {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await;
        }
        drop(writer);
        self.cleanup.release();

        debug!(
            listener = self.id(),
            ?end,
            chunks_sent,
            bytes_sent,
            "Session finished"
        );

        SessionReport {
            end,
            chunks_sent,
            bytes_sent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use bytes::Bytes;
    use tokio::io::AsyncReadExt;

    fn chunk(seq: u64, fill: u8) -> Chunk {
        Chunk::new(seq, 0, Bytes::from(vec![fill; 8]))
    }

    #[tokio::test]
    async fn test_start_registers_and_subscribes() {
        let distributor = Distributor::new(10);
        let registry = ListenerRegistry::new();

        let session = ListenerSession::start(&distributor, &registry);
        assert_eq!(session.state(), SessionState::Subscribed);
        assert_eq!(registry.current(), 1);
        assert_eq!(distributor.subscriber_count(), 1);

        drop(session);
        assert_eq!(registry.current(), 0);
        assert_eq!(distributor.subscriber_count(), 0);
        assert_eq!(distributor.stats().unsubscribes, 1);
    }

    #[tokio::test]
    async fn test_streams_chunks_in_order() {
        let distributor = Distributor::new(10);
        let registry = ListenerRegistry::new();
        let session = ListenerSession::start(&distributor, &registry);
        let id = session.id();
        let (client, mut peer) = tokio::io::duplex(1024);

        let task = tokio::spawn(session.run(client, CancellationToken::new()));
        for (seq, fill) in [(0, b'a'), (1, b'b'), (2, b'c')] {
            distributor.deliver(chunk(seq, fill));
        }

        let mut received = vec![0u8; 24];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(&received[..8], &[b'a'; 8]);
        assert_eq!(&received[8..16], &[b'b'; 8]);
        assert_eq!(&received[16..], &[b'c'; 8]);

        distributor.unsubscribe(id);
        let report = task.await.unwrap();
        assert_eq!(report.end, SessionEnd::QueueClosed);
        assert_eq!(report.chunks_sent, 3);
        assert_eq!(report.bytes_sent, 24);
        assert_eq!(registry.current(), 0);
        assert_eq!(distributor.stats().unsubscribes, 1);
    }

    #[tokio::test]
    async fn test_writes_each_chunk_once() {
        let distributor = Distributor::new(10);
        let registry = ListenerRegistry::new();
        let session = ListenerSession::start(&distributor, &registry);
        let id = session.id();
        distributor.deliver(chunk(0, b'a'));
        distributor.deliver(chunk(1, b'b'));

        let writer = tokio_test::io::Builder::new()
            .write(&[b'a'; 8])
            .write(&[b'b'; 8])
            .build();
        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            distributor.unsubscribe(id);
        };

        let (report, ()) = tokio::join!(session.run(writer, CancellationToken::new()), stop);
        assert_eq!(report.end, SessionEnd::QueueClosed);
        assert_eq!(report.chunks_sent, 2);
        assert_eq!(registry.current(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_is_prompt_and_cleans_up_once() {
        let distributor = Distributor::new(10);
        let registry = ListenerRegistry::new();
        let session = ListenerSession::start(&distributor, &registry);
        let mut states = session.watch_state();
        let (client, _peer) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(session.run(client, cancel.clone()));
        states
            .wait_for(|s| *s == SessionState::Streaming)
            .await
            .unwrap();

        cancel.cancel();
        let report = tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .expect("session did not stop promptly")
            .unwrap();

        assert_eq!(report.end, SessionEnd::Cancelled);
        assert_eq!(*states.borrow(), SessionState::Closed);
        assert_eq!(registry.current(), 0);
        assert_eq!(distributor.subscriber_count(), 0);
        assert_eq!(distributor.stats().unsubscribes, 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_blocked_write() {
        let distributor = Distributor::new(10);
        let registry = ListenerRegistry::new();
        let session = ListenerSession::start(&distributor, &registry);
        // Le pair ne lit jamais : l'écriture reste bloquée
        let (client, _peer) = tokio::io::duplex(4);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(session.run(client, cancel.clone()));
        distributor.deliver(chunk(0, b'x'));
        tokio::time::sleep(Duration::from_millis(20)).await;

        cancel.cancel();
        let report = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("blocked write was not interrupted")
            .unwrap();
        assert_eq!(report.end, SessionEnd::Cancelled);
        assert_eq!(registry.current(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_ends_session() {
        let distributor = Distributor::new(10);
        let registry = ListenerRegistry::new();
        let session = ListenerSession::start(&distributor, &registry);
        let (client, peer) = tokio::io::duplex(1024);
        drop(peer);

        let task = tokio::spawn(session.run(client, CancellationToken::new()));
        distributor.deliver(chunk(0, b'x'));

        let report = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(report.end, SessionEnd::WriteFailed(_)));
        assert_eq!(registry.current(), 0);
        assert_eq!(distributor.stats().unsubscribes, 1);
    }

    #[tokio::test]
    async fn test_aborted_session_still_cleans_up() {
        let distributor = Distributor::new(10);
        let registry = ListenerRegistry::new();
        let session = ListenerSession::start(&distributor, &registry);
        let mut states = session.watch_state();
        let (client, _peer) = tokio::io::duplex(1024);

        let task = tokio::spawn(session.run(client, CancellationToken::new()));
        states
            .wait_for(|s| *s == SessionState::Streaming)
            .await
            .unwrap();
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(*states.borrow(), SessionState::Closed);
        assert_eq!(registry.current(), 0);
        assert_eq!(distributor.stats().unsubscribes, 1);
    }
}
