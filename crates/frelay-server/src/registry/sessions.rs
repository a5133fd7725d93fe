//! The set of live sessions.
//!
//! A single lock guards membership and id allocation. It is never held
//! across a socket write: broadcast and unicast take a snapshot or a single
//! `Arc<Session>` and release the lock before any I/O.

use super::ids::{IdAllocator, IdPolicy};
use crate::session::{CloseReason, Session, SessionEvent};
use frelay_core::{FrameCodec, RelayError, RelayResult};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-frame write deadline applied to admitted sessions by default.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

struct Members {
    sessions: HashMap<u64, Arc<Session>>,
    ids: IdAllocator,
}

/// Outcome of a broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the frame was written to.
    pub delivered: usize,
    /// Sessions whose write failed.
    pub failed: Vec<u64>,
}

/// Registry of live sessions, keyed by assigned id.
pub struct SessionRegistry {
    members: RwLock<Members>,
    codec: FrameCodec,
    write_timeout: Option<Duration>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    /// Create an empty registry. Sessions it admits frame with `codec`.
    pub fn new(codec: FrameCodec, policy: IdPolicy) -> Self {
        Self {
            members: RwLock::new(Members {
                sessions: HashMap::new(),
                ids: IdAllocator::new(policy),
            }),
            codec,
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        }
    }

    /// Set the write deadline for sessions admitted from now on.
    /// `None` lets a write wait for as long as the peer takes.
    pub fn with_write_timeout(mut self, write_timeout: Option<Duration>) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Subscribe to join/leave events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Admit a new connection: assign an id and store an `Active` session.
    ///
    /// The caller drives the read half with [`Session::run`].
    pub async fn add<W>(&self, writer: W, peer: SocketAddr) -> Arc<Session>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let session = {
            let mut members = self.members.write().await;
            let id = members.ids.allocate();
            let session = Arc::new(Session::new(
                id,
                peer,
                Box::new(writer),
                self.codec,
                self.write_timeout,
            ));
            session.activate();
            members.sessions.insert(id, session.clone());
            session
        };

        info!(session_id = session.id(), peer = %peer, "session added");
        let _ = self.events.send(SessionEvent::Joined {
            id: session.id(),
            peer,
        });
        session
    }

    /// Delete the entry for `id` and ask its session to stop. No-op if absent.
    ///
    /// The id stays reserved until the session reaches `Closed` through
    /// [`SessionRegistry::release`], so it is never handed to a new
    /// connection while the old one is still running.
    pub async fn remove(&self, id: u64) -> Option<Arc<Session>> {
        let removed = self.members.write().await.sessions.remove(&id)?;
        removed.stop(CloseReason::Removed);
        debug!(session_id = id, "session removed");

        let reason = removed.close_reason().unwrap_or(CloseReason::Removed);
        let _ = self.events.send(SessionEvent::Left { id, reason });
        Some(removed)
    }

    /// Terminal step of a session: release its transport, then drop the
    /// entry, free the id and mark it `Closed` under the same lock.
    pub(crate) async fn release(&self, session: &Arc<Session>) {
        session.release_transport().await;

        let id = session.id();
        let was_member = {
            let mut members = self.members.write().await;
            let was_member = match members.sessions.get(&id) {
                Some(current) if Arc::ptr_eq(current, session) => {
                    members.sessions.remove(&id);
                    members.ids.release(id);
                    true
                }
                Some(_) => false,
                // Already removed; the id was held back for this moment.
                None => {
                    members.ids.release(id);
                    false
                }
            };
            session.mark_closed();
            was_member
        };

        if was_member {
            let reason = session.close_reason().unwrap_or(CloseReason::PeerClosed);
            let _ = self.events.send(SessionEvent::Left { id, reason });
        }
    }

    pub async fn lookup(&self, id: u64) -> Option<Arc<Session>> {
        self.members.read().await.sessions.get(&id).cloned()
    }

    /// Send one frame to session `id`.
    pub async fn send_to(&self, id: u64, command_id: i32, payload: &[u8]) -> RelayResult<()> {
        let session = self
            .lookup(id)
            .await
            .ok_or(RelayError::UnknownTarget(id))?;
        session.send(command_id, payload).await
    }

    /// Snapshot of all current sessions.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.members.read().await.sessions.values().cloned().collect()
    }

    /// Ids of all current sessions, ascending.
    pub async fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.members.read().await.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.sessions.is_empty()
    }

    /// Send a per-session frame to every live session.
    ///
    /// `build` returns the `(command_id, payload)` for a session, or `None`
    /// to skip it. A failed write is recorded and does not affect the rest.
    pub async fn broadcast<F>(&self, mut build: F) -> BroadcastReport
    where
        F: FnMut(&Session) -> Option<(i32, Vec<u8>)>,
    {
        let mut report = BroadcastReport::default();
        let mut targets = Vec::new();
        for session in self.snapshot().await.into_iter().filter(|s| s.is_active()) {
            let Some((command_id, payload)) = build(session.as_ref()) else {
                continue;
            };
            match self.codec.encode(command_id, &payload) {
                Ok(frame) => targets.push((session, frame)),
                Err(e) => {
                    warn!(session_id = session.id(), error = %e, "broadcast frame rejected");
                    report.failed.push(session.id());
                }
            }
        }

        let deliveries = targets
            .iter()
            .map(|(session, frame)| (session, frame.as_slice()));
        self.deliver(deliveries, report).await
    }

    /// Send the same frame to every live session. The frame is encoded once.
    pub async fn broadcast_all(&self, command_id: i32, payload: &[u8]) -> RelayResult<BroadcastReport> {
        let frame = self.codec.encode(command_id, payload)?;
        let sessions: Vec<Arc<Session>> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|s| s.is_active())
            .collect();

        let deliveries = sessions.iter().map(|session| (session, frame.as_slice()));
        Ok(self.deliver(deliveries, BroadcastReport::default()).await)
    }

    /// Write every frame concurrently, outside the membership lock.
    async fn deliver<'a, I>(&self, deliveries: I, mut report: BroadcastReport) -> BroadcastReport
    where
        I: IntoIterator<Item = (&'a Arc<Session>, &'a [u8])>,
    {
        let results = join_all(deliveries.into_iter().map(|(session, frame)| async move {
            (session.id(), session.send_frame(frame).await)
        }))
        .await;

        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(session_id = id, error = %e, "broadcast write failed");
                    report.failed.push(id);
                }
            }
        }
        report
    }

    /// Ask every session to stop. Completion is observed via `Left` events.
    pub async fn shutdown_all(&self) -> usize {
        let sessions = self.snapshot().await;
        let stopped = sessions
            .iter()
            .filter(|s| s.stop(CloseReason::Shutdown))
            .count();
        info!(sessions = sessions.len(), stopped, "stop requested for all sessions");
        stopped
    }

    /// Resolve once the registry holds no sessions.
    pub async fn drained(&self) {
        let mut events = self.subscribe();
        while !self.is_empty().await {
            let _ = tokio::time::timeout(Duration::from_millis(50), events.recv()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::testutil::{peer, FailingWriter, FrameReader};
    use std::collections::HashSet;
    use tokio::io::duplex;

    fn registry(policy: IdPolicy) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(FrameCodec::default(), policy))
    }

    #[tokio::test]
    async fn add_assigns_lowest_free_id() {
        let reg = registry(IdPolicy::ReuseLowest);
        let mut keep = Vec::new();
        for _ in 0..3 {
            let (client, server) = duplex(1024);
            keep.push(client);
            reg.add(server, peer()).await;
        }
        assert_eq!(reg.ids().await, vec![1, 2, 3]);

        let removed = reg.remove(2).await.unwrap();
        let (_client, server) = duplex(1024);
        assert_eq!(reg.add(server, peer()).await.id(), 4);

        // The id comes back once the removed session has fully closed.
        reg.release(&removed).await;
        let (_client, server) = duplex(1024);
        assert_eq!(reg.add(server, peer()).await.id(), 2);
    }

    #[tokio::test]
    async fn monotonic_policy_skips_released_ids() {
        let reg = registry(IdPolicy::Monotonic);
        let (_a, server) = duplex(1024);
        reg.add(server, peer()).await;
        let (_b, server) = duplex(1024);
        reg.add(server, peer()).await;
        reg.remove(1).await;
        let (_c, server) = duplex(1024);
        assert_eq!(reg.add(server, peer()).await.id(), 3);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let reg = registry(IdPolicy::ReuseLowest);
        let (_client, server) = duplex(1024);
        let session = reg.add(server, peer()).await;
        assert!(reg.remove(session.id()).await.is_some());
        assert!(reg.remove(session.id()).await.is_none());
        assert!(reg.lookup(session.id()).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_and_remove() {
        const N: usize = 64;
        const M: usize = 24;
        let reg = registry(IdPolicy::ReuseLowest);

        let mut handles = Vec::new();
        for i in 0..N {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                let (client, server) = duplex(64);
                let session = reg.add(server, peer()).await;
                if i < M {
                    reg.remove(session.id()).await;
                }
                client
            }));
        }
        let mut clients = Vec::new();
        for h in handles {
            clients.push(h.await.unwrap());
        }

        let ids = reg.ids().await;
        assert_eq!(ids.len(), N - M);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), N - M);
        assert!(ids.iter().all(|id| *id > 0));
        for id in ids {
            assert!(reg.lookup(id).await.unwrap().is_active());
        }
    }

    #[tokio::test]
    async fn broadcast_survives_a_failing_session() {
        let reg = registry(IdPolicy::ReuseLowest);
        let (a_client, a_server) = duplex(4096);
        let a = reg.add(a_server, peer()).await;
        let broken = reg.add(FailingWriter, peer()).await;
        let (b_client, b_server) = duplex(4096);
        let b = reg.add(b_server, peer()).await;

        let report = reg.broadcast_all(2, b"hello all").await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, vec![broken.id()]);
        assert_eq!(broken.state(), SessionState::Closing);
        assert!(a.is_active() && b.is_active());

        for client in [a_client, b_client] {
            let env = FrameReader::new(client).next().await.unwrap();
            assert_eq!(env.payload, b"hello all".to_vec());
        }
    }

    #[tokio::test]
    async fn broadcast_builds_per_session_payloads() {
        let reg = registry(IdPolicy::ReuseLowest);
        let (a_client, a_server) = duplex(4096);
        reg.add(a_server, peer()).await;
        let (_b_client, b_server) = duplex(4096);
        reg.add(b_server, peer()).await;

        let report = reg
            .broadcast(|s| (s.id() == 1).then(|| (5, s.id().to_be_bytes().to_vec())))
            .await;
        assert_eq!(report.delivered, 1);

        let env = FrameReader::new(a_client).next().await.unwrap();
        assert_eq!(env.payload, 1u64.to_be_bytes().to_vec());
    }

    #[tokio::test]
    async fn send_to_unknown_target() {
        let reg = registry(IdPolicy::ReuseLowest);
        let err = reg.send_to(9, 2, b"x").await.unwrap_err();
        assert!(matches!(err, RelayError::UnknownTarget(9)));
    }

    #[tokio::test]
    async fn shutdown_all_stops_everyone_once() {
        let reg = registry(IdPolicy::ReuseLowest);
        let (_a, server) = duplex(1024);
        let a = reg.add(server, peer()).await;
        let (_b, server) = duplex(1024);
        let b = reg.add(server, peer()).await;

        assert_eq!(reg.shutdown_all().await, 2);
        assert_eq!(reg.shutdown_all().await, 0);
        assert_eq!(a.close_reason(), Some(CloseReason::Shutdown));
        assert_eq!(b.state(), SessionState::Closing);
    }

    #[tokio::test]
    async fn release_removes_entry_and_emits_left() {
        let reg = registry(IdPolicy::ReuseLowest);
        let mut events = reg.subscribe();
        let (_client, server) = duplex(1024);
        let session = reg.add(server, peer()).await;
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Joined { id: 1, .. }));

        session.stop(CloseReason::ClientRequested);
        reg.release(&session).await;

        assert_eq!(session.state(), SessionState::Closed);
        assert!(reg.is_empty().await);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Left {
                id: 1,
                reason: CloseReason::ClientRequested
            }
        );
        tokio::time::timeout(Duration::from_secs(1), reg.drained())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn removed_id_is_not_reused_while_session_runs() {
        let reg = registry(IdPolicy::ReuseLowest);
        let mut events = reg.subscribe();
        let (_a, server) = duplex(1024);
        let old = reg.add(server, peer()).await;
        events.recv().await.unwrap();

        reg.remove(old.id()).await;
        assert_eq!(old.state(), SessionState::Closing);
        assert_eq!(old.close_reason(), Some(CloseReason::Removed));
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Left {
                id: 1,
                reason: CloseReason::Removed
            }
        );

        let (_b, server) = duplex(1024);
        let new = reg.add(server, peer()).await;
        assert_ne!(new.id(), old.id());

        reg.release(&old).await;
        assert_eq!(old.state(), SessionState::Closed);
        assert!(Arc::ptr_eq(&reg.lookup(new.id()).await.unwrap(), &new));
        // Left was already published by `remove`.
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Joined { id: 2, .. }));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn stalled_peer_does_not_hold_up_broadcast() {
        let reg = Arc::new(
            SessionRegistry::new(FrameCodec::default(), IdPolicy::ReuseLowest)
                .with_write_timeout(Some(Duration::from_millis(100))),
        );
        // Never read from: its pipe fills after 64 bytes.
        let (_stalled_client, stalled_server) = duplex(64);
        let stalled = reg.add(stalled_server, peer()).await;
        let (healthy_client, healthy_server) = duplex(4096);
        let healthy = reg.add(healthy_server, peer()).await;

        let report = tokio::time::timeout(Duration::from_secs(3), reg.broadcast_all(2, &[0u8; 256]))
            .await
            .expect("broadcast stalled")
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![stalled.id()]);
        assert_eq!(
            stalled.close_reason(),
            Some(CloseReason::Transport("write timeout".into()))
        );
        assert!(healthy.is_active());

        let env = FrameReader::new(healthy_client).next().await.unwrap();
        assert_eq!(env.payload, vec![0u8; 256]);

        // A stopped session is left out of later broadcasts.
        let report = reg.broadcast_all(2, b"again").await.unwrap();
        assert_eq!(report, BroadcastReport { delivered: 1, failed: vec![] });
    }

    #[tokio::test]
    async fn oversized_broadcast_is_rejected_before_any_write() {
        let reg = Arc::new(SessionRegistry::new(FrameCodec::new(32), IdPolicy::ReuseLowest));
        let (_client, server) = duplex(1024);
        let session = reg.add(server, peer()).await;

        let err = reg.broadcast_all(2, &[0u8; 64]).await.unwrap_err();
        assert!(matches!(err, RelayError::PayloadTooLarge { .. }));
        assert!(session.is_active());

        let report = reg.broadcast(|_| Some((2, vec![0u8; 64]))).await;
        assert_eq!(report.failed, vec![session.id()]);
        assert!(session.is_active());
    }
}
