//! A single accepted connection.
//!
//! The session owns the write half of its transport behind a per-session
//! lock, so frames from concurrent senders never interleave. The read half
//! is owned by the task running [`Session::run`].

use super::state::{CloseReason, SessionState};
use crate::dispatch::{CommandDispatcher, HandlerContext};
use crate::registry::SessionRegistry;
use frelay_core::{
    encode_payload, Command, FrameCodec, FrameEvent, Reassembler, RelayError, RelayResult,
};
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Size of the per-read scratch buffer.
const READ_BUF_LEN: usize = 8 * 1024;

/// How long teardown waits for an in-flight write before giving up on a
/// clean transport shutdown.
const WRITER_RELEASE_GRACE: Duration = Duration::from_secs(2);

/// Write half of a session transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Server-side state for one accepted connection.
pub struct Session {
    id: u64,
    peer: SocketAddr,
    connected_at: Instant,
    codec: FrameCodec,
    /// Deadline for writing one frame; `None` waits indefinitely.
    write_timeout: Option<Duration>,
    state: AtomicU8,
    close_reason: OnceLock<CloseReason>,
    /// `None` once the transport has been released.
    writer: Mutex<Option<BoxedWriter>>,
    /// Flipped to `true` by the first successful `stop`.
    closing_tx: watch::Sender<bool>,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        peer: SocketAddr,
        writer: BoxedWriter,
        codec: FrameCodec,
        write_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            peer,
            connected_at: Instant::now(),
            codec,
            write_timeout,
            state: AtomicU8::new(SessionState::Connecting as u8),
            close_reason: OnceLock::new(),
            writer: Mutex::new(Some(writer)),
            closing_tx: watch::channel(false).0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// The reason recorded by the first `stop` call, if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().cloned()
    }

    pub(crate) fn activate(&self) {
        let _ = self.state.compare_exchange(
            SessionState::Connecting as u8,
            SessionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Request a transition to `Closing`.
    ///
    /// Returns `true` for the caller that performed the transition; every
    /// later call is a no-op returning `false`.
    pub fn stop(&self, reason: CloseReason) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= SessionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        debug!(session_id = self.id, reason = %reason, "session closing");
        let _ = self.close_reason.set(reason);
        self.closing_tx.send_replace(true);
        true
    }

    /// Encode and write one frame.
    ///
    /// Fails with `SessionClosed` once the session is closing. A write error
    /// or an expired write deadline stops the session and is returned as
    /// `Transport`.
    pub async fn send(&self, command_id: i32, payload: &[u8]) -> RelayResult<()> {
        if !self.is_active() {
            return Err(RelayError::SessionClosed(self.id));
        }
        let frame = self.codec.encode(command_id, payload)?;
        self.send_frame(&frame).await
    }

    /// Write an already encoded frame.
    pub(crate) async fn send_frame(&self, frame: &[u8]) -> RelayResult<()> {
        let mut guard = self.writer.lock().await;
        // Checked under the lock: a stream cut mid-frame must not take more bytes.
        if !self.is_active() {
            return Err(RelayError::SessionClosed(self.id));
        }
        let writer = guard.as_mut().ok_or(RelayError::SessionClosed(self.id))?;

        let mut partial = PartialWrite {
            session: self,
            armed: true,
        };
        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await
        };
        let result = match self.write_timeout {
            Some(limit) => tokio::time::timeout(limit, write)
                .await
                .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))),
            None => write.await,
        };
        partial.armed = false;
        drop(guard);

        if let Err(e) = result {
            warn!(session_id = self.id, error = %e, "write failed");
            self.stop(CloseReason::Transport(e.to_string()));
            return Err(RelayError::Transport(e.to_string()));
        }
        Ok(())
    }

    /// Serialize an application payload and send it under `command`.
    pub async fn send_message<T: Serialize>(&self, command: Command, message: &T) -> RelayResult<()> {
        let payload = encode_payload(message)?;
        self.send(command.into(), &payload).await
    }

    /// Shut down and drop the write half of the transport.
    pub(crate) async fn release_transport(&self) {
        let writer = match tokio::time::timeout(WRITER_RELEASE_GRACE, self.writer.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                warn!(session_id = self.id, "writer busy, skipping transport shutdown");
                None
            }
        };
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!(session_id = self.id, error = %e, "transport shutdown failed");
            }
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.state
            .store(SessionState::Closed as u8, Ordering::Release);
    }

    /// Read loop: feed transport bytes through the reassembler and dispatch
    /// every complete frame in arrival order.
    ///
    /// Returns once the session has closed and left the registry.
    pub async fn run<R>(
        self: Arc<Self>,
        mut reader: R,
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<CommandDispatcher>,
        idle_timeout: Option<Duration>,
    ) where
        R: AsyncRead + Unpin + Send,
    {
        let mut closing = self.closing_tx.subscribe();
        let mut reassembler = Reassembler::new(self.codec);
        let mut buf = vec![0u8; READ_BUF_LEN];

        'read: loop {
            let read = tokio::select! {
                _ = closing.wait_for(|requested| *requested) => break,
                read = read_some(&mut reader, &mut buf, idle_timeout) => read,
            };

            let n = match read {
                Ok(Some(0)) => {
                    self.stop(CloseReason::PeerClosed);
                    break;
                }
                Ok(Some(n)) => n,
                Ok(None) => {
                    self.stop(CloseReason::IdleTimeout);
                    break;
                }
                Err(e) => {
                    self.stop(CloseReason::Transport(e.to_string()));
                    break;
                }
            };

            for event in reassembler.feed(&buf[..n]) {
                match event {
                    FrameEvent::Frame(envelope) => {
                        let ctx = HandlerContext {
                            session: &self,
                            registry: &registry,
                        };
                        let dispatched = tokio::select! {
                            _ = closing.wait_for(|requested| *requested) => None,
                            result = dispatcher.dispatch(ctx, envelope.command_id, &envelope.payload) => Some(result),
                        };
                        match dispatched {
                            None => break 'read,
                            Some(Ok(())) => {}
                            Some(Err(RelayError::UnknownCommand(command_id))) => {
                                warn!(session_id = self.id, command_id, "unknown command, frame dropped");
                            }
                            Some(Err(e)) => {
                                warn!(session_id = self.id, command_id = envelope.command_id, error = %e, "handler failed");
                                self.stop(CloseReason::HandlerError(e.to_string()));
                            }
                        }
                    }
                    FrameEvent::Malformed { reason } => {
                        warn!(session_id = self.id, reason = %reason, "malformed frame");
                        self.stop(CloseReason::Malformed(reason));
                    }
                }
                if !self.is_active() {
                    break 'read;
                }
            }
        }

        registry.release(&self).await;
        info!(
            session_id = self.id,
            peer = %self.peer,
            reason = %self.close_reason().unwrap_or(CloseReason::PeerClosed),
            connected_ms = self.connected_at().elapsed().as_millis() as u64,
            "session closed"
        );
    }
}

/// Stops the session if a frame write is dropped before it completes.
struct PartialWrite<'a> {
    session: &'a Session,
    armed: bool,
}

impl Drop for PartialWrite<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session
                .stop(CloseReason::Transport("write interrupted".into()));
        }
    }
}

/// Read once, returning `Ok(None)` if the idle timeout elapsed first.
async fn read_some<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> std::io::Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, reader.read(buf)).await {
            Ok(read) => read.map(Some),
            Err(_) => Ok(None),
        },
        None => reader.read(buf).await.map(Some),
    }
}
