//! Session lifecycle states, close reasons and lifecycle events.

use std::fmt;
use std::net::SocketAddr;

/// Lifecycle of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Why a session left the `Active` state. Only the first reason is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its end of the stream.
    PeerClosed,
    /// A read or write on the transport failed.
    Transport(String),
    /// The peer sent bytes that do not decode as an envelope.
    Malformed(String),
    /// No bytes arrived within the configured idle timeout.
    IdleTimeout,
    /// The peer sent the terminate command.
    ClientRequested,
    /// A command handler rejected the frame.
    HandlerError(String),
    /// The server is shutting down.
    Shutdown,
    /// The session was taken out of the registry.
    Removed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Malformed(e) => write!(f, "malformed frame: {e}"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::ClientRequested => write!(f, "client requested close"),
            Self::HandlerError(e) => write!(f, "handler error: {e}"),
            Self::Shutdown => write!(f, "server shutdown"),
            Self::Removed => write!(f, "removed from registry"),
        }
    }
}

/// Published by the registry when membership changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Joined { id: u64, peer: SocketAddr },
    Left { id: u64, reason: CloseReason },
}
