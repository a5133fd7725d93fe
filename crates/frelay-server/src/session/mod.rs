//! Per-connection sessions: lifecycle, write path, and read loop.

pub mod connection;
pub mod state;

pub use connection::Session;
pub use state::{CloseReason, SessionEvent, SessionState};
