//! frelay-server: message-oriented TCP relay.
//!
//! Accepts TCP connections, reassembles length-prefixed CBOR envelopes,
//! dispatches them to command handlers, and routes payloads between sessions.

pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod session;
#[cfg(test)]
mod testutil;

pub use config::{CliOverrides, ServerConfig};
pub use dispatch::{CommandDispatcher, DispatcherBuilder, Handler, HandlerContext, HandlerFuture};
pub use registry::{BroadcastReport, IdPolicy, SessionRegistry};
pub use server::RelayServer;
pub use session::{CloseReason, Session, SessionEvent, SessionState};
