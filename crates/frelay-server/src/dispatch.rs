//! Command dispatch: a fixed table from command id to handler.
//!
//! The table is assembled once through [`DispatcherBuilder`] and is
//! immutable afterwards, so lookups on the hot path take no lock.

use crate::registry::SessionRegistry;
use crate::session::Session;
use frelay_core::{RelayError, RelayResult};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by [`Handler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = RelayResult<()>> + Send + 'a>>;

/// What a handler gets to see about the frame's origin.
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    /// The session the frame arrived on.
    pub session: &'a Arc<Session>,
    /// All live sessions, for routing.
    pub registry: &'a SessionRegistry,
}

/// Handles every frame carrying one command id.
///
/// Returning an error stops the originating session.
pub trait Handler: Send + Sync {
    fn handle<'a>(&'a self, ctx: HandlerContext<'a>, payload: &'a [u8]) -> HandlerFuture<'a>;
}

/// Immutable command id → handler table.
pub struct CommandDispatcher {
    handlers: HashMap<i32, Box<dyn Handler>>,
}

impl CommandDispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route one frame to its handler.
    ///
    /// An unregistered id yields `UnknownCommand`, which callers treat as
    /// recoverable.
    pub async fn dispatch(
        &self,
        ctx: HandlerContext<'_>,
        command_id: i32,
        payload: &[u8],
    ) -> RelayResult<()> {
        let handler = self
            .handlers
            .get(&command_id)
            .ok_or(RelayError::UnknownCommand(command_id))?;
        handler.handle(ctx, payload).await
    }
}

/// Startup-time registration of handlers.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<i32, Box<dyn Handler>>,
}

impl DispatcherBuilder {
    /// Register `handler` for `command_id`. Each id may be registered once.
    pub fn register(
        &mut self,
        command_id: impl Into<i32>,
        handler: impl Handler + 'static,
    ) -> RelayResult<&mut Self> {
        let command_id = command_id.into();
        if self.handlers.contains_key(&command_id) {
            return Err(RelayError::DuplicateRegistration(command_id));
        }
        self.handlers.insert(command_id, Box::new(handler));
        Ok(self)
    }

    pub fn build(self) -> CommandDispatcher {
        CommandDispatcher {
            handlers: self.handlers,
        }
    }
}
