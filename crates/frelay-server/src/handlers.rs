//! Built-in command handlers and the player list broadcast.

use crate::dispatch::{CommandDispatcher, Handler, HandlerContext, HandlerFuture};
use crate::registry::{BroadcastReport, SessionRegistry};
use crate::session::CloseReason;
use frelay_core::{
    decode_payload, encode_payload, ChatRequest, ChatResult, Command, RelayError, RelayResult,
};
use tracing::{debug, warn};

/// `Command::None`: the client is leaving.
pub struct TerminateHandler;

impl Handler for TerminateHandler {
    fn handle<'a>(&'a self, ctx: HandlerContext<'a>, _payload: &'a [u8]) -> HandlerFuture<'a> {
        Box::pin(async move {
            ctx.session.stop(CloseReason::ClientRequested);
            Ok(())
        })
    }
}

/// `Command::Chat`: relay text to another session as a `Result`.
pub struct ChatHandler;

impl Handler for ChatHandler {
    fn handle<'a>(&'a self, ctx: HandlerContext<'a>, payload: &'a [u8]) -> HandlerFuture<'a> {
        Box::pin(async move {
            let request: ChatRequest = decode_payload(payload)?;
            let result = encode_payload(&ChatResult { text: request.text })?;

            match ctx
                .registry
                .send_to(request.target_id, Command::Result.into(), &result)
                .await
            {
                Ok(()) => {
                    debug!(
                        session_id = ctx.session.id(),
                        target_id = request.target_id,
                        "chat delivered"
                    );
                }
                Err(RelayError::UnknownTarget(target_id)) => {
                    warn!(session_id = ctx.session.id(), target_id, "chat target not found");
                }
                // The target's own session handles its failure; the sender stays open.
                Err(e) => {
                    warn!(
                        session_id = ctx.session.id(),
                        target_id = request.target_id,
                        error = %e,
                        "chat delivery failed"
                    );
                }
            }
            Ok(())
        })
    }
}

/// Dispatcher with every built-in handler registered.
pub fn default_dispatcher() -> RelayResult<CommandDispatcher> {
    let mut builder = CommandDispatcher::builder();
    builder
        .register(Command::None, TerminateHandler)?
        .register(Command::Chat, ChatHandler)?;
    Ok(builder.build())
}

/// Text of the player list message, e.g. `playerlist:1,2,5`.
pub fn player_list_text(ids: &[u64]) -> String {
    let ids: Vec<String> = ids.iter().map(u64::to_string).collect();
    format!("playerlist:{}", ids.join(","))
}

/// Push the current player list to every session.
pub async fn broadcast_player_list(registry: &SessionRegistry) -> RelayResult<BroadcastReport> {
    let text = player_list_text(&registry.ids().await);
    let payload = encode_payload(&ChatResult { text })?;
    registry.broadcast_all(Command::Result.into(), &payload).await
}
