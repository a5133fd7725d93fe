//! Core server: accepts connections and admits them as sessions.
//!
//! Owns the session registry and the command dispatcher, runs the player
//! list broadcaster, and coordinates shutdown.

use crate::config::ServerConfig;
use crate::dispatch::CommandDispatcher;
use crate::handlers::{broadcast_player_list, default_dispatcher};
use crate::registry::SessionRegistry;
use crate::session::SessionEvent;
use frelay_core::{FrameCodec, RelayError, RelayResult};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Interval;
use tracing::{debug, info, warn};

/// How long shutdown waits for sessions to finish closing.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The relay server instance.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<CommandDispatcher>,
}

impl RelayServer {
    /// Create a server with the built-in handlers.
    pub fn new(config: ServerConfig) -> RelayResult<Self> {
        Ok(Self::with_dispatcher(config, default_dispatcher()?))
    }

    pub fn with_dispatcher(config: ServerConfig, dispatcher: CommandDispatcher) -> Self {
        let codec = FrameCodec::new(config.max_frame_len);
        Self {
            registry: Arc::new(
                SessionRegistry::new(codec, config.id_policy)
                    .with_write_timeout(config.write_timeout),
            ),
            dispatcher: Arc::new(dispatcher),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> RelayResult<TcpListener> {
        TcpListener::bind(self.config.listen)
            .await
            .map_err(|e| RelayError::Transport(format!("bind {} failed: {e}", self.config.listen)))
    }

    /// Accept connections until `shutdown` resolves, then stop every session.
    pub async fn run<S>(self: Arc<Self>, listener: TcpListener, shutdown: S) -> RelayResult<()>
    where
        S: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        let broadcaster = tokio::spawn(player_list_loop(
            self.registry.clone(),
            self.registry.subscribe(),
            self.config.player_list_interval,
        ));

        info!(
            addr = %local,
            max_frame_len = self.config.max_frame_len,
            write_timeout = ?self.config.write_timeout,
            id_policy = ?self.config.id_policy,
            handlers = self.dispatcher.len(),
            "frelay-server ready"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer).await,
                    Err(e) => warn!(error = %e, "TCP accept failed"),
                },
            }
        }

        drop(listener);
        broadcaster.abort();

        let stopped = self.registry.shutdown_all().await;
        info!(sessions = stopped, "waiting for sessions to close");
        if tokio::time::timeout(SHUTDOWN_GRACE, self.registry.drained())
            .await
            .is_err()
        {
            let remaining = self.registry.len().await;
            warn!(remaining, "sessions still open after shutdown grace period");
        }
        Ok(())
    }

    /// Register an accepted stream and start its read loop.
    async fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "set_nodelay failed");
        }
        let (reader, writer) = stream.into_split();
        let session = self.registry.add(writer, peer).await;
        tokio::spawn(session.run(
            reader,
            self.registry.clone(),
            self.dispatcher.clone(),
            self.config.idle_timeout,
        ));
    }
}

/// Broadcast the player list on every join/leave and on a fixed interval.
async fn player_list_loop(
    registry: Arc<SessionRegistry>,
    mut events: broadcast::Receiver<SessionEvent>,
    interval: Option<Duration>,
) {
    let mut ticker = interval.map(tokio::time::interval);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => debug!(?event, "membership changed"),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "player list events lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tick(&mut ticker) => {}
        }

        if let Err(e) = broadcast_player_list(&registry).await {
            warn!(error = %e, "player list broadcast failed");
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
