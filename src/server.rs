use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    config::ServerConfig,
    draw::{CompletionTracker, Rendezvous},
    handler::{self, HandlerErr},
    storage::{BetStore, SharedStore},
};

// how long the running connections get to wind down once shutdown starts
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything a connection shares with the rest of the server
#[derive(Debug)]
pub struct SharedState<S> {
    pub store: SharedStore<S>,
    pub tracker: Arc<CompletionTracker>,
    pub rendezvous: Arc<Rendezvous>,
    pub draw_timeout: Option<Duration>,
    pub shutdown: CancellationToken,
}

impl<S> Clone for SharedState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            tracker: self.tracker.clone(),
            rendezvous: self.rendezvous.clone(),
            draw_timeout: self.draw_timeout,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: BetStore> SharedState<S> {
    pub fn new(config: &ServerConfig, store: S, shutdown: CancellationToken) -> Self {
        Self {
            store: SharedStore::new(store),
            tracker: Arc::default(),
            rendezvous: Arc::new(Rendezvous::new(config.agencies)),
            draw_timeout: config.draw_timeout,
            shutdown,
        }
    }
}

pub struct Server<S> {
    listener: TcpListener,
    shared: SharedState<S>,
}

impl<S> Server<S>
where
    S: BetStore + 'static,
{
    pub async fn bind(
        config: &ServerConfig,
        store: S,
        shutdown: CancellationToken,
    ) -> tokio::io::Result<Self> {
        let listener = TcpListener::bind(&config.address).await?;

        Ok(Self {
            listener,
            shared: SharedState::new(config, store, shutdown),
        })
    }

    pub fn local_addr(&self) -> tokio::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shared(&self) -> &SharedState<S> {
        &self.shared
    }

    /// Accepts agencies until the shutdown token is cancelled
    ///
    /// every connection runs in its own task. on shutdown the server stops accepting,
    /// waits for the running connections to wind down, and only then closes the listener.
    pub async fn run(self) -> tokio::io::Result<()> {
        tracing::info!(
            address = %self.listener.local_addr()?,
            agencies = self.shared.rendezvous.expected(),
            "accepting agencies"
        );

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!(%peer, "accepted a connection");
                        let span = tracing::info_span!("connection", %peer);
                        connections.spawn(serve(stream, self.shared.clone()).instrument(span));
                    }
                    Err(err) => tracing::warn!(%err, "failed to accept a connection"),
                },
                // reap finished connections as we go
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        tracing::error!(%err, "a connection task failed");
                    }
                }
            }
        }

        tracing::info!(
            active = connections.len(),
            "stopped accepting, waiting for the active connections"
        );
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(joined) = connections.join_next().await {
                if let Err(err) = joined {
                    tracing::error!(%err, "a connection task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                stuck = connections.len(),
                "connections did not wind down in time, aborting them"
            );
            connections.shutdown().await;
        }

        drop(self.listener);
        tracing::info!("server stopped");

        Ok(())
    }
}

async fn serve<S: BetStore>(stream: TcpStream, shared: SharedState<S>) {
    match handler::handle(stream, shared).await {
        Ok(()) => tracing::info!("connection closed"),
        Err(HandlerErr::ShuttingDown) => {
            tracing::info!("connection dropped, the server is shutting down")
        }
        Err(HandlerErr::Channel(err)) if err.is_mid_frame_close() => {
            tracing::error!(%err, "agency left in the middle of a frame")
        }
        Err(HandlerErr::Channel(err)) if err.is_protocol_violation() => {
            tracing::error!(%err, "received a malformed frame")
        }
        Err(err) => tracing::error!(%err, "connection terminated"),
    }
}
