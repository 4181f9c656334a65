//! Server lifecycle: bind, accept loop, orderly stop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::broadcast::Broadcaster;
use super::registry::Registry;
use super::session;

/// Notice sent to every connected client when the server stops.
const SHUTDOWN_NOTICE: &str = "Сервер остановлен. Соединение разорвано.";

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// State shared between the accept loop and every session task.
#[derive(Debug)]
pub(crate) struct ChatState {
    pub(crate) registry: Arc<Registry>,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) shutdown: CancellationToken,
}

/// A bound, not-yet-running chat server.
pub struct ChatServer {
    listener: TcpListener,
    state: Arc<ChatState>,
}

impl ChatServer {
    /// Bind the listening socket. A bind failure is fatal and surfaced to
    /// the operator.
    pub async fn bind(host: &str, port: u16) -> Result<Self, ServerError> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        let registry = Arc::new(Registry::new());
        let state = Arc::new(ChatState {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            shutdown: CancellationToken::new(),
        });

        Ok(Self { listener, state })
    }

    /// The actual bound address (useful with an ephemeral port).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle that can stop the server from any task.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Accept connections until stopped, spawning one session task per
    /// client. Accepting never waits on a handler; listener-level errors end
    /// the loop. Either way the teardown notifies every remaining client.
    pub async fn run(self) -> Result<(), ServerError> {
        let ChatServer { listener, state } = self;

        let result = loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break Ok(()),

                accepted = listener.accept() => match accepted {
                    Ok((socket, addr)) => {
                        info!(%addr, "new connection");
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = session::handle_client(socket, addr, state).await {
                                debug!(%addr, "session ended with error: {e}");
                            }
                            info!(%addr, "connection closed");
                        });
                    }
                    Err(e) => break Err(ServerError::from(e)),
                },
            }
        };

        ServerHandle { state }.stop().await;
        result
    }
}

/// Cloneable stop handle, safe to use from a signal handler task or
/// concurrently with in-flight broadcasts.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ChatState>,
}

impl ServerHandle {
    /// Stop the server: notify every registered client, signal all tasks,
    /// and clear the registry. Idempotent.
    pub async fn stop(&self) {
        if self.state.shutdown.is_cancelled() {
            return;
        }

        // Queue the notice first so every session finds it when it wakes on
        // the cancelled token and drains its outbox.
        self.state.broadcaster.broadcast(SHUTDOWN_NOTICE, None).await;
        self.state.shutdown.cancel();

        let dropped = self.state.registry.clear().await;
        info!(connections = dropped.len(), "chat server stopped");
    }
}
