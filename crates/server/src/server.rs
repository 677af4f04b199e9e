//! TCP listener for splitup uploads.
//!
//! Accepts connections until shutdown and hands each one to its own task.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use splitup_protocol::{
    CONTROL_IDLE_TIMEOUT, DEFAULT_SEGMENT_SIZE, LOGIN_TIMEOUT, READ_TIMEOUT, WRITE_TIMEOUT,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::auth::Authenticator;
use crate::dispatch::Dispatcher;
use crate::registry::{InMemoryRegistry, SessionRegistry};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8888;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind in [`UploadServer::run`].
    pub bind_addr: SocketAddr,
    /// Directory for partial segments and assembled files.
    pub storage_dir: PathBuf,
    /// Segment size proposed to every client.
    pub segment_size: u64,
    pub login_timeout: Duration,
    /// Deadline for a command read on a fresh connection and for each segment data read.
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// How long a control connection may stay silent.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            storage_dir: PathBuf::from("."),
            segment_size: DEFAULT_SEGMENT_SIZE,
            login_timeout: LOGIN_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            idle_timeout: CONTROL_IDLE_TIMEOUT,
        }
    }
}

/// The upload server.
pub struct UploadServer {
    bind_addr: SocketAddr,
    storage_dir: PathBuf,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UploadServer {
    /// Creates a server with an in-memory session registry.
    pub fn new(config: ServerConfig, auth: Arc<dyn Authenticator>) -> Arc<Self> {
        Self::with_registry(config, auth, Arc::new(InMemoryRegistry::new()))
    }

    pub fn with_registry(
        config: ServerConfig,
        auth: Arc<dyn Authenticator>,
        registry: Arc<dyn SessionRegistry>,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        Arc::new(Self {
            bind_addr: config.bind_addr,
            storage_dir: config.storage_dir.clone(),
            dispatcher: Dispatcher::new(config, auth, registry, cancel.clone()),
            cancel,
            local_addr: Mutex::new(None),
        })
    }

    pub fn registry(&self) -> Arc<dyn SessionRegistry> {
        Arc::clone(self.dispatcher.registry())
    }

    /// Returns the local address once the server is listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Stops accepting and cancels every live session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Binds the configured address and serves until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        tokio::fs::create_dir_all(&self.storage_dir).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!(
            storage = %self.storage_dir.display(),
            "upload server listening on {local_addr}"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.dispatcher.handle(stream, peer_addr).await {
                                    tracing::warn!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }
}
