//! Accept loop creating one session per TCP connection.

use crate::error::Result;
use crate::transport::{StreamConfig, drive};

use std::sync::Arc;

use proven_bidi_rpc::Server;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, info, instrument, warn};

/// Serves sessions minted by a [`Server`] over accepted TCP connections.
pub struct StreamServer {
    server: Server,
    config: StreamConfig,
    shutdown_token: CancellationToken,
}

impl StreamServer {
    /// Create a new stream server.
    #[must_use]
    pub fn new(server: Server, config: StreamConfig) -> Self {
        Self {
            server,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called.
    /// Returns at once if it already was. Sessions already running are left
    /// alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's address cannot be read.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("Session server listening on {}", listener.local_addr()?);

        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                                warn!("Max connections reached, rejecting connection from {}", addr);
                                continue;
                            };

                            if let Err(e) = stream.set_nodelay(true) {
                                debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                            }

                            let session = self.server.create_connection();
                            let config = self.config.clone();
                            tokio::spawn(
                                async move {
                                    debug!("New connection");
                                    if let Err(e) = drive(stream, session, &config).await {
                                        error!("Connection error: {}", e);
                                    }
                                    debug!("Connection finished");
                                    drop(permit);
                                }
                                .instrument(debug_span!("session", %addr)),
                            );
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                () = self.shutdown_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop the accept loop.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Configuration applied to accepted connections.
    #[must_use]
    pub const fn config(&self) -> &StreamConfig {
        &self.config
    }
}
