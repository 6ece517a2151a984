//! Session factory.

use crate::connection::{Connection, SessionConfig};
use crate::handler::StartupHandler;

use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// Binds a startup handler and mints one session per physical link.
#[derive(Clone)]
pub struct Server {
    handler: Arc<dyn StartupHandler>,
    config: SessionConfig,
}

impl Server {
    /// Create a factory running `handler` on every session.
    pub fn new(handler: impl StartupHandler) -> Self {
        Self::with_config(handler, SessionConfig::default())
    }

    /// Create a factory whose sessions use `config`.
    pub fn with_config(handler: impl StartupHandler, config: SessionConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
        }
    }

    /// Create a fresh session and start the handler on it.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn create_connection(&self) -> Connection {
        debug!("Creating session");
        Connection::from_handler(Arc::clone(&self.handler), self.config.clone())
    }

    /// Configuration applied to created sessions.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
