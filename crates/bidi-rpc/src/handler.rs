//! Startup handlers run once per session.

use crate::connection::Connection;
use crate::error::Result;

use std::future::Future;

use async_trait::async_trait;

/// Sets up a fresh session, typically by registering its initial methods.
///
/// The outcome is announced to the peer: `remote-ready` on success,
/// `remote-error` carrying the failure otherwise.
#[async_trait]
pub trait StartupHandler: Send + Sync + 'static {
    /// Called once, right after the session is created.
    async fn start(&self, session: Connection) -> Result<()>;
}

#[async_trait]
impl<F, Fut> StartupHandler for F
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn start(&self, session: Connection) -> Result<()> {
        self(session).await
    }
}

/// Handler that exposes nothing and reports ready immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passive;

#[async_trait]
impl StartupHandler for Passive {
    async fn start(&self, _session: Connection) -> Result<()> {
        Ok(())
    }
}
