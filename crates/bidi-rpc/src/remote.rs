//! Proxies for methods the peer exposes.

use crate::connection::{Connection, PendingCall, Shared};
use crate::error::{Error, Result};

use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::instrument;

/// Callable handle for one method the peer currently exposes.
///
/// Holds the session weakly, so a proxy kept past the session's lifetime
/// fails with [`Error::ConnectionClosed`] instead of keeping it alive.
#[derive(Clone)]
pub struct RemoteMethod {
    name: Arc<str>,
    session: Weak<Shared>,
}

impl RemoteMethod {
    pub(crate) fn new(name: &str, session: &Connection) -> Self {
        Self {
            name: Arc::from(name),
            session: session.downgrade(),
        }
    }

    /// Name the peer exposes the method under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send the call and return its pending outcome without waiting, e.g. to
    /// observe progress.
    #[must_use]
    pub fn start(&self, args: Vec<Value>) -> PendingCall {
        self.session.upgrade().map_or_else(
            || PendingCall::failed(Error::ConnectionClosed),
            |shared| Connection::from_shared(shared).call(&self.name, args),
        )
    }

    /// Call the method and wait for its result, bounded by the session's
    /// call timeout if one is configured.
    ///
    /// # Errors
    ///
    /// Returns the peer's rejection, [`Error::Timeout`], or
    /// [`Error::ConnectionClosed`].
    #[instrument(skip(self, args), fields(method = %self.name))]
    pub async fn call(&self, args: Vec<Value>) -> Result<Value> {
        let session = self
            .session
            .upgrade()
            .map(Connection::from_shared)
            .ok_or(Error::ConnectionClosed)?;

        let pending = session.call(&self.name, args);
        session.complete(pending).await
    }
}

impl fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMethod")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Name-keyed view of the peer's current interface.
#[derive(Clone, Debug)]
pub struct Remote {
    session: Connection,
}

impl Remote {
    pub(crate) const fn new(session: Connection) -> Self {
        Self { session }
    }

    /// Proxy for `name`, if the peer exposes it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<RemoteMethod> {
        self.session.methods().remote(name)
    }

    /// Whether the peer exposes `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names the peer exposes, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.session.methods().remote_names()
    }

    /// Call the peer method `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MethodNotFound`] if the peer does not expose `name`,
    /// otherwise whatever [`RemoteMethod::call`] returns.
    pub async fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let method = self
            .get(name)
            .ok_or_else(|| Error::MethodNotFound(name.to_string()))?;
        method.call(args).await
    }
}
