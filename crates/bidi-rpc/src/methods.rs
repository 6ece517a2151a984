//! Local methods and the mirror of the peer's methods.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::outbound::Outbox;
use crate::protocol::{Message, MessageId};
use crate::remote::RemoteMethod;
use crate::sandbox::sandbox;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// A method this side exposes to the peer.
#[async_trait]
pub trait Method: Send + Sync + 'static {
    /// Run one invocation. An `Err` is sent to the caller as a reject.
    async fn call(&self, invocation: Invocation) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> Method for F
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, invocation: Invocation) -> Result<Value> {
        self(invocation).await
    }
}

/// Emits progress for one call and its terminal response, never progress
/// after the terminal one.
#[derive(Clone, Debug)]
pub(crate) struct Reporter {
    id: MessageId,
    outbox: Outbox,
    settled: Arc<Mutex<bool>>,
}

impl Reporter {
    pub(crate) fn new(id: MessageId, outbox: Outbox) -> Self {
        Self {
            id,
            outbox,
            settled: Arc::new(Mutex::new(false)),
        }
    }

    fn progress(&self, progress: Value) -> bool {
        let settled = self.settled.lock();
        if *settled {
            debug!(id = %self.id, "Dropping progress emitted after the call settled");
            return false;
        }

        self.outbox.push(Message::Progress {
            id: self.id,
            progress,
        })
    }

    pub(crate) fn settle(&self, outcome: Result<Value>) {
        let mut settled = self.settled.lock();
        *settled = true;

        let message = match outcome {
            Ok(result) => Message::Resolve {
                id: self.id,
                result,
            },
            Err(e) => {
                debug!(id = %self.id, error = %e, "Call failed");
                Message::Reject {
                    id: self.id,
                    error: e.into_value(),
                }
            }
        };
        self.outbox.push(message);
    }
}

/// A single call of a local method.
pub struct Invocation {
    id: MessageId,
    name: String,
    args: Vec<Value>,
    session: Connection,
    reporter: Reporter,
}

impl Invocation {
    pub(crate) const fn new(
        id: MessageId,
        name: String,
        args: Vec<Value>,
        session: Connection,
        reporter: Reporter,
    ) -> Self {
        Self {
            id,
            name,
            args,
            session,
            reporter,
        }
    }

    /// Correlation id of the call.
    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    /// Name the method was called by.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw arguments in call order.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Take ownership of the raw arguments.
    #[must_use]
    pub fn into_args(self) -> Vec<Value> {
        self.args
    }

    /// Decode argument `index`. A missing argument decodes from `null`, so
    /// optional trailing arguments can be read as `Option<T>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the value does not fit `T`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.args.get(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| Error::InvalidArgument {
            index,
            reason: e.to_string(),
        })
    }

    /// The session the call arrived on, for calling back into the peer or
    /// evolving the exposed interface.
    #[must_use]
    pub const fn session(&self) -> &Connection {
        &self.session
    }

    /// Send a progress notification to the caller. Returns `false` if it was
    /// dropped because the call already settled or the session closed.
    pub fn progress(&self, value: impl Into<Value>) -> bool {
        self.reporter.progress(value.into())
    }
}

struct LocalMethod {
    method: Arc<dyn Method>,
    retiring: bool,
}

/// Per-session method tables.
#[derive(Default)]
pub struct MethodTable {
    local: DashMap<String, LocalMethod>,
    remote: DashMap<String, RemoteMethod>,
}

impl MethodTable {
    /// Create empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `method` locally under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRegistered`] if `name` is taken, including
    /// while a deregistration of it is still in flight.
    pub fn register_local(&self, name: &str, method: Arc<dyn Method>) -> Result<()> {
        match self.local.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::AlreadyRegistered(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(LocalMethod {
                    method,
                    retiring: false,
                });
                Ok(())
            }
        }
    }

    /// Mark `name` for removal. It stays callable until
    /// [`finish_deregister`](Self::finish_deregister).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRegistered`] if `name` is absent or already
    /// being removed.
    pub fn deregister_local(&self, name: &str) -> Result<()> {
        match self.local.get_mut(name) {
            Some(mut entry) if !entry.retiring => {
                entry.retiring = true;
                Ok(())
            }
            _ => Err(Error::NotRegistered(name.to_string())),
        }
    }

    /// The peer acknowledged the removal of `name`.
    pub fn finish_deregister(&self, name: &str) -> bool {
        self.local
            .remove_if(name, |_, entry| entry.retiring)
            .is_some()
    }

    /// The peer refused the removal of `name`; keep exposing it.
    pub fn abort_deregister(&self, name: &str) {
        if let Some(mut entry) = self.local.get_mut(name) {
            entry.retiring = false;
        }
    }

    /// Drop `name` outright, used when a registration never left the session.
    pub(crate) fn remove_local(&self, name: &str) {
        self.local.remove(name);
    }

    /// Whether `name` is in the local table (pending removal included).
    #[must_use]
    pub fn has_local(&self, name: &str) -> bool {
        self.local.contains_key(name)
    }

    /// Local method names, sorted.
    #[must_use]
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.local.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Run local method `name`, sandboxed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MethodNotFound`] if nothing is registered under
    /// `name`. Failures of the method itself surface through the returned
    /// future, never as a panic.
    pub fn invoke_local(
        &self,
        name: &str,
        invocation: Invocation,
    ) -> Result<BoxFuture<'static, Result<Value>>> {
        let method = self
            .local
            .get(name)
            .map(|entry| Arc::clone(&entry.method))
            .ok_or_else(|| Error::MethodNotFound(name.to_string()))?;

        Ok(sandbox(move || {
            async move { method.call(invocation).await }.boxed()
        }))
    }

    /// Mirror a method the peer now exposes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if `name` is already mirrored.
    pub fn set_remote(&self, name: &str, proxy: RemoteMethod) -> Result<()> {
        match self.remote.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::Conflict(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(proxy);
                Ok(())
            }
        }
    }

    /// Forget a method the peer no longer exposes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MethodNotFound`] if `name` is not mirrored.
    pub fn clear_remote(&self, name: &str) -> Result<()> {
        self.remote
            .remove(name)
            .map(drop)
            .ok_or_else(|| Error::MethodNotFound(name.to_string()))
    }

    /// Proxy for the peer method `name`.
    #[must_use]
    pub fn remote(&self, name: &str) -> Option<RemoteMethod> {
        self.remote.get(name).map(|entry| entry.value().clone())
    }

    /// Mirrored peer method names, sorted.
    #[must_use]
    pub fn remote_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.remote.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Empty both tables.
    pub fn clear(&self) {
        self.local.clear();
        self.remote.clear();
    }
}
