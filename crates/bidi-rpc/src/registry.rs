//! Correlation of outstanding requests with their terminal responses.

use crate::error::{Error, Result};
use crate::protocol::MessageId;

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// What an outstanding request was for.
///
/// Returned when the request settles so the session can finish any table
/// bookkeeping tied to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Purpose {
    /// Announcing a local method to the peer.
    Register(String),
    /// Withdrawing a local method from the peer.
    Deregister(String),
    /// Invoking a peer method.
    Call(String),
}

type Outcome = Result<Value>;

struct Pending {
    purpose: Purpose,
    outcome: oneshot::Sender<Outcome>,
    progress: Option<mpsc::UnboundedSender<Value>>,
}

#[derive(Default)]
struct State {
    pending: HashMap<MessageId, Pending>,
    closed: bool,
}

/// Handle held by the requester until the terminal response arrives.
pub struct Watch {
    id: MessageId,
    outcome: oneshot::Receiver<Outcome>,
    progress: Option<mpsc::UnboundedReceiver<Value>>,
}

impl Watch {
    /// The watched correlation id.
    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    /// Wait for the terminal response.
    ///
    /// # Errors
    ///
    /// Returns the peer's rejection, or [`Error::ConnectionClosed`] if the
    /// registry was drained first.
    pub async fn outcome(self) -> Result<Value> {
        self.outcome.await.map_err(|_| Error::ConnectionClosed)?
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        MessageId,
        oneshot::Receiver<Outcome>,
        Option<mpsc::UnboundedReceiver<Value>>,
    ) {
        (self.id, self.outcome, self.progress)
    }
}

/// Per-connection map from correlation id to pending operation.
#[derive(Default)]
pub struct Registry {
    state: Mutex<State>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if `id` is already tracked and
    /// [`Error::ConnectionClosed`] once the registry has been drained.
    pub fn watch(&self, id: MessageId, purpose: Purpose, with_progress: bool) -> Result<Watch> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ConnectionClosed);
        }

        match state.pending.entry(id) {
            Entry::Occupied(_) => Err(Error::DuplicateId(id)),
            Entry::Vacant(slot) => {
                let (outcome_tx, outcome_rx) = oneshot::channel();
                let (progress_tx, progress_rx) = if with_progress {
                    let (tx, rx) = mpsc::unbounded_channel();
                    (Some(tx), Some(rx))
                } else {
                    (None, None)
                };

                slot.insert(Pending {
                    purpose,
                    outcome: outcome_tx,
                    progress: progress_tx,
                });

                Ok(Watch {
                    id,
                    outcome: outcome_rx,
                    progress: progress_rx,
                })
            }
        }
    }

    /// Settle `id` successfully. Returns what the request was for, or `None`
    /// for an unknown id.
    pub fn resolve(&self, id: MessageId, result: Value) -> Option<Purpose> {
        self.settle(id, Ok(result))
    }

    /// Settle `id` with the peer's failure value.
    pub fn reject(&self, id: MessageId, error: Value) -> Option<Purpose> {
        self.settle(id, Err(Error::Rejected(error)))
    }

    /// Forward a progress value for `id`. Returns whether an observer got it.
    pub fn progress(&self, id: MessageId, value: Value) -> bool {
        let state = self.state.lock();
        let Some(pending) = state.pending.get(&id) else {
            warn!(%id, "Dropping progress for unknown request");
            return false;
        };

        pending
            .progress
            .as_ref()
            .is_some_and(|observer| observer.send(value).is_ok())
    }

    /// Stop tracking `id` without settling it.
    pub fn forget(&self, id: MessageId) -> Option<Purpose> {
        self.state
            .lock()
            .pending
            .remove(&id)
            .map(|pending| pending.purpose)
    }

    /// Reject every outstanding request with [`Error::ConnectionClosed`] and
    /// refuse new ones. Returns the number of requests failed.
    pub fn drain_all(&self) -> usize {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.pending)
        };

        let count = drained.len();
        for (id, pending) in drained {
            debug!(%id, purpose = ?pending.purpose, "Failing request on teardown");
            let _ = pending.outcome.send(Err(Error::ConnectionClosed));
        }
        count
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop tracking `id` and hand back the requester's end, so table
    /// bookkeeping can finish before the requester is woken.
    pub fn take(&self, id: MessageId) -> Option<Settlement> {
        let pending = self.state.lock().pending.remove(&id);
        if pending.is_none() {
            warn!(%id, "Received terminal response for unknown request");
        }
        pending.map(|pending| Settlement { id, pending })
    }

    fn settle(&self, id: MessageId, outcome: Outcome) -> Option<Purpose> {
        self.take(id).map(|settlement| settlement.deliver(outcome))
    }
}

/// A request that has left the registry but whose requester is not yet
/// woken.
pub struct Settlement {
    id: MessageId,
    pending: Pending,
}

impl Settlement {
    /// What the request was for.
    #[must_use]
    pub const fn purpose(&self) -> &Purpose {
        &self.pending.purpose
    }

    /// Wake the requester with `result`.
    pub fn resolve(self, result: Value) -> Purpose {
        self.deliver(Ok(result))
    }

    /// Wake the requester with the peer's failure value.
    pub fn reject(self, error: Value) -> Purpose {
        self.deliver(Err(Error::Rejected(error)))
    }

    fn deliver(self, outcome: Outcome) -> Purpose {
        if self.pending.outcome.send(outcome).is_err() {
            debug!(id = %self.id, "Requester went away before its response arrived");
        }
        self.pending.purpose
    }
}
