//! The session engine.
//!
//! A [`Connection`] is one end of a link. Both ends run the same engine:
//! each exposes methods to the other, mirrors what the other exposes, and
//! may call it. Inbound messages are interpreted one at a time in arrival
//! order; everything the engine emits goes through a FIFO outbox that the
//! transport drains at its own pace.

use crate::error::{Error, Result};
use crate::handler::StartupHandler;
use crate::methods::{Invocation, Method, MethodTable, Reporter};
use crate::outbound::{self, Outbound, Outbox};
use crate::protocol::{Message, MessageId};
use crate::registry::{Purpose, Registry, Watch};
use crate::remote::{Remote, RemoteMethod};
use crate::sandbox::sandbox;

use std::fmt::{self, Display};
use std::future::Future;
use std::pin::{Pin, pin};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{FutureExt, Sink, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{Instrument, debug, debug_span, info, instrument, warn};

/// Session configuration.
#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    /// Upper bound on how long a proxy call waits for its result. `None`
    /// waits until the peer answers or the session closes.
    pub call_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Bound proxy calls by `timeout`.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// Session lifecycle as seen from this end.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionState {
    /// The peer has not reported its startup outcome yet.
    Starting,
    /// The peer's startup handler succeeded.
    Ready,
    /// The peer's startup handler failed with this value.
    Failed(Value),
    /// The transport ended; nothing further is processed.
    Closed,
}

pub(crate) struct Shared {
    config: SessionConfig,
    methods: MethodTable,
    registry: Registry,
    outbox: Outbox,
    outbound: Mutex<Option<Outbound>>,
    state: watch::Sender<SessionState>,
    /// Last handshake received from the peer. Survives close.
    handshake: Mutex<SessionState>,
    /// Serializes inbound processing against local table and registry
    /// mutations.
    turn: Mutex<()>,
}

/// Handle to one session. Cheap to clone; all clones share the engine.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Create a session and run `handler` on it.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(handler: impl StartupHandler) -> Self {
        Self::with_config(handler, SessionConfig::default())
    }

    /// Create a session with explicit configuration and run `handler` on it.
    ///
    /// Must be called within a Tokio runtime.
    pub fn with_config(handler: impl StartupHandler, config: SessionConfig) -> Self {
        Self::from_handler(Arc::new(handler), config)
    }

    /// Create a session that exposes nothing up front and reports ready
    /// straight away.
    #[must_use]
    pub fn passive() -> Self {
        let session = Self::unstarted(SessionConfig::default());
        session.shared.outbox.push(Message::RemoteReady);
        session
    }

    pub(crate) fn from_handler(handler: Arc<dyn StartupHandler>, config: SessionConfig) -> Self {
        let session = Self::unstarted(config);
        session.start(handler);
        session
    }

    pub(crate) const fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    fn unstarted(config: SessionConfig) -> Self {
        let (outbox, outbound) = outbound::channel();
        let (state, _) = watch::channel(SessionState::Starting);

        Self {
            shared: Arc::new(Shared {
                config,
                methods: MethodTable::new(),
                registry: Registry::new(),
                outbox,
                outbound: Mutex::new(Some(outbound)),
                state,
                handshake: Mutex::new(SessionState::Starting),
                turn: Mutex::new(()),
            }),
        }
    }

    fn start(&self, handler: Arc<dyn StartupHandler>) {
        let session = self.clone();

        tokio::spawn(
            async move {
                let outcome = {
                    let session = session.clone();
                    sandbox(move || async move { handler.start(session).await }.boxed()).await
                };

                let handshake = match outcome {
                    Ok(()) => {
                        debug!("Startup handler completed");
                        Message::RemoteReady
                    }
                    Err(e) => {
                        warn!(error = %e, "Startup handler failed");
                        Message::RemoteError {
                            error: e.into_value(),
                        }
                    }
                };
                session.shared.outbox.push(handshake);
            }
            .instrument(debug_span!("startup")),
        );
    }

    /// Wait for the peer's startup handler to finish. A handshake that
    /// arrived before the session closed is still reported after close.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] with the peer's failure if its handler
    /// failed, or [`Error::ConnectionClosed`] if the session ended first.
    pub async fn ready(&self) -> Result<()> {
        let mut state = self.shared.state.subscribe();
        let settled = state
            .wait_for(|state| *state != SessionState::Starting)
            .await
            .map_err(|_| Error::ConnectionClosed)?
            .clone();
        let settled = match settled {
            SessionState::Closed => self.shared.handshake.lock().clone(),
            settled => settled,
        };

        match settled {
            SessionState::Ready => Ok(()),
            SessionState::Failed(error) => Err(Error::Startup(error)),
            SessionState::Starting | SessionState::Closed => Err(Error::ConnectionClosed),
        }
    }

    /// Expose `method` to the peer under `name` and wait for the peer to
    /// acknowledge it.
    ///
    /// # Errors
    ///
    /// Fails without sending anything with [`Error::AlreadyRegistered`] if
    /// `name` is already exposed locally. Returns [`Error::Rejected`] if the
    /// peer refuses; the method then stays registered locally.
    #[instrument(skip(self, method))]
    pub async fn register(&self, name: &str, method: impl Method) -> Result<()> {
        let watch = {
            let _turn = self.shared.turn.lock();
            self.ensure_open()?;
            self.shared.methods.register_local(name, Arc::new(method))?;

            let id = MessageId::new();
            match self
                .shared
                .registry
                .watch(id, Purpose::Register(name.to_string()), false)
            {
                Ok(watch) => {
                    self.shared.outbox.push(Message::Register {
                        id,
                        name: name.to_string(),
                    });
                    watch
                }
                Err(e) => {
                    self.shared.methods.remove_local(name);
                    return Err(e);
                }
            }
        };

        watch.outcome().await?;
        debug!("Peer acknowledged registration");
        Ok(())
    }

    /// Stop exposing `name` and wait for the peer to acknowledge it.
    ///
    /// The method keeps serving calls until the acknowledgement is
    /// processed.
    ///
    /// # Errors
    ///
    /// Fails without sending anything with [`Error::NotRegistered`] if
    /// `name` is not exposed locally or is already being withdrawn. Returns
    /// [`Error::Rejected`] if the peer refuses; the method then stays
    /// registered.
    #[instrument(skip(self))]
    pub async fn deregister(&self, name: &str) -> Result<()> {
        let watch = {
            let _turn = self.shared.turn.lock();
            self.ensure_open()?;
            self.shared.methods.deregister_local(name)?;

            let id = MessageId::new();
            match self
                .shared
                .registry
                .watch(id, Purpose::Deregister(name.to_string()), false)
            {
                Ok(watch) => {
                    self.shared.outbox.push(Message::Deregister {
                        id,
                        name: name.to_string(),
                    });
                    watch
                }
                Err(e) => {
                    self.shared.methods.abort_deregister(name);
                    return Err(e);
                }
            }
        };

        watch.outcome().await?;
        debug!("Peer acknowledged deregistration");
        Ok(())
    }

    /// Send a call for the peer method `name` without checking the mirror.
    /// The outcome is the peer's answer; an unknown name is rejected by the
    /// peer.
    pub fn call(&self, name: &str, args: Vec<Value>) -> PendingCall {
        let _turn = self.shared.turn.lock();
        let id = MessageId::new();

        match self
            .shared
            .registry
            .watch(id, Purpose::Call(name.to_string()), true)
        {
            Ok(watch) => {
                self.shared.outbox.push(Message::Call {
                    id,
                    name: name.to_string(),
                    args,
                });
                PendingCall::new(watch)
            }
            Err(e) => PendingCall::failed(e),
        }
    }

    /// Wait for `pending`, bounded by the configured call timeout.
    pub(crate) async fn complete(&self, pending: PendingCall) -> Result<Value> {
        let Some(limit) = self.shared.config.call_timeout else {
            return pending.await;
        };

        let id = pending.id();
        if let Ok(outcome) = tokio::time::timeout(limit, pending).await {
            outcome
        } else {
            if let Some(id) = id {
                self.shared.registry.forget(id);
            }
            warn!(?id, "Call timed out after {:?}", limit);
            Err(Error::Timeout(limit))
        }
    }

    /// The peer's current interface.
    #[must_use]
    pub fn remote(&self) -> Remote {
        Remote::new(self.clone())
    }

    /// Interpret one inbound message. Messages must be fed in arrival order.
    ///
    /// Calls are dispatched to their methods as independent tasks, so this
    /// must be called within a Tokio runtime.
    pub fn handle(&self, message: Message) {
        let _turn = self.shared.turn.lock();
        if self.is_closed() {
            debug!(method = message.method(), "Ignoring inbound message after close");
            return;
        }

        match message {
            Message::RemoteReady => {
                debug!("Peer is ready");
                *self.shared.handshake.lock() = SessionState::Ready;
                self.shared.state.send_replace(SessionState::Ready);
            }
            Message::RemoteError { error } => {
                warn!(%error, "Peer startup failed");
                *self.shared.handshake.lock() = SessionState::Failed(error.clone());
                self.shared.state.send_replace(SessionState::Failed(error));
            }
            Message::Register { id, name } => {
                let proxy = RemoteMethod::new(&name, self);
                let outcome = self.shared.methods.set_remote(&name, proxy);
                self.acknowledge(id, "register", &name, outcome);
            }
            Message::Deregister { id, name } => {
                let outcome = self.shared.methods.clear_remote(&name);
                self.acknowledge(id, "deregister", &name, outcome);
            }
            Message::Call { id, name, args } => self.dispatch(id, name, args),
            Message::Resolve { id, result } => {
                if let Some(settlement) = self.shared.registry.take(id) {
                    if let Purpose::Deregister(name) = settlement.purpose() {
                        self.shared.methods.finish_deregister(name);
                    }
                    settlement.resolve(result);
                }
            }
            Message::Reject { id, error } => {
                if let Some(settlement) = self.shared.registry.take(id) {
                    if let Purpose::Deregister(name) = settlement.purpose() {
                        self.shared.methods.abort_deregister(name);
                    }
                    settlement.reject(error);
                }
            }
            Message::Progress { id, progress } => {
                self.shared.registry.progress(id, progress);
            }
        }
    }

    fn acknowledge(&self, id: MessageId, request: &str, name: &str, outcome: Result<()>) {
        let reply = match outcome {
            Ok(()) => {
                debug!(%id, name, "Accepted peer {}", request);
                Message::Resolve {
                    id,
                    result: Value::Null,
                }
            }
            Err(e) => {
                debug!(%id, name, error = %e, "Refused peer {}", request);
                Message::Reject {
                    id,
                    error: e.into_value(),
                }
            }
        };
        self.shared.outbox.push(reply);
    }

    fn dispatch(&self, id: MessageId, name: String, args: Vec<Value>) {
        let reporter = Reporter::new(id, self.shared.outbox.clone());
        let invocation = Invocation::new(id, name.clone(), args, self.clone(), reporter.clone());

        match self.shared.methods.invoke_local(&name, invocation) {
            Ok(outcome) => {
                tokio::spawn(
                    async move { reporter.settle(outcome.await) }
                        .instrument(debug_span!("invocation", %id, method = %name)),
                );
            }
            Err(e) => {
                debug!(%id, error = %e, "Rejecting call");
                self.shared.outbox.push(Message::Reject {
                    id,
                    error: e.into_value(),
                });
            }
        }
    }

    /// Tear the session down: pending requests fail with
    /// [`Error::ConnectionClosed`], both method tables are emptied and
    /// nothing further is sent or processed. Idempotent.
    pub fn close(&self) {
        let _turn = self.shared.turn.lock();
        let newly_closed = self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Closed {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
        if !newly_closed {
            return;
        }

        self.shared.outbox.close();
        let failed = self.shared.registry.drain_all();
        self.shared.methods.clear();
        info!(failed, "Session closed");
    }

    /// Take the outbound message stream to drive a transport by hand.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyAttached`] if it was taken before.
    pub fn take_outbound(&self) -> Result<Outbound> {
        self.shared.outbound.lock().take().ok_or(Error::AlreadyAttached)
    }

    pub(crate) fn restore_outbound(&self, queue: Outbound) {
        *self.shared.outbound.lock() = Some(queue);
    }

    /// Drive the session over a message transport until either direction
    /// ends, then close it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyAttached`] if the session is already bound to
    /// a transport. Transport failures end the session and are logged.
    #[instrument(skip_all)]
    pub async fn run<I, O, E>(&self, inbound: I, sink: O) -> Result<()>
    where
        I: Stream<Item = std::result::Result<Message, E>> + Send,
        E: Display + Send,
        O: Sink<Message> + Send,
        O::Error: Display + Send,
    {
        let queue = self.take_outbound()?;
        self.drive(inbound, queue, sink).await;
        Ok(())
    }

    pub(crate) async fn drive<I, O, E>(&self, inbound: I, queue: Outbound, sink: O)
    where
        I: Stream<Item = std::result::Result<Message, E>> + Send,
        E: Display + Send,
        O: Sink<Message> + Send,
        O::Error: Display + Send,
    {
        let mut inbound = pin!(inbound);
        let sink = pin!(sink);
        let mut state = self.shared.state.subscribe();

        let reader = async {
            while let Some(next) = inbound.next().await {
                match next {
                    Ok(message) => self.handle(message),
                    Err(e) => {
                        warn!(error = %e, "Inbound transport failed");
                        return;
                    }
                }
            }
            debug!("Inbound transport ended");
        };

        let writer = async {
            if let Err(e) = outbound::forward(queue, sink).await {
                warn!(error = %e, "Outbound transport failed");
            }
        };

        let closed = async {
            let _ = state
                .wait_for(|state| *state == SessionState::Closed)
                .await;
        };

        tokio::select! {
            () = reader => {}
            () = writer => {}
            () = closed => {}
        }

        self.close();
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shared.state.borrow() == SessionState::Closed
    }

    /// Outstanding registrations, deregistrations and calls.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.shared.registry.len()
    }

    /// Names this side exposes, including those being withdrawn.
    #[must_use]
    pub fn local_methods(&self) -> Vec<String> {
        self.shared.methods.local_names()
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub(crate) fn methods(&self) -> &MethodTable {
        &self.shared.methods
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pending", &self.pending_operations())
            .field("local", &self.local_methods())
            .finish_non_exhaustive()
    }
}

/// Outcome of a call in flight.
///
/// Resolves to the peer's result. Progress notifications sent before the
/// result are available through [`progress`](Self::progress).
pub struct PendingCall {
    id: Option<MessageId>,
    outcome: Outcome,
    progress: Option<UnboundedReceiverStream<Value>>,
}

enum Outcome {
    Waiting(oneshot::Receiver<Result<Value>>),
    Failed(Option<Error>),
}

impl PendingCall {
    fn new(watch: Watch) -> Self {
        let (id, outcome, progress) = watch.into_parts();
        Self {
            id: Some(id),
            outcome: Outcome::Waiting(outcome),
            progress: progress.map(UnboundedReceiverStream::new),
        }
    }

    pub(crate) const fn failed(error: Error) -> Self {
        Self {
            id: None,
            outcome: Outcome::Failed(Some(error)),
            progress: None,
        }
    }

    /// Correlation id of the call, absent if it was never sent.
    #[must_use]
    pub const fn id(&self) -> Option<MessageId> {
        self.id
    }

    /// Take the stream of progress notifications. It ends once the call
    /// settles; later calls get an empty stream.
    pub fn progress(&mut self) -> Progress {
        Progress(self.progress.take())
    }
}

impl Future for PendingCall {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<Value>> {
        match &mut self.outcome {
            Outcome::Waiting(outcome) => Pin::new(outcome)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(Error::ConnectionClosed))),
            Outcome::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(Error::ConnectionClosed)))
            }
        }
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Progress notifications of one call, in the order the method sent them.
#[derive(Debug)]
pub struct Progress(Option<UnboundedReceiverStream<Value>>);

impl Stream for Progress {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        match self.0.as_mut() {
            Some(stream) => Pin::new(stream).poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}
