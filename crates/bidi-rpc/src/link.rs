//! In-process link between two sessions.

use crate::connection::Connection;
use crate::error::Result;

use std::convert::Infallible;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span};

/// Configuration for an in-memory link.
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Messages buffered per direction before the sender sees backpressure.
    pub capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Two sessions wired to each other through bounded in-memory channels.
///
/// Dropping the link leaves both sessions running; use
/// [`shutdown`](Self::shutdown) to tear them down.
#[derive(Debug)]
pub struct Link {
    sessions: (Connection, Connection),
    drivers: [JoinHandle<()>; 2],
}

/// Connect `a` and `b` with the default configuration.
///
/// # Errors
///
/// Returns [`Error::AlreadyAttached`](crate::Error::AlreadyAttached) if
/// either session is already bound to a transport.
pub fn link(a: &Connection, b: &Connection) -> Result<Link> {
    link_with_config(a, b, &LinkConfig::default())
}

/// Connect `a` and `b`.
///
/// Must be called within a Tokio runtime.
///
/// # Errors
///
/// Returns [`Error::AlreadyAttached`](crate::Error::AlreadyAttached) if
/// either session is already bound to a transport.
pub fn link_with_config(a: &Connection, b: &Connection, config: &LinkConfig) -> Result<Link> {
    let a_queue = a.take_outbound()?;
    let b_queue = match b.take_outbound() {
        Ok(queue) => queue,
        Err(e) => {
            a.restore_outbound(a_queue);
            return Err(e);
        }
    };

    let (a_to_b_tx, a_to_b_rx) = flume::bounded(config.capacity);
    let (b_to_a_tx, b_to_a_rx) = flume::bounded(config.capacity);

    let a_driver = {
        let session = a.clone();
        tokio::spawn(
            async move {
                let inbound = b_to_a_rx.into_stream().map(Ok::<_, Infallible>);
                session.drive(inbound, a_queue, a_to_b_tx.into_sink()).await;
            }
            .instrument(debug_span!("link", side = "a")),
        )
    };

    let b_driver = {
        let session = b.clone();
        tokio::spawn(
            async move {
                let inbound = a_to_b_rx.into_stream().map(Ok::<_, Infallible>);
                session.drive(inbound, b_queue, b_to_a_tx.into_sink()).await;
            }
            .instrument(debug_span!("link", side = "b")),
        )
    };

    debug!(capacity = config.capacity, "Linked sessions");
    Ok(Link {
        sessions: (a.clone(), b.clone()),
        drivers: [a_driver, b_driver],
    })
}

impl Link {
    /// The two linked sessions, in the order they were given.
    #[must_use]
    pub const fn sessions(&self) -> (&Connection, &Connection) {
        (&self.sessions.0, &self.sessions.1)
    }

    /// Close the transport in both directions and wait for both sessions to
    /// finish tearing down.
    pub async fn shutdown(self) {
        self.sessions.0.close();
        self.sessions.1.close();

        for driver in self.drivers {
            if let Err(e) = driver.await {
                debug!(error = %e, "Link driver ended abnormally");
            }
        }
    }
}
