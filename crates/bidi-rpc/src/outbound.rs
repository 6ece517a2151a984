//! Outbound flow control.
//!
//! The engine never waits on the transport: every emitted message goes into
//! an unbounded FIFO [`Outbox`]. The transport side drains it through
//! [`Outbound`], and [`forward`] feeds a [`Sink`] whose readiness is the
//! backpressure signal. While the sink is not ready, messages stay queued in
//! emission order.

use crate::protocol::Message;

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

/// Producer half of the outbound queue.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Message>,
    closed: Arc<AtomicBool>,
}

impl Outbox {
    /// Queue `message` for the transport. Returns `false` if the session is
    /// closed and the message was dropped.
    pub fn push(&self, message: Message) -> bool {
        if self.closed.load(Ordering::Acquire) {
            debug!(method = message.method(), "Dropping outbound message after close");
            return false;
        }

        match self.tx.send(message) {
            Ok(()) => true,
            Err(mpsc::error::SendError(message)) => {
                debug!(method = message.method(), "Outbound queue detached, dropping message");
                false
            }
        }
    }

    /// Refuse further messages.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Consumer half of the outbound queue, yielding messages in emission order.
#[derive(Debug)]
pub struct Outbound {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Outbound {
    /// Messages waiting for the transport.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}

impl Stream for Outbound {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

/// Create a connected outbox/outbound pair.
#[must_use]
pub fn channel() -> (Outbox, Outbound) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Outbox {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        },
        Outbound { rx },
    )
}

/// Feed outbound messages into `sink` in order, flushing whenever the queue
/// runs dry.
///
/// # Errors
///
/// Returns the sink's error; the message being fed at that point is lost.
pub async fn forward<S>(mut outbound: Outbound, mut sink: S) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    while let Some(message) = outbound.next().await {
        sink.feed(message).await?;

        if outbound.queued() == 0 {
            sink.flush().await?;
        }
    }

    sink.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageId;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::convert::Infallible;
    use std::task::Waker;
    use std::time::Duration;

    /// Sink that refuses messages until opened.
    #[derive(Clone, Default)]
    struct Gate {
        open: Arc<AtomicBool>,
        waker: Arc<Mutex<Option<Waker>>>,
        delivered: Arc<Mutex<Vec<Message>>>,
    }

    impl Gate {
        fn open(&self) {
            self.open.store(true, Ordering::Release);
            if let Some(waker) = self.waker.lock().take() {
                waker.wake();
            }
        }

        fn delivered(&self) -> Vec<Message> {
            self.delivered.lock().clone()
        }
    }

    impl Sink<Message> for Gate {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            if self.open.load(Ordering::Acquire) {
                Poll::Ready(Ok(()))
            } else {
                *self.waker.lock() = Some(cx.waker().clone());
                Poll::Pending
            }
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Infallible> {
            self.delivered.lock().push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }
    }

    fn ack() -> (MessageId, Message) {
        let id = MessageId::new();
        (
            id,
            Message::Resolve {
                id,
                result: Value::Null,
            },
        )
    }

    #[tokio::test]
    async fn test_backpressure_preserves_order() {
        let (outbox, outbound) = channel();
        let gate = Gate::default();
        let pump = tokio::spawn(forward(outbound, gate.clone()));

        let ids: Vec<_> = (0..16)
            .map(|_| {
                let (id, message) = ack();
                assert!(outbox.push(message));
                id
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(gate.delivered().is_empty());

        gate.open();
        tokio::time::timeout(Duration::from_secs(1), async {
            while gate.delivered().len() < ids.len() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("queued messages were not drained");

        let delivered: Vec<_> = gate
            .delivered()
            .iter()
            .filter_map(Message::id)
            .collect();
        assert_eq!(delivered, ids);

        pump.abort();
    }

    #[test]
    fn test_closed_outbox_drops() {
        let (outbox, outbound) = channel();
        outbox.close();

        assert!(outbox.is_closed());
        assert!(!outbox.push(Message::RemoteReady));
        assert_eq!(outbound.queued(), 0);
    }

    #[test]
    fn test_queue_is_fifo() {
        let (outbox, mut outbound) = channel();
        let (first, a) = ack();
        let (second, b) = ack();
        outbox.push(a);
        outbox.push(b);

        assert_eq!(outbound.queued(), 2);
        let drained: Vec<_> = std::iter::from_fn(|| outbound.rx.try_recv().ok())
            .filter_map(|m| m.id())
            .collect();
        assert_eq!(drained, vec![first, second]);
    }
}
