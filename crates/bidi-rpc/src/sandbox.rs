//! Invocation boundary for user code.
//!
//! Methods and startup handlers are arbitrary user futures. Whatever they do,
//! the engine only ever sees an explicit `Result`: panics raised while
//! building the future or while polling it become [`Error::Panicked`].

use crate::error::{Error, Result};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tracing::warn;

/// Run `start` and the future it returns, capturing panics from both.
pub fn sandbox<T, F>(start: F) -> BoxFuture<'static, Result<T>>
where
    T: Send + 'static,
    F: FnOnce() -> BoxFuture<'static, Result<T>>,
{
    match panic::catch_unwind(AssertUnwindSafe(start)) {
        Ok(fut) => AssertUnwindSafe(fut)
            .catch_unwind()
            .map(|caught| caught.unwrap_or_else(|payload| Err(panicked(&*payload))))
            .boxed(),
        Err(payload) => future::ready(Err(panicked(&*payload))).boxed(),
    }
}

fn panicked(payload: &(dyn Any + Send)) -> Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    warn!("Sandboxed invocation panicked: {}", message);
    Error::Panicked(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn test_success_passes_through() {
        let outcome = sandbox(|| async { Ok(json!("ok")) }.boxed()).await;
        assert_eq!(outcome.unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_failure_passes_through() {
        let outcome: Result<Value> = sandbox(|| async { Err(Error::rejected("bad")) }.boxed()).await;
        assert!(matches!(outcome, Err(Error::Rejected(v)) if v == json!("bad")));
    }

    #[tokio::test]
    async fn test_panic_while_building() {
        let outcome: Result<Value> = sandbox(|| panic!("before the future")).await;
        assert!(matches!(outcome, Err(Error::Panicked(m)) if m == "before the future"));
    }

    #[tokio::test]
    async fn test_panic_while_polling() {
        let outcome: Result<Value> = sandbox(|| {
            async {
                tokio::task::yield_now().await;
                let reason = "the future";
                if !reason.is_empty() {
                    panic!("inside {reason}");
                }
                Ok(Value::Null)
            }
            .boxed()
        })
        .await;
        assert!(matches!(outcome, Err(Error::Panicked(m)) if m == "inside the future"));
    }
}
