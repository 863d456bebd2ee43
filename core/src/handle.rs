//! Cancellable request handle.
//!
//! # Design
//! A handle pairs an [`AbortHandle`] with a [`ResponseFuture`]. Both share a
//! one-shot settlement slot: whichever of transport completion, abort or
//! build failure reaches it first wins, and every later attempt is a no-op.
//! Aborting also fires the request's `CancellationToken` so async transports
//! drop their in-flight work.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AdapterError;

pub(crate) type Outcome = Result<Value, AdapterError>;

#[derive(Debug)]
pub(crate) struct Settlement {
    slot: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl Settlement {
    /// Deliver `outcome` if nothing has been delivered yet.
    pub(crate) fn settle(&self, outcome: Outcome) -> bool {
        let Some(sender) = self.slot.lock().take() else {
            return false;
        };
        // The receiver may already be gone; the request still counts as settled.
        let _ = sender.send(outcome);
        true
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// Cloneable abort trigger for one request.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    settlement: Arc<Settlement>,
    token: CancellationToken,
}

impl AbortHandle {
    /// Reject the request with [`AdapterError::Aborted`] unless it already
    /// settled. Idempotent.
    pub fn abort(&self) {
        if self.settlement.settle(Err(AdapterError::Aborted)) {
            debug!("request aborted");
            self.token.cancel();
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settlement.is_settled()
    }
}

/// Resolves with the parsed success body or the request's failure.
#[derive(Debug)]
pub struct ResponseFuture {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for ResponseFuture {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(AdapterError::Interrupted)))
    }
}

/// Returned synchronously by every verb method.
///
/// Await it directly (`handle.await`) or split it with
/// [`RequestHandle::into_parts`] to move the abort trigger elsewhere.
#[derive(Debug)]
pub struct RequestHandle {
    abort: AbortHandle,
    promise: ResponseFuture,
}

impl RequestHandle {
    /// A handle that has not settled, plus the sender side for the request task.
    pub(crate) fn pending() -> (Self, Arc<Settlement>, CancellationToken) {
        let (tx, rx) = oneshot::channel();
        let settlement = Arc::new(Settlement {
            slot: Mutex::new(Some(tx)),
        });
        let token = CancellationToken::new();
        let handle = RequestHandle {
            abort: AbortHandle {
                settlement: settlement.clone(),
                token: token.clone(),
            },
            promise: ResponseFuture { rx },
        };
        (handle, settlement, token)
    }

    /// A handle that is already settled with `outcome`.
    pub(crate) fn settled(outcome: Outcome) -> Self {
        let (handle, settlement, _) = Self::pending();
        settlement.settle(outcome);
        handle
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_settled(&self) -> bool {
        self.abort.is_settled()
    }

    pub fn into_parts(self) -> (AbortHandle, ResponseFuture) {
        (self.abort, self.promise)
    }
}

impl IntoFuture for RequestHandle {
    type Output = Outcome;
    type IntoFuture = ResponseFuture;

    fn into_future(self) -> Self::IntoFuture {
        self.promise
    }
}
