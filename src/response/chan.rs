//! Channel-backed response shared by the WebSocket transport and the proxy.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::{DoneSignal, Response};
use crate::types::OperationResponse;
use crate::{Error, Result};

type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct Delivery {
    item: OperationResponse,
    taken: oneshot::Sender<()>,
}

/// Single-writer/single-reader response backed by a rendezvous channel.
///
/// [`send`](ChanResponse::send) resolves once the consumer has taken the item
/// through `next()`, or as soon as the stream is closed, whichever comes first.
/// A producer can therefore never outlive shutdown waiting on an absent consumer.
pub struct ChanResponse {
    tx: mpsc::Sender<Delivery>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Delivery>>,
    current: Mutex<OperationResponse>,
    err: Mutex<Option<Error>>,
    teardown: Mutex<Option<Teardown>>,
    closed: Mutex<bool>,
    exhausted: AtomicBool,
    done: DoneSignal,
}

impl ChanResponse {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            current: Mutex::new(OperationResponse::default()),
            err: Mutex::new(None),
            teardown: Mutex::new(None),
            closed: Mutex::new(false),
            exhausted: AtomicBool::new(false),
            done: DoneSignal::new(),
        }
    }

    /// A response whose `close()` first runs `teardown` (e.g. "unsubscribe on
    /// the wire"). A teardown error becomes the stream's terminal error.
    pub fn with_teardown<F, Fut>(teardown: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let res = Self::new();
        *res.teardown.lock() = Some(Box::new(move || Box::pin(teardown())));
        res
    }

    /// Hand one envelope to the consumer. Returns `false` if the stream closed
    /// before the consumer took it.
    pub async fn send(&self, item: OperationResponse) -> bool {
        if self.is_closed() {
            return false;
        }

        let (taken_tx, taken_rx) = oneshot::channel();
        let delivery = Delivery {
            item,
            taken: taken_tx,
        };

        tokio::select! {
            queued = self.tx.send(delivery) => {
                if queued.is_err() {
                    return false;
                }
            }
            _ = self.done.wait() => return false,
        }

        tokio::select! {
            taken = taken_rx => taken.is_ok(),
            _ = self.done.wait() => false,
        }
    }

    /// Close the channel side only. Pending and future `send`s become no-ops,
    /// pending and future `next`s return `false`.
    pub fn close_channel(&self) {
        let mut closed = self.closed.lock();
        if *closed {
            return;
        }
        *closed = true;
        drop(closed);
        self.done.fire();
    }

    /// Record `err` as the terminal error (first error wins) and close.
    pub fn close_with_error(&self, err: Error) {
        self.set_err(err);
        self.close_channel();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    fn set_err(&self, err: Error) {
        let mut slot = self.err.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

impl Default for ChanResponse {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Response for ChanResponse {
    async fn next(&self) -> bool {
        if self.exhausted.load(Ordering::Acquire) || self.err.lock().is_some() {
            self.exhausted.store(true, Ordering::Release);
            return false;
        }

        let mut rx = self.rx.lock().await;
        let delivery = tokio::select! {
            biased;
            _ = self.done.wait() => None,
            d = rx.recv() => d,
        };

        match delivery {
            Some(d) => {
                *self.current.lock() = d.item;
                let _ = d.taken.send(());
                true
            }
            None => {
                self.exhausted.store(true, Ordering::Release);
                false
            }
        }
    }

    fn current(&self) -> OperationResponse {
        self.current.lock().clone()
    }

    async fn close(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            if let Err(e) = teardown().await {
                self.set_err(e);
            }
        }
        self.close_channel();
    }

    fn err(&self) -> Option<Error> {
        self.err.lock().clone()
    }

    fn done(&self) -> DoneSignal {
        self.done.clone()
    }
}
