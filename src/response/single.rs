use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{DoneSignal, Response};
use crate::types::OperationResponse;
use crate::Error;

/// One-item stream around an already materialized envelope.
///
/// `err()` is always `None`: a transport producing one of these must surface
/// its failures before constructing it.
pub struct SingleResponse {
    item: OperationResponse,
    consumed: AtomicBool,
    done: DoneSignal,
}

impl SingleResponse {
    pub fn new(item: OperationResponse) -> Self {
        Self {
            item,
            consumed: AtomicBool::new(false),
            done: DoneSignal::new(),
        }
    }
}

#[async_trait]
impl Response for SingleResponse {
    async fn next(&self) -> bool {
        if self.consumed.swap(true, Ordering::AcqRel) {
            self.done.fire();
            return false;
        }
        true
    }

    fn current(&self) -> OperationResponse {
        self.item.clone()
    }

    async fn close(&self) {
        self.consumed.store(true, Ordering::Release);
        self.done.fire();
    }

    fn err(&self) -> Option<Error> {
        None
    }

    fn done(&self) -> DoneSignal {
        self.done.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn yields_exactly_once() {
        let res = SingleResponse::new(OperationResponse::from_data(json!({"x": 1})));
        assert!(!res.done().is_done());
        assert!(res.next().await);
        assert_eq!(res.current().data, Some(json!({"x": 1})));
        assert!(!res.done().is_done());
        assert!(!res.next().await);
        assert!(res.done().is_done());
        assert!(!res.next().await);
        res.close().await;
        res.close().await;
        assert!(res.err().is_none());
        assert!(res.done().is_done());
    }

    #[tokio::test]
    async fn close_before_next_ends_the_stream() {
        let res = SingleResponse::new(OperationResponse::from_data(json!(1)));
        let done = res.done();
        res.close().await;
        assert!(done.is_done());
        assert!(!res.next().await);
    }
}
