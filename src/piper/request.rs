//! Typed request carriers and their completion sinks.
//!
//! Every public API call becomes one [`Request`] posted to the I/O thread.
//! A request resolves exactly once through its [`Sink`]: a promise backing
//! a [`Pending`] future, or a move-only callback run on the thread that
//! drains it. If a sink is ever dropped unfired (a handler bailed early, a
//! task was cancelled during shutdown), the drop guard completes it with
//! [`CANCELLED`](crate::codes::CANCELLED), so callers never hang.

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::codes;
use crate::framing::{FrameHeader, HEADER_SIZE};
use crate::{Descriptor, PiperError, Result};

/// Completion values that have a cancelled form.
pub(crate) trait Cancelable {
    fn cancelled() -> Self;
}

impl Cancelable for i32 {
    fn cancelled() -> Self {
        codes::CANCELLED
    }
}

impl Cancelable for (Descriptor, i32) {
    fn cancelled() -> Self {
        (0, codes::CANCELLED)
    }
}

enum SinkInner<T> {
    Promise(oneshot::Sender<T>),
    Callback(Box<dyn FnOnce(T) + Send>),
}

/// One-shot completion sink; fires exactly once.
pub(crate) struct Sink<T: Cancelable> {
    inner: Option<SinkInner<T>>,
}

impl<T: Cancelable> Sink<T> {
    /// Promise-backed sink plus the caller-side handle observing it.
    pub fn promise() -> (Self, Pending<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner: Some(SinkInner::Promise(tx)),
            },
            Pending { rx },
        )
    }

    /// Callback-backed sink; the callback runs on the draining thread.
    pub fn callback(callback: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            inner: Some(SinkInner::Callback(Box::new(callback))),
        }
    }

    /// Resolve with `value`.
    pub fn complete(mut self, value: T) {
        match self.inner.take() {
            Some(SinkInner::Promise(tx)) => {
                // The waiter may have given up on the future; that's fine.
                let _ = tx.send(value);
            }
            Some(SinkInner::Callback(callback)) => callback(value),
            None => {}
        }
    }
}

impl<T: Cancelable> Drop for Sink<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            match inner {
                SinkInner::Promise(tx) => {
                    let _ = tx.send(T::cancelled());
                }
                SinkInner::Callback(callback) => callback(T::cancelled()),
            }
        }
    }
}

/// Caller-side handle to a pending completion.
///
/// Must not be waited on from the I/O thread; the completion is produced
/// there, so waiting would deadlock.
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Pending<T> {
    /// Block until the request resolves.
    pub fn wait(self) -> Result<T> {
        self.rx.blocking_recv().map_err(|_| PiperError::Disconnected)
    }
}

/// A command posted from a caller thread to the I/O thread.
pub(crate) enum Request {
    Listen {
        address: String,
        sink: Sink<(Descriptor, i32)>,
    },
    Connect {
        address: String,
        sink: Sink<(Descriptor, i32)>,
    },
    Write {
        descriptor: Descriptor,
        header: [u8; HEADER_SIZE],
        payload: Bytes,
        sink: Sink<i32>,
    },
    Close {
        descriptor: Descriptor,
        sink: Sink<i32>,
    },
}

impl Request {
    /// Build a write request, packing the frame header up front.
    ///
    /// # Panics
    ///
    /// Panics if the payload exceeds the 32-bit framing limit; staying
    /// under it is a caller precondition.
    pub fn write(descriptor: Descriptor, payload: Bytes, sink: Sink<i32>) -> Self {
        assert!(
            payload.len() <= u32::MAX as usize,
            "message length exceeds the 32-bit framing limit"
        );
        let header = FrameHeader::new(payload.len() as u32).encode();
        Request::Write {
            descriptor,
            header,
            payload,
            sink,
        }
    }

    /// Complete with `CANCELLED` without performing the operation.
    pub fn abort(self) {
        match self {
            Request::Listen { sink, .. } | Request::Connect { sink, .. } => {
                sink.complete((0, codes::CANCELLED));
            }
            Request::Write { sink, .. } | Request::Close { sink, .. } => {
                sink.complete(codes::CANCELLED);
            }
        }
    }
}
