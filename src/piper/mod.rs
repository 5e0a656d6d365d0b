//! The Piper: one event loop, all pipes, a bridge from user threads.
//!
//! [`Piper::new`] spawns the I/O thread and calls the delegate's
//! `startup` on the constructor thread; dropping the Piper calls
//! `shutdown` on the destructor thread, stops the loop and joins.
//! [`PiperHandle`] is the cheap, clonable request surface; delegates
//! hold one to issue writes and closes from inside upcalls.
//!
//! Every operation comes in two forms:
//! - a future form returning [`Pending`]; block on it with
//!   [`Pending::wait`]. Must not be used from the I/O thread (it would
//!   deadlock on its own completion; debug builds assert).
//! - a callback form (`*_with`); safe from any thread, including inside
//!   delegate upcalls. The callback runs on the I/O thread.

mod core;
mod delegate;
mod pipe;
mod request;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;

use crate::{Descriptor, Result};

pub use delegate::PiperDelegate;
pub use request::Pending;

use self::core::Shared;
use self::request::{Request, Sink};

/// Clonable request surface of a running Piper.
///
/// Requests posted through a handle after the Piper stopped complete
/// immediately with [`CANCELLED`](crate::codes::CANCELLED).
#[derive(Clone)]
pub struct PiperHandle {
    shared: Arc<Shared>,
}

impl PiperHandle {
    /// Bind `address` and start listening for incoming connections.
    ///
    /// Resolves to `(descriptor, 0)` for the new listener pipe, or
    /// `(0, code)` on failure. Stale socket files are the caller's
    /// business: run [`crate::platform::delete_socket_file`] first.
    pub fn listen(&self, address: &str) -> Pending<(Descriptor, i32)> {
        self.assert_off_loop();
        let (sink, pending) = Sink::promise();
        self.shared.post(Request::Listen {
            address: address.to_owned(),
            sink,
        });
        pending
    }

    /// Callback form of [`listen`](Self::listen).
    pub fn listen_with(
        &self,
        address: &str,
        callback: impl FnOnce(Descriptor, i32) + Send + 'static,
    ) {
        self.shared.post(Request::Listen {
            address: address.to_owned(),
            sink: Sink::callback(move |(descriptor, code)| callback(descriptor, code)),
        });
    }

    /// Connect to a listening pipe at `address`.
    ///
    /// Resolves to `(descriptor, 0)` once the new pipe is registered and
    /// reading, or `(0, code)` on failure.
    pub fn connect(&self, address: &str) -> Pending<(Descriptor, i32)> {
        self.assert_off_loop();
        let (sink, pending) = Sink::promise();
        self.shared.post(Request::Connect {
            address: address.to_owned(),
            sink,
        });
        pending
    }

    /// Callback form of [`connect`](Self::connect).
    pub fn connect_with(
        &self,
        address: &str,
        callback: impl FnOnce(Descriptor, i32) + Send + 'static,
    ) {
        self.shared.post(Request::Connect {
            address: address.to_owned(),
            sink: Sink::callback(move |(descriptor, code)| callback(descriptor, code)),
        });
    }

    /// Send one framed message on `descriptor`.
    ///
    /// Resolves to `0` once the frame is on the wire; `NOT_CONNECTED` for
    /// an unknown descriptor, `UNSUPPORTED` for a listener, or a negated
    /// error code if the write failed. Writes posted from one thread to
    /// one descriptor complete in submission order.
    ///
    /// # Panics
    ///
    /// Panics if the message exceeds the 32-bit framing limit.
    pub fn write(&self, descriptor: Descriptor, message: impl Into<Bytes>) -> Pending<i32> {
        self.assert_off_loop();
        let (sink, pending) = Sink::promise();
        self.shared
            .post(Request::write(descriptor, message.into(), sink));
        pending
    }

    /// Callback form of [`write`](Self::write).
    pub fn write_with(
        &self,
        descriptor: Descriptor,
        message: impl Into<Bytes>,
        callback: impl FnOnce(i32) + Send + 'static,
    ) {
        self.shared.post(Request::write(
            descriptor,
            message.into(),
            Sink::callback(callback),
        ));
    }

    /// Close the pipe named by `descriptor`.
    ///
    /// Success resolves only after the pipe's destruction notification has
    /// fired: when the caller sees `0`, the resource is gone. Unknown
    /// descriptors resolve `NOT_CONNECTED`; if another close request is
    /// already pending on the pipe, `UNSUPPORTED`.
    pub fn close(&self, descriptor: Descriptor) -> Pending<i32> {
        self.assert_off_loop();
        let (sink, pending) = Sink::promise();
        self.shared.post(Request::Close { descriptor, sink });
        pending
    }

    /// Callback form of [`close`](Self::close).
    pub fn close_with(&self, descriptor: Descriptor, callback: impl FnOnce(i32) + Send + 'static) {
        self.shared.post(Request::Close {
            descriptor,
            sink: Sink::callback(callback),
        });
    }

    /// The future-returning API deadlocks on the I/O thread; catch that
    /// in debug builds.
    fn assert_off_loop(&self) {
        debug_assert!(
            !self.shared.on_io_thread(),
            "blocking piper calls must not be made from the I/O thread"
        );
    }
}

/// The transport component: owns the I/O thread and the delegate.
pub struct Piper {
    handle: PiperHandle,
    delegate: Arc<dyn PiperDelegate>,
    io_thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Piper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Piper").finish_non_exhaustive()
    }
}

impl Piper {
    /// Spawn the I/O thread, wait for the loop to come up, then run the
    /// delegate's `startup` on this thread. Either failure tears the
    /// Piper down and propagates.
    pub fn new(delegate: Arc<dyn PiperDelegate>) -> Result<Self> {
        let shared = Arc::new(Shared::new());
        let (init_tx, init_rx) = mpsc::channel();

        let io_thread = thread::Builder::new().name("pipelink-io".into()).spawn({
            let delegate = delegate.clone();
            let shared = shared.clone();
            move || self::core::run(delegate, shared, init_tx)
        })?;

        let initialized = init_rx
            .recv()
            .unwrap_or(Err(crate::PiperError::Disconnected));
        if let Err(err) = initialized {
            let _ = io_thread.join();
            return Err(err);
        }

        let handle = PiperHandle { shared };
        if let Err(err) = delegate.startup(&handle) {
            handle.shared.request_stop();
            let _ = io_thread.join();
            return Err(err);
        }

        Ok(Self {
            handle,
            delegate,
            io_thread: Some(io_thread),
        })
    }

    /// A clonable handle to this Piper's request surface.
    pub fn handle(&self) -> &PiperHandle {
        &self.handle
    }

    /// See [`PiperHandle::listen`].
    pub fn listen(&self, address: &str) -> Pending<(Descriptor, i32)> {
        self.handle.listen(address)
    }

    /// See [`PiperHandle::listen_with`].
    pub fn listen_with(
        &self,
        address: &str,
        callback: impl FnOnce(Descriptor, i32) + Send + 'static,
    ) {
        self.handle.listen_with(address, callback)
    }

    /// See [`PiperHandle::connect`].
    pub fn connect(&self, address: &str) -> Pending<(Descriptor, i32)> {
        self.handle.connect(address)
    }

    /// See [`PiperHandle::connect_with`].
    pub fn connect_with(
        &self,
        address: &str,
        callback: impl FnOnce(Descriptor, i32) + Send + 'static,
    ) {
        self.handle.connect_with(address, callback)
    }

    /// See [`PiperHandle::write`].
    pub fn write(&self, descriptor: Descriptor, message: impl Into<Bytes>) -> Pending<i32> {
        self.handle.write(descriptor, message)
    }

    /// See [`PiperHandle::write_with`].
    pub fn write_with(
        &self,
        descriptor: Descriptor,
        message: impl Into<Bytes>,
        callback: impl FnOnce(i32) + Send + 'static,
    ) {
        self.handle.write_with(descriptor, message, callback)
    }

    /// See [`PiperHandle::close`].
    pub fn close(&self, descriptor: Descriptor) -> Pending<i32> {
        self.handle.close(descriptor)
    }

    /// See [`PiperHandle::close_with`].
    pub fn close_with(&self, descriptor: Descriptor, callback: impl FnOnce(i32) + Send + 'static) {
        self.handle.close_with(descriptor, callback)
    }
}

impl Drop for Piper {
    fn drop(&mut self) {
        self.delegate.shutdown();
        self.handle.shared.request_stop();
        if let Some(io_thread) = self.io_thread.take() {
            let _ = io_thread.join();
        }
    }
}
