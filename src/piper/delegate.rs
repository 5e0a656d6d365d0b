//! The upcall surface between the Piper and user code.

use crate::framing::Collector;
use crate::piper::PiperHandle;
use crate::{Descriptor, Result};

/// Receives Piper events.
///
/// Construction and destruction upcalls run on the caller's thread; every
/// other upcall runs on the I/O thread. The Piper holds the delegate as a
/// shared trait object and releases it only after the loop has joined, so
/// late events cannot reach a half-dropped receiver.
pub trait PiperDelegate: Send + Sync {
    /// Called on the constructor thread once the I/O thread is running.
    ///
    /// Allowed to fail, in which case the loop is stopped and Piper
    /// construction aborts with the error. The Piper issues no requests of
    /// its own volition, so no other upcall arrives before `startup`
    /// initiates something.
    fn startup(&self, piper: &PiperHandle) -> Result<()>;

    /// Called on the destructor thread before the stop request is issued.
    ///
    /// Normally does not need to do anything; listeners and other open
    /// pipes are closed automatically. Must not fail.
    fn shutdown(&self);

    /// Called on the I/O thread when a listener accepts a connection.
    /// The new pipe is already readable.
    fn on_new_connection(&self, listener: Descriptor, pipe: Descriptor);

    /// Called on the I/O thread when a pipe has been closed: error, EOF,
    /// or Piper shutdown. The pipe is already gone from the descriptor
    /// table; the descriptor value is never reused.
    fn on_pipe_closed(&self, pipe: Descriptor, code: i32);

    /// Called on the I/O thread when a complete incoming message becomes
    /// available.
    ///
    /// The Collector must only be touched during this call; extract the
    /// message before handing it to another thread. At least one message
    /// MUST be consumed before returning; delivery repeats while the
    /// Collector holds a complete message, so a delegate that consumes
    /// nothing spins the read path forever.
    fn on_message(&self, pipe: Descriptor, collector: &mut Collector);
}
