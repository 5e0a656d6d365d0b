//! # pipelink
//!
//! Length-prefixed, bidirectional, point-to-point IPC over OS-native
//! stream sockets: Unix domain sockets on POSIX, named pipes on Windows.
//!
//! A single [`Piper`] hosts both the listening and the connecting role on
//! one dedicated I/O thread. User code lives on any other thread and talks
//! to the Piper through `listen` / `connect` / `write` / `close` requests;
//! inbound events (new connections, messages, closed pipes) come back
//! through a [`PiperDelegate`] invoked on the I/O thread.
//!
//! ## Architecture
//!
//! - **Framing**: every message is an 8-byte little-endian header (payload
//!   length + length check-hash) followed by the payload. The per-pipe
//!   [`Collector`] reassembles messages from raw read buffers.
//! - **Scheduling**: one single-threaded event loop owns every pipe.
//!   Cross-thread requests go through a mutex-guarded queue and a wake-up;
//!   each request completes exactly once, through a future or a callback.
//!
//! ## Example
//!
//! ```ignore
//! use pipelink::Piper;
//!
//! let piper = Piper::new(delegate)?;
//! let (listener, code) = piper.listen("/run/user/1000/app/app.socket").wait()?;
//! assert_eq!(code, 0);
//! ```

pub mod codes;
pub mod framing;
pub mod piper;
pub mod platform;
pub mod transport;

mod error;

/// Piper-assigned identity of a pipe.
///
/// Allocated by a monotonically increasing counter on the I/O thread;
/// values >= 1 identify live pipes and are never reused within one Piper's
/// lifetime. 0 stands for "none" in `(descriptor, code)` results. This is
/// not the OS file descriptor.
pub type Descriptor = i64;

pub use error::{PiperError, Result};
pub use framing::{Collector, CollectorStatus, MessageLength};
pub use piper::{Pending, Piper, PiperDelegate, PiperHandle};
pub use platform::PipeConfig;
