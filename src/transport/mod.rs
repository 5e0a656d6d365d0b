//! Platform-specific stream glue.
//!
//! - Unix: Unix Domain Sockets
//! - Windows: Named Pipes

mod pipe;

pub use pipe::{PipeListener, PipeReader, PipeStream, PipeWriter, MAX_RECV_BUFFER};
