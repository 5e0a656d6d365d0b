//! Pipe listener and stream implementations per platform.
//!
//! Both platforms expose the same surface: [`PipeListener::bind`] /
//! [`PipeListener::accept`], [`PipeStream::connect`], a kernel
//! receive-buffer probe and a split into owned read/write halves. Stale
//! socket files are *not* removed here; callers that own the address run
//! [`crate::platform::delete_socket_file`] before binding.

use std::io;

/// Upper bound for the per-read allocation hint.
///
/// Local messages are small; there is no point mirroring a multi-megabyte
/// kernel buffer in userspace.
pub const MAX_RECV_BUFFER: usize = 64 * 1024;

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::{UnixListener, UnixStream};

    /// Read half of a connected pipe.
    pub type PipeReader = OwnedReadHalf;
    /// Write half of a connected pipe.
    pub type PipeWriter = OwnedWriteHalf;

    /// Unix Domain Socket listener.
    pub struct PipeListener {
        listener: UnixListener,
        path: String,
    }

    /// Unix Domain Socket stream (connected or accepted).
    #[derive(Debug)]
    pub struct PipeStream {
        stream: UnixStream,
    }

    impl PipeListener {
        /// Bind to a socket path and start listening.
        pub fn bind(path: &str) -> io::Result<Self> {
            let listener = UnixListener::bind(path)?;
            Ok(Self {
                listener,
                path: path.to_string(),
            })
        }

        /// Accept one incoming connection.
        pub async fn accept(&self) -> io::Result<PipeStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(PipeStream { stream })
        }

        /// The socket path this listener is bound to.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl PipeStream {
        /// Connect to a listening socket.
        pub async fn connect(path: &str) -> io::Result<Self> {
            let stream = UnixStream::connect(path).await?;
            Ok(Self { stream })
        }

        /// Probe the kernel receive-buffer size, clamped to
        /// [`MAX_RECV_BUFFER`]; this sizes the per-read allocation.
        pub fn recv_buffer_hint(&self) -> usize {
            use nix::sys::socket::{getsockopt, sockopt};

            match getsockopt(&self.stream, sockopt::RcvBuf) {
                Ok(0) | Err(_) => MAX_RECV_BUFFER,
                Ok(size) => size.min(MAX_RECV_BUFFER),
            }
        }

        /// Split into owned read and write halves.
        pub fn into_split(self) -> (PipeReader, PipeWriter) {
            self.stream.into_split()
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use std::cell::RefCell;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    /// Read half of a connected pipe.
    pub type PipeReader = tokio::io::ReadHalf<PipeStream>;
    /// Write half of a connected pipe.
    pub type PipeWriter = tokio::io::WriteHalf<PipeStream>;

    /// Windows Named Pipe listener.
    ///
    /// Keeps one server instance pre-created so a client connecting
    /// between two accepts finds an instance to attach to.
    pub struct PipeListener {
        path: String,
        next: RefCell<Option<NamedPipeServer>>,
    }

    /// Windows Named Pipe stream (server or client end).
    pub enum PipeStream {
        Server(NamedPipeServer),
        Client(NamedPipeClient),
    }

    impl PipeListener {
        /// Create the first pipe instance for the given `\\.\pipe\` name.
        pub fn bind(path: &str) -> io::Result<Self> {
            let first = ServerOptions::new()
                .first_pipe_instance(true)
                .create(path)?;
            Ok(Self {
                path: path.to_string(),
                next: RefCell::new(Some(first)),
            })
        }

        /// Accept one incoming connection.
        pub async fn accept(&self) -> io::Result<PipeStream> {
            let server = match self.next.borrow_mut().take() {
                Some(server) => server,
                None => ServerOptions::new().create(&self.path)?,
            };
            server.connect().await?;
            // Recreate the standby instance before handing the stream out.
            *self.next.borrow_mut() = Some(ServerOptions::new().create(&self.path)?);
            Ok(PipeStream::Server(server))
        }

        /// The pipe name this listener serves.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl PipeStream {
        /// Connect to a named pipe server.
        pub async fn connect(path: &str) -> io::Result<Self> {
            let client = ClientOptions::new().open(path)?;
            Ok(PipeStream::Client(client))
        }

        /// Named pipes expose no kernel buffer probe; use the cap.
        pub fn recv_buffer_hint(&self) -> usize {
            MAX_RECV_BUFFER
        }

        /// Split into owned read and write halves.
        pub fn into_split(self) -> (PipeReader, PipeWriter) {
            tokio::io::split(self)
        }
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(pipe) => Pin::new(pipe).poll_read(cx, buf),
                PipeStream::Client(pipe) => Pin::new(pipe).poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            match self.get_mut() {
                PipeStream::Server(pipe) => Pin::new(pipe).poll_write(cx, buf),
                PipeStream::Client(pipe) => Pin::new(pipe).poll_write(cx, buf),
            }
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(pipe) => Pin::new(pipe).poll_flush(cx),
                PipeStream::Client(pipe) => Pin::new(pipe).poll_flush(cx),
            }
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(pipe) => Pin::new(pipe).poll_shutdown(cx),
                PipeStream::Client(pipe) => Pin::new(pipe).poll_shutdown(cx),
            }
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{PipeListener, PipeReader, PipeStream, PipeWriter};

#[cfg(windows)]
pub use windows_impl::{PipeListener, PipeReader, PipeStream, PipeWriter};
