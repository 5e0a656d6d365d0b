//! Error types for pipelink.
//!
//! [`PiperError`] covers construction and API-surface failures. Individual
//! request outcomes (listen/connect/write/close) travel as negated-POSIX
//! integer codes instead; see the [`codes`](crate::codes) module.

use thiserror::Error;

/// Failures surfaced by the Piper API itself.
#[derive(Debug, Error)]
pub enum PiperError {
    /// I/O error while starting the event loop or the I/O thread.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The delegate's `startup` rejected the Piper.
    #[error("delegate startup failed: {0}")]
    Startup(String),

    /// The I/O thread went away without completing a pending request.
    #[error("completion channel broken")]
    Disconnected,
}

/// Result type alias using PiperError.
pub type Result<T> = std::result::Result<T, PiperError>;
