//! Completion-code vocabulary.
//!
//! Request completions and close reasons are negative integers following
//! the negated-POSIX convention: `0` means success, `-ECONNABORTED` means
//! the connection was aborted, and so on. On Unix the values come from the
//! platform's errno constants; Windows has no errno to borrow, so a fixed
//! numbering is used there.

use std::io;

#[cfg(unix)]
mod raw {
    use nix::libc;

    pub const ECANCELED: i32 = libc::ECANCELED;
    pub const ECONNABORTED: i32 = libc::ECONNABORTED;
    pub const ECONNREFUSED: i32 = libc::ECONNREFUSED;
    pub const ENOTCONN: i32 = libc::ENOTCONN;
    pub const ENOTSUP: i32 = libc::ENOTSUP;
    pub const EAGAIN: i32 = libc::EAGAIN;
    pub const EIO: i32 = libc::EIO;
}

#[cfg(windows)]
mod raw {
    pub const ECANCELED: i32 = 125;
    pub const ECONNABORTED: i32 = 103;
    pub const ECONNREFUSED: i32 = 111;
    pub const ENOTCONN: i32 = 107;
    pub const ENOTSUP: i32 = 95;
    pub const EAGAIN: i32 = 11;
    pub const EIO: i32 = 5;
}

/// The request was still queued when the Piper stopped.
pub const CANCELLED: i32 = -raw::ECANCELED;

/// The pipe was torn down: framing corruption, forced shutdown, or an
/// aborted peer.
pub const CONNECTION_ABORTED: i32 = -raw::ECONNABORTED;

/// Nobody is listening at the target address.
pub const CONNECTION_REFUSED: i32 = -raw::ECONNREFUSED;

/// The descriptor does not name a live pipe.
pub const NOT_CONNECTED: i32 = -raw::ENOTCONN;

/// The operation cannot apply to this pipe (writing to a listener,
/// doubling up a close request).
pub const UNSUPPORTED: i32 = -raw::ENOTSUP;

/// Transient resource shortage; retrying may succeed.
pub const AGAIN: i32 = -raw::EAGAIN;

/// Fallback when the OS reported a failure without a usable errno.
pub const UNKNOWN: i32 = -raw::EIO;

/// Map an [`io::Error`] into the negated-POSIX code space.
pub fn io_error_code(err: &io::Error) -> i32 {
    if let Some(errno) = err.raw_os_error() {
        return -errno;
    }
    match err.kind() {
        io::ErrorKind::ConnectionAborted => CONNECTION_ABORTED,
        io::ErrorKind::ConnectionRefused => CONNECTION_REFUSED,
        io::ErrorKind::NotConnected => NOT_CONNECTED,
        io::ErrorKind::WouldBlock => AGAIN,
        _ => UNKNOWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_distinct() {
        let all = [
            CANCELLED,
            CONNECTION_ABORTED,
            CONNECTION_REFUSED,
            NOT_CONNECTED,
            UNSUPPORTED,
            AGAIN,
            UNKNOWN,
        ];
        for code in all {
            assert!(code < 0);
        }
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn os_errors_are_negated() {
        let err = io::Error::from_raw_os_error(13);
        assert_eq!(io_error_code(&err), -13);
    }

    #[test]
    fn synthetic_errors_fall_back_to_kind() {
        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(io_error_code(&err), CONNECTION_REFUSED);

        let err = io::Error::new(io::ErrorKind::Other, "mystery");
        assert_eq!(io_error_code(&err), UNKNOWN);
    }
}
