//! Socket-path resolution and process-level setup.
//!
//! External collaborators of the transport: user code runs these before
//! binding or connecting; the Piper core itself never touches them.
//! Everything here is a no-op on Windows, where named pipes need no
//! filesystem housekeeping.

use std::io;
use std::path::PathBuf;

/// Where the socket lives.
///
/// On Unix the address is `<socket_directory>/<socket_file_name>` and must
/// fit the platform's `sockaddr_un` limit (about 108 bytes). On Windows
/// only the file name matters; it is decorated into `\\.\pipe\<name>`.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub socket_directory: PathBuf,
    pub socket_file_name: String,
}

impl PipeConfig {
    /// Per-user default location for an application's socket.
    pub fn default_for_app(app: &str) -> Self {
        #[cfg(unix)]
        let socket_directory = PathBuf::from(format!(
            "/run/user/{}/{}",
            nix::unistd::getuid().as_raw(),
            app
        ));
        #[cfg(windows)]
        let socket_directory = PathBuf::new();

        Self {
            socket_directory,
            socket_file_name: format!("{app}.socket"),
        }
    }

    /// The address to pass to `listen` / `connect`.
    pub fn pipe_name(&self) -> String {
        #[cfg(unix)]
        {
            let name = self
                .socket_directory
                .join(&self.socket_file_name)
                .to_string_lossy()
                .into_owned();
            // sockaddr_un::sun_path caps the address length.
            debug_assert!(name.len() < 108, "socket path too long: {name}");
            name
        }
        #[cfg(windows)]
        {
            format!(r"\\.\pipe\{}", self.socket_file_name)
        }
    }
}

/// Make sure the socket directory exists with permissive rights, so
/// unrelated users can reach the socket.
///
/// A chmod failure is not fatal: the directory may predate us with the
/// right mode already.
#[cfg(unix)]
pub fn ensure_socket_directory(config: &PipeConfig) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(&config.socket_directory)?;
    let _ = std::fs::set_permissions(
        &config.socket_directory,
        std::fs::Permissions::from_mode(0o777),
    );
    Ok(())
}

#[cfg(windows)]
pub fn ensure_socket_directory(_config: &PipeConfig) -> io::Result<()> {
    Ok(())
}

/// Remove a stale socket file so a subsequent bind succeeds. Missing
/// files are fine.
#[cfg(unix)]
pub fn delete_socket_file(config: &PipeConfig) -> io::Result<()> {
    match std::fs::remove_file(config.pipe_name()) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(windows)]
pub fn delete_socket_file(_config: &PipeConfig) -> io::Result<()> {
    Ok(())
}

/// Raise the per-process file-descriptor limit to its hard maximum.
///
/// Some platforms default to a few hundred descriptors per process, which
/// a many-connection stress run exhausts immediately.
#[cfg(unix)]
pub fn adjust_resource_limits() {
    use nix::sys::resource::{getrlimit, setrlimit, Resource};

    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, hard)) if soft < hard => {
            if let Err(err) = setrlimit(Resource::RLIMIT_NOFILE, hard, hard) {
                tracing::warn!(error = %err, "could not raise the file descriptor limit");
            }
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "could not read the file descriptor limit"),
    }
}

#[cfg(windows)]
pub fn adjust_resource_limits() {}

/// Ignore `SIGPIPE` so an abruptly closed peer cannot terminate the
/// process.
#[cfg(unix)]
pub fn configure_signals() {
    use nix::sys::signal::{signal, SigHandler, Signal};

    // Installing SIG_IGN is async-signal-safe; there is no handler code.
    if let Err(err) = unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) } {
        tracing::warn!(error = %err, "could not ignore SIGPIPE");
    }
}

#[cfg(windows)]
pub fn configure_signals() {}
