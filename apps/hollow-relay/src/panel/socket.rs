use std::fs::{self, Permissions};
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::BindError;

/// Mode applied to the socket file so any local user's trainer can connect.
pub const SOCKET_MODE: u32 = 0o666;

/// Removes the socket file when dropped.
#[derive(Debug)]
pub struct SocketGuard {
    path: PathBuf,
}

impl SocketGuard {
    /// Replace whatever sits at `path` with a fresh listening socket.
    pub fn bind(path: PathBuf) -> Result<(UnixListener, Self), BindError> {
        let endpoint = path.display().to_string();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| BindError::prepare(&endpoint, err))?;
        }
        match fs::remove_file(&path) {
            Ok(()) => debug!(target: "relay::panel", path = %endpoint, "removed stale panel socket"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(BindError::prepare(&endpoint, err)),
        }

        let listener = UnixListener::bind(&path).map_err(|err| BindError::bind(&endpoint, err))?;
        // From here on the file belongs to us, even if preparing it fails.
        let guard = SocketGuard { path };
        fs::set_permissions(&guard.path, Permissions::from_mode(SOCKET_MODE))
            .map_err(|err| BindError::prepare(&endpoint, err))?;
        Ok((listener, guard))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    target: "relay::panel",
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove panel socket"
                );
            }
        }
    }
}
