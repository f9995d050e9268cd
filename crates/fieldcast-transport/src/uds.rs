//! Filesystem-path Unix domain sockets for the rendezvous.
//!
//! The accepting side binds a fresh socket, publishes its path and waits for
//! exactly one peer. The socket file is owner-only and is removed again when
//! the acceptor goes away, unless something else has taken over the path.

use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

static NEXT_SOCKET_SUFFIX: AtomicU64 = AtomicU64::new(0);

/// `(device, inode)` of a socket file.
type Identity = (u64, u64);

/// Listening Unix domain socket.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    identity: Identity,
}

fn bind_failed(path: &Path, source: io::Error) -> TransportError {
    TransportError::Bind {
        path: path.to_path_buf(),
        source,
    }
}

/// Identity of the socket at `path`; `None` when the path is not a socket.
fn socket_identity(path: &Path) -> io::Result<Option<Identity>> {
    let metadata = std::fs::symlink_metadata(path)?;
    Ok(metadata
        .file_type()
        .is_socket()
        .then(|| (metadata.dev(), metadata.ino())))
}

/// Remove a socket left behind at `path`. Anything that is not a socket is
/// never touched.
fn clear_stale(path: &Path) -> Result<()> {
    match socket_identity(path) {
        Ok(Some(_)) => {
            debug!(?path, "removing stale socket");
            std::fs::remove_file(path).map_err(|e| bind_failed(path, e))
        }
        Ok(None) => Err(bind_failed(
            path,
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                "existing path is not a unix socket",
            ),
        )),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(bind_failed(path, err)),
    }
}

impl UnixDomainSocket {
    /// Permission mode of created socket files.
    pub const SOCKET_MODE: u32 = 0o600;

    /// Unix `sockaddr_un.sun_path` is 108 bytes on Linux, 104 elsewhere.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen at `path`, replacing a stale socket there.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        clear_stale(&path)?;
        let listener = UnixListener::bind(&path).map_err(|e| bind_failed(&path, e))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(Self::SOCKET_MODE))
            .map_err(|e| bind_failed(&path, e))?;
        let identity = socket_identity(&path)
            .map_err(|e| bind_failed(&path, e))?
            .ok_or_else(|| {
                bind_failed(
                    &path,
                    io::Error::other("bound path is not a socket"),
                )
            })?;

        info!(?path, "rendezvous socket listening");
        Ok(Self {
            listener,
            path,
            identity,
        })
    }

    /// Bind a socket under `dir` with a name no other rendezvous uses.
    ///
    /// The name combines `prefix`, the process id, a timestamp and a
    /// per-process counter.
    pub fn bind_unique(dir: impl AsRef<Path>, prefix: &str) -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let suffix = NEXT_SOCKET_SUFFIX.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            "{prefix}-{}-{:x}-{suffix}.sock",
            std::process::id(),
            nanos & 0xffff_ffff
        );
        Self::bind(dir.as_ref().join(name))
    }

    /// Wait for the peer. Blocks with no timeout.
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// Connect to a listening socket.
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to rendezvous socket");
        Ok(IpcStream::from_unix(stream))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the path still refers to the socket this value bound.
    pub fn owns_path(&self) -> bool {
        matches!(socket_identity(&self.path), Ok(Some(identity)) if identity == self.identity)
    }
}

impl std::fmt::Debug for UnixDomainSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixDomainSocket")
            .field("path", &self.path)
            .finish()
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        if self.owns_path() {
            debug!(path = ?self.path, "removing rendezvous socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path taken over; leaving it");
        }
    }
}
