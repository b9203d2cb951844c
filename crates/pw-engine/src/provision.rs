//! Pipe Provisioner: OS-level named-channel allocation and cleanup.
//!
//! On unix the channel is a FIFO special file created with `mkfifo` inside a
//! per-invocation temporary directory; the directory (and therefore every
//! FIFO in it) is removed when the provisioner drops, on every exit path.
//! On Windows the channel is a named pipe in the `\\.\pipe\` namespace and
//! the engine holds the server end. Targets with neither primitive get
//! [`pw_core::Error::PlatformUnsupported`] — falling back to a regular file
//! would make the child block on data that is only flushed at the end.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use pw_core::{Error, Result};
use tokio_util::sync::CancellationToken;

use crate::channel::{SinkStream, SourceStream};

/// How long to wait between attempts to open a FIFO writer while the child
/// has not yet opened the read end.
#[cfg(unix)]
const FIFO_OPEN_RETRY: std::time::Duration = std::time::Duration::from_millis(10);

/// Allocates named channels for a single invocation.
///
/// Channel identities are tracked per provisioner; requesting a name that
/// was already provisioned in the same invocation fails with
/// [`pw_core::Error::NameCollision`] before any process is launched.
pub struct Provisioner {
    names: HashSet<String>,
    #[cfg(unix)]
    dir: tempfile::TempDir,
}

impl Provisioner {
    /// Create a provisioner with a fresh per-invocation namespace.
    pub fn new() -> Result<Self> {
        Self::with_base(None)
    }

    /// Create a provisioner whose filesystem artifacts live under `base`.
    ///
    /// Only meaningful on platforms where channels are filesystem entries;
    /// elsewhere it behaves like [`Provisioner::new`].
    pub fn in_dir(base: &Path) -> Result<Self> {
        Self::with_base(Some(base))
    }

    #[cfg(unix)]
    fn with_base(base: Option<&Path>) -> Result<Self> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("pipewright-");
            b
        };
        let dir = match base {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }
        .map_err(|e| Error::ResourceExhausted(format!("channel dir: {e}")))?;

        Ok(Self {
            names: HashSet::new(),
            dir,
        })
    }

    #[cfg(windows)]
    fn with_base(_base: Option<&Path>) -> Result<Self> {
        Ok(Self {
            names: HashSet::new(),
        })
    }

    #[cfg(not(any(unix, windows)))]
    fn with_base(_base: Option<&Path>) -> Result<Self> {
        Err(Error::PlatformUnsupported(
            "no named-pipe or FIFO primitive on this target".into(),
        ))
    }

    /// Allocate a channel under the given identity.
    ///
    /// The returned handle is exclusively owned by the engine until handed
    /// to a feeder/drainer task.
    ///
    /// # Errors
    ///
    /// - [`Error::NameCollision`] if the identity was already provisioned.
    /// - [`Error::ResourceExhausted`] if the OS refuses to create the
    ///   primitive.
    /// - [`Error::PlatformUnsupported`] if the filesystem cannot host one.
    pub fn provision(&mut self, name: &str) -> Result<ProvisionedPipe> {
        if !self.names.insert(name.to_string()) {
            return Err(Error::NameCollision(name.to_string()));
        }
        self.create(name)
    }

    #[cfg(unix)]
    fn create(&self, name: &str) -> Result<ProvisionedPipe> {
        use nix::errno::Errno;
        use nix::sys::stat::Mode;

        let path = self.dir.path().join(name);
        nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|errno| match errno {
            Errno::EEXIST => Error::NameCollision(name.to_string()),
            Errno::EMFILE | Errno::ENFILE | Errno::ENOSPC | Errno::EDQUOT => {
                Error::ResourceExhausted(format!("mkfifo {}: {errno}", path.display()))
            }
            // A filesystem that does not support special files reports EPERM.
            Errno::EPERM | Errno::ENOSYS => {
                Error::PlatformUnsupported(format!("mkfifo {}: {errno}", path.display()))
            }
            other => Error::Io {
                source: std::io::Error::from_raw_os_error(other as i32),
            },
        })?;

        tracing::debug!(channel = name, path = %path.display(), "provisioned fifo");
        Ok(ProvisionedPipe {
            name: name.to_string(),
            path,
        })
    }

    #[cfg(windows)]
    fn create(&self, name: &str) -> Result<ProvisionedPipe> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let path = format!(r"\\.\pipe\{name}");
        let server = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&path)
            .map_err(|e| match e.kind() {
                // first_pipe_instance reports a live name as access denied.
                std::io::ErrorKind::PermissionDenied => Error::NameCollision(name.to_string()),
                _ => Error::ResourceExhausted(format!("create named pipe {path}: {e}")),
            })?;

        tracing::debug!(channel = name, %path, "provisioned named pipe");
        Ok(ProvisionedPipe {
            name: name.to_string(),
            path: PathBuf::from(path),
            server: Some(server),
        })
    }

    #[cfg(not(any(unix, windows)))]
    fn create(&self, _name: &str) -> Result<ProvisionedPipe> {
        Err(Error::PlatformUnsupported(
            "no named-pipe or FIFO primitive on this target".into(),
        ))
    }
}

/// One provisioned channel: the OS path the child embeds in its argument
/// list, plus the engine's end of the conduit.
#[derive(Debug)]
pub struct ProvisionedPipe {
    name: String,
    path: PathBuf,
    #[cfg(windows)]
    server: Option<tokio::net::windows::named_pipe::NamedPipeServer>,
}

impl ProvisionedPipe {
    /// The channel identity this pipe was provisioned under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The OS path of the channel.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path string embedded verbatim in the child's argument list.
    pub fn path_arg(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Connect the engine-side writable end.
    ///
    /// Blocks until the child opens the read end (or the token fires). On
    /// unix a FIFO refuses a non-blocking writer with `ENXIO` until a
    /// reader exists, so this retries on a short interval.
    #[cfg(unix)]
    pub async fn connect_writer(&mut self, token: &CancellationToken) -> Result<SinkStream> {
        use tokio::net::unix::pipe;

        loop {
            match pipe::OpenOptions::new().open_sender(&self.path) {
                Ok(tx) => return Ok(Box::new(tx)),
                Err(e) if e.raw_os_error() == Some(nix::libc::ENXIO) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(FIFO_OPEN_RETRY) => {}
                    }
                }
                Err(e) => {
                    return Err(Error::channel_io(
                        &self.name,
                        format!("open fifo writer {}: {e}", self.path.display()),
                    ))
                }
            }
        }
    }

    /// Connect the engine-side readable end.
    #[cfg(unix)]
    pub async fn connect_reader(&mut self, _token: &CancellationToken) -> Result<SourceStream> {
        use tokio::net::unix::pipe;

        // The read end of a FIFO opens immediately; end-of-stream arrives
        // once every writer has closed.
        let rx = pipe::OpenOptions::new()
            .open_receiver(&self.path)
            .map_err(|e| {
                Error::channel_io(
                    &self.name,
                    format!("open fifo reader {}: {e}", self.path.display()),
                )
            })?;
        Ok(Box::new(rx))
    }

    #[cfg(windows)]
    pub async fn connect_writer(&mut self, token: &CancellationToken) -> Result<SinkStream> {
        let server = self.take_server()?;
        self.await_connect(&server, token).await?;
        Ok(Box::new(server) as SinkStream)
    }

    #[cfg(windows)]
    pub async fn connect_reader(&mut self, token: &CancellationToken) -> Result<SourceStream> {
        let server = self.take_server()?;
        self.await_connect(&server, token).await?;
        Ok(Box::new(server) as SourceStream)
    }

    #[cfg(windows)]
    async fn await_connect(
        &self,
        server: &tokio::net::windows::named_pipe::NamedPipeServer,
        token: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            _ = token.cancelled() => Err(Error::Cancelled),
            r = server.connect() => {
                r.map_err(|e| Error::channel_io(&self.name, format!("pipe connect: {e}")))
            }
        }
    }

    #[cfg(windows)]
    fn take_server(&mut self) -> Result<tokio::net::windows::named_pipe::NamedPipeServer> {
        self.server
            .take()
            .ok_or_else(|| Error::channel_io(&self.name, "pipe already connected"))
    }

    #[cfg(not(any(unix, windows)))]
    pub async fn connect_writer(&mut self, _token: &CancellationToken) -> Result<SinkStream> {
        Err(Error::PlatformUnsupported("no channel primitive".into()))
    }

    #[cfg(not(any(unix, windows)))]
    pub async fn connect_reader(&mut self, _token: &CancellationToken) -> Result<SourceStream> {
        Err(Error::PlatformUnsupported("no channel primitive".into()))
    }
}

#[cfg(unix)]
impl Drop for ProvisionedPipe {
    fn drop(&mut self) {
        // The provisioner's temp dir is the backstop; removing eagerly keeps
        // long-lived invocation batches from accumulating entries.
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Open the engine-side writable end of a pre-existing pipe path.
#[cfg(unix)]
pub(crate) async fn open_preopened_writer(
    name: &str,
    path: &Path,
    token: &CancellationToken,
) -> Result<SinkStream> {
    use tokio::net::unix::pipe;

    loop {
        match pipe::OpenOptions::new().open_sender(path) {
            Ok(tx) => return Ok(Box::new(tx)),
            Err(e) if e.raw_os_error() == Some(nix::libc::ENXIO) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(FIFO_OPEN_RETRY) => {}
                }
            }
            Err(e) => {
                return Err(Error::channel_io(
                    name,
                    format!("open fifo writer {}: {e}", path.display()),
                ))
            }
        }
    }
}

#[cfg(windows)]
pub(crate) async fn open_preopened_writer(
    name: &str,
    path: &Path,
    _token: &CancellationToken,
) -> Result<SinkStream> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new()
        .open(path)
        .map_err(|e| Error::channel_io(name, format!("open pipe client {}: {e}", path.display())))?;
    Ok(Box::new(client))
}

#[cfg(not(any(unix, windows)))]
pub(crate) async fn open_preopened_writer(
    _name: &str,
    _path: &Path,
    _token: &CancellationToken,
) -> Result<SinkStream> {
    Err(Error::PlatformUnsupported("no channel primitive".into()))
}

/// Open the engine-side readable end of a pre-existing pipe path.
#[cfg(unix)]
pub(crate) async fn open_preopened_reader(
    name: &str,
    path: &Path,
    _token: &CancellationToken,
) -> Result<SourceStream> {
    use tokio::net::unix::pipe;

    let rx = pipe::OpenOptions::new().open_receiver(path).map_err(|e| {
        Error::channel_io(name, format!("open fifo reader {}: {e}", path.display()))
    })?;
    Ok(Box::new(rx))
}

#[cfg(windows)]
pub(crate) async fn open_preopened_reader(
    name: &str,
    path: &Path,
    _token: &CancellationToken,
) -> Result<SourceStream> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new()
        .open(path)
        .map_err(|e| Error::channel_io(name, format!("open pipe client {}: {e}", path.display())))?;
    Ok(Box::new(client))
}

#[cfg(not(any(unix, windows)))]
pub(crate) async fn open_preopened_reader(
    _name: &str,
    _path: &Path,
    _token: &CancellationToken,
) -> Result<SourceStream> {
    Err(Error::PlatformUnsupported("no channel primitive".into()))
}
