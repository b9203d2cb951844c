//! Channel descriptors and per-invocation channel sets.
//!
//! A [`ChannelDescriptor`] identifies one data source or sink and the
//! transport that carries it to or from the child process: a literal
//! filesystem path the child opens itself, the child's standard input, an
//! engine-provisioned named pipe, or a pre-existing pipe path supplied by
//! the caller. A [`ChannelSet`] is the ordered collection compiled for a
//! single invocation, validated before anything is provisioned or spawned.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

/// Engine-side async byte stream feeding a channel.
pub type SourceStream = Box<dyn AsyncRead + Send + Unpin>;
/// Engine-side async byte stream receiving a channel's output.
pub type SinkStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Direction of data flow relative to the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The engine (or the filesystem) supplies data the child consumes.
    Input,
    /// The child produces data the engine collects.
    Output,
}

/// How the bytes travel between the engine and the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Transport {
    /// The child opens the literal path itself; the engine does not touch it.
    Path(PathBuf),
    /// The child's standard input stream. At most one per invocation.
    Stdin,
    /// A named pipe / FIFO the engine provisions and cleans up.
    NamedPipe,
    /// A pipe path that already exists; the engine connects but neither
    /// creates nor removes it.
    PreOpened(PathBuf),
}

/// The engine-side end of the channel: what gets fed in, or where drained
/// bytes go.
pub(crate) enum Payload {
    /// Nothing engine-side (path channels).
    None,
    /// In-memory input buffer.
    Bytes(Bytes),
    /// Caller-supplied input stream.
    Reader(SourceStream),
    /// Caller-supplied output stream.
    Writer(SinkStream),
    /// Collect output into memory; surfaced on the invocation result.
    Capture,
    /// Write output to a file at this path.
    File(PathBuf),
}

impl Payload {
    pub(crate) fn is_source(&self) -> bool {
        matches!(self, Payload::Bytes(_) | Payload::Reader(_))
    }

    pub(crate) fn is_sink(&self) -> bool {
        matches!(self, Payload::Writer(_) | Payload::Capture | Payload::File(_))
    }
}

/// One input or output data channel of an invocation.
pub struct ChannelDescriptor {
    pub(crate) name: String,
    pub(crate) direction: Direction,
    pub(crate) transport: Transport,
    pub(crate) payload: Payload,
}

fn generated_name() -> String {
    format!("pw-{}", uuid::Uuid::new_v4().simple())
}

impl ChannelDescriptor {
    /// An input file the child opens by path. No transport channel is bound;
    /// the path is the channel identity.
    pub fn input_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.to_string_lossy().into_owned(),
            direction: Direction::Input,
            transport: Transport::Path(path),
            payload: Payload::None,
        }
    }

    /// An output file the child produces by path. After a zero exit, the
    /// result assembler confirms the file exists.
    pub fn output_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.to_string_lossy().into_owned(),
            direction: Direction::Output,
            transport: Transport::Path(path),
            payload: Payload::None,
        }
    }

    /// An in-memory input buffer fed through the child's standard input.
    pub fn stdin_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            name: "stdin".to_string(),
            direction: Direction::Input,
            transport: Transport::Stdin,
            payload: Payload::Bytes(data.into()),
        }
    }

    /// A caller-supplied stream fed through the child's standard input.
    pub fn stdin_reader(reader: SourceStream) -> Self {
        Self {
            name: "stdin".to_string(),
            direction: Direction::Input,
            transport: Transport::Stdin,
            payload: Payload::Reader(reader),
        }
    }

    /// An in-memory input buffer fed through a provisioned named pipe.
    ///
    /// The channel gets a generated unique identity; reference it in the
    /// argument list via [`ChannelDescriptor::placeholder`].
    pub fn input_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            name: generated_name(),
            direction: Direction::Input,
            transport: Transport::NamedPipe,
            payload: Payload::Bytes(data.into()),
        }
    }

    /// A caller-supplied stream fed through a provisioned named pipe.
    pub fn input_reader(reader: SourceStream) -> Self {
        Self {
            name: generated_name(),
            direction: Direction::Input,
            transport: Transport::NamedPipe,
            payload: Payload::Reader(reader),
        }
    }

    /// Feed bytes into a pipe path that already exists (created by the
    /// caller). The engine connects to it but does not create or remove it.
    pub fn preopened_bytes(path: impl Into<PathBuf>, data: impl Into<Bytes>) -> Self {
        let path = path.into();
        Self {
            name: path.to_string_lossy().into_owned(),
            direction: Direction::Input,
            transport: Transport::PreOpened(path),
            payload: Payload::Bytes(data.into()),
        }
    }

    /// Feed a stream into a pre-existing pipe path.
    pub fn preopened_reader(path: impl Into<PathBuf>, reader: SourceStream) -> Self {
        let path = path.into();
        Self {
            name: path.to_string_lossy().into_owned(),
            direction: Direction::Input,
            transport: Transport::PreOpened(path),
            payload: Payload::Reader(reader),
        }
    }

    /// Collect the child's output from a pipe path that already exists
    /// (created by the caller) into memory. The engine connects to it but
    /// does not create or remove it.
    pub fn preopened_capture(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.to_string_lossy().into_owned(),
            direction: Direction::Output,
            transport: Transport::PreOpened(path),
            payload: Payload::Capture,
        }
    }

    /// Collect the child's output from a provisioned named pipe into memory.
    pub fn output_capture() -> Self {
        Self {
            name: generated_name(),
            direction: Direction::Output,
            transport: Transport::NamedPipe,
            payload: Payload::Capture,
        }
    }

    /// Drain the child's output from a provisioned named pipe into a file.
    pub fn output_file(path: impl Into<PathBuf>) -> Self {
        Self {
            name: generated_name(),
            direction: Direction::Output,
            transport: Transport::NamedPipe,
            payload: Payload::File(path.into()),
        }
    }

    /// Drain the child's output from a provisioned named pipe into a
    /// caller-supplied stream.
    pub fn output_writer(writer: SinkStream) -> Self {
        Self {
            name: generated_name(),
            direction: Direction::Output,
            transport: Transport::NamedPipe,
            payload: Payload::Writer(writer),
        }
    }

    /// Override the generated channel identity.
    ///
    /// Identities must be unique within an invocation; a duplicate is
    /// rejected by [`ChannelSet::validate`] before any process is launched.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The channel identity (generated name, or path string for path-backed
    /// channels).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The data-flow direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The `{pipe:<name>}` token to embed in the argument list. `execute`
    /// substitutes it with the provisioned OS path, so callers never branch
    /// on platform path shapes.
    pub fn placeholder(&self) -> String {
        format!("{{pipe:{}}}", self.name)
    }

    /// Whether this channel needs a pipe provisioned by the engine.
    pub(crate) fn needs_provisioning(&self) -> bool {
        self.transport == Transport::NamedPipe
    }

    /// Whether this channel uses the direct standard-input transport.
    pub(crate) fn is_stdin(&self) -> bool {
        self.transport == Transport::Stdin
    }
}

impl fmt::Debug for ChannelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDescriptor")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

/// The ordered collection of channel descriptors for one invocation.
///
/// Built by chained calls that each return the updated value, so a set can
/// be assembled without hidden shared mutable state:
///
/// ```
/// use pw_engine::channel::{ChannelDescriptor, ChannelSet};
///
/// let set = ChannelSet::new()
///     .with(ChannelDescriptor::stdin_bytes(&b"frame data"[..]))
///     .with(ChannelDescriptor::input_bytes(&b"side data"[..]));
/// assert_eq!(set.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct ChannelSet {
    channels: Vec<ChannelDescriptor>,
}

impl ChannelSet {
    /// An empty channel set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor, returning the updated set.
    pub fn with(mut self, descriptor: ChannelDescriptor) -> Self {
        self.channels.push(descriptor);
        self
    }

    /// Number of channels in the set.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Iterate over the descriptors in order.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.channels.iter()
    }

    pub(crate) fn into_inner(self) -> Vec<ChannelDescriptor> {
        self.channels
    }

    /// Check the set's invariants. Runs before any provisioning or launch.
    ///
    /// - Channel identities are unique within the invocation; a collision
    ///   would make the child open the wrong stream.
    /// - At most one descriptor uses the direct standard-input transport:
    ///   one child process has exactly one stdin. All other streamed inputs
    ///   must use a named channel. This is a hard invariant, not a default.
    /// - Input channels over stdin/pipes must carry a byte source; output
    ///   pipe channels must carry a sink.
    pub fn validate(&self) -> pw_core::Result<()> {
        let mut seen = std::collections::HashSet::new();
        let mut stdin_count = 0usize;

        for ch in &self.channels {
            if !seen.insert(ch.name.as_str()) {
                return Err(pw_core::Error::NameCollision(ch.name.clone()));
            }

            // Reserved for the child's own standard streams.
            if !ch.is_stdin() && matches!(ch.name.as_str(), "stdin" | "stdout" | "stderr") {
                return Err(pw_core::Error::Validation(format!(
                    "channel name '{}' is reserved",
                    ch.name
                )));
            }

            if ch.is_stdin() {
                stdin_count += 1;
                if ch.direction != Direction::Input {
                    return Err(pw_core::Error::Validation(
                        "stdin transport is input-only".into(),
                    ));
                }
            }

            match ch.direction {
                Direction::Input => {
                    if !matches!(ch.transport, Transport::Path(_)) && !ch.payload.is_source() {
                        return Err(pw_core::Error::Validation(format!(
                            "input channel '{}' has no byte source",
                            ch.name
                        )));
                    }
                }
                Direction::Output => {
                    if !matches!(ch.transport, Transport::Path(_)) && !ch.payload.is_sink() {
                        return Err(pw_core::Error::Validation(format!(
                            "output channel '{}' has no sink",
                            ch.name
                        )));
                    }
                }
            }
        }

        if stdin_count > 1 {
            return Err(pw_core::Error::Validation(format!(
                "{stdin_count} channels request direct stdin; at most one is allowed"
            )));
        }

        Ok(())
    }
}
