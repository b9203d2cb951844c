//! Unified error type for the pipewright engine.
//!
//! Provisioning and launch failures are returned synchronously; mid-flight
//! channel failures are captured per-task and aggregated at the join point.
//! A non-zero child exit is deliberately *not* an error — it is surfaced in
//! the invocation result for the caller to interpret.

/// Unified error type covering all failure modes in pipewright.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The executable could not be found or spawned. No process exists when
    /// this is returned.
    #[error("launch failure [{program}]: {message}")]
    LaunchFailure {
        /// Name or path of the program that failed to start.
        program: String,
        /// Human-readable failure description.
        message: String,
    },

    /// The platform offers no named-pipe or FIFO primitive. There is no
    /// silent fallback: a regular file would make the child block waiting
    /// for data that only appears at the very end.
    #[error("platform unsupported: {0}")]
    PlatformUnsupported(String),

    /// The OS refused to create a channel primitive.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A channel identity collides with one already provisioned in the same
    /// invocation.
    #[error("channel name collision: {0}")]
    NameCollision(String),

    /// A feeder or drainer hit an I/O error mid-copy. Triggers cancellation
    /// of the whole invocation.
    #[error("channel I/O failure [{channel}]: {message}")]
    ChannelIo {
        /// Name of the channel whose copy loop failed.
        channel: String,
        /// Human-readable failure description.
        message: String,
    },

    /// The invocation was cancelled by the caller or by a timeout. The
    /// child has been killed and partial output discarded.
    #[error("invocation cancelled")]
    Cancelled,

    /// Channel-set invariants were violated before launch.
    #[error("validation error: {0}")]
    Validation(String),

    /// An I/O operation failed outside of a channel copy loop.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Convenience constructor for [`Error::LaunchFailure`].
    pub fn launch(program: impl Into<String>, message: impl Into<String>) -> Self {
        Error::LaunchFailure {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::ChannelIo`].
    pub fn channel_io(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ChannelIo {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Whether this error was raised before any process was launched.
    ///
    /// Pre-launch errors leave nothing behind to clean up; the caller may
    /// retry immediately with corrected input.
    pub fn is_pre_launch(&self) -> bool {
        matches!(
            self,
            Error::LaunchFailure { .. }
                | Error::PlatformUnsupported(_)
                | Error::ResourceExhausted(_)
                | Error::NameCollision(_)
                | Error::Validation(_)
        )
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_failure_display() {
        let err = Error::launch("ffmpeg", "No such file or directory");
        assert_eq!(
            err.to_string(),
            "launch failure [ffmpeg]: No such file or directory"
        );
        assert!(err.is_pre_launch());
    }

    #[test]
    fn platform_unsupported_display() {
        let err = Error::PlatformUnsupported("no FIFO primitive".into());
        assert_eq!(err.to_string(), "platform unsupported: no FIFO primitive");
        assert!(err.is_pre_launch());
    }

    #[test]
    fn name_collision_display() {
        let err = Error::NameCollision("pipe-a".into());
        assert_eq!(err.to_string(), "channel name collision: pipe-a");
        assert!(err.is_pre_launch());
    }

    #[test]
    fn channel_io_display() {
        let err = Error::channel_io("stdin", "source file deleted");
        assert_eq!(
            err.to_string(),
            "channel I/O failure [stdin]: source file deleted"
        );
        assert!(!err.is_pre_launch());
    }

    #[test]
    fn cancelled_display() {
        let err = Error::Cancelled;
        assert_eq!(err.to_string(), "invocation cancelled");
        assert!(!err.is_pre_launch());
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn result_alias() {
        fn ok_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(ok_fn().unwrap(), 42);
    }
}
