//! Builder for one-shot tool invocations with captured output.
//!
//! A thin convenience over [`Engine`] for callers that need no extra
//! channels: argv in, stdout/stderr text out. Capture always runs through
//! the engine's concurrent drainers, so a chatty tool can never deadlock on
//! a full pipe buffer.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;

use crate::channel::{ChannelDescriptor, ChannelSet};
use crate::engine::Engine;
use crate::supervisor::{LaunchSpec, StdoutMode};

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from a tool execution.
///
/// A non-zero exit is surfaced here, not as an error: for several tools it
/// is a legitimate "nothing to do" signal the caller interprets.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit code (-1 if terminated by a signal).
    pub exit_code: i32,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

impl ToolOutput {
    /// Whether the tool exited with code zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use pw_engine::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> pw_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v")
///     .arg("quiet")
///     .arg("-print_format")
///     .arg("json")
///     .arg("-show_format")
///     .arg("/path/to/video.mkv")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    stdin_data: Option<Bytes>,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            stdin_data: None,
        }
    }

    /// Create a command from a discovered tool entry, taking its resolved
    /// path and configured timeout.
    pub fn for_tool(tool: &crate::tools::ToolConfig) -> Self {
        Self {
            program: tool.path.clone(),
            args: Vec::new(),
            timeout: tool.timeout,
            stdin_data: None,
        }
    }

    /// Append a single argument.
    pub fn arg(mut self, s: impl Into<String>) -> Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    /// Provide data to be written to the process's stdin.
    pub fn stdin(mut self, data: impl Into<Bytes>) -> Self {
        self.stdin_data = Some(data.into());
        self
    }

    /// Execute the command on a default-configured engine.
    pub async fn execute(&self) -> pw_core::Result<ToolOutput> {
        self.execute_on(&Engine::default()).await
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`pw_core::Error::LaunchFailure`] if spawning the process fails.
    /// - [`pw_core::Error::Cancelled`] if the timeout expires (the process
    ///   is killed first).
    pub async fn execute_on(&self, engine: &Engine) -> pw_core::Result<ToolOutput> {
        let spec = LaunchSpec::new(self.program.clone())
            .args(self.args.iter().cloned())
            .stdout(StdoutMode::Capture)
            .timeout(self.timeout);

        let mut channels = ChannelSet::new();
        if let Some(data) = &self.stdin_data {
            channels = channels.with(ChannelDescriptor::stdin_bytes(data.clone()));
        }

        let result = engine.execute(spec, channels).await?;
        Ok(ToolOutput {
            exit_code: result.exit_code,
            stdout: result.captured_text(),
            stderr: result.diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echo() {
        // `echo` should be universally available.
        let output = ToolCommand::new("echo").arg("hello").execute().await;

        match output {
            Ok(out) => {
                assert!(out.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let result = ToolCommand::new("nonexistent_tool_xyz_12345").execute().await;
        assert!(matches!(
            result.unwrap_err(),
            pw_core::Error::LaunchFailure { .. }
        ));
    }

    #[tokio::test]
    async fn timeout_fires() {
        // `sleep 10` should be killed well before 10 seconds.
        let result = ToolCommand::new("sleep")
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute()
            .await;
        assert!(matches!(result.unwrap_err(), pw_core::Error::Cancelled));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tool_config_timeout_is_honored() {
        let cfg = crate::tools::ToolConfig {
            name: "sleep".to_string(),
            path: PathBuf::from("sleep"),
            timeout: Duration::from_millis(100),
        };
        let result = ToolCommand::for_tool(&cfg).arg("10").execute().await;
        assert!(matches!(result.unwrap_err(), pw_core::Error::Cancelled));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdin_reaches_child() {
        let output = ToolCommand::new("cat")
            .stdin(&b"fed through stdin"[..])
            .execute()
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "fed through stdin");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_data() {
        let output = ToolCommand::new("sh")
            .args(["-c", "exit 3"])
            .execute()
            .await
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, 3);
    }
}
