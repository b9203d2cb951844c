//! Process Supervisor: spawning and lifecycle of the external executable.
//!
//! [`launch`] starts the child with the requested stdio wiring and returns a
//! [`ProcessHandle`] without blocking; waiting is a separate operation so
//! feeder/drainer tasks can be running before anything blocks on exit.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use pw_core::{Error, Result};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// How the child's standard input is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdinMode {
    /// The child sees an immediately-closed stdin.
    #[default]
    Null,
    /// The child inherits the engine process's stdin.
    Inherit,
    /// The engine holds a writable endpoint driven by a feeder task.
    Piped,
}

/// Where the child's standard output goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StdoutMode {
    /// Dropped at the OS level.
    Discard,
    /// Captured to memory by a drainer task. The drainer is mandatory: an
    /// unconsumed stdout fills the OS pipe buffer and blocks the child.
    #[default]
    Capture,
    /// Redirected into a file handle the OS writes directly; no drainer
    /// task and no pipe buffer involved.
    File(PathBuf),
}

/// Everything needed to start one external process.
///
/// Built by chained calls that each return the updated value; a spec can be
/// cloned and reused across invocations without shared mutable state.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub(crate) program: PathBuf,
    pub(crate) args: Vec<String>,
    pub(crate) stdin: StdinMode,
    pub(crate) stdout: StdoutMode,
    pub(crate) timeout: Option<Duration>,
    pub(crate) current_dir: Option<PathBuf>,
    pub(crate) envs: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Create a spec for the given program path.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: StdinMode::default(),
            stdout: StdoutMode::default(),
            timeout: None,
            current_dir: None,
            envs: Vec::new(),
        }
    }

    /// Append a single argument. Arguments may contain `{pipe:<name>}`
    /// placeholders, substituted at execute time.
    pub fn arg(mut self, s: impl Into<String>) -> Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the stdin wiring. Overridden to [`StdinMode::Piped`] when the
    /// channel set carries a direct-stdin descriptor.
    pub fn stdin(mut self, mode: StdinMode) -> Self {
        self.stdin = mode;
        self
    }

    /// Set the stdout destination.
    pub fn stdout(mut self, mode: StdoutMode) -> Self {
        self.stdout = mode;
        self
    }

    /// Set the maximum invocation time. When the deadline fires the child
    /// is killed and the invocation reports [`Error::Cancelled`].
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }

    /// Override the child's working directory (otherwise inherited).
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Add an environment variable (the caller's environment is otherwise
    /// passed through unmodified).
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Short program name for logs and error messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }
}

/// An owned, running child process and its std-stream endpoints.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    program: String,
}

impl ProcessHandle {
    /// OS process id, if the child is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take the writable stdin endpoint (present once, in `Piped` mode).
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take the readable stdout endpoint (present once, in `Capture` mode).
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the readable stderr endpoint (always present).
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait for the child to exit. A non-zero status is not an error here;
    /// it is data for the result assembler.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.map_err(|e| {
            Error::launch(&self.program, format!("wait failed: {e}"))
        })
    }

    /// Force-terminate the child and reap it. The cancellation primitive;
    /// safe to call regardless of how far the child has progressed.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            // Already exited is the common case here.
            tracing::debug!(program = %self.program, "kill: {e}");
        }
    }
}

/// Spawn the external executable described by `spec`.
///
/// The working directory and environment are unmodified from the calling
/// process unless the spec overrides them. Stderr is always piped so
/// diagnostics can be captured.
///
/// # Errors
///
/// [`Error::LaunchFailure`] if the executable cannot be found or spawned;
/// no partial process exists in that case.
pub fn launch(spec: &LaunchSpec) -> Result<ProcessHandle> {
    let program = spec.program_name();

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);

    match spec.stdin {
        StdinMode::Null => {
            cmd.stdin(Stdio::null());
        }
        StdinMode::Inherit => {
            cmd.stdin(Stdio::inherit());
        }
        StdinMode::Piped => {
            cmd.stdin(Stdio::piped());
        }
    }

    match &spec.stdout {
        StdoutMode::Discard => {
            cmd.stdout(Stdio::null());
        }
        StdoutMode::Capture => {
            cmd.stdout(Stdio::piped());
        }
        StdoutMode::File(path) => {
            let file = std::fs::File::create(path).map_err(|e| {
                Error::launch(&program, format!("open stdout file {}: {e}", path.display()))
            })?;
            cmd.stdout(Stdio::from(file));
        }
    }

    cmd.stderr(Stdio::piped());

    if let Some(dir) = &spec.current_dir {
        cmd.current_dir(dir);
    }
    for (k, v) in &spec.envs {
        cmd.env(k, v);
    }

    // Backstop: if the handle is dropped without a wait (panic paths), the
    // runtime reaps the child instead of leaving it running.
    cmd.kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| Error::launch(&program, format!("failed to spawn: {e}")))?;

    tracing::debug!(%program, pid = ?child.id(), "spawned");

    Ok(ProcessHandle { child, program })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn launch_and_wait() {
        let spec = LaunchSpec::new("echo").arg("hello").stdout(StdoutMode::Discard);
        let mut handle = launch(&spec).unwrap();
        let status = handle.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn missing_program_is_launch_failure() {
        let spec = LaunchSpec::new("nonexistent_tool_xyz_12345");
        let err = launch(&spec).unwrap_err();
        assert!(matches!(err, Error::LaunchFailure { .. }));
        assert!(err.is_pre_launch());
    }

    #[tokio::test]
    async fn kill_terminates_child() {
        let spec = LaunchSpec::new("sleep").arg("30").stdout(StdoutMode::Discard);
        let mut handle = launch(&spec).unwrap();
        handle.kill().await;
        let status = handle.wait().await.unwrap();
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn current_dir_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let spec = LaunchSpec::new("pwd").current_dir(dir.path());
        let mut handle = launch(&spec).unwrap();

        let mut out = String::new();
        handle
            .take_stdout()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        let status = handle.wait().await.unwrap();
        assert!(status.success());

        let reported = std::fs::canonicalize(out.trim()).unwrap();
        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(reported, expected);
    }

    #[test]
    fn spec_builds_by_value() {
        let spec = LaunchSpec::new("ffmpeg")
            .arg("-i")
            .arg("{pipe:in}")
            .args(["-f", "matroska", "-"])
            .stdin(StdinMode::Piped)
            .timeout(Duration::from_secs(10));
        assert_eq!(spec.args.len(), 5);
        assert_eq!(spec.program_name(), "ffmpeg");
        assert_eq!(spec.stdin, StdinMode::Piped);
    }
}
