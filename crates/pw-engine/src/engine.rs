//! Invocation orchestration and result assembly.
//!
//! `Engine::execute` is synchronous from the caller's point of view but
//! internally concurrent: it provisions channels, substitutes pipe
//! placeholders in the argument list, launches the child, starts one pump
//! task per channel, and suspends only at the final join point. The caller
//! always receives a single result value or a single terminal error — never
//! a partially-populated result with a background task still running.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use pw_core::{EngineConfig, Error, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelSet, Direction, Payload, SourceStream, Transport};
use crate::provision::{self, Provisioner, ProvisionedPipe};
use crate::pump::{self, DrainSink, PumpOutcome, PumpReport};
use crate::supervisor::{self, LaunchSpec, StdinMode};

/// Per-channel byte accounting, reported on the invocation result.
#[derive(Debug)]
pub struct ChannelStats {
    /// Channel identity ("stdin"/"stdout"/"stderr" for the std streams).
    pub name: String,
    /// Bytes moved through the channel by its pump task.
    pub bytes: u64,
    /// Captured bytes, for memory-sink channels other than stdout/stderr.
    pub data: Option<Vec<u8>>,
}

/// The assembled outcome of one invocation.
///
/// Created only after the child has exited and every pump task has joined.
/// A non-zero exit code is data, not an engine error: for some tools it is
/// a legitimate "no output produced" signal.
#[derive(Debug)]
pub struct InvocationResult {
    /// Child exit code (-1 if terminated by a signal).
    pub exit_code: i32,
    /// Child stdout, when the launch spec asked for capture.
    pub captured_output: Option<Vec<u8>>,
    /// Captured stderr text (lossy UTF-8).
    pub diagnostics: String,
    /// `exit_code == 0` and every declared output path exists.
    pub success: bool,
    /// Per-channel accounting for every pump task that ran.
    pub channels: Vec<ChannelStats>,
}

impl InvocationResult {
    /// Captured stdout as lossy UTF-8 text.
    pub fn captured_text(&self) -> String {
        self.captured_output
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }
}

/// One planned pump task, compiled from a channel descriptor. The stdin
/// feed is planned separately: its endpoint only exists after launch.
enum Planned {
    PipeFeed {
        name: String,
        pipe: ProvisionedPipe,
        source: SourceStream,
    },
    PreOpenedFeed {
        name: String,
        path: PathBuf,
        source: SourceStream,
    },
    PipeDrain {
        name: String,
        pipe: ProvisionedPipe,
        sink: DrainSink,
    },
    PreOpenedDrain {
        name: String,
        path: PathBuf,
        sink: DrainSink,
    },
}

/// The multi-channel process I/O engine.
#[derive(Debug, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    /// Create an engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Run one invocation to completion.
    ///
    /// See [`Engine::execute_cancellable`]; this variant has no external
    /// cancellation signal (the spec's timeout still applies).
    pub async fn execute(
        &self,
        spec: LaunchSpec,
        channels: ChannelSet,
    ) -> Result<InvocationResult> {
        self.execute_cancellable(spec, channels, CancellationToken::new())
            .await
    }

    /// Run one invocation to completion or cancellation.
    ///
    /// Cancellation — from `cancel`, from the timeout, or from a pump
    /// failure — is safe at any point between provisioning and the final
    /// join: pump tasks stop cooperatively, the child is killed, and every
    /// provisioned filesystem artifact is removed on every exit path.
    ///
    /// # Errors
    ///
    /// Pre-launch: [`Error::Validation`], [`Error::NameCollision`],
    /// [`Error::PlatformUnsupported`], [`Error::ResourceExhausted`],
    /// [`Error::LaunchFailure`]. Mid-flight: [`Error::ChannelIo`] (first
    /// pump failure, aggregated at the join point) or [`Error::Cancelled`].
    pub async fn execute_cancellable(
        &self,
        mut spec: LaunchSpec,
        channels: ChannelSet,
        cancel: CancellationToken,
    ) -> Result<InvocationResult> {
        channels.validate()?;

        let needs_pipes = channels.iter().any(|c| c.needs_provisioning());
        let mut provisioner = if needs_pipes {
            Some(match &self.config.channel_dir {
                Some(base) => Provisioner::in_dir(base)?,
                None => Provisioner::new()?,
            })
        } else {
            None
        };

        // Compile descriptors into planned pump tasks and the placeholder
        // substitution map.
        let mut planned: Vec<Planned> = Vec::new();
        let mut pipe_paths: HashMap<String, String> = HashMap::new();
        let mut output_paths: Vec<PathBuf> = Vec::new();
        let mut stdin_source: Option<SourceStream> = None;

        for ch in channels.into_inner() {
            let name = ch.name.clone();
            match (ch.direction, ch.transport) {
                (Direction::Input, Transport::Path(_)) => {}
                (Direction::Output, Transport::Path(path)) => {
                    output_paths.push(path);
                }
                (Direction::Input, Transport::Stdin) => {
                    stdin_source = Some(into_source(ch.payload)?);
                }
                (Direction::Input, Transport::NamedPipe) => {
                    let pipe = provisioner
                        .as_mut()
                        .expect("provisioner exists when pipes are needed")
                        .provision(&name)?;
                    pipe_paths.insert(name.clone(), pipe.path_arg());
                    planned.push(Planned::PipeFeed {
                        name,
                        pipe,
                        source: into_source(ch.payload)?,
                    });
                }
                (Direction::Input, Transport::PreOpened(path)) => {
                    pipe_paths.insert(name.clone(), path.to_string_lossy().into_owned());
                    planned.push(Planned::PreOpenedFeed {
                        name,
                        path,
                        source: into_source(ch.payload)?,
                    });
                }
                (Direction::Output, Transport::NamedPipe) => {
                    let pipe = provisioner
                        .as_mut()
                        .expect("provisioner exists when pipes are needed")
                        .provision(&name)?;
                    pipe_paths.insert(name.clone(), pipe.path_arg());
                    planned.push(Planned::PipeDrain {
                        name,
                        pipe,
                        sink: into_sink(ch.payload)?,
                    });
                }
                (Direction::Output, Transport::PreOpened(path)) => {
                    pipe_paths.insert(name.clone(), path.to_string_lossy().into_owned());
                    planned.push(Planned::PreOpenedDrain {
                        name,
                        path,
                        sink: into_sink(ch.payload)?,
                    });
                }
                (Direction::Output, Transport::Stdin) => {
                    // Rejected by validate; kept total for the compiler.
                    return Err(Error::Validation("stdin transport is input-only".into()));
                }
            }
        }

        if stdin_source.is_some() {
            spec = spec.stdin(StdinMode::Piped);
        } else if spec.stdin == StdinMode::Piped {
            return Err(Error::Validation(
                "stdin mode is Piped but no stdin channel was supplied".into(),
            ));
        }

        spec.args = resolve_args(&spec.args, &pipe_paths)?;

        let program = spec.program_name();
        tracing::info!(
            %program,
            pipes = pipe_paths.len(),
            tasks = planned.len(),
            "executing"
        );

        // Launch before spawning pumps: a spawn failure must return
        // synchronously with nothing to clean up but the provisioner.
        let mut handle = supervisor::launch(&spec)?;

        // `abort` fires on caller cancellation, timeout, or pump failure and
        // brings the whole invocation down. `pump_token` additionally fires
        // during post-exit cleanup to release tasks the child never
        // unblocked; pump selects are biased so no readable byte is lost.
        let abort = cancel.child_token();
        let pump_token = abort.child_token();

        let mut tasks: Vec<JoinHandle<PumpReport>> = Vec::new();

        for plan in planned {
            tasks.push(spawn_pump(plan, pump_token.clone(), abort.clone()));
        }

        if let Some(source) = stdin_source {
            let stdin = handle
                .take_stdin()
                .expect("stdin is piped when a stdin channel exists");
            tasks.push(tokio::spawn(pump::feed(
                "stdin".into(),
                source,
                stdin,
                pump_token.clone(),
                abort.clone(),
            )));
        }

        if let Some(stdout) = handle.take_stdout() {
            tasks.push(tokio::spawn(pump::drain(
                "stdout".into(),
                stdout,
                DrainSink::Memory,
                pump_token.clone(),
                abort.clone(),
            )));
        }
        let stderr = handle
            .take_stderr()
            .expect("stderr is always piped at launch");
        tasks.push(tokio::spawn(pump::drain(
            "stderr".into(),
            stderr,
            DrainSink::Memory,
            pump_token.clone(),
            abort.clone(),
        )));

        // Suspend until the child exits, the deadline passes, or abort
        // fires. This is the invocation's only blocking point.
        let timeout = self.effective_timeout(&spec);
        let mut wait_err: Option<Error> = None;
        let status = tokio::select! {
            s = handle.wait() => match s {
                Ok(status) => Some(status),
                Err(e) => {
                    wait_err = Some(e);
                    None
                }
            },
            _ = abort.cancelled() => None,
            _ = sleep_or_forever(timeout) => {
                tracing::warn!(%program, ?timeout, "invocation deadline reached");
                None
            }
        };

        if status.is_none() {
            handle.kill().await;
        }

        // Release pumps the child never unblocked, then join everything.
        pump_token.cancel();

        let mut reports: Vec<PumpReport> = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    return Err(Error::channel_io("engine", format!("pump task panicked: {e}")))
                }
            }
        }

        // Provisioned artifacts are removed when pipes and the provisioner
        // drop; nothing outlives this call.
        drop(provisioner);

        // First pump failure wins over the cancellation it triggered.
        if let Some(idx) = reports.iter().position(|r| r.failed()) {
            let err = reports
                .swap_remove(idx)
                .take_error()
                .expect("failed report carries an error");
            tracing::warn!(%program, "invocation failed: {err}");
            return Err(err);
        }

        if let Some(e) = wait_err {
            return Err(e);
        }

        let Some(status) = status else {
            tracing::info!(%program, "invocation cancelled");
            return Err(Error::Cancelled);
        };

        Ok(assemble(status, reports, &output_paths, &program))
    }

    fn effective_timeout(&self, spec: &LaunchSpec) -> Option<Duration> {
        spec.timeout.or_else(|| {
            (self.config.default_timeout_secs > 0)
                .then(|| Duration::from_secs(self.config.default_timeout_secs))
        })
    }
}

/// Build the final result from the exit status and the joined pump reports.
fn assemble(
    status: std::process::ExitStatus,
    reports: Vec<PumpReport>,
    output_paths: &[PathBuf],
    program: &str,
) -> InvocationResult {
    let exit_code = status.code().unwrap_or(-1);

    let mut captured_output = None;
    let mut diagnostics = String::new();
    let mut channels = Vec::with_capacity(reports.len());

    for mut report in reports {
        match report.channel.as_str() {
            "stdout" => captured_output = report.data.take(),
            "stderr" => {
                diagnostics = report
                    .data
                    .take()
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .unwrap_or_default();
            }
            _ => {}
        }
        channels.push(ChannelStats {
            name: report.channel,
            bytes: report.bytes,
            data: report.data,
        });
    }

    let mut success = exit_code == 0;
    for path in output_paths {
        if exit_code == 0 && !path.exists() {
            success = false;
            diagnostics.push_str(&format!(
                "\ndeclared output not produced: {}",
                path.display()
            ));
        }
    }

    tracing::info!(%program, exit_code, success, "invocation complete");
    InvocationResult {
        exit_code,
        captured_output,
        diagnostics,
        success,
        channels,
    }
}

/// Spawn the pump task for one planned channel. Endpoint connection happens
/// inside the task: a FIFO writer cannot open until the child opens the
/// read end, which only happens while the child is running.
fn spawn_pump(
    plan: Planned,
    token: CancellationToken,
    abort: CancellationToken,
) -> JoinHandle<PumpReport> {
    match plan {
        Planned::PipeFeed {
            name,
            mut pipe,
            source,
        } => tokio::spawn(async move {
            match pipe.connect_writer(&token).await {
                Ok(writer) => pump::feed(name, source, writer, token, abort).await,
                Err(e) => connect_report(name, e, &abort),
            }
        }),
        Planned::PreOpenedFeed { name, path, source } => tokio::spawn(async move {
            match provision::open_preopened_writer(&name, &path, &token).await {
                Ok(writer) => pump::feed(name, source, writer, token, abort).await,
                Err(e) => connect_report(name, e, &abort),
            }
        }),
        Planned::PipeDrain {
            name,
            mut pipe,
            sink,
        } => tokio::spawn(async move {
            match pipe.connect_reader(&token).await {
                Ok(reader) => pump::drain(name, reader, sink, token, abort).await,
                Err(e) => connect_report(name, e, &abort),
            }
        }),
        Planned::PreOpenedDrain { name, path, sink } => tokio::spawn(async move {
            match provision::open_preopened_reader(&name, &path, &token).await {
                Ok(reader) => pump::drain(name, reader, sink, token, abort).await,
                Err(e) => connect_report(name, e, &abort),
            }
        }),
    }
}

/// Report for a task that never got past endpoint connection.
fn connect_report(name: String, err: Error, abort: &CancellationToken) -> PumpReport {
    let outcome = match err {
        Error::Cancelled => PumpOutcome::Cancelled,
        e => {
            abort.cancel();
            PumpOutcome::Failed(e)
        }
    };
    PumpReport {
        channel: name,
        bytes: 0,
        data: None,
        outcome,
    }
}

fn into_source(payload: Payload) -> Result<SourceStream> {
    match payload {
        Payload::Bytes(b) => Ok(Box::new(std::io::Cursor::new(b))),
        Payload::Reader(r) => Ok(r),
        _ => Err(Error::Validation("input channel has no byte source".into())),
    }
}

fn into_sink(payload: Payload) -> Result<DrainSink> {
    match payload {
        Payload::Capture => Ok(DrainSink::Memory),
        Payload::File(p) => Ok(DrainSink::File(p)),
        Payload::Writer(w) => Ok(DrainSink::Writer(w)),
        _ => Err(Error::Validation("output channel has no sink".into())),
    }
}

/// Substitute `{pipe:<name>}` placeholders with provisioned channel paths.
fn resolve_args(args: &[String], pipe_paths: &HashMap<String, String>) -> Result<Vec<String>> {
    args.iter()
        .map(|arg| {
            let mut resolved = arg.clone();
            for (name, path) in pipe_paths {
                resolved = resolved.replace(&format!("{{pipe:{name}}}"), path);
            }
            if resolved.contains("{pipe:") {
                return Err(Error::Validation(format!(
                    "unresolved pipe placeholder in argument '{arg}'"
                )));
            }
            Ok(resolved)
        })
        .collect()
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_args_substitutes() {
        let mut map = HashMap::new();
        map.insert("in".to_string(), "/tmp/pw/in".to_string());
        let args = vec!["-i".to_string(), "{pipe:in}".to_string()];
        let resolved = resolve_args(&args, &map).unwrap();
        assert_eq!(resolved, vec!["-i", "/tmp/pw/in"]);
    }

    #[test]
    fn resolve_args_rejects_unknown_placeholder() {
        let map = HashMap::new();
        let args = vec!["{pipe:ghost}".to_string()];
        let err = resolve_args(&args, &map).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn captured_text_is_lossy_utf8() {
        let result = InvocationResult {
            exit_code: 0,
            captured_output: Some(b"ok".to_vec()),
            diagnostics: String::new(),
            success: true,
            channels: Vec::new(),
        };
        assert_eq!(result.captured_text(), "ok");
    }
}
