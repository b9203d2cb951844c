//! Feeder and drainer tasks: the per-channel byte copy loops.
//!
//! Exactly one task runs per channel, concurrently with the child and with
//! each other. A task blocks on read/write as the OS buffer fills or
//! empties; that back-pressure is expected and never stalls other channels.
//! Selects are biased toward the copy future so a cleanup-phase cancel can
//! never discard bytes that are already readable — only a genuinely blocked
//! task (a pipe the child never opened) takes the cancelled branch.

use std::path::PathBuf;

use pw_core::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::channel::SinkStream;

/// Where a drainer delivers its bytes.
pub(crate) enum DrainSink {
    /// Collect into memory; the buffer is returned in the report.
    Memory,
    /// Write to a file at this path.
    File(PathBuf),
    /// Write into a caller-supplied stream (flushed, not shut down; the
    /// caller owns it).
    Writer(SinkStream),
}

/// How one pump task ended.
#[derive(Debug)]
pub(crate) enum PumpOutcome {
    /// Source exhausted / end-of-stream reached.
    Completed,
    /// Stopped by the cancellation token while blocked.
    Cancelled,
    /// An I/O error mid-copy. The task has already requested
    /// invocation-wide cancellation.
    Failed(Error),
}

/// Result of one feeder/drainer task, aggregated at the join point.
#[derive(Debug)]
pub(crate) struct PumpReport {
    pub channel: String,
    pub bytes: u64,
    pub data: Option<Vec<u8>>,
    pub outcome: PumpOutcome,
}

impl PumpReport {
    pub(crate) fn failed(&self) -> bool {
        matches!(self.outcome, PumpOutcome::Failed(_))
    }

    pub(crate) fn take_error(self) -> Option<Error> {
        match self.outcome {
            PumpOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// A write error meaning the reading side went away. Tools routinely stop
/// consuming an input once they have what they need; that must not fail
/// the invocation.
fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
    )
}

/// Copy bytes from an engine-side source into a channel endpoint until the
/// source is exhausted, then shut the endpoint so the child observes
/// end-of-input on that channel.
///
/// On a source error the endpoint is closed, the error is recorded in the
/// report, and `abort` is cancelled so the rest of the invocation winds
/// down cooperatively.
pub(crate) async fn feed<R, W>(
    channel: String,
    mut source: R,
    mut dest: W,
    token: CancellationToken,
    abort: CancellationToken,
) -> PumpReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // The copy loop carries its byte count alongside any error, so a feed
    // that ends early still reports how much was actually delivered.
    let copy = async {
        let mut n = 0u64;
        let mut buf = [0u8; 8192];
        let err = loop {
            match source.read(&mut buf).await {
                Ok(0) => break None,
                Ok(read) => match dest.write_all(&buf[..read]).await {
                    Ok(()) => n += read as u64,
                    Err(e) => break Some(e),
                },
                Err(e) => break Some(e),
            }
        };
        let err = match err {
            None => dest.shutdown().await.err(),
            some => some,
        };
        (n, err)
    };
    tokio::pin!(copy);

    let (bytes, outcome) = tokio::select! {
        biased;
        (n, err) = &mut copy => match err {
            None => (n, PumpOutcome::Completed),
            Some(e) if is_disconnect(&e) => {
                tracing::debug!(channel = %channel, "feed stopped early: {e}");
                (n, PumpOutcome::Completed)
            }
            Some(e) => {
                abort.cancel();
                let err = Error::channel_io(&channel, e.to_string());
                (n, PumpOutcome::Failed(err))
            }
        },
        _ = token.cancelled() => (0, PumpOutcome::Cancelled),
    };

    tracing::trace!(channel = %channel, bytes, ?outcome, "feed done");
    PumpReport {
        channel,
        bytes,
        data: None,
        outcome,
    }
}

/// Copy bytes from a channel endpoint into a sink until the endpoint
/// reports end-of-stream.
pub(crate) async fn drain<R>(
    channel: String,
    mut source: R,
    sink: DrainSink,
    token: CancellationToken,
    abort: CancellationToken,
) -> PumpReport
where
    R: AsyncRead + Unpin,
{
    match sink {
        DrainSink::Memory => {
            let mut buf = Vec::new();
            let outcome = {
                let copy = source.read_to_end(&mut buf);
                tokio::pin!(copy);
                tokio::select! {
                    biased;
                    r = &mut copy => match r {
                        Ok(_) => PumpOutcome::Completed,
                        Err(e) => {
                            abort.cancel();
                            PumpOutcome::Failed(Error::channel_io(&channel, e.to_string()))
                        }
                    },
                    _ = token.cancelled() => PumpOutcome::Cancelled,
                }
            };
            tracing::trace!(channel = %channel, bytes = buf.len(), ?outcome, "drain done");
            PumpReport {
                channel,
                bytes: buf.len() as u64,
                data: Some(buf),
                outcome,
            }
        }
        DrainSink::File(path) => {
            let file = match tokio::fs::File::create(&path).await {
                Ok(f) => f,
                Err(e) => {
                    abort.cancel();
                    let err = Error::channel_io(
                        &channel,
                        format!("create sink file {}: {e}", path.display()),
                    );
                    return PumpReport {
                        channel,
                        bytes: 0,
                        data: None,
                        outcome: PumpOutcome::Failed(err),
                    };
                }
            };
            drain_into(channel, source, Box::new(file), true, token, abort).await
        }
        DrainSink::Writer(writer) => {
            drain_into(channel, source, writer, false, token, abort).await
        }
    }
}

async fn drain_into<R>(
    channel: String,
    mut source: R,
    mut dest: SinkStream,
    shutdown: bool,
    token: CancellationToken,
    abort: CancellationToken,
) -> PumpReport
where
    R: AsyncRead + Unpin,
{
    let copy = async {
        let n = tokio::io::copy(&mut source, &mut dest).await?;
        if shutdown {
            dest.shutdown().await?;
        } else {
            dest.flush().await?;
        }
        Ok::<u64, std::io::Error>(n)
    };
    tokio::pin!(copy);

    let (bytes, outcome) = tokio::select! {
        biased;
        r = &mut copy => match r {
            Ok(n) => (n, PumpOutcome::Completed),
            Err(e) => {
                abort.cancel();
                (0, PumpOutcome::Failed(Error::channel_io(&channel, e.to_string())))
            }
        },
        _ = token.cancelled() => (0, PumpOutcome::Cancelled),
    };

    tracing::trace!(channel = %channel, bytes, ?outcome, "drain done");
    PumpReport {
        channel,
        bytes,
        data: None,
        outcome,
    }
}
