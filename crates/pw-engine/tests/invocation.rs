//! End-to-end invocation tests against real child processes.
//!
//! These use the shell utilities every unix environment carries (`sh`,
//! `cat`, `sleep`) as stand-ins for media tools, so they exercise the same
//! launch / pump / wait / assemble path as an ffmpeg run would.

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use pw_engine::{ChannelDescriptor, ChannelSet, Engine, LaunchSpec, StdoutMode};
use serial_test::serial;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
#[tokio::test]
async fn stdin_round_trips_to_captured_stdout() {
    let spec = LaunchSpec::new("cat");
    let channels = ChannelSet::new().with(ChannelDescriptor::stdin_bytes(&b"frame payload"[..]));

    let result = Engine::default().execute(spec, channels).await.unwrap();
    assert!(result.success);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.captured_text(), "frame payload");
}

#[cfg(unix)]
#[tokio::test]
async fn named_pipe_feeds_an_input_argument() {
    // The child receives the provisioned pipe path as a positional argument
    // and reads it like an ordinary file.
    let feed = ChannelDescriptor::input_bytes(&b"piped input data"[..]).named("feed");
    let ph = feed.placeholder();
    let spec = LaunchSpec::new("sh").args(["-c", r#"cat "$1""#, "sh", ph.as_str()]);

    let result = Engine::default()
        .execute(spec, ChannelSet::new().with(feed))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.captured_text(), "piped input data");
}

#[cfg(unix)]
#[tokio::test]
async fn named_pipe_collects_an_output_argument() {
    let sink = ChannelDescriptor::output_capture().named("out");
    let ph = sink.placeholder();
    let spec = LaunchSpec::new("sh")
        .args(["-c", r#"printf 'tool wrote this' > "$1""#, "sh", ph.as_str()])
        .stdout(StdoutMode::Discard);

    let result = Engine::default()
        .execute(spec, ChannelSet::new().with(sink))
        .await
        .unwrap();
    assert!(result.success);

    let stats = result
        .channels
        .iter()
        .find(|c| c.name == "out")
        .expect("output channel stats present");
    assert_eq!(stats.data.as_deref(), Some(&b"tool wrote this"[..]));
    assert_eq!(stats.bytes, 15);
}

#[cfg(unix)]
#[tokio::test]
async fn sequential_reader_does_not_stall_parallel_feeds() {
    // The child drains channel A completely before touching channel B, with
    // payloads well past the OS pipe buffer. Both feeders are live from the
    // start; the B feeder simply blocks until the child gets there.
    let payload_a = vec![b'a'; 200_000];
    let payload_b = vec![b'b'; 200_000];
    let a = ChannelDescriptor::input_bytes(payload_a).named("a");
    let b = ChannelDescriptor::input_bytes(payload_b).named("b");

    let ph_a = a.placeholder();
    let ph_b = b.placeholder();
    let spec = LaunchSpec::new("sh")
        .args([
            "-c",
            r#"cat "$1" > /dev/null && cat "$2" > /dev/null"#,
            "sh",
            ph_a.as_str(),
            ph_b.as_str(),
        ])
        .stdout(StdoutMode::Discard)
        .timeout(Duration::from_secs(30));

    let result = Engine::default()
        .execute(spec, ChannelSet::new().with(a).with(b))
        .await
        .unwrap();
    assert!(result.success);

    for name in ["a", "b"] {
        let stats = result.channels.iter().find(|c| c.name == name).unwrap();
        assert_eq!(stats.bytes, 200_000, "channel {name} fed fully");
    }
}

#[cfg(unix)]
#[tokio::test]
async fn non_zero_exit_is_result_data() {
    let spec = LaunchSpec::new("sh").args(["-c", "echo 'bad flag' >&2; exit 1"]);

    let result = Engine::default()
        .execute(spec, ChannelSet::new())
        .await
        .unwrap();
    assert_eq!(result.exit_code, 1);
    assert!(!result.success);
    assert!(result.diagnostics.contains("bad flag"));
}

#[cfg(unix)]
#[tokio::test]
async fn missing_declared_output_flips_success() {
    let dir = tempfile::tempdir().unwrap();
    let never_made = dir.path().join("result.mkv");

    let spec = LaunchSpec::new("true");
    let channels = ChannelSet::new().with(ChannelDescriptor::output_path(&never_made));

    let result = Engine::default().execute(spec, channels).await.unwrap();
    assert_eq!(result.exit_code, 0);
    assert!(!result.success);
    assert!(result.diagnostics.contains("result.mkv"));
}

#[tokio::test]
async fn duplicate_channel_names_fail_before_launch() {
    // The program does not exist; a NameCollision (not LaunchFailure) proves
    // validation ran first.
    let spec = LaunchSpec::new("nonexistent_tool_xyz_12345");
    let channels = ChannelSet::new()
        .with(ChannelDescriptor::input_bytes(&b"x"[..]).named("dup"))
        .with(ChannelDescriptor::input_bytes(&b"y"[..]).named("dup"));

    let err = Engine::default().execute(spec, channels).await.unwrap_err();
    assert_matches!(err, pw_core::Error::NameCollision(ref n) if n == "dup");
    assert!(err.is_pre_launch());
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn cancellation_kills_a_running_child() {
    let spec = LaunchSpec::new("sleep").arg("30").stdout(StdoutMode::Discard);
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = Engine::default()
        .execute_cancellable(spec, ChannelSet::new(), cancel)
        .await
        .unwrap_err();
    assert_matches!(err, pw_core::Error::Cancelled);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancellation must not wait out the child"
    );
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn timeout_kills_a_running_child() {
    let spec = LaunchSpec::new("sleep")
        .arg("30")
        .stdout(StdoutMode::Discard)
        .timeout(Duration::from_millis(100));

    let started = Instant::now();
    let err = Engine::default()
        .execute(spec, ChannelSet::new())
        .await
        .unwrap_err();
    assert_matches!(err, pw_core::Error::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[cfg(unix)]
#[tokio::test]
async fn stdout_file_mode_writes_directly() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("stdout.txt");

    let spec = LaunchSpec::new("echo")
        .arg("straight to disk")
        .stdout(StdoutMode::File(out.clone()));

    let result = Engine::default()
        .execute(spec, ChannelSet::new())
        .await
        .unwrap();
    assert!(result.success);
    assert!(result.captured_output.is_none());
    assert_eq!(
        std::fs::read_to_string(&out).unwrap().trim(),
        "straight to disk"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn channel_stats_cover_std_streams() {
    let spec = LaunchSpec::new("cat");
    let channels = ChannelSet::new().with(ChannelDescriptor::stdin_bytes(&b"12345"[..]));

    let result = Engine::default().execute(spec, channels).await.unwrap();
    let names: Vec<&str> = result.channels.iter().map(|c| c.name.as_str()).collect();
    assert!(names.contains(&"stdin"));
    assert!(names.contains(&"stdout"));
    assert!(names.contains(&"stderr"));

    let stdin = result.channels.iter().find(|c| c.name == "stdin").unwrap();
    assert_eq!(stdin.bytes, 5);
}

#[cfg(unix)]
fn make_fifo(path: &std::path::Path) {
    use nix::sys::stat::Mode;
    nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn preopened_pipe_feeds_an_input() {
    let dir = tempfile::tempdir().unwrap();
    let fifo = dir.path().join("feed.fifo");
    make_fifo(&fifo);

    let channels = ChannelSet::new()
        .with(ChannelDescriptor::preopened_bytes(&fifo, &b"caller-made pipe"[..]));
    let spec = LaunchSpec::new("sh").args(["-c", r#"cat "$1""#, "sh", fifo.to_str().unwrap()]);

    let result = Engine::default().execute(spec, channels).await.unwrap();
    assert!(result.success);
    assert_eq!(result.captured_text(), "caller-made pipe");
    // Caller-owned pipes are connected to, never removed.
    assert!(fifo.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn preopened_pipe_collects_an_output() {
    let dir = tempfile::tempdir().unwrap();
    let fifo = dir.path().join("out.fifo");
    make_fifo(&fifo);

    let channels = ChannelSet::new().with(ChannelDescriptor::preopened_capture(&fifo));
    let spec = LaunchSpec::new("sh")
        .args(["-c", r#"printf 'written by child' > "$1""#, "sh", fifo.to_str().unwrap()])
        .stdout(StdoutMode::Discard);

    let result = Engine::default().execute(spec, channels).await.unwrap();
    assert!(result.success);

    let want = fifo.to_string_lossy().into_owned();
    let stats = result.channels.iter().find(|c| c.name == want).unwrap();
    assert_eq!(stats.data.as_deref(), Some(&b"written by child"[..]));
    assert!(fifo.exists());
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn cancelled_run_with_pipes_leaves_no_artifacts() {
    use pw_core::EngineConfig;

    // Provisioned FIFO dirs land under a known base so the scan below can
    // prove nothing survives a cancelled invocation.
    let base = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        channel_dir: Some(base.path().to_path_buf()),
        ..EngineConfig::default()
    };
    let engine = Engine::new(config);

    let feed = ChannelDescriptor::input_bytes(vec![b'x'; 200_000]).named("feed");
    let ph = feed.placeholder();
    // The child opens the pipe, takes a sip, then hangs well past the
    // cancellation point.
    let spec = LaunchSpec::new("sh")
        .args(["-c", r#"head -c 10 "$1" > /dev/null; sleep 30"#, "sh", ph.as_str()])
        .stdout(StdoutMode::Discard);

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = engine
        .execute_cancellable(spec, ChannelSet::new().with(feed), cancel)
        .await
        .unwrap_err();
    assert_matches!(err, pw_core::Error::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));

    let leftovers: Vec<_> = std::fs::read_dir(base.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "cancelled run leaked: {leftovers:?}");
}

#[cfg(unix)]
#[tokio::test]
async fn output_file_channel_lands_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("captured.bin");

    let sink = ChannelDescriptor::output_file(&dest).named("dump");
    let ph = sink.placeholder();
    let spec = LaunchSpec::new("sh")
        .args(["-c", r#"printf 'drained to file' > "$1""#, "sh", ph.as_str()])
        .stdout(StdoutMode::Discard);

    let result = Engine::default()
        .execute(spec, ChannelSet::new().with(sink))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(std::fs::read(&dest).unwrap(), b"drained to file");
}
