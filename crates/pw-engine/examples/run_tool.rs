//! Run a tool through the engine and print what came back.
//!
//! ```text
//! cargo run --example run_tool -- ffprobe -version
//! RUST_LOG=pw_engine=trace cargo run --example run_tool -- cat
//! ```

use pw_engine::{ChannelSet, Engine, LaunchSpec};

#[tokio::main]
async fn main() -> pw_core::Result<()> {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "pw_engine=debug,pw_core=debug".to_string());
    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    let mut argv = std::env::args().skip(1);
    let program = argv.next().unwrap_or_else(|| "echo".to_string());

    let spec = LaunchSpec::new(&program).args(argv);
    let result = Engine::default().execute(spec, ChannelSet::new()).await?;

    println!("exit code : {}", result.exit_code);
    println!("success   : {}", result.success);
    if !result.diagnostics.is_empty() {
        eprintln!("--- stderr ---\n{}", result.diagnostics);
    }
    print!("{}", result.captured_text());
    Ok(())
}
