//! sef-daemon entry point.
//!
//! Thin: env bootstrap, tracing, then hand off to [`sef_daemon::run`].

use clap::Parser;
use sef_daemon::{init_tracing, run, DaemonArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    run(DaemonArgs::parse()).await
}
