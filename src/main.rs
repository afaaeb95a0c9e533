use std::io;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dining_arbiter::config::{Args, Config};
use dining_arbiter::sim::{self, Outcome};

fn main() -> anyhow::Result<()> {
    // 状態の行は stdout、診断ログは stderr に分ける
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::try_from(args).context("invalid arguments")?;

    let outcome = sim::run(&config).context("simulation aborted")?;
    match outcome {
        Outcome::Died { id, at_ms } => info!(philosopher = %id, at_ms, "a philosopher died"),
        Outcome::AllFed => info!("every philosopher has eaten enough"),
        Outcome::Interrupted => info!("interrupted"),
    }

    Ok(())
}
