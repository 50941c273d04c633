//! Echoline CLI - Real-Time Audio Effects
//!
//! Runs capture -> effects -> playback until `q` is typed, the input ends,
//! or a device fails. Exit status is 0 on a normal end, 1 when the pipeline
//! could not be set up and 2 when it degraded while running.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::{error, info};

use echoline::cli::{commands, Cli};
use echoline::{Pipeline, PipelineHealth};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    info!("Echoline v{}", env!("CARGO_PKG_VERSION"));

    match run(&cli) {
        Ok(PipelineHealth::Degraded { reason }) => {
            error!("pipeline degraded: {}", reason);
            ExitCode::from(2)
        }
        Ok(health) => {
            info!("done ({})", health);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<PipelineHealth> {
    let config = cli.pipeline_config().context("invalid configuration")?;
    let mut pipeline = Pipeline::open(config, &cli.capture, &cli.playback)
        .with_context(|| format!("cannot set up {} -> {}", cli.capture, cli.playback))?;
    pipeline.start().context("cannot start the pipeline")?;

    commands::command_loop(&pipeline);
    pipeline.stop();
    Ok(pipeline.health())
}
