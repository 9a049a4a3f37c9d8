use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use emitter::{
    cli::{Cli, Command},
    scenario::Scenario,
    Emitter, EmitterConfig,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EmitterConfig::load(&cli.config).context("loading configuration")?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Replay { scenario } => {
            let script = Scenario::load(&scenario)?;
            info!(
                steps = script.steps.len(),
                policy = ?config.failure_policy,
                "replaying {}",
                scenario.display()
            );
            let emitter = Emitter::with_config(config);
            let replay = script.run(&emitter)?;
            print!("{replay}");
        }
        Command::CheckConfig => {
            println!("failure_policy = {:?}", config.failure_policy);
            println!("log_level      = {}", config.log_level);
        }
    }
    Ok(())
}
