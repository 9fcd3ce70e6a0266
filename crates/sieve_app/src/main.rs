mod commands;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use sieve_logging::sieve_error;

use crate::config::AppConfig;

const USAGE: &str = "usage: sieve <config.ron> crawl | verify <identifiers.txt> | clear-dedup";

enum Command {
    Crawl,
    Verify(PathBuf),
    ClearDedup,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<(PathBuf, Command)> {
    let config = args.next().context(USAGE)?;
    let command = match args.next().as_deref() {
        Some("crawl") => Command::Crawl,
        Some("verify") => Command::Verify(args.next().context(USAGE)?.into()),
        Some("clear-dedup") => Command::ClearDedup,
        _ => bail!(USAGE),
    };
    Ok((PathBuf::from(config), command))
}

async fn run() -> anyhow::Result<()> {
    let (config_path, command) = parse_args(std::env::args().skip(1))?;
    let config = AppConfig::load(&config_path)?;
    sieve_logging::initialize(config.log.target.into(), config.log.level_filter()?);

    match command {
        Command::Crawl => commands::crawl(&config).await,
        Command::Verify(input) => commands::verify(&config, &input).await,
        Command::ClearDedup => commands::clear_dedup(&config),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            sieve_error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
