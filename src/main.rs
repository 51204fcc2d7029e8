mod cli;
mod commands;
mod config;
mod error;
mod filename;
mod model;
mod partition;
mod runner;
mod sites;
mod util;

use std::fs::File;
use std::sync::Mutex;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    let log_file = match run_log_file(&cli.command) {
        Ok(file) => file,
        Err(err) => {
            init_tracing(None);
            report(&err);
            std::process::exit(1);
        }
    };
    init_tracing(log_file);

    if let Err(err) = run(cli) {
        report(&err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Import(args) => commands::import::run(args),
        Commands::Dispatch(args) => commands::dispatch::run(args),
        Commands::Sites(args) => commands::sites::run(args),
        Commands::Status(args) => commands::status::run(args),
    }
}

fn run_log_file(command: &Commands) -> Result<Option<File>> {
    match command {
        Commands::Import(args) => commands::import::open_run_log(args),
        _ => Ok(None),
    }
}

fn report(err: &anyhow::Error) {
    error!(error = %err, "command failed");
    for cause in err.chain().skip(1) {
        error!(cause = %cause, "caused by");
    }
}

fn init_tracing(log_file: Option<File>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}
