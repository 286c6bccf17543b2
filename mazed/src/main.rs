use anyhow::Context;
use clap::{Parser, Subcommand};
use mazed::config::Config;
use std::ffi::OsString;
use std::path::PathBuf;

/// Maze game server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (defaults to ./mazed.toml when present)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Role>,
}

#[derive(Debug, Subcommand)]
enum Role {
    /// Accept connections and dispatch them to workers (the default)
    Serve,

    /// Serve the session of one user; started by the master
    Worker {
        /// The user served
        login: String,
    },
}

impl Cli {
    /// Flags a worker needs to see the same configuration.
    fn worker_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.push("--config".into());
            args.push(config.clone().into_os_string());
        }
        if let Some(level) = &self.log_level {
            args.push("--log-level".into());
            args.push(level.into());
        }
        if self.json_logs {
            args.push("--json-logs".into());
        }
        args
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= cli.json_logs;

    mazed::logging::init(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Some(Role::Worker { ref login }) => {
            mazed::worker::run(&config, login).with_context(|| format!("Worker for {login} failed"))
        }
        Some(Role::Serve) | None => {
            let program = std::env::current_exe().context("Failed to locate the server binary")?;
            mazed::master::run(&config, program, cli.worker_args()).context("Master failed")
        }
    }
}
