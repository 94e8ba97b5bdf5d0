//! Entry point for the pystemon daemon.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pystemon_core::config::default_config_search_paths;
use pystemon_core::{Supervisor, SupervisorError};
use tracing::{error, info};

mod cli;

use cli::Args;

fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path);
    }
    default_config_search_paths(env!("CARGO_PKG_NAME"))
        .into_iter()
        .find(|path| path.is_file())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(config_path) = resolve_config_path(args.config) else {
        error!("no configuration file found (tried -c/--config, /etc/pystemon.yaml, ./pystemon.yaml)");
        return ExitCode::from(2);
    };

    if args.check {
        return match pystemon_core::load_config(&config_path) {
            Ok(config) => {
                println!(
                    "{} OK: {} site(s), {} storage backend(s), {} search pattern(s)",
                    config_path.display(),
                    config.site.len(),
                    config.storage.len(),
                    config.search.len()
                );
                ExitCode::SUCCESS
            }
            Err(error) => {
                eprintln!("{}: {error}", config_path.display());
                ExitCode::from(2)
            }
        };
    }

    info!(config = %config_path.display(), "starting pystemon");
    let supervisor = Supervisor::new(config_path);
    match supervisor.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error @ (SupervisorError::Config(_) | SupervisorError::NoSitesEnabled)) => {
            error!(%error, "pystemon failed to start");
            ExitCode::from(2)
        }
        Err(error) => {
            error!(%error, "pystemon exited with an error");
            ExitCode::from(1)
        }
    }
}
