// Main entry point for the imghost-server application.
// Parses the configuration, sets up logging and either supervises the worker
// pool or runs as one of its workers.

mod config;
mod error;
mod logging;
mod shutdown_signal;
mod storage;
mod web;
mod worker;
mod worker_pool;

use clap::Parser;
use config::{AppConfig, Mode};
use error::BootError;
use std::process::ExitCode;

fn main() -> ExitCode {
    // A .env file is optional; real environment variables take precedence
    let dotenv = dotenvy::dotenv();

    // Parse command line args and environment variables
    let config = AppConfig::parse();

    let process_name = match config.mode {
        Mode::Pool => "supervisor".to_string(),
        Mode::Worker => format!("worker-{}", config.worker_port()),
    };
    logging::init(&config.log_dir, &process_name);

    match dotenv {
        Ok(path) => tracing::info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Failed to load .env file: {}", e),
    }

    tracing::info!("Starting imghost-server ({})...", process_name);

    match run(&config) {
        Ok(()) => {
            tracing::info!("imghost-server ({}) has shut down.", process_name);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("FATAL: {}", e);
            eprintln!("FATAL: {}. Exiting.", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: &AppConfig) -> Result<(), BootError> {
    config.validate().map_err(BootError::InvalidConfig)?;

    // Workers serve one request at a time; the pool gets its parallelism from processes
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(BootError::Runtime)?;

    runtime.block_on(async {
        match config.mode {
            Mode::Pool => worker_pool::run(config).await,
            Mode::Worker => worker::run(config).await,
        }
    })
}
