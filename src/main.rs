// src/main.rs

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use gridline::cli::{self, Cli, CliContext};
use gridline::registry::{self, Registries};
use gridline::runner::LocalRunner;
use gridline::settings::EngineSettings;

fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let (settings, settings_error) = match EngineSettings::load() {
        Ok(settings) => (settings, None),
        Err(e) => (
            EngineSettings::default().with_env_overrides(|key| std::env::var(key).ok()),
            Some(e),
        ),
    };

    let filter = EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    if let Some(e) = settings_error {
        warn!("Could not load engine settings, using defaults: {}", e);
    }

    let cli = Cli::parse();

    let runner = match LocalRunner::from_settings(&settings) {
        Ok(runner) => runner.shared(),
        Err(e) => {
            error!("Failed to start the local runner: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let registries = Arc::new(Registries::builtin());
    registry::install(Arc::clone(&registries));

    let ctx = CliContext { runner, registries, settings };
    let result = cli::run(cli.command, &ctx);
    registry::uninstall();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
