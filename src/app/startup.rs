//! Application startup
//!
//! Parse arguments, load configuration, initialise logging, then run the
//! requested command under the process shutdown guard.

use crate::app::cli::{AppConfig, Args, Command};
use crate::app::simulation::run_simulation;
use crate::core::error_handling::log_error_with_context;
use crate::core::logging::init_logging;
use crate::core::shutdown::ShutdownCoordinator;
use clap::Parser;
use colored::Colorize;
use std::io::IsTerminal;

/// Run the binary, returning the process exit code
pub async fn startup() -> i32 {
    let args = Args::parse();

    // Logging is not up yet, so configuration errors go to stderr
    let mut config = match AppConfig::load(args.config_file.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    config.apply_args(&args);

    let use_color = config
        .log
        .color
        .unwrap_or_else(|| std::io::stdout().is_terminal());
    colored::control::set_override(use_color);

    let log_file = config.log.file.as_ref().map(|p| p.to_string_lossy().into_owned());
    if let Err(e) = init_logging(
        config.log.level.as_deref(),
        config.log.format.as_deref(),
        log_file.as_deref(),
        use_color,
    ) {
        eprintln!("Error: failed to initialise logging: {}", e);
        return 1;
    }
    log::debug!("{}", crate::core::version::version_banner());

    match args.command.clone().unwrap_or(Command::Config) {
        Command::Config => match config.to_toml_string() {
            Ok(rendered) => {
                print!("{}", rendered);
                0
            }
            Err(e) => {
                log_error_with_context(&e, "Rendering configuration");
                1
            }
        },
        Command::Simulate(sim_args) => {
            config.simulation.apply_args(&sim_args);
            simulate(config).await
        }
    }
}

async fn simulate(config: AppConfig) -> i32 {
    let result = ShutdownCoordinator::guard_with_coordinator(|coordinator, _shutdown_rx| async move {
        run_simulation(&config, coordinator.signal()).await
    })
    .await;

    match result {
        Ok(report) => {
            println!("{}", "Simulation summary".bold());
            println!("{}", report);
            if report.interrupted {
                130
            } else {
                0
            }
        }
        Err(e) => {
            log_error_with_context(&e, "Running simulation");
            1
        }
    }
}
