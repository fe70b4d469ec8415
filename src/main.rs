//! aethernetd - run the autonomous agent daemon.
//!
//! Loads the agent home, validates configuration, wires the default
//! providers, and runs the tick loop until SIGINT.

use std::sync::Arc;

use aethernet_core::brain::HttpBrainClient;
use aethernet_core::config::{self, AgentConfig};
use aethernet_core::providers::LocalComputeProvider;
use aethernet_core::runtime::AgentRuntime;
use aethernet_core::transport::NullTransport;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    dotenv::dotenv().ok();
    env_logger::init();

    let home = config::default_home_dir();
    let config = match AgentConfig::load(&home) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config: {}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    let diagnostics = config.validate();
    for diag in &diagnostics {
        eprintln!(
            "[config:{:?}] {} ({}): {}",
            diag.severity, diag.field, diag.code, diag.message
        );
    }
    if config::has_errors(&diagnostics) {
        eprintln!("configuration invalid, refusing to start");
        return std::process::ExitCode::FAILURE;
    }

    let brain = Arc::new(HttpBrainClient::new(config.brain.clone()));
    let compute = Arc::new(LocalComputeProvider::new(&config.data_dir));
    let runtime = match AgentRuntime::new(config, brain, Arc::new(NullTransport), compute) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Err(e) = runtime.initialize() {
        eprintln!("initialization failed: {}", e);
        return std::process::ExitCode::FAILURE;
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("SIGINT received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let exit = runtime.run_daemon(shutdown_rx).await;
    if let Err(e) = runtime.close() {
        log::warn!("close failed: {}", e);
    }

    match exit {
        Ok(reason) => {
            log::info!("daemon exited: {:?}", reason);
            std::process::ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("daemon failed: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
