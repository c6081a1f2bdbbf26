use log::*;
use realtime::Manager;
use service::{logging::Logger, Config};
use std::process::ExitCode;
use std::sync::Arc;
use web::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::new();

    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start logger: {e}");
        return ExitCode::FAILURE;
    }

    info!("Starting up...");

    let identity_resolver = match web::identity::resolver(&config) {
        Ok(resolver) => resolver,
        Err(e) => {
            error!("Cannot resolve client identities without a permission service: {e}");
            return ExitCode::FAILURE;
        }
    };

    let manager = Arc::new(Manager::new(config.websocket()));
    if let Err(e) = manager.start() {
        error!("Failed to start event manager: {e}");
        return ExitCode::FAILURE;
    }

    let app_state = AppState::new(config, manager, identity_resolver);

    if let Err(e) = web::init_server(app_state, shutdown_signal()).await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shut down cleanly");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
