//! HTTP surface of the real-time event service: the WebSocket upgrade
//! endpoint, its stats and a health check.

use events::EventPublisher;
use identity::IdentityResolver;
use log::*;
use realtime::Manager;
use service::Config;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;

mod controller;
pub mod error;
mod extractors;
pub mod identity;
mod middleware;
pub mod router;

// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub manager: Arc<Manager>,
    pub identity_resolver: Arc<dyn IdentityResolver>,
}

impl AppState {
    pub fn new(
        config: Config,
        manager: Arc<Manager>,
        identity_resolver: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            config,
            manager,
            identity_resolver,
        }
    }

    /// Publisher handed to mutation handlers.
    pub fn publisher(&self) -> EventPublisher {
        self.manager.publisher()
    }
}

/// Serve the routes until `shutdown` resolves, then drain the event manager.
pub async fn init_server(
    app_state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    let interface = app_state
        .config
        .interface
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let listen_addr = format!("{}:{}", interface, app_state.config.port);

    info!(
        "Server starting... listening for connections on http://{listen_addr}{} (env: {})",
        app_state.config.websocket_path,
        app_state.config.runtime_env()
    );

    let manager = Arc::clone(&app_state.manager);
    let listener = TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, router::define_routes(app_state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutdown signal received");
            // Closing the sockets lets the open upgrade handlers return.
            manager.shutdown().await;
        })
        .await
}
