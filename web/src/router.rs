use crate::{
    controller::{health_check_controller, websocket_controller},
    middleware::upgrade_guard::guard_upgrade,
    AppState,
};
use axum::{middleware::from_fn_with_state, routing::get, Router};

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(websocket_routes(app_state.clone()))
        .merge(stats_routes(app_state))
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn websocket_routes(app_state: AppState) -> Router {
    let path = app_state.config.websocket_path.clone();
    Router::new()
        .route(&path, get(websocket_controller::connect))
        .route_layer(from_fn_with_state(app_state.clone(), guard_upgrade))
        .with_state(app_state)
}

fn stats_routes(app_state: AppState) -> Router {
    let path = format!(
        "{}/stats",
        app_state.config.websocket_path.trim_end_matches('/')
    );
    Router::new()
        .route(&path, get(websocket_controller::stats))
        .with_state(app_state)
}
