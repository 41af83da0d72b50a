//! JSON surface over the lifecycle operations. Handlers stay thin: every
//! decision lives in [`ServerManager`].

pub mod error;
pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use infrapanel_server_manager::ServerManager;
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ApiResult};

#[derive(Debug, Clone)]
pub struct AppState {
    pub manager: ServerManager,
}

impl AppState {
    pub fn new(manager: ServerManager) -> Self {
        Self { manager }
    }
}

/// `{server}` is the server name on start/stop/restart and its id everywhere else.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/servers", get(handlers::list_servers))
        .route("/api/servers/{server}/start", post(handlers::start_server))
        .route("/api/servers/{server}/stop", post(handlers::stop_server))
        .route("/api/servers/{server}/restart", post(handlers::restart_server))
        .route("/api/servers/{server}/command", post(handlers::send_command))
        .route("/api/servers/{server}/console", get(handlers::tail_console))
        .route("/api/servers/{server}/console/full", get(handlers::full_log))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
