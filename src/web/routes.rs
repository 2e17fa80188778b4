use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let usb_routes = Router::new()
        .route(
            "/usb/functions",
            get(handlers::get_functions).put(handlers::set_functions),
        )
        .route("/usb/reset", post(handlers::reset))
        .route("/usb/speed", get(handlers::get_speed))
        .route("/usb/events", get(handlers::events_stream))
        .route("/config", get(handlers::get_config));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api", usb_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
