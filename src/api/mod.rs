//! HTTP API
//!
//! - `POST /pin/` - pin a feed (bearer token required)
//! - `GET /pins/` - HTML listing of every pin
//! - `GET /latest/?rootKey=` - current record for one pin
//! - `GET /health` - liveness and pin counters
//!
//! ```bash
//! curl -H "Authorization: Bearer $TOKEN" -H "Content-Type: application/json" \
//!      -d '{"rootKey": "<64 hex chars>"}' http://localhost:3000/pin/
//! ```

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::pins::PinManager;

pub use auth::BearerAuth;
pub use error::ApiError;

/// State shared across handlers
pub struct AppState {
    pub pins: PinManager,
    pub auth: BearerAuth,
}

impl AppState {
    pub fn new(pins: PinManager, auth: BearerAuth) -> Self {
        Self { pins, auth }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let authenticated = Router::new()
        .route("/pin/", post(handlers::pin))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .merge(authenticated)
        .route("/pins/", get(handlers::list_pins))
        .route("/latest/", get(handlers::latest))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
