use axum::{Router, http::Method, routing::get};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod model;
pub mod reports;
pub mod workflow;

use handler::AppState;

/// Builds the service router with all API routes mounted under `/api`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let api = Router::new()
        .route("/dashboard", get(handler::dashboard))
        .merge(catalog::routes())
        .merge(ledger::routes());

    Router::new()
        .route("/", get(handler::healthcheck))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
