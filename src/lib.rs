//! HTTP gateway exposing object-storage buckets: streamed listings with
//! signed download URLs, chunked downloads, multipart uploads and a batch
//! sink for JSON documents.

pub mod config;
pub mod credentials;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod timestamp;

use axum::Router;
use state::AppState;

/// Router with all gateway routes, bound to `state`.
pub fn create_router(state: AppState) -> Router {
    routes::routes::routes().with_state(state)
}
