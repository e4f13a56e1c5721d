//! Defines the gateway's HTTP routes.
//!
//! ## Structure
//! - `GET  /datasets/{bucket}/entities` — streamed JSON listing with signed URLs
//! - `GET  /download/{bucket}/{*filename}` — chunked object download
//! - `POST /upload/{bucket}` — multipart upload, optional `local_path` header
//! - `POST /sink/{bucket}` — JSON batch of upserts and deletes
//! - `GET  /healthz`, `GET /readyz` — probes
//!
//! The wildcard `*filename` allows nested names like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        entity_handlers::list_entities,
        health_handlers::{healthz, readyz},
        sink_handlers::sink,
        transfer_handlers::{download, upload},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/datasets/{bucket}/entities", get(list_entities))
        .route("/download/{bucket}/{*filename}", get(download))
        // uploads stream straight to the store, so no body cap
        .route(
            "/upload/{bucket}",
            post(upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/sink/{bucket}", post(sink))
}
