//! `GET /datasets/{bucket}/entities` — streamed, filtered object listing.

use crate::{
    errors::AppError,
    services::listing::{ListingFilter, ListingOptions, open_listing},
    state::AppState,
    timestamp::{default_expiry, parse_expire, parse_since},
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use tracing::info;

/// Query parameters, all optional.
#[derive(Debug, Default, Deserialize)]
pub struct EntitiesQuery {
    /// `YYYY-MM-DD HH:MM:SS` (UTC) overriding the default URL expiry.
    pub expire: Option<String>,
    /// Include objects below the root folder.
    pub with_subfolders: Option<String>,
    pub with_prefix: Option<String>,
    /// Only objects updated at or after this instant.
    pub since: Option<String>,
    /// Omit `file_url`.
    pub do_not_sign: Option<String>,
}

/// A flag counts as set when present with any non-empty value, so
/// `?do_not_sign=false` still skips signing.
fn flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

pub async fn list_entities(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<EntitiesQuery>,
) -> Result<Response, AppError> {
    info!("serving entities request for bucket {}", bucket);

    let signed_url_expiry = match q.expire.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => parse_expire(raw)
            .map_err(|err| AppError::bad_request(format!("invalid expire `{}`: {}", raw, err)))?,
        None => default_expiry(),
    };

    let since_floor = q.since.as_deref().and_then(|raw| {
        info!("got since: {}", raw);
        parse_since(raw, &state.settings.dt_pattern)
    });

    let filter = ListingFilter {
        prefix: q.with_prefix.filter(|p| !p.is_empty()),
        include_subfolders: flag(q.with_subfolders.as_deref()),
        since_floor,
        skip_signing: flag(q.do_not_sign.as_deref()),
        signed_url_expiry,
    };
    let options = ListingOptions {
        page_size: state.settings.page_size,
        short_page_stop: state.settings.short_page_stop,
    };

    let body = open_listing(state.store.clone(), bucket, filter, options).await?;

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Ok(response)
}
