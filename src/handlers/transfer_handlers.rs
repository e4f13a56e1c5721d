//! Object download and multipart upload handlers.
//! Bodies are streamed in both directions; nothing is buffered whole.

use crate::{
    errors::AppError,
    services::transfer::{open_download, upload_name, upload_stream},
    state::AppState,
    store::ObjectRef,
};
use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use tracing::{debug, info};

/// Header naming the folder uploaded files are placed under.
pub const LOCAL_PATH_HEADER: &str = "local_path";

/// GET `/download/{bucket}/{*filename}` — stream an object in fixed-size chunks.
pub async fn download(
    State(state): State<AppState>,
    Path((bucket, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    debug!("trying to download file {} from {}", filename, bucket);
    let object = ObjectRef::new(bucket, filename);
    let (meta, body) =
        open_download(state.store.clone(), object, state.settings.chunk_size).await?;

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let content_type = meta
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));

    Ok(response)
}

/// POST `/upload/{bucket}` — store every named file part of a multipart body.
///
/// Files are written one after another. A failure stops the request, but
/// files written before it stay in the bucket.
pub async fn upload(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let local_path = headers
        .get(LOCAL_PATH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?
    {
        let Some(filename) = field.file_name().filter(|n| !n.is_empty()).map(str::to_string)
        else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let name = upload_name(local_path.as_deref(), &filename);
        info!("uploading {} to {}/{}", filename, bucket, name);

        let object = ObjectRef::new(bucket.clone(), name);
        upload_stream(&*state.store, &object, content_type.as_deref(), field).await?;
    }

    Ok(Response::new(Body::empty()))
}
