//! POST `/sink/{bucket}` — apply a JSON batch of upserts and deletes.

use crate::{
    models::sink::{SinkOperation, SinkOutcome, SinkStatus},
    services::sink::apply_batch,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{info, warn};

/// Status for a batch with at least one failed operation: 400 when every
/// failure was an invalid operation, 502 when the store let any of them down.
fn failure_status(outcomes: &[SinkOutcome]) -> StatusCode {
    let store_failed = outcomes.iter().any(|o| o.status == SinkStatus::Failed);
    if store_failed {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// Every operation is attempted. An all-success batch answers 200 with an
/// empty body; otherwise 400 or 502 with the outcome of every operation.
pub async fn sink(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Json(ops): Json<Vec<SinkOperation>>,
) -> Response {
    info!("applying {} sink operations to bucket {}", ops.len(), bucket);
    let outcomes = apply_batch(&*state.store, &bucket, &ops).await;

    let failed = outcomes.iter().filter(|o| o.is_failure()).count();
    if failed == 0 {
        return StatusCode::OK.into_response();
    }

    warn!(
        "{} of {} sink operations failed for bucket {}",
        failed,
        outcomes.len(),
        bucket
    );
    let status = failure_status(&outcomes);
    (
        status,
        Json(json!({
            "error": format!("{} of {} operations failed", failed, outcomes.len()),
            "status": status.as_u16(),
            "results": outcomes,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_items_alone_are_a_bad_request() {
        let outcomes = [
            SinkOutcome::ok("a.json", SinkStatus::Written),
            SinkOutcome::rejected("", "invalid object name ``"),
        ];
        assert_eq!(failure_status(&outcomes), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn any_store_failure_is_a_bad_gateway() {
        let outcomes = [
            SinkOutcome::rejected("", "invalid object name ``"),
            SinkOutcome::failed("b.json", "disk full"),
        ];
        assert_eq!(failure_status(&outcomes), StatusCode::BAD_GATEWAY);
    }
}
