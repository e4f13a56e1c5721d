//! Batch sink: applies upserts and deletes, one object per operation.
//!
//! Operations run in order and independently. A failing operation is
//! recorded and the batch carries on; deleting an object that does not exist
//! counts as success. Invalid operations are reported as rejected rather
//! than failed.

use crate::{
    models::sink::{SinkOperation, SinkOutcome, SinkStatus},
    store::{ObjectRef, ObjectStore, StoreResult},
};
use std::io::{self, Cursor};
use tracing::{error, info, warn};

async fn apply_one(
    store: &dyn ObjectStore,
    bucket: &str,
    op: &SinkOperation,
) -> StoreResult<SinkStatus> {
    let object = ObjectRef::new(bucket, op.filename.clone());

    if op.deleted {
        return match store.delete(&object).await {
            Ok(()) => {
                info!("File {} deleted from bucket.", op.filename);
                Ok(SinkStatus::Deleted)
            }
            Err(err) if err.is_not_found() => {
                info!("File {} does not exist in bucket.", op.filename);
                Ok(SinkStatus::AlreadyAbsent)
            }
            Err(err) => Err(err),
        };
    }

    let payload = serde_json::to_vec(&op.data).map_err(io::Error::from)?;
    store
        .write_stream(
            &object,
            Some(op.content_type()),
            Box::pin(Cursor::new(payload)),
        )
        .await?;
    info!("File uploaded to {}.", op.filename);
    Ok(SinkStatus::Written)
}

/// Apply every operation in `ops` against `bucket`, returning one outcome per
/// operation in the same order.
pub async fn apply_batch(
    store: &dyn ObjectStore,
    bucket: &str,
    ops: &[SinkOperation],
) -> Vec<SinkOutcome> {
    let mut outcomes = Vec::with_capacity(ops.len());
    for op in ops {
        let outcome = match apply_one(store, bucket, op).await {
            Ok(status) => SinkOutcome::ok(&op.filename, status),
            Err(err) if err.is_client_error() => {
                warn!("sink operation on {:?} rejected: {}", op.filename, err);
                SinkOutcome::rejected(&op.filename, err)
            }
            Err(err) => {
                error!("sink operation on {} failed: {}", op.filename, err);
                SinkOutcome::failed(&op.filename, err)
            }
        };
        outcomes.push(outcome);
    }
    outcomes
}
