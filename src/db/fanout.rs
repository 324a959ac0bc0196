//! Runs one unit of work against every shard in parallel.
//!
//! Each shard gets its own task. The coordinator waits for all of them even
//! after a failure, then reports the first error that was recorded. Which
//! error that is under concurrent failures is unspecified; every failure is
//! logged with its shard.

use std::{future::Future, sync::Arc};

use parking_lot::Mutex;
use tokio::task::JoinSet;

use super::{
    error::{DbError, DbResult},
    shard::{ShardHandle, all_shards},
};
use crate::observability::metrics;

/// Dispatch `work` for every shard and wait for all of them to finish.
pub async fn for_each_shard<F, Fut>(work: F) -> DbResult<()>
where
    F: Fn(ShardHandle) -> Fut,
    Fut: Future<Output = DbResult<()>> + Send + 'static,
{
    let first_error: Arc<Mutex<Option<DbError>>> = Arc::new(Mutex::new(None));
    let mut tasks = JoinSet::new();

    for shard in all_shards() {
        let fut = work(shard);
        let first_error = Arc::clone(&first_error);
        tasks.spawn(async move {
            if let Err(e) = fut.await {
                tracing::warn!(shard = %shard, error = %e, "Shard operation failed");
                metrics::record_shard_failure(shard.table());
                first_error.lock().get_or_insert(e);
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Shard task did not complete");
            first_error
                .lock()
                .get_or_insert(DbError::Internal(format!("shard task failed: {e}")));
        }
    }

    let outcome = first_error.lock().take();
    match outcome {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
