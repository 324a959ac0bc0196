use async_trait::async_trait;

use crate::{
    db::{
        error::{DbError, DbResult},
        shard::ShardHandle,
    },
    models::{BandwidthSample, BucketUsage, Day, DayRange, RegionFilter, TimeAt},
};

/// Filter shared by the per-bucket aggregate queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketQuery {
    pub tenant_id: i64,
    pub region: RegionFilter,
    pub range: DayRange,
}

/// Storage primitives for one bandwidth partition table.
///
/// Every method targets the table behind `shard`. Callers resolve the shard with
/// [`crate::db::shard::route`] for tenant-scoped calls, or iterate all shards
/// through [`crate::db::fanout::for_each_shard`].
#[async_trait]
pub trait BandwidthRepo: Send + Sync {
    /// Insert the sample's bucket, or add its bytes to the existing row with
    /// the same `(tenant_id, region_id, day, time_at)` in one statement.
    async fn upsert_increment(&self, shard: ShardHandle, sample: &BandwidthSample)
    -> DbResult<()>;

    /// Number of distinct `(day, time_at)` buckets with at least one matching row.
    async fn count_buckets(&self, shard: ShardHandle, query: &BucketQuery) -> DbResult<i64>;

    /// Buckets ordered by summed bytes descending; skips `offset` rows and
    /// returns the next one. Ties are ordered chronologically.
    async fn bucket_at_rank(
        &self,
        shard: ShardHandle,
        query: &BucketQuery,
        offset: i64,
    ) -> DbResult<Option<BucketUsage>>;

    /// Summed bytes of every bucket with matching rows, in chronological order.
    async fn bucket_totals(
        &self,
        shard: ShardHandle,
        query: &BucketQuery,
    ) -> DbResult<Vec<BucketUsage>>;

    /// Tenants (`> 0`) with at least one row in the range.
    async fn distinct_tenants(&self, shard: ShardHandle, range: DayRange) -> DbResult<Vec<i64>>;

    /// Rows with `day < cutoff`.
    async fn count_before(&self, shard: ShardHandle, cutoff: Day) -> DbResult<u64>;

    /// Delete rows with `day < cutoff` in batches, stopping once nothing is
    /// left or `max_deletes` rows are gone. Returns the number deleted.
    async fn delete_before(
        &self,
        shard: ShardHandle,
        cutoff: Day,
        batch_size: u32,
        max_deletes: u64,
    ) -> DbResult<u64>;
}

/// Rebuild a typed bucket from its stored `day`/`time_at` text columns.
pub fn bucket_from_columns(day: &str, time_at: &str, bytes: i64) -> DbResult<BucketUsage> {
    let day = Day::parse(day)
        .map_err(|e| DbError::Internal(format!("Invalid day in database: {e}")))?;
    let time_at = TimeAt::parse(time_at)
        .map_err(|e| DbError::Internal(format!("Invalid time in database: {e}")))?;
    Ok(BucketUsage {
        day,
        time_at,
        bytes,
    })
}
