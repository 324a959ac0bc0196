//! Tenant to partition-table routing.
//!
//! Bandwidth samples are spread over [`SHARD_COUNT`] identical tables, chosen by
//! `tenant_id mod SHARD_COUNT`. Writers and readers both resolve a
//! [`ShardHandle`] through [`route`], so a tenant's rows always live in the same
//! table. Changing the shard count requires a data migration.

use std::fmt;

/// Number of partition tables.
pub const SHARD_COUNT: usize = 20;

const TABLE_NAMES: [&str; SHARD_COUNT] = [
    "bandwidth_samples_0",
    "bandwidth_samples_1",
    "bandwidth_samples_2",
    "bandwidth_samples_3",
    "bandwidth_samples_4",
    "bandwidth_samples_5",
    "bandwidth_samples_6",
    "bandwidth_samples_7",
    "bandwidth_samples_8",
    "bandwidth_samples_9",
    "bandwidth_samples_10",
    "bandwidth_samples_11",
    "bandwidth_samples_12",
    "bandwidth_samples_13",
    "bandwidth_samples_14",
    "bandwidth_samples_15",
    "bandwidth_samples_16",
    "bandwidth_samples_17",
    "bandwidth_samples_18",
    "bandwidth_samples_19",
];

/// A resolved partition: its index and physical table name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardHandle {
    index: usize,
}

impl ShardHandle {
    /// Handle for a shard index, or `None` when out of range.
    pub fn new(index: usize) -> Option<Self> {
        (index < SHARD_COUNT).then_some(Self { index })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Physical table holding this shard's rows.
    pub fn table(&self) -> &'static str {
        TABLE_NAMES[self.index]
    }
}

impl fmt::Display for ShardHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Resolve the shard that owns a tenant's samples.
///
/// Total over all `i64` values; negative ids land on the euclidean remainder.
pub fn route(tenant_id: i64) -> ShardHandle {
    ShardHandle {
        index: tenant_id.rem_euclid(SHARD_COUNT as i64) as usize,
    }
}

/// Every shard, in index order.
pub fn all_shards() -> impl Iterator<Item = ShardHandle> {
    (0..SHARD_COUNT).map(|index| ShardHandle { index })
}
