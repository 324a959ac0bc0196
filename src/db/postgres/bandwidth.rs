use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::{
    db::{
        error::DbResult,
        repos::{BandwidthRepo, BucketQuery, bucket_from_columns},
        shard::ShardHandle,
    },
    models::{BandwidthSample, BucketUsage, Day, DayRange, RegionFilter},
};

pub struct PostgresBandwidthRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresBandwidthRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    /// Region predicate and the placeholder index of the first day bound.
    fn region_clause(region: RegionFilter) -> (&'static str, usize) {
        if region.region_id().is_some() {
            (" AND region_id = $2", 3)
        } else {
            ("", 2)
        }
    }
}

#[async_trait]
impl BandwidthRepo for PostgresBandwidthRepo {
    async fn upsert_increment(
        &self,
        shard: ShardHandle,
        sample: &BandwidthSample,
    ) -> DbResult<()> {
        let sql = format!(
            r#"
            INSERT INTO {table} (tenant_id, region_id, day, time_at, bytes)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, region_id, day, time_at)
            DO UPDATE SET bytes = {table}.bytes + EXCLUDED.bytes
            "#,
            table = shard.table()
        );

        sqlx::query(&sql)
            .bind(sample.tenant_id)
            .bind(sample.region_id)
            .bind(sample.day.to_string())
            .bind(sample.time_at.to_string())
            .bind(sample.bytes)
            .execute(&self.write_pool)
            .await?;

        Ok(())
    }

    async fn count_buckets(&self, shard: ShardHandle, query: &BucketQuery) -> DbResult<i64> {
        let (region, from) = Self::region_clause(query.region);
        let sql = format!(
            r#"
            SELECT COUNT(*) FROM (
                SELECT 1 FROM {table}
                WHERE tenant_id = $1{region} AND day BETWEEN ${from} AND ${to}
                GROUP BY day, time_at
            ) AS buckets
            "#,
            table = shard.table(),
            to = from + 1,
        );

        let mut q = sqlx::query_scalar::<_, i64>(&sql).bind(query.tenant_id);
        if let Some(region_id) = query.region.region_id() {
            q = q.bind(region_id);
        }
        let count = q
            .bind(query.range.from().to_string())
            .bind(query.range.to().to_string())
            .fetch_one(&self.read_pool)
            .await?;

        Ok(count)
    }

    async fn bucket_at_rank(
        &self,
        shard: ShardHandle,
        query: &BucketQuery,
        offset: i64,
    ) -> DbResult<Option<BucketUsage>> {
        let (region, from) = Self::region_clause(query.region);
        let sql = format!(
            r#"
            SELECT day, time_at, SUM(bytes)::BIGINT AS total_bytes
            FROM {table}
            WHERE tenant_id = $1{region} AND day BETWEEN ${from} AND ${to}
            GROUP BY day, time_at
            ORDER BY total_bytes DESC, day ASC, time_at ASC
            LIMIT 1 OFFSET ${offset}
            "#,
            table = shard.table(),
            to = from + 1,
            offset = from + 2,
        );

        let mut q = sqlx::query(&sql).bind(query.tenant_id);
        if let Some(region_id) = query.region.region_id() {
            q = q.bind(region_id);
        }
        let row = q
            .bind(query.range.from().to_string())
            .bind(query.range.to().to_string())
            .bind(offset)
            .fetch_optional(&self.read_pool)
            .await?;

        row.map(|row| {
            bucket_from_columns(
                row.get::<&str, _>("day"),
                row.get::<&str, _>("time_at"),
                row.get("total_bytes"),
            )
        })
        .transpose()
    }

    async fn bucket_totals(
        &self,
        shard: ShardHandle,
        query: &BucketQuery,
    ) -> DbResult<Vec<BucketUsage>> {
        let (region, from) = Self::region_clause(query.region);
        let sql = format!(
            r#"
            SELECT day, time_at, SUM(bytes)::BIGINT AS total_bytes
            FROM {table}
            WHERE tenant_id = $1{region} AND day BETWEEN ${from} AND ${to}
            GROUP BY day, time_at
            ORDER BY day ASC, time_at ASC
            "#,
            table = shard.table(),
            to = from + 1,
        );

        let mut q = sqlx::query(&sql).bind(query.tenant_id);
        if let Some(region_id) = query.region.region_id() {
            q = q.bind(region_id);
        }
        let rows = q
            .bind(query.range.from().to_string())
            .bind(query.range.to().to_string())
            .fetch_all(&self.read_pool)
            .await?;

        rows.iter()
            .map(|row| {
                bucket_from_columns(
                    row.get::<&str, _>("day"),
                    row.get::<&str, _>("time_at"),
                    row.get("total_bytes"),
                )
            })
            .collect()
    }

    async fn distinct_tenants(&self, shard: ShardHandle, range: DayRange) -> DbResult<Vec<i64>> {
        let sql = format!(
            "SELECT DISTINCT tenant_id FROM {} WHERE day BETWEEN $1 AND $2 AND tenant_id > 0",
            shard.table()
        );

        let tenants = sqlx::query_scalar::<_, i64>(&sql)
            .bind(range.from().to_string())
            .bind(range.to().to_string())
            .fetch_all(&self.read_pool)
            .await?;

        Ok(tenants)
    }

    async fn count_before(&self, shard: ShardHandle, cutoff: Day) -> DbResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE day < $1", shard.table());
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .bind(cutoff.to_string())
            .fetch_one(&self.read_pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn delete_before(
        &self,
        shard: ShardHandle,
        cutoff: Day,
        batch_size: u32,
        max_deletes: u64,
    ) -> DbResult<u64> {
        let sql = format!(
            r#"
            DELETE FROM {table}
            WHERE ctid IN (
                SELECT ctid FROM {table}
                WHERE day < $1
                LIMIT $2
            )
            "#,
            table = shard.table()
        );
        let cutoff = cutoff.to_string();
        let mut total_deleted: u64 = 0;

        loop {
            if total_deleted >= max_deletes {
                break;
            }

            let remaining = max_deletes - total_deleted;
            let limit = std::cmp::min(u64::from(batch_size.max(1)), remaining) as i64;

            let result = sqlx::query(&sql)
                .bind(&cutoff)
                .bind(limit)
                .execute(&self.write_pool)
                .await?;

            let rows_deleted = result.rows_affected();
            total_deleted += rows_deleted;

            if rows_deleted < limit as u64 {
                break;
            }
        }

        Ok(total_deleted)
    }
}
