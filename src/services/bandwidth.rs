use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    config::RetentionConfig,
    db::{BucketQuery, DbError, DbPool, fanout, shard},
    models::{
        BandwidthSample, BucketKey, BucketUsage, Day, DayRange, Month, PercentileRequest,
        RangeReportEntry, RegionFilter, TimeAt, ValidationError,
    },
    observability::metrics,
};

/// Errors surfaced by the metering service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Db(#[from] DbError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Retention parameters for a single sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    pub horizon_days: u32,
    pub dry_run: bool,
    pub batch_size: u32,
    /// Per-table cap on deleted rows.
    pub max_deletes: u64,
}

impl From<&RetentionConfig> for SweepPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            horizon_days: config.horizon_days,
            dry_run: config.safety.dry_run,
            batch_size: config.safety.batch_size,
            max_deletes: config.safety.max_deletes(),
        }
    }
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Rows dated strictly before this day were targeted.
    pub cutoff: Day,
    /// Rows deleted, or rows that would be deleted in dry-run mode.
    pub deleted: u64,
    pub dry_run: bool,
}

/// Service layer for bandwidth metering: ingestion, peak and percentile
/// queries, gap-filled range reports, and retention.
#[derive(Clone)]
pub struct BandwidthService {
    db: Arc<DbPool>,
}

impl BandwidthService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Merge one traffic observation into its bucket.
    ///
    /// Samples for tenants `<= 0` are dropped without touching storage. The
    /// time label is aligned down to the start of its 5-minute bucket.
    pub async fn record(
        &self,
        tenant_id: i64,
        region_id: i64,
        day: &str,
        time_at: &str,
        bytes: i64,
    ) -> ServiceResult<()> {
        if tenant_id <= 0 {
            tracing::trace!(tenant_id, "Dropping sample without a tenant");
            metrics::record_sample_write("dropped", bytes);
            return Ok(());
        }

        let day = Day::parse(day)?;
        let time_at = TimeAt::parse(time_at)?.bucket_floor();
        if bytes < 0 {
            return Err(ValidationError::NegativeBytes(bytes).into());
        }

        let sample = BandwidthSample {
            tenant_id,
            region_id,
            day,
            time_at,
            bytes,
        };
        let result = self
            .db
            .bandwidth()
            .upsert_increment(shard::route(tenant_id), &sample)
            .await;

        match result {
            Ok(()) => {
                metrics::record_sample_write("stored", bytes);
                Ok(())
            }
            Err(e) => {
                metrics::record_sample_write("error", bytes);
                Err(e.into())
            }
        }
    }

    /// Highest bucket of a tenant's day, all regions combined.
    pub async fn peak_in_day(&self, tenant_id: i64, day: &str) -> ServiceResult<Option<BucketUsage>> {
        let day = Day::parse(day)?;
        if tenant_id <= 0 {
            return Ok(None);
        }

        let started = Instant::now();
        let query = BucketQuery {
            tenant_id,
            region: RegionFilter::All,
            range: DayRange::single(day),
        };
        let result = self.top_bucket(&query).await;
        observe_query("peak_day", started, &result);
        result
    }

    /// Highest bucket of a tenant's calendar month, all regions combined.
    pub async fn peak_in_month(
        &self,
        tenant_id: i64,
        month: &str,
    ) -> ServiceResult<Option<BucketUsage>> {
        let month = Month::parse(month)?;
        if tenant_id <= 0 {
            return Ok(None);
        }

        let started = Instant::now();
        let query = BucketQuery {
            tenant_id,
            region: RegionFilter::All,
            range: month.days(),
        };
        let result = self.top_bucket(&query).await;
        observe_query("peak_month", started, &result);
        result
    }

    /// Bucket at the requested percentile rank over `[day_from, day_to]`.
    ///
    /// A non-positive percentile means 95; 100 and above return the maximum
    /// bucket. Reversed bounds are swapped.
    pub async fn percentile_between(
        &self,
        tenant_id: i64,
        region_id: i64,
        day_from: &str,
        day_to: &str,
        percentile: i32,
    ) -> ServiceResult<Option<BucketUsage>> {
        let range = DayRange::new(Day::parse(day_from)?, Day::parse(day_to)?);
        if tenant_id <= 0 {
            return Ok(None);
        }

        let started = Instant::now();
        let request =
            PercentileRequest::new(tenant_id, RegionFilter::from_id(region_id), range, percentile);
        let result = self.percentile(&request).await;
        observe_query("percentile", started, &result);
        result
    }

    async fn percentile(&self, request: &PercentileRequest) -> ServiceResult<Option<BucketUsage>> {
        let query = BucketQuery {
            tenant_id: request.tenant_id,
            region: request.region,
            range: request.range,
        };
        if request.is_peak() {
            return self.top_bucket(&query).await;
        }

        let repo = self.db.bandwidth();
        let shard = shard::route(request.tenant_id);
        let total = repo.count_buckets(shard, &query).await?;
        if total == 0 {
            return Ok(None);
        }

        let offset = request.rank_offset(total);
        tracing::debug!(
            tenant_id = request.tenant_id,
            percentile = request.percentile,
            total,
            offset,
            "Selecting percentile bucket"
        );
        Ok(repo.bucket_at_rank(shard, &query, offset).await?)
    }

    async fn top_bucket(&self, query: &BucketQuery) -> ServiceResult<Option<BucketUsage>> {
        Ok(self
            .db
            .bandwidth()
            .bucket_at_rank(shard::route(query.tenant_id), query, 0)
            .await?)
    }

    /// Gap-filled series of every bucket in `[day_from, day_to]` up to the
    /// current local time.
    pub async fn range_report(
        &self,
        tenant_id: i64,
        region_id: i64,
        day_from: &str,
        day_to: &str,
    ) -> ServiceResult<Vec<RangeReportEntry>> {
        self.range_report_at(
            tenant_id,
            region_id,
            day_from,
            day_to,
            Local::now().naive_local(),
        )
        .await
    }

    /// [`Self::range_report`] against an explicit wall-clock instant.
    pub async fn range_report_at(
        &self,
        tenant_id: i64,
        region_id: i64,
        day_from: &str,
        day_to: &str,
        now: NaiveDateTime,
    ) -> ServiceResult<Vec<RangeReportEntry>> {
        let range = DayRange::new(Day::parse(day_from)?, Day::parse(day_to)?);
        if tenant_id <= 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let query = BucketQuery {
            tenant_id,
            region: RegionFilter::for_range(region_id),
            range,
        };
        let result = self
            .db
            .bandwidth()
            .bucket_totals(shard::route(tenant_id), &query)
            .await
            .map(|totals| fill_range(&totals, range, now))
            .map_err(ServiceError::from);
        observe_query("range", started, &result);
        result
    }

    /// Tenants with at least one sample in the range, across every shard,
    /// sorted ascending. Days may be written `YYYYMMDD` or `YYYY-MM-DD`.
    pub async fn distinct_tenants(&self, day_from: &str, day_to: &str) -> ServiceResult<Vec<i64>> {
        let range = DayRange::new(Day::parse_lenient(day_from)?, Day::parse_lenient(day_to)?);

        let repo = self.db.bandwidth();
        let tenants: Arc<Mutex<BTreeSet<i64>>> = Arc::new(Mutex::new(BTreeSet::new()));

        fanout::for_each_shard(|shard| {
            let repo = Arc::clone(&repo);
            let tenants = Arc::clone(&tenants);
            async move {
                let found = repo.distinct_tenants(shard, range).await?;
                tenants.lock().extend(found);
                Ok(())
            }
        })
        .await?;

        let tenants = tenants.lock();
        Ok(tenants.iter().copied().collect())
    }

    /// Remove samples older than the retention horizon from every shard.
    ///
    /// A sample dated exactly `today - horizon_days` is kept. In dry-run mode
    /// matching rows are only counted.
    pub async fn sweep(&self, today: Day, policy: SweepPolicy) -> ServiceResult<SweepReport> {
        let cutoff = today
            .checked_sub_days(u64::from(policy.horizon_days))
            .ok_or_else(|| {
                DbError::Validation(format!(
                    "retention horizon of {} days is out of range",
                    policy.horizon_days
                ))
            })?;

        let started = Instant::now();
        let repo = self.db.bandwidth();
        let total = Arc::new(AtomicU64::new(0));

        let result = fanout::for_each_shard(|shard| {
            let repo = Arc::clone(&repo);
            let total = Arc::clone(&total);
            async move {
                let affected = if policy.dry_run {
                    repo.count_before(shard, cutoff).await?
                } else {
                    repo.delete_before(shard, cutoff, policy.batch_size, policy.max_deletes)
                        .await?
                };

                if affected > 0 {
                    tracing::debug!(
                        table = shard.table(),
                        deleted = affected,
                        cutoff = %cutoff,
                        dry_run = policy.dry_run,
                        "Swept partition"
                    );
                    if !policy.dry_run {
                        metrics::record_retention_deletion(shard.table(), affected);
                    }
                }
                total.fetch_add(affected, Ordering::Relaxed);
                Ok(())
            }
        })
        .await;

        metrics::record_sweep(result.is_ok(), started.elapsed().as_secs_f64());
        result?;

        let report = SweepReport {
            cutoff,
            deleted: total.load(Ordering::Relaxed),
            dry_run: policy.dry_run,
        };
        if report.dry_run {
            tracing::info!(
                cutoff = %report.cutoff,
                deleted = report.deleted,
                "DRY RUN: Retention sweep would delete samples"
            );
        } else {
            tracing::info!(
                cutoff = %report.cutoff,
                deleted = report.deleted,
                "Retention sweep complete"
            );
        }
        Ok(report)
    }
}

fn observe_query<T>(kind: &str, started: Instant, result: &ServiceResult<T>) {
    metrics::record_query(kind, result.is_ok(), started.elapsed().as_secs_f64());
}

/// Expand sparse bucket totals into one entry per 5-minute bucket of `range`.
///
/// Buckets without totals are zero-valued. The walk stops at the first bucket
/// whose key is not earlier than `now`, so future buckets never appear.
pub fn fill_range(
    totals: &[BucketUsage],
    range: DayRange,
    now: NaiveDateTime,
) -> Vec<RangeReportEntry> {
    let cutoff = BucketKey::at(now);
    let by_key: HashMap<BucketKey, BucketUsage> =
        totals.iter().map(|usage| (usage.key(), *usage)).collect();

    let mut entries = Vec::new();
    'days: for day in range.days() {
        for time_at in TimeAt::day_buckets() {
            let key = BucketKey::new(day, time_at);
            if key >= cutoff {
                break 'days;
            }
            let entry = match by_key.get(&key) {
                Some(usage) => RangeReportEntry::from(*usage),
                None => RangeReportEntry::empty(key),
            };
            entries.push(entry);
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::models::BUCKETS_PER_DAY;

    fn day(s: &str) -> Day {
        Day::parse(s).unwrap()
    }

    fn time(s: &str) -> TimeAt {
        TimeAt::parse(s).unwrap()
    }

    fn instant(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_fill_range_past_day_without_samples() {
        let range = DayRange::single(day("20240301"));
        let entries = fill_range(&[], range, instant(2024, 3, 5, 12, 0));

        assert_eq!(entries.len(), BUCKETS_PER_DAY);
        assert!(entries.iter().all(|e| e.bytes == 0 && e.bits == 0));
        assert_eq!(entries[0].time_at.to_string(), "0000");
        assert_eq!(entries[BUCKETS_PER_DAY - 1].time_at.to_string(), "2355");
        assert!(
            entries
                .windows(2)
                .all(|w| BucketKey::new(w[0].day, w[0].time_at)
                    < BucketKey::new(w[1].day, w[1].time_at))
        );
    }

    #[test]
    fn test_fill_range_places_recorded_totals() {
        let range = DayRange::single(day("20240301"));
        let totals = vec![
            BucketUsage {
                day: day("20240301"),
                time_at: time("0005"),
                bytes: 100,
            },
            BucketUsage {
                day: day("20240301"),
                time_at: time("2355"),
                bytes: 7,
            },
        ];
        let entries = fill_range(&totals, range, instant(2024, 3, 2, 0, 0));

        assert_eq!(entries.len(), BUCKETS_PER_DAY);
        assert_eq!(entries[0].bytes, 0);
        assert_eq!(entries[1].bytes, 100);
        assert_eq!(entries[1].bits, 800);
        assert_eq!(entries[BUCKETS_PER_DAY - 1].bytes, 7);
    }

    #[test]
    fn test_fill_range_stops_at_now() {
        let range = DayRange::single(day("20240301"));
        let entries = fill_range(&[], range, instant(2024, 3, 1, 1, 2));

        // 0000..=0100 are strictly before 01:02; 0105 is not
        assert_eq!(entries.len(), 13);
        assert_eq!(entries.last().unwrap().time_at.to_string(), "0100");
    }

    #[test]
    fn test_fill_range_bucket_equal_to_now_is_excluded() {
        let range = DayRange::single(day("20240301"));
        let entries = fill_range(&[], range, instant(2024, 3, 1, 0, 10));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].time_at.to_string(), "0005");
    }

    #[test]
    fn test_fill_range_spans_days_and_ignores_future_days() {
        let range = DayRange::new(day("20240301"), day("20240310"));
        let entries = fill_range(&[], range, instant(2024, 3, 3, 0, 0));

        assert_eq!(entries.len(), 2 * BUCKETS_PER_DAY);
        assert_eq!(entries[BUCKETS_PER_DAY].day, day("20240302"));
        assert_eq!(entries[BUCKETS_PER_DAY].time_at, TimeAt::MIDNIGHT);
    }

    #[test]
    fn test_fill_range_future_range_is_empty() {
        let range = DayRange::single(day("20240301"));
        let entries = fill_range(&[], range, instant(2024, 2, 1, 0, 0));
        assert!(entries.is_empty());
    }

    #[test]
    fn test_sweep_policy_from_config() {
        let mut config = RetentionConfig::default();
        config.safety.max_deletes_per_run = 0;
        let policy = SweepPolicy::from(&config);
        assert_eq!(policy.horizon_days, 100);
        assert_eq!(policy.max_deletes, u64::MAX);
        assert!(!policy.dry_run);
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod sqlite_tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::db::{shard::all_shards, tests::harness::create_sqlite_db_pool};

    async fn service() -> BandwidthService {
        BandwidthService::new(create_sqlite_db_pool().await)
    }

    fn policy(horizon_days: u32, dry_run: bool) -> SweepPolicy {
        SweepPolicy {
            horizon_days,
            dry_run,
            batch_size: 1000,
            max_deletes: u64::MAX,
        }
    }

    async fn stored_rows(service: &BandwidthService) -> u64 {
        let far_future = Day::parse("99991231").unwrap();
        let repo = service.db.bandwidth();
        let mut total = 0;
        for shard in all_shards() {
            total += repo.count_before(shard, far_future).await.unwrap();
        }
        total
    }

    #[tokio::test]
    async fn test_record_ignores_non_positive_tenants() {
        let service = service().await;

        service.record(0, 0, "20240301", "1200", 100).await.unwrap();
        service.record(-5, 0, "20240301", "1200", 100).await.unwrap();

        assert_eq!(stored_rows(&service).await, 0);
    }

    #[tokio::test]
    async fn test_record_accumulates_and_aligns_to_bucket() {
        let service = service().await;

        service.record(7, 0, "20240301", "1200", 100).await.unwrap();
        service.record(7, 0, "20240301", "1203", 50).await.unwrap();

        let peak = service
            .peak_in_day(7, "20240301")
            .await
            .unwrap()
            .expect("Expected a peak");
        assert_eq!(peak.time_at.to_string(), "1200");
        assert_eq!(peak.bytes, 150);
        assert_eq!(stored_rows(&service).await, 1);
    }

    #[tokio::test]
    async fn test_record_rejects_malformed_input() {
        let service = service().await;

        let err = service.record(7, 0, "2024-03-01", "1200", 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::Day(_))));

        let err = service.record(7, 0, "20240301", "2460", 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(ValidationError::TimeAt(_))));

        let err = service.record(7, 0, "20240301", "1200", -1).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::NegativeBytes(-1))
        ));

        assert_eq!(stored_rows(&service).await, 0);
    }

    #[tokio::test]
    async fn test_peak_in_month_spans_days() {
        let service = service().await;
        service.record(8, 0, "20240301", "0000", 10).await.unwrap();
        service.record(8, 0, "20240317", "1830", 90).await.unwrap();
        service.record(8, 0, "20240401", "0000", 500).await.unwrap();

        let peak = service
            .peak_in_month(8, "202403")
            .await
            .unwrap()
            .expect("Expected a peak");
        assert_eq!(peak.day.to_string(), "20240317");
        assert_eq!(peak.bytes, 90);

        assert!(service.peak_in_month(8, "202402").await.unwrap().is_none());
        assert!(service.peak_in_month(0, "202403").await.unwrap().is_none());
        assert!(matches!(
            service.peak_in_month(8, "2024031").await,
            Err(ServiceError::Validation(ValidationError::Month(_)))
        ));
    }

    #[tokio::test]
    async fn test_percentile_fast_path_returns_max() {
        let service = service().await;
        for (t, bytes) in [("0000", 10), ("0005", 50), ("0010", 30)] {
            service.record(9, 0, "20240301", t, bytes).await.unwrap();
        }

        let result = service
            .percentile_between(9, 0, "20240301", "20240301", 100)
            .await
            .unwrap()
            .expect("Expected a bucket");
        assert_eq!(result.bytes, 50);
    }

    #[tokio::test]
    async fn test_percentile_general_path() {
        let service = service().await;
        for (t, bytes) in [("0000", 50), ("0005", 40), ("0010", 30), ("0015", 20), ("0020", 10)] {
            service.record(10, 0, "20240301", t, bytes).await.unwrap();
        }

        let result = service
            .percentile_between(10, 0, "20240301", "20240301", 80)
            .await
            .unwrap()
            .expect("Expected a bucket");
        assert_eq!(result.bytes, 40);

        // Non-positive percentile means 95: offset = ceil(5 * 5 / 100) = 1
        let default = service
            .percentile_between(10, 0, "20240301", "20240301", 0)
            .await
            .unwrap()
            .expect("Expected a bucket");
        assert_eq!(default.bytes, 40);
    }

    #[tokio::test]
    async fn test_percentile_single_bucket_and_reversed_range() {
        let service = service().await;
        service.record(11, 3, "20240305", "0800", 77).await.unwrap();

        for percentile in [1, 50, 95, 100] {
            let result = service
                .percentile_between(11, 3, "20240331", "20240301", percentile)
                .await
                .unwrap()
                .expect("Expected a bucket");
            assert_eq!(result.bytes, 77, "percentile {percentile}");
        }
    }

    #[tokio::test]
    async fn test_percentile_absent_without_samples() {
        let service = service().await;
        service.record(12, 1, "20240301", "0000", 10).await.unwrap();

        let other_region = service
            .percentile_between(12, 2, "20240301", "20240301", 95)
            .await
            .unwrap();
        assert!(other_region.is_none());

        let unassigned = service
            .percentile_between(12, -1, "20240301", "20240301", 95)
            .await
            .unwrap();
        assert!(unassigned.is_none());
    }

    #[tokio::test]
    async fn test_range_report_fills_gaps() {
        let service = service().await;
        service.record(13, 0, "20240301", "0005", 64).await.unwrap();
        let now = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 30, 0)
            .unwrap();

        let entries = service
            .range_report_at(13, 0, "20240301", "20240301", now)
            .await
            .unwrap();

        assert_eq!(entries.len(), 6);
        assert_eq!(entries[0].bytes, 0);
        assert_eq!(entries[1].bytes, 64);
        assert_eq!(entries[1].bits, 512);

        let none = service
            .range_report_at(0, 0, "20240301", "20240301", now)
            .await
            .unwrap();
        assert!(none.is_empty());

        assert!(matches!(
            service.range_report_at(13, 0, "2024031", "20240301", now).await,
            Err(ServiceError::Validation(ValidationError::Day(_)))
        ));
    }

    #[tokio::test]
    async fn test_range_report_non_positive_region_spans_all_regions() {
        let service = service().await;
        service.record(14, 0, "20240301", "0000", 40).await.unwrap();
        service.record(14, 5, "20240301", "0000", 60).await.unwrap();
        let now = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 10, 0)
            .unwrap();

        for region in [-1, 0] {
            let entries = service
                .range_report_at(14, region, "20240301", "20240301", now)
                .await
                .unwrap();
            assert_eq!(entries[0].bytes, 100, "region {region}");
        }

        let narrowed = service
            .range_report_at(14, 5, "20240301", "20240301", now)
            .await
            .unwrap();
        assert_eq!(narrowed[0].bytes, 60);
    }

    #[tokio::test]
    async fn test_distinct_tenants_unions_shards() {
        let service = service().await;
        for tenant in [1, 2, 21, 39, 40] {
            service.record(tenant, 0, "20240301", "0000", 1).await.unwrap();
            service.record(tenant, 5, "20240302", "0000", 1).await.unwrap();
        }
        service.record(77, 0, "20240401", "0000", 1).await.unwrap();

        let tenants = service
            .distinct_tenants("2024-03-02", "20240301")
            .await
            .unwrap();
        assert_eq!(tenants, vec![1, 2, 21, 39, 40]);
    }

    #[tokio::test]
    async fn test_sweep_retention_boundary() {
        let service = service().await;
        let today = Day::parse("20240615").unwrap();
        let kept = today.checked_sub_days(100).unwrap().to_string();
        let stale = today.checked_sub_days(101).unwrap().to_string();

        service.record(1, 0, &kept, "0000", 1).await.unwrap();
        service.record(2, 0, &stale, "0000", 1).await.unwrap();
        service.record(3, 0, &stale, "0005", 1).await.unwrap();

        let dry = service.sweep(today, policy(100, true)).await.unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.deleted, 2);
        assert_eq!(stored_rows(&service).await, 3);

        let report = service.sweep(today, policy(100, false)).await.unwrap();
        assert_eq!(report.cutoff.to_string(), kept);
        assert_eq!(report.deleted, 2);
        assert_eq!(stored_rows(&service).await, 1);

        let tenants = service.distinct_tenants(&kept, &kept).await.unwrap();
        assert_eq!(tenants, vec![1]);

        let again = service.sweep(today, policy(100, false)).await.unwrap();
        assert_eq!(again.deleted, 0);
    }
}
