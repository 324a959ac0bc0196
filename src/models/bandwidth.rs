//! Bandwidth metering value types.
//!
//! Samples are keyed by `(tenant, region, day, time_at)`. Days travel as
//! `YYYYMMDD` strings and intra-day buckets as zero-padded `HHMM` labels aligned
//! to 5-minute boundaries. The types here parse and format those labels so the
//! rest of the crate compares typed values instead of concatenated strings.

use std::{fmt, str::FromStr, sync::LazyLock};

use chrono::{Datelike, Days, Local, NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

static DAY_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{8}$").unwrap());
static MONTH_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{6}$").unwrap());
static TIME_AT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{4}$").unwrap());

/// Width of a single usage bucket in minutes.
pub const BUCKET_MINUTES: u16 = 5;

/// Number of buckets in one calendar day.
pub const BUCKETS_PER_DAY: usize = (24 * 60 / BUCKET_MINUTES) as usize;

/// Malformed metering input, rejected before any storage access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid day '{0}': expected YYYYMMDD")]
    Day(String),

    #[error("invalid month '{0}': expected YYYYMM")]
    Month(String),

    #[error("invalid time '{0}': expected HHMM")]
    TimeAt(String),

    #[error("bytes must be non-negative, got {0}")]
    NegativeBytes(i64),
}

// =============================================================================
// Day
// =============================================================================

/// A calendar day, formatted as `YYYYMMDD`.
///
/// Ordering follows the calendar, which is also the lexicographic order of the
/// formatted label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Day(NaiveDate);

impl Day {
    /// Parse a strict `YYYYMMDD` label.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if !DAY_REGEX.is_match(s) {
            return Err(ValidationError::Day(s.to_string()));
        }
        let invalid = || ValidationError::Day(s.to_string());
        let year: i32 = s[0..4].parse().map_err(|_| invalid())?;
        let month: u32 = s[4..6].parse().map_err(|_| invalid())?;
        let day: u32 = s[6..8].parse().map_err(|_| invalid())?;
        NaiveDate::from_ymd_opt(year, month, day)
            .map(Self)
            .ok_or_else(invalid)
    }

    /// Parse either `YYYYMMDD` or `YYYY-MM-DD`.
    pub fn parse_lenient(s: &str) -> Result<Self, ValidationError> {
        let compact: String = s.chars().filter(|c| *c != '-').collect();
        Self::parse(&compact).map_err(|_| ValidationError::Day(s.to_string()))
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// The current local calendar day.
    pub fn today() -> Self {
        Self(Local::now().date_naive())
    }

    pub fn checked_sub_days(self, days: u64) -> Option<Self> {
        self.0.checked_sub_days(Days::new(days)).map(Self)
    }

    /// The following calendar day.
    pub fn succ(self) -> Option<Self> {
        self.0.succ_opt().map(Self)
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}{:02}{:02}",
            self.0.year(),
            self.0.month(),
            self.0.day()
        )
    }
}

impl FromStr for Day {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Day {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Day {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}

// =============================================================================
// Month
// =============================================================================

/// A calendar month, formatted as `YYYYMM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    first: NaiveDate,
}

impl Month {
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if !MONTH_REGEX.is_match(s) {
            return Err(ValidationError::Month(s.to_string()));
        }
        let invalid = || ValidationError::Month(s.to_string());
        let year: i32 = s[0..4].parse().map_err(|_| invalid())?;
        let month: u32 = s[4..6].parse().map_err(|_| invalid())?;
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|first| Self { first })
            .ok_or_else(invalid)
    }

    pub fn first_day(&self) -> Day {
        Day(self.first)
    }

    pub fn last_day(&self) -> Day {
        let next = self
            .first
            .checked_add_months(chrono::Months::new(1))
            .and_then(|d| d.pred_opt());
        Day(next.unwrap_or(NaiveDate::MAX))
    }

    /// All days of the month as an inclusive range.
    pub fn days(&self) -> DayRange {
        DayRange::new(self.first_day(), self.last_day())
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.first.year(), self.first.month())
    }
}

// =============================================================================
// TimeAt
// =============================================================================

/// An intra-day time label, formatted as zero-padded `HHMM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeAt {
    minutes: u16,
}

impl TimeAt {
    pub const MIDNIGHT: TimeAt = TimeAt { minutes: 0 };

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if !TIME_AT_REGEX.is_match(s) {
            return Err(ValidationError::TimeAt(s.to_string()));
        }
        let invalid = || ValidationError::TimeAt(s.to_string());
        let hour: u16 = s[0..2].parse().map_err(|_| invalid())?;
        let minute: u16 = s[2..4].parse().map_err(|_| invalid())?;
        Self::from_hm(hour, minute).ok_or_else(invalid)
    }

    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self {
            minutes: hour * 60 + minute,
        })
    }

    pub fn hour(&self) -> u16 {
        self.minutes / 60
    }

    pub fn minute(&self) -> u16 {
        self.minutes % 60
    }

    /// Start of the 5-minute bucket containing this time.
    pub fn bucket_floor(self) -> Self {
        Self {
            minutes: self.minutes - self.minutes % BUCKET_MINUTES,
        }
    }

    pub fn is_bucket_aligned(&self) -> bool {
        self.minutes % BUCKET_MINUTES == 0
    }

    /// Every bucket start of a day, in chronological order.
    pub fn day_buckets() -> impl Iterator<Item = TimeAt> {
        (0..BUCKETS_PER_DAY as u16).map(|i| TimeAt {
            minutes: i * BUCKET_MINUTES,
        })
    }
}

impl fmt::Display for TimeAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeAt {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TimeAt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeAt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}

// =============================================================================
// BucketKey
// =============================================================================

/// Composite `(day, time_at)` key, displayed as `day@time_at`.
///
/// The derived ordering compares the day first, so it matches chronological
/// order and the ordering of the formatted label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub day: Day,
    pub time_at: TimeAt,
}

impl BucketKey {
    pub fn new(day: Day, time_at: TimeAt) -> Self {
        Self { day, time_at }
    }

    /// Key for a wall-clock instant, at minute precision.
    pub fn at(instant: NaiveDateTime) -> Self {
        Self {
            day: Day(instant.date()),
            time_at: TimeAt {
                minutes: (instant.hour() * 60 + instant.minute()) as u16,
            },
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.day, self.time_at)
    }
}

// =============================================================================
// DayRange
// =============================================================================

/// Inclusive range of days. Construction swaps reversed bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    from: Day,
    to: Day,
}

impl DayRange {
    pub fn new(a: Day, b: Day) -> Self {
        if a <= b {
            Self { from: a, to: b }
        } else {
            Self { from: b, to: a }
        }
    }

    pub fn single(day: Day) -> Self {
        Self { from: day, to: day }
    }

    pub fn from(&self) -> Day {
        self.from
    }

    pub fn to(&self) -> Day {
        self.to
    }

    pub fn contains(&self, day: Day) -> bool {
        self.from <= day && day <= self.to
    }

    /// Each day of the range in order.
    pub fn days(&self) -> impl Iterator<Item = Day> {
        let to = self.to;
        std::iter::successors(Some(self.from), move |d| d.succ().filter(|n| *n <= to))
    }
}

// =============================================================================
// RegionFilter
// =============================================================================

/// Region restriction applied to bucket queries.
///
/// Wire values: `> 0` selects that region, `< 0` selects samples recorded
/// without a region (`region_id = 0`), and `0` combines every region.
/// Range reports use [`RegionFilter::for_range`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionFilter {
    #[default]
    All,
    Unassigned,
    Region(i64),
}

impl RegionFilter {
    pub fn from_id(region_id: i64) -> Self {
        match region_id {
            0 => Self::All,
            id if id < 0 => Self::Unassigned,
            id => Self::Region(id),
        }
    }

    /// Range reports only narrow to a positive region; anything else spans
    /// every region.
    pub fn for_range(region_id: i64) -> Self {
        if region_id > 0 {
            Self::Region(region_id)
        } else {
            Self::All
        }
    }

    /// Concrete `region_id` the query must match, if any.
    pub fn region_id(&self) -> Option<i64> {
        match self {
            Self::All => None,
            Self::Unassigned => Some(0),
            Self::Region(id) => Some(*id),
        }
    }
}

impl From<i64> for RegionFilter {
    fn from(region_id: i64) -> Self {
        Self::from_id(region_id)
    }
}

// =============================================================================
// Samples and results
// =============================================================================

/// One traffic observation to be merged into its bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandwidthSample {
    pub tenant_id: i64,
    /// `0` when the traffic is not attributed to a region
    pub region_id: i64,
    pub day: Day,
    pub time_at: TimeAt,
    pub bytes: i64,
}

/// Summed bytes of one `(day, time_at)` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketUsage {
    pub day: Day,
    pub time_at: TimeAt,
    pub bytes: i64,
}

impl BucketUsage {
    pub fn key(&self) -> BucketKey {
        BucketKey::new(self.day, self.time_at)
    }

    pub fn bits(&self) -> i64 {
        self.bytes.saturating_mul(8)
    }
}

/// One point of a reported series. Missing buckets are zero-valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RangeReportEntry {
    pub day: Day,
    pub time_at: TimeAt,
    pub bytes: i64,
    pub bits: i64,
}

impl RangeReportEntry {
    pub fn empty(key: BucketKey) -> Self {
        Self {
            day: key.day,
            time_at: key.time_at,
            bytes: 0,
            bits: 0,
        }
    }
}

impl From<BucketUsage> for RangeReportEntry {
    fn from(usage: BucketUsage) -> Self {
        Self {
            day: usage.day,
            time_at: usage.time_at,
            bytes: usage.bytes,
            bits: usage.bits(),
        }
    }
}

// =============================================================================
// PercentileRequest
// =============================================================================

/// Percentile used when the caller passes a non-positive value.
pub const DEFAULT_PERCENTILE: i32 = 95;

/// A normalized percentile query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PercentileRequest {
    pub tenant_id: i64,
    pub region: RegionFilter,
    pub range: DayRange,
    pub percentile: i32,
}

impl PercentileRequest {
    pub fn new(tenant_id: i64, region: RegionFilter, range: DayRange, percentile: i32) -> Self {
        let percentile = if percentile <= 0 {
            DEFAULT_PERCENTILE
        } else {
            percentile
        };
        Self {
            tenant_id,
            region,
            range,
            percentile,
        }
    }

    /// Whether the request degenerates to the maximum bucket.
    pub fn is_peak(&self) -> bool {
        self.percentile >= 100
    }

    /// Number of buckets to skip in descending order before the answer.
    ///
    /// `ceil(total * (100 - p) / 100)` for more than one bucket, else 0.
    pub fn rank_offset(&self, total_buckets: i64) -> i64 {
        if total_buckets <= 1 || self.is_peak() {
            return 0;
        }
        let share = i64::from(100 - self.percentile);
        (total_buckets * share + 99) / 100
    }
}
