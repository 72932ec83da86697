//! Temporal primitives: [`Date`], [`Duration`] and [`DateRange`].
//!
//! Dates are whole seconds since the Unix epoch. Two sentinels bound the
//! planning horizon; arithmetic saturates at them so that "infinite past
//! plus a lead time" stays in the infinite past.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::fixed::{Quantity, scale_seconds};

// ---------------------------------------------------------------------------
// Duration
// ---------------------------------------------------------------------------

/// A signed span of time in whole seconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Duration(pub i64);

impl Duration {
    pub const ZERO: Duration = Duration(0);
    pub const SECOND: Duration = Duration(1);
    pub const HOUR: Duration = Duration(3600);
    pub const DAY: Duration = Duration(86_400);

    pub const fn seconds(s: i64) -> Self {
        Duration(s)
    }

    pub const fn hours(h: i64) -> Self {
        Duration(h * 3600)
    }

    pub const fn days(d: i64) -> Self {
        Duration(d * 86_400)
    }

    pub fn as_seconds(self) -> i64 {
        self.0
    }

    /// Length in (fractional) days.
    pub fn as_days(self) -> f64 {
        self.0 as f64 / 86_400.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Multiply by a quantity, truncating to whole seconds.
    pub fn scaled(self, factor: Quantity) -> Duration {
        Duration(scale_seconds(self.0, factor))
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Duration) {
        *self = *self - rhs;
    }
}

impl Neg for Duration {
    type Output = Duration;
    fn neg(self) -> Duration {
        Duration(self.0.saturating_neg())
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let s = self.0.unsigned_abs();
        let (d, h, m, sec) = (s / 86_400, s % 86_400 / 3600, s % 3600 / 60, s % 60);
        if d > 0 {
            write!(f, "{sign}{d}d{h:02}:{m:02}:{sec:02}")
        } else {
            write!(f, "{sign}{h:02}:{m:02}:{sec:02}")
        }
    }
}

// ---------------------------------------------------------------------------
// Date
// ---------------------------------------------------------------------------

/// A point in time, in seconds since the Unix epoch (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(i64);

impl Date {
    /// Lower bound of the planning horizon.
    pub const INFINITE_PAST: Date = Date(i64::MIN / 4);
    /// Upper bound of the planning horizon.
    pub const INFINITE_FUTURE: Date = Date(i64::MAX / 4);
    pub const EPOCH: Date = Date(0);

    pub const fn from_timestamp(seconds: i64) -> Date {
        let s = if seconds < Self::INFINITE_PAST.0 {
            Self::INFINITE_PAST.0
        } else if seconds > Self::INFINITE_FUTURE.0 {
            Self::INFINITE_FUTURE.0
        } else {
            seconds
        };
        Date(s)
    }

    pub const fn timestamp(self) -> i64 {
        self.0
    }

    /// Midnight UTC of the given calendar day. `None` for invalid dates.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Date> {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Date::from_naive)
    }

    pub fn from_naive(dt: NaiveDateTime) -> Date {
        Date::from_timestamp(dt.and_utc().timestamp())
    }

    /// Parse `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS` or an RFC 3339 timestamp.
    pub fn parse(s: &str) -> Option<Date> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Date::from_timestamp(dt.timestamp()));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return Some(Date::from_naive(dt));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Some(Date::from_naive(dt));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Date::from_naive)
    }

    pub fn is_infinite(self) -> bool {
        self == Self::INFINITE_PAST || self == Self::INFINITE_FUTURE
    }

    pub fn to_chrono(self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.0, 0)
    }
}

impl Default for Date {
    fn default() -> Self {
        Date::EPOCH
    }
}

impl Add<Duration> for Date {
    type Output = Date;
    fn add(self, rhs: Duration) -> Date {
        Date::from_timestamp(self.0.saturating_add(rhs.0))
    }
}

impl Sub<Duration> for Date {
    type Output = Date;
    fn sub(self, rhs: Duration) -> Date {
        Date::from_timestamp(self.0.saturating_sub(rhs.0))
    }
}

impl Sub for Date {
    type Output = Duration;
    fn sub(self, rhs: Date) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign<Duration> for Date {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl SubAssign<Duration> for Date {
    fn sub_assign(&mut self, rhs: Duration) {
        *self = *self - rhs;
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Date::INFINITE_PAST {
            return f.write_str("infinite past");
        }
        if *self == Date::INFINITE_FUTURE {
            return f.write_str("infinite future");
        }
        match self.to_chrono() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            None => write!(f, "@{}", self.0),
        }
    }
}

impl Serialize for Date {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Date {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "infinite past" => Ok(Date::INFINITE_PAST),
            "infinite future" => Ok(Date::INFINITE_FUTURE),
            other => Date::parse(other)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid date '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// DateRange
// ---------------------------------------------------------------------------

/// A half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Date,
    pub end: Date,
}

impl DateRange {
    /// Build a range; the bounds are swapped when given in reverse order.
    pub fn new(start: Date, end: Date) -> Self {
        if end < start {
            DateRange { start: end, end: start }
        } else {
            DateRange { start, end }
        }
    }

    /// The unbounded range covering the whole horizon.
    pub const fn unbounded() -> Self {
        DateRange { start: Date::INFINITE_PAST, end: Date::INFINITE_FUTURE }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Whether `d` lies in `[start, end)`.
    pub fn contains(&self, d: Date) -> bool {
        d >= self.start && d < self.end
    }

    /// Like [`contains`](Self::contains) but also accepts `d == end`.
    pub fn contains_inclusive(&self, d: Date) -> bool {
        d >= self.start && d <= self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Length of the overlap with `other`, zero when disjoint.
    pub fn overlap(&self, other: &DateRange) -> Duration {
        let s = self.start.max(other.start);
        let e = self.end.min(other.end);
        if e > s { e - s } else { Duration::ZERO }
    }
}

impl Default for DateRange {
    fn default() -> Self {
        DateRange::unbounded()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.start, self.end)
    }
}
