//! Calendars: piecewise-constant values over time.
//!
//! A calendar is a default value overridden by prioritized buckets. They
//! drive time-varying buffer targets, resource capacity, minimum lot sizes
//! and location availability (any non-zero value means "available").

use serde::{Deserialize, Serialize};

use crate::fixed::{Quantity, qty};
use crate::id::CalendarId;
use crate::time::{Date, DateRange, Duration};

/// A scalar or calendar-driven level such as a buffer minimum or a
/// resource capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Fixed(Quantity),
    Calendar(CalendarId),
}

/// A bucket overriding the calendar default on `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarBucket {
    pub range: DateRange,
    pub value: f64,
    /// Lower values win when buckets overlap.
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calendar {
    pub name: String,
    pub default: f64,
    buckets: Vec<CalendarBucket>,
}

impl Calendar {
    pub fn new(name: impl Into<String>, default: f64) -> Self {
        Self { name: name.into(), default, buckets: Vec::new() }
    }

    /// Add a bucket. Reversed bounds are swapped rather than rejected.
    pub fn add_bucket(&mut self, start: Date, end: Date, value: f64, priority: i32) {
        self.buckets.push(CalendarBucket {
            range: DateRange::new(start, end),
            value,
            priority,
        });
        self.buckets.sort_by(|a, b| {
            a.range
                .start
                .cmp(&b.range.start)
                .then(a.priority.cmp(&b.priority))
        });
    }

    pub fn buckets(&self) -> &[CalendarBucket] {
        &self.buckets
    }

    /// Value in effect at `date`.
    pub fn value_at(&self, date: Date) -> f64 {
        self.buckets
            .iter()
            .filter(|b| b.range.contains(date))
            .min_by_key(|b| b.priority)
            .map_or(self.default, |b| b.value)
    }

    pub fn quantity_at(&self, date: Date) -> Quantity {
        qty(self.value_at(date))
    }

    pub fn is_available(&self, date: Date) -> bool {
        self.value_at(date) != 0.0
    }

    /// All bucket boundaries, sorted and deduplicated.
    pub fn boundaries(&self) -> Vec<Date> {
        let mut dates: Vec<Date> = self
            .buckets
            .iter()
            .flat_map(|b| [b.range.start, b.range.end])
            .filter(|d| !d.is_infinite())
            .collect();
        dates.sort();
        dates.dedup();
        dates
    }

    /// Points where the effective value changes, starting with the value in
    /// effect at the infinite past.
    pub fn value_changes(&self) -> Vec<(Date, f64)> {
        let mut out = vec![(Date::INFINITE_PAST, self.value_at(Date::INFINITE_PAST))];
        for d in self.boundaries() {
            let v = self.value_at(d);
            if out.last().is_some_and(|&(_, prev)| prev != v) {
                out.push((d, v));
            }
        }
        out
    }

    /// First boundary strictly after `date`.
    pub fn next_change(&self, date: Date) -> Option<Date> {
        self.boundaries().into_iter().find(|&d| d > date)
    }

    /// Last boundary strictly before `date`.
    pub fn prev_change(&self, date: Date) -> Option<Date> {
        self.boundaries().into_iter().rev().find(|&d| d < date)
    }

    /// Available time between two dates.
    pub fn available_between(&self, start: Date, end: Date) -> Duration {
        if end <= start {
            return Duration::ZERO;
        }
        let mut total = Duration::ZERO;
        let mut cur = start;
        while cur < end {
            let next = self.next_change(cur).unwrap_or(Date::INFINITE_FUTURE).min(end);
            if self.is_available(cur) {
                total += next - cur;
            }
            cur = next;
        }
        total
    }

    /// Walk forward from `start` consuming `duration` of available time.
    ///
    /// Returns the effective `(start, end)`: the start is moved to the first
    /// available moment. `None` when the calendar never offers enough time.
    pub fn forward(&self, start: Date, duration: Duration) -> Option<(Date, Date)> {
        let mut remaining = duration;
        let mut cur = start;
        let mut first: Option<Date> = None;
        loop {
            let next = self.next_change(cur).unwrap_or(Date::INFINITE_FUTURE);
            if self.is_available(cur) {
                let begin = *first.get_or_insert(cur);
                if next - cur >= remaining {
                    return Some((begin, cur + remaining));
                }
                remaining -= next - cur;
            }
            if next >= Date::INFINITE_FUTURE {
                return None;
            }
            cur = next;
        }
    }

    /// Walk backward from `end` consuming `duration` of available time.
    pub fn backward(&self, end: Date, duration: Duration) -> Option<(Date, Date)> {
        let mut remaining = duration;
        let mut cur = end;
        let mut last: Option<Date> = None;
        loop {
            let prev = self.prev_change(cur).unwrap_or(Date::INFINITE_PAST);
            // [prev, cur) has the value in effect at prev.
            if self.is_available(prev) {
                let finish = *last.get_or_insert(cur);
                if cur - prev >= remaining {
                    return Some((cur - remaining, finish));
                }
                remaining -= cur - prev;
            }
            if prev <= Date::INFINITE_PAST {
                return None;
            }
            cur = prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: u32) -> Date {
        Date::from_ymd(2024, 1, n).unwrap()
    }

    fn weekdays() -> Calendar {
        // Available by default, closed on days 6 and 7.
        let mut cal = Calendar::new("weekdays", 1.0);
        cal.add_bucket(day(6), day(8), 0.0, 1);
        cal
    }

    #[test]
    fn value_prefers_lower_priority() {
        let mut cal = Calendar::new("c", 5.0);
        cal.add_bucket(day(1), day(10), 7.0, 2);
        cal.add_bucket(day(3), day(4), 9.0, 1);
        assert_eq!(cal.value_at(day(2)), 7.0);
        assert_eq!(cal.value_at(day(3)), 9.0);
        assert_eq!(cal.value_at(day(12)), 5.0);
    }

    #[test]
    fn reversed_bucket_is_swapped() {
        let mut cal = Calendar::new("c", 0.0);
        cal.add_bucket(day(5), day(2), 1.0, 1);
        assert_eq!(cal.buckets()[0].range.start, day(2));
        assert!(cal.is_available(day(3)));
    }

    #[test]
    fn value_changes_merge_equal_neighbours() {
        let mut cal = Calendar::new("c", 1.0);
        cal.add_bucket(day(2), day(3), 1.0, 1);
        cal.add_bucket(day(4), day(5), 3.0, 1);
        let changes = cal.value_changes();
        assert_eq!(changes, vec![(Date::INFINITE_PAST, 1.0), (day(4), 3.0), (day(5), 1.0)]);
    }

    #[test]
    fn forward_skips_closed_days() {
        let cal = weekdays();
        let (s, e) = cal.forward(day(5), Duration::days(2)).unwrap();
        assert_eq!(s, day(5));
        assert_eq!(e, day(9));
    }

    #[test]
    fn forward_moves_start_out_of_closed_period() {
        let cal = weekdays();
        let (s, e) = cal.forward(day(6), Duration::days(1)).unwrap();
        assert_eq!(s, day(8));
        assert_eq!(e, day(9));
    }

    #[test]
    fn backward_skips_closed_days() {
        let cal = weekdays();
        let (s, e) = cal.backward(day(9), Duration::days(2)).unwrap();
        assert_eq!(e, day(9));
        assert_eq!(s, day(5));
    }

    #[test]
    fn backward_from_closed_period_ends_at_last_open_moment() {
        let cal = weekdays();
        let (s, e) = cal.backward(day(8), Duration::days(1)).unwrap();
        assert_eq!(e, day(6));
        assert_eq!(s, day(5));
    }

    #[test]
    fn never_available_returns_none() {
        let cal = Calendar::new("closed", 0.0);
        assert!(cal.forward(day(1), Duration::days(1)).is_none());
        assert!(cal.backward(day(1), Duration::days(1)).is_none());
    }

    #[test]
    fn available_between_counts_open_time() {
        let cal = weekdays();
        assert_eq!(cal.available_between(day(5), day(9)), Duration::days(2));
        assert_eq!(cal.available_between(day(9), day(5)), Duration::ZERO);
    }
}
