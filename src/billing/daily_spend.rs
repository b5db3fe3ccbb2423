//! Daily-spend tracking — in-process, per-campaign spend for the current
//! calendar day.
//!
//! This is the soft guard behind `daily_budget`: approximate by design,
//! reset on restart and on date rollover. The hard limit stays in the
//! charge transaction's budget check against durable storage.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;

/// Source of "now" — injected so date rollover is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
struct DayBucket {
    date: NaiveDate,
    amount: f64,
}

/// Concurrent map of campaign id → today's recorded spend.
pub struct DailySpendTracker {
    buckets: DashMap<i64, DayBucket>,
    clock: Arc<dyn Clock>,
}

impl DailySpendTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
        }
    }

    /// Tracker on the wall clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Spend recorded for this campaign today. A bucket carrying yesterday's
    /// date reads as zero.
    pub fn spent_today(&self, campaign_id: i64) -> f64 {
        let today = self.clock.now().date_naive();
        match self.buckets.get(&campaign_id) {
            Some(bucket) if bucket.date == today => bucket.amount,
            _ => 0.0,
        }
    }

    /// Record spend after a successful charge. The per-key entry lock makes
    /// concurrent clicks on one campaign accumulate without lost updates.
    pub fn record(&self, campaign_id: i64, amount: f64) {
        let today = self.clock.now().date_naive();
        let mut entry = self
            .buckets
            .entry(campaign_id)
            .or_insert_with(|| DayBucket {
                date: today,
                amount: 0.0,
            });
        let bucket = entry.value_mut();
        if bucket.date != today {
            bucket.date = today;
            bucket.amount = 0.0;
        }
        bucket.amount += amount;
    }

    /// Number of campaigns with a bucket (any date).
    pub fn tracked_campaigns(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Settable clock for rollover tests.
    pub struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub fn starting_at(t: DateTime<Utc>) -> Self {
            Self(Mutex::new(t))
        }

        pub fn set(&self, t: DateTime<Utc>) {
            *self.0.lock().unwrap() = t;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn accumulates_within_a_day() {
        let clock = Arc::new(ManualClock::starting_at(ts(2024, 3, 6, 10)));
        let tracker = DailySpendTracker::new(clock.clone());

        assert_eq!(tracker.spent_today(1), 0.0);
        tracker.record(1, 0.50);
        tracker.record(1, 0.25);
        assert!((tracker.spent_today(1) - 0.75).abs() < 1e-9);

        // later the same day
        clock.set(ts(2024, 3, 6, 23));
        assert!((tracker.spent_today(1) - 0.75).abs() < 1e-9);
    }

    /// The bucket resets to zero when the wall-clock date changes between
    /// two charges on the same campaign.
    #[test]
    fn resets_on_date_rollover() {
        let clock = Arc::new(ManualClock::starting_at(ts(2024, 3, 6, 23)));
        let tracker = DailySpendTracker::new(clock.clone());

        tracker.record(1, 4.0);
        assert!((tracker.spent_today(1) - 4.0).abs() < 1e-9);

        clock.set(ts(2024, 3, 7, 0));
        assert_eq!(tracker.spent_today(1), 0.0, "stale bucket reads as zero");

        tracker.record(1, 1.0);
        assert!((tracker.spent_today(1) - 1.0).abs() < 1e-9, "record resets before adding");
    }

    #[test]
    fn campaigns_do_not_share_buckets() {
        let clock = Arc::new(ManualClock::starting_at(ts(2024, 3, 6, 10)));
        let tracker = DailySpendTracker::new(clock);

        tracker.record(1, 1.0);
        tracker.record(2, 2.0);
        assert!((tracker.spent_today(1) - 1.0).abs() < 1e-9);
        assert!((tracker.spent_today(2) - 2.0).abs() < 1e-9);
        assert_eq!(tracker.tracked_campaigns(), 2);
    }
}
