//! Rebalance intervals and decision-date selection.

use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RebalanceInterval {
    Daily,
    Weekly,
    Monthly,
}

impl RebalanceInterval {
    pub const ALL: [RebalanceInterval; 3] = [
        RebalanceInterval::Daily,
        RebalanceInterval::Weekly,
        RebalanceInterval::Monthly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RebalanceInterval::Daily => "daily",
            RebalanceInterval::Weekly => "weekly",
            RebalanceInterval::Monthly => "monthly",
        }
    }

    /// Key shared by every date in the same rebalance period.
    fn period(&self, date: NaiveDate) -> (i32, u32) {
        match self {
            RebalanceInterval::Daily => (date.year(), date.ordinal()),
            RebalanceInterval::Weekly => {
                let week = date.iso_week();
                (week.year(), week.week())
            }
            RebalanceInterval::Monthly => (date.year(), date.month()),
        }
    }
}

impl fmt::Display for RebalanceInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RebalanceInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(RebalanceInterval::Daily),
            "weekly" => Ok(RebalanceInterval::Weekly),
            "monthly" => Ok(RebalanceInterval::Monthly),
            other => Err(format!(
                "unknown rebalance interval '{other}' (expected daily, weekly or monthly)"
            )),
        }
    }
}

/// Whether `date` is a decision date under `interval`.
///
/// `calendar` must be sorted ascending. Only `date` and the trading date just
/// before it are inspected, so a calendar that ends at `date` gives the same
/// answer as the full one.
pub fn is_decision_date(
    date: NaiveDate,
    interval: RebalanceInterval,
    calendar: &[NaiveDate],
) -> bool {
    let Ok(idx) = calendar.binary_search(&date) else {
        return false;
    };
    match idx.checked_sub(1) {
        None => true,
        Some(prev) => interval.period(calendar[prev]) != interval.period(date),
    }
}

/// Every decision date in `calendar`.
pub fn decision_dates(interval: RebalanceInterval, calendar: &[NaiveDate]) -> Vec<NaiveDate> {
    calendar
        .iter()
        .copied()
        .filter(|&d| is_decision_date(d, interval, calendar))
        .collect()
}
