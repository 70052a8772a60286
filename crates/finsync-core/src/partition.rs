//! Sync ranges and month partitioning
//!
//! A sync run covers an inclusive date range and writes one table per
//! calendar month touched by it. Month boundaries are computed in the
//! configured UTC offset.

use std::collections::BTreeMap;

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{Table, Transaction};

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// A calendar month, ordered chronologically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MonthKey {
    pub year: i32,
    /// 1-based
    pub month: u32,
}

impl MonthKey {
    pub fn of<Tz: TimeZone>(date: &DateTime<Tz>) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Stable table title, e.g. `"Jan 2025"`
    pub fn title(&self) -> String {
        let idx = (self.month.clamp(1, 12) - 1) as usize;
        format!("{} {}", MONTH_ABBREVIATIONS[idx], self.year)
    }

    pub fn next(&self) -> Self {
        if self.month >= 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn previous(&self) -> Self {
        if self.month <= 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        self.next().first_day().and_then(|d| d.pred_opt())
    }
}

impl std::fmt::Display for MonthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title())
    }
}

/// Inclusive sync range, already normalized to the configured offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl DateRange {
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Result<Self> {
        if start > end {
            return Err(Error::validation(format!(
                "start date {} is after end date {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Resolve optional user input into a range.
    ///
    /// Both bounds omitted means the previous full calendar month. A missing
    /// end means "until now"; a missing start means the first day of the end's
    /// month.
    pub fn resolve(
        start: Option<&str>,
        end: Option<&str>,
        tz: FixedOffset,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let start = non_empty(start);
        let end = non_empty(end);

        match (start, end) {
            (None, None) => Self::previous_month(tz, now),
            (Some(raw_start), None) => {
                let start = parse_bound(raw_start, Bound::Start, tz)
                    .map_err(|e| e.context("invalid start date"))?;
                Self::new(start, now.with_timezone(&tz))
            }
            (None, Some(raw_end)) => {
                let end = parse_bound(raw_end, Bound::End, tz)
                    .map_err(|e| e.context("invalid end date"))?;
                let start = MonthKey::of(&end)
                    .first_day()
                    .ok_or_else(|| Error::validation("end date out of range"))
                    .and_then(|d| local_datetime(d, NaiveTime::MIN, tz))?;
                Self::new(start, end)
            }
            (Some(raw_start), Some(raw_end)) => {
                let start = parse_bound(raw_start, Bound::Start, tz)
                    .map_err(|e| e.context("invalid start date"))?;
                let end = parse_bound(raw_end, Bound::End, tz)
                    .map_err(|e| e.context("invalid end date"))?;
                Self::new(start, end)
            }
        }
    }

    /// The full calendar month before `now`, in `tz`
    pub fn previous_month(tz: FixedOffset, now: DateTime<Utc>) -> Result<Self> {
        let month = MonthKey::of(&now.with_timezone(&tz)).previous();
        let (first, last) = month
            .first_day()
            .zip(month.last_day())
            .ok_or_else(|| Error::validation(format!("month {} out of range", month)))?;

        Self::new(
            local_datetime(first, NaiveTime::MIN, tz)?,
            local_datetime(last, end_of_day(), tz)?,
        )
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end.date_naive()
    }

    /// Every month touched by the range, in order
    pub fn months(&self) -> Vec<MonthKey> {
        let last = MonthKey::of(&self.end);
        let mut current = MonthKey::of(&self.start);
        let mut months = Vec::new();

        while current <= last {
            months.push(current);
            current = current.next();
        }

        months
    }
}

#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN)
}

fn local_datetime(date: NaiveDate, time: NaiveTime, tz: FixedOffset) -> Result<DateTime<FixedOffset>> {
    tz.from_local_datetime(&NaiveDateTime::new(date, time))
        .single()
        .ok_or_else(|| Error::validation(format!("{} is not representable", date)))
}

/// Accept RFC 3339 or a bare `YYYY-MM-DD` (start or end of that day)
fn parse_bound(value: &str, bound: Bound, tz: FixedOffset) -> Result<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&tz));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        Error::validation(format!(
            "'{}' is neither RFC 3339 nor YYYY-MM-DD",
            value
        ))
    })?;

    match bound {
        Bound::Start => local_datetime(date, NaiveTime::MIN, tz),
        Bound::End => local_datetime(date, end_of_day(), tz),
    }
}

/// Transactions of one calendar month
#[derive(Debug, Clone)]
pub struct MonthBucket {
    pub month: MonthKey,
    pub transactions: Vec<Transaction>,
}

impl MonthBucket {
    pub fn title(&self) -> String {
        self.month.title()
    }
}

/// Result of bucketing a run's transactions
#[derive(Debug, Default)]
pub struct Partition {
    /// One bucket per month of the range, in order (possibly empty)
    pub buckets: Vec<MonthBucket>,
    /// Transactions dated outside the range
    pub outside: Vec<Transaction>,
}

/// Split transactions by the calendar month of their date (in `tz`).
///
/// Every month of the range gets a bucket; each transaction lands in exactly
/// one bucket or in `outside`.
pub fn partition_by_month(
    transactions: Vec<Transaction>,
    range: &DateRange,
    tz: FixedOffset,
) -> Partition {
    let mut by_month: BTreeMap<MonthKey, Vec<Transaction>> = range
        .months()
        .into_iter()
        .map(|m| (m, Vec::new()))
        .collect();
    let mut outside = Vec::new();

    for tx in transactions {
        let key = MonthKey::of(&tx.date.with_timezone(&tz));
        match by_month.get_mut(&key) {
            Some(bucket) => bucket.push(tx),
            None => outside.push(tx),
        }
    }

    Partition {
        buckets: by_month
            .into_iter()
            .map(|(month, transactions)| MonthBucket {
                month,
                transactions,
            })
            .collect(),
        outside,
    }
}

/// Exact, case-sensitive title match
pub fn find_table_by_title<'a>(tables: &'a [Table], title: &str) -> Option<&'a Table> {
    tables.iter().find(|t| t.title == title)
}
