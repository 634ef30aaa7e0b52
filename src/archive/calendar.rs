//! Calendar rules behind archival policies.
//!
//! Everything here works on naive local dates and times. Conversion from and
//! to absolute instants happens at the edges, in [`resolve_leniently`] and in
//! the decision engine.

use chrono::{
    DateTime, Datelike, Days, LocalResult, Months, NaiveDate, NaiveDateTime, Offset, TimeDelta,
    TimeZone, Utc,
};
use chrono_tz::Tz;

use crate::models::{ArchiveRetention, DurationUnit, OccurrenceUnit, RetentionStrategy};

/// Whether a backup taken on `date` (local) falls under the strategy.
pub fn matches(strategy: &RetentionStrategy, date: NaiveDate) -> bool {
    if date.weekday() != strategy.day_of_week() {
        return false;
    }

    match strategy {
        RetentionStrategy::DayOfWeek { .. } => true,
        RetentionStrategy::TargetDay {
            occurrence,
            occurrence_units: OccurrenceUnit::Month,
            ..
        } => occurrence_in_month(date) == *occurrence,
        RetentionStrategy::TargetDay {
            occurrence,
            occurrence_units: OccurrenceUnit::Year,
            ..
        } => occurrence_in_year(date) == *occurrence,
    }
}

/// Ordinal of `date`'s weekday within its month: days 1-7 are the first
/// occurrence, 8-14 the second, and so on up to 5 for days 29-31.
pub fn occurrence_in_month(date: NaiveDate) -> u32 {
    date.day0() / 7 + 1
}

/// Ordinal of `date`'s weekday within its calendar year (1-53).
///
/// The first date in the year sharing the weekday lies `ordinal0 % 7` days
/// after January 1st, so the whole weeks between it and `date` are simply
/// `ordinal0 / 7`.
pub fn occurrence_in_year(date: NaiveDate) -> u32 {
    date.ordinal0() / 7 + 1
}

/// Adds the retention length to `begin` with civil-calendar arithmetic.
///
/// Month and year additions clamp to the last day of a shorter month
/// (Jan 31 + 1 month = Feb 28/29). Returns `None` on calendar overflow.
pub fn expiration_date(retention: &ArchiveRetention, begin: NaiveDateTime) -> Option<NaiveDateTime> {
    let n = retention.duration;
    match retention.units {
        DurationUnit::Day => begin.checked_add_days(Days::new(u64::from(n))),
        DurationUnit::Week => begin.checked_add_days(Days::new(u64::from(n) * 7)),
        DurationUnit::Month => begin.checked_add_months(Months::new(n)),
        DurationUnit::Year => begin.checked_add_months(Months::new(n.checked_mul(12)?)),
    }
}

/// Converts a local date-time to an instant without failing on DST transitions.
///
/// An ambiguous time (clocks going back) resolves to the earlier instant. A
/// time inside a gap (clocks going forward) is read with the offset in force
/// before the gap, which lands the same distance past the transition.
pub fn resolve_leniently(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, _) => Some(earlier.with_timezone(&Utc)),
        LocalResult::None => {
            let probe = local.checked_sub_signed(TimeDelta::days(1))?;
            let offset = tz
                .from_local_datetime(&probe)
                .earliest()
                .map(|dt| dt.offset().fix())
                .unwrap_or_else(|| Utc.fix());
            let utc = local.checked_sub_signed(TimeDelta::seconds(i64::from(
                offset.local_minus_utc(),
            )))?;
            Some(Utc.from_utc_datetime(&utc))
        }
    }
}
