//! Wall-clock alignment of the recurring cycles.

use std::time::Duration;

use smt_client::portal::timestamp;
use time::{Date, OffsetDateTime};

use crate::pipeline::PipelineError;

/// First instant strictly after `now` that is a whole multiple of `period`
/// since the Unix epoch. Hourly periods land on the top of the hour.
pub fn next_fire(now: OffsetDateTime, period: Duration) -> OffsetDateTime {
    let period_secs = i64::try_from(period.as_secs()).unwrap_or(i64::MAX).max(1);
    let slot = now.unix_timestamp().div_euclid(period_secs) + 1;
    let next = slot.saturating_mul(period_secs);

    OffsetDateTime::from_unix_timestamp(next)
        .map(|t| t.to_offset(now.offset()))
        .unwrap_or(now + period)
}

/// Wall-clock time left until `target`, zero once it has passed.
pub fn until(target: OffsetDateTime, now: OffsetDateTime) -> Duration {
    Duration::try_from(target - now).unwrap_or(Duration::ZERO)
}

/// Interval data lags by about a day: request yesterday in the source's zone.
pub fn interval_target_day(now: OffsetDateTime) -> Result<Date, PipelineError> {
    let today = timestamp::source_date(now)?;
    today
        .previous_day()
        .ok_or_else(|| PipelineError::Fetch(format!("no day before {today}")))
}
