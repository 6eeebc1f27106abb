//! Normalization of portal timestamps.
//!
//! The portal reports civil time in its own zone without an offset. The offset
//! is resolved from that zone's rules for the reported instant, so readings on
//! either side of a DST change carry -06:00 or -05:00 as the source saw them.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone};
use chrono_tz::Tz;
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime, UtcOffset};

use super::PortalError;

pub const SOURCE_TZ: Tz = chrono_tz::America::Chicago;

const ODR_DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// Parse the `odrdate` of an on-demand read.
///
/// RFC 3339 input keeps its own offset; the portal's `MM/DD/YYYY HH:MM:SS`
/// form is localized in [`SOURCE_TZ`], with `previous` (the last read's time)
/// disambiguating the repeated fall-back hour.
pub fn parse_odr_date(raw: &str, previous: Option<OffsetDateTime>) -> Result<OffsetDateTime, PortalError> {
    let raw = raw.trim();
    if let Ok(dt) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(dt);
    }

    let naive = NaiveDateTime::parse_from_str(raw, ODR_DATE_FORMAT)
        .map_err(|e| PortalError::Fetch(format!("invalid odrdate '{raw}': {e}")))?;

    // The same read reported again keeps the instant it had.
    if let Some(prev) = previous {
        let prev_local = prev.unix_timestamp() + i64::from(prev.offset().whole_seconds());
        if prev_local == naive.and_utc().timestamp() {
            return Ok(prev);
        }
    }
    localize(naive, previous)
}

/// Interval rows carry the day (`YYYY-MM-DD` or `MM/DD/YYYY`) and a 12-hour
/// start time such as `" 12:15 am"`.
pub fn parse_interval_start(date: &str, start: &str) -> Result<NaiveDateTime, PortalError> {
    let date = date.trim();
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date, "%m/%d/%Y"))
        .map_err(|e| PortalError::Fetch(format!("invalid interval date '{date}': {e}")))?;

    let start = start.trim().to_ascii_uppercase();
    let time = NaiveTime::parse_from_str(&start, "%I:%M %p")
        .or_else(|_| NaiveTime::parse_from_str(&start, "%H:%M"))
        .map_err(|e| PortalError::Fetch(format!("invalid interval start '{start}': {e}")))?;

    Ok(day.and_time(time))
}

/// Attach the source zone's offset to a local civil time.
///
/// A wall-clock time repeated by the fall-back transition resolves to its first
/// occurrence unless that would not be after `not_before`, in which case the
/// second occurrence is used. Times skipped by spring-forward are read with the
/// offset in force just before the gap.
pub fn localize(
    naive: NaiveDateTime,
    not_before: Option<OffsetDateTime>,
) -> Result<OffsetDateTime, PortalError> {
    let mapped = SOURCE_TZ.from_local_datetime(&naive);

    let chosen = match (mapped.earliest(), mapped.latest()) {
        (Some(early), Some(late)) => {
            let early = to_offset_date_time(&early)?;
            match not_before {
                Some(prev) if early <= prev => to_offset_date_time(&late)?,
                _ => early,
            }
        }
        _ => {
            let before_gap = SOURCE_TZ
                .from_local_datetime(&(naive - chrono::Duration::hours(1)))
                .earliest()
                .ok_or_else(|| PortalError::Fetch(format!("unresolvable local time {naive}")))?;
            let offset = before_gap.offset().fix().local_minus_utc();
            let utc = naive - chrono::Duration::seconds(i64::from(offset));
            offset_date_time(utc.and_utc().timestamp(), offset)?
        }
    };

    Ok(chosen)
}

/// Calendar date of `now` in the source zone.
pub fn source_date(now: OffsetDateTime) -> Result<Date, PortalError> {
    let local = SOURCE_TZ
        .timestamp_opt(now.unix_timestamp(), 0)
        .single()
        .ok_or_else(|| PortalError::Fetch(format!("cannot place {now} in source zone")))?;
    Ok(to_offset_date_time(&local)?.date())
}

fn to_offset_date_time(dt: &chrono::DateTime<Tz>) -> Result<OffsetDateTime, PortalError> {
    offset_date_time(dt.timestamp(), dt.offset().fix().local_minus_utc())
}

fn offset_date_time(unix_seconds: i64, offset_seconds: i32) -> Result<OffsetDateTime, PortalError> {
    let offset = UtcOffset::from_whole_seconds(offset_seconds)
        .map_err(|e| PortalError::Fetch(format!("invalid source offset: {e}")))?;
    let utc = OffsetDateTime::from_unix_timestamp(unix_seconds)
        .map_err(|e| PortalError::Fetch(format!("timestamp out of range: {e}")))?;
    Ok(utc.to_offset(offset))
}
