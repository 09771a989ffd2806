//! Time window parsing and validation for CloudTrail and Logs Insights queries
use crate::error::{ReportError, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Supported input datetime formats
const FORMAT_DATE: &str = "%Y-%m-%d";
const FORMAT_DATETIME_SECOND: &str = "%Y-%m-%d %H:%M:%S";

/// Format used for timestamps written to CSV reports
const FORMAT_REPORT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// CloudTrail event history only covers the last 90 days
const MAX_RANGE_DAYS: i64 = 90;

/// A validated UTC time window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window ending now and starting `offset` earlier (e.g. "24h", "2d")
    ///
    /// # Errors
    ///
    /// Returns error if the offset is invalid or exceeds the maximum range
    pub fn last(offset: &str) -> Result<Self> {
        let minutes = parse_time_offset(offset)?;
        let end = Utc::now();
        Self::between(minutes_before(end, minutes)?, end)
    }

    /// Window between two instants
    ///
    /// # Errors
    ///
    /// Returns error if start is not before end, end lies in the future, or
    /// the span exceeds 90 days
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(ReportError::DateRangeInvalid(format!(
                "Start datetime must be before end datetime: start='{}', end='{}'",
                start.format(FORMAT_DATETIME_SECOND),
                end.format(FORMAT_DATETIME_SECOND)
            )));
        }

        // One minute of slack so "now" computed by the caller still passes
        if end > Utc::now() + Duration::minutes(1) {
            return Err(ReportError::DateRangeInvalid(format!(
                "End datetime cannot be in the future: {}",
                end.format(FORMAT_DATETIME_SECOND)
            )));
        }

        let range_days = (end - start).num_days();
        if range_days > MAX_RANGE_DAYS {
            return Err(ReportError::DateRangeInvalid(format!(
                "Date range exceeds maximum of {MAX_RANGE_DAYS} days: {range_days} days"
            )));
        }

        Ok(Self { start, end })
    }

    /// Build a window from CLI inputs.
    ///
    /// `start` wins over `start_offset`; when neither is given the window
    /// covers `default_offset`. `end` defaults to now.
    ///
    /// # Errors
    ///
    /// Returns error if any input fails to parse or the window is invalid
    pub fn from_args(
        start: Option<&str>,
        start_offset: Option<&str>,
        end: Option<&str>,
        default_offset: &str,
        utc_mode: bool,
    ) -> Result<Self> {
        let end_dt = match end {
            Some(value) => parse_datetime(value, utc_mode)?,
            None => Utc::now(),
        };

        let start_dt = match (start, start_offset) {
            (Some(value), _) => parse_datetime(value, utc_mode)?,
            (None, Some(offset)) => minutes_before(end_dt, parse_time_offset(offset)?)?,
            (None, None) => minutes_before(end_dt, parse_time_offset(default_offset)?)?,
        };

        Self::between(start_dt, end_dt)
    }
}

/// `end` moved back by `minutes`, rejecting offsets chrono cannot represent
fn minutes_before(end: DateTime<Utc>, minutes: i64) -> Result<DateTime<Utc>> {
    Duration::try_minutes(minutes)
        .and_then(|delta| end.checked_sub_signed(delta))
        .ok_or_else(|| {
            ReportError::DateRangeInvalid(format!(
                "Offset of {minutes} minutes is out of range (maximum {MAX_RANGE_DAYS} days)"
            ))
        })
}

/// Parse a datetime string into UTC
///
/// Supported formats:
/// - YYYY-MM-DD (date only, time defaults to 00:00:00)
/// - YYYY-MM-DD HH:MM:SS
///
/// # Arguments
///
/// * `datetime_str` - The datetime string to parse
/// * `utc_mode` - If false, interpret as local timezone and convert to UTC; if true, treat as UTC
///
/// # Errors
///
/// Returns error if the format is invalid or the local time is ambiguous
pub fn parse_datetime(datetime_str: &str, utc_mode: bool) -> Result<DateTime<Utc>> {
    let trimmed = datetime_str.trim();

    let naive_dt = if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, FORMAT_DATETIME_SECOND)
    {
        dt
    } else if let Ok(date) = NaiveDate::parse_from_str(trimmed, FORMAT_DATE) {
        date.and_time(NaiveTime::MIN)
    } else {
        return Err(ReportError::InvalidDateTimeFormat(format!(
            "Invalid datetime format: '{datetime_str}'. Expected: YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"
        )));
    };

    if utc_mode {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive_dt, Utc));
    }

    Local
        .from_local_datetime(&naive_dt)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            ReportError::InvalidDateTimeFormat(format!(
                "Ambiguous datetime (DST transition?): {datetime_str}"
            ))
        })
}

/// Parse a time offset string and return the duration in minutes
///
/// Supported formats:
/// - `Nm` or `N` - N minutes
/// - `Nh` - N hours
/// - `Nd` - N days
///
/// # Errors
///
/// Returns error if the format is invalid or the value is not a positive number
///
/// # Examples
///
/// ```
/// use sgaudit::datetime::parse_time_offset;
///
/// assert_eq!(parse_time_offset("30m").unwrap(), 30);
/// assert_eq!(parse_time_offset("30").unwrap(), 30);
/// assert_eq!(parse_time_offset("2h").unwrap(), 120);
/// assert_eq!(parse_time_offset("1d").unwrap(), 1440);
/// ```
pub fn parse_time_offset(offset_str: &str) -> Result<i64> {
    let offset_str = offset_str.trim();

    let (num_str, multiplier) = if let Some(n) = offset_str.strip_suffix('m') {
        (n, 1)
    } else if let Some(n) = offset_str.strip_suffix('h') {
        (n, 60)
    } else if let Some(n) = offset_str.strip_suffix('d') {
        (n, 24 * 60)
    } else {
        (offset_str, 1)
    };

    let value: i64 = num_str.parse().map_err(|_| {
        ReportError::InvalidConfig(format!(
            "Invalid offset value: '{offset_str}'. Expected a positive number optionally followed by 'm', 'h', or 'd'"
        ))
    })?;

    if value <= 0 {
        return Err(ReportError::InvalidConfig(
            "Offset must be a positive value".to_string(),
        ));
    }

    value.checked_mul(multiplier).ok_or_else(|| {
        ReportError::InvalidConfig(format!("Offset value is too large: '{offset_str}'"))
    })
}

/// Parse a time offset ("15m", "2h", ...) into a wall-clock duration
///
/// # Errors
///
/// Returns error if the offset is invalid or too large to express in seconds
pub fn parse_offset_duration(offset_str: &str) -> Result<std::time::Duration> {
    let minutes = parse_time_offset(offset_str)?;
    let secs = u64::try_from(minutes)
        .ok()
        .and_then(|m| m.checked_mul(60))
        .ok_or_else(|| {
            ReportError::InvalidConfig(format!("Offset value is too large: '{}'", offset_str.trim()))
        })?;
    Ok(std::time::Duration::from_secs(secs))
}

/// Format a timestamp for a CSV report cell, e.g. `2025-01-15 12:00:00+00:00`
#[must_use]
pub fn format_report_time(dt: &DateTime<Utc>) -> String {
    dt.format(FORMAT_REPORT).to_string()
}
