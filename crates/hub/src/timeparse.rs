//! Parsing of the `ts` parameter accepted by the range query.

use thiserror::Error;
use time::format_description::FormatItem;
use time::macros::{datetime, format_description};
use time::{Date, OffsetDateTime, PrimitiveDateTime};

/// Earliest accepted epoch parameter (2000-01-01T00:00:00Z).
const EPOCH_MIN: OffsetDateTime = datetime!(2000-01-01 00:00:00 UTC);
/// First rejected epoch parameter (2100-01-01T00:00:00Z).
const EPOCH_MAX: OffsetDateTime = datetime!(2100-01-01 00:00:00 UTC);

const DATE: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const DATE_HM: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");
const DATE_HMS: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeParseError {
    #[error("epoch {0} is outside 2000-01-01..2100-01-01")]
    EpochOutOfRange(i64),
    #[error("unrecognised timestamp '{0}'")]
    Unrecognised(String),
}

/// Parse a query timestamp.
///
/// Accepted, in order: Unix epoch seconds, `YYYY-MM-DD`,
/// `YYYY-MM-DD HH:MM`, `YYYY-MM-DD HH:MM:SS`. Calendar strings are UTC.
pub fn parse_since(value: &str) -> Result<OffsetDateTime, TimeParseError> {
    let value = value.trim();

    if let Ok(secs) = value.parse::<i64>() {
        let t = OffsetDateTime::from_unix_timestamp(secs)
            .map_err(|_| TimeParseError::EpochOutOfRange(secs))?;
        if t < EPOCH_MIN || t >= EPOCH_MAX {
            return Err(TimeParseError::EpochOutOfRange(secs));
        }
        return Ok(t);
    }

    if let Ok(d) = Date::parse(value, DATE) {
        return Ok(d.midnight().assume_utc());
    }
    for layout in [DATE_HM, DATE_HMS] {
        if let Ok(dt) = PrimitiveDateTime::parse(value, layout) {
            return Ok(dt.assume_utc());
        }
    }

    Err(TimeParseError::Unrecognised(value.to_string()))
}

// ===========================================================================
// Tests
// ===========================================================================
