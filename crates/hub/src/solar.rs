//! Sunrise and sunset for the station's location.

use serde::Deserialize;
use sunrise::{SolarDay, SolarEvent};
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above sea level.
    #[serde(default)]
    pub elevation: f64,
}

/// Sunrise and sunset (UTC) on `date`, or `None` during polar day/night.
pub fn sun_times(loc: &Location, date: Date) -> Option<(OffsetDateTime, OffsetDateTime)> {
    let day = SolarDay::new(
        loc.latitude,
        loc.longitude,
        date.year(),
        u8::from(date.month()).into(),
        date.day().into(),
    )
    // Below sea level the horizon is no lower than at sea level.
    .with_altitude(loc.elevation.max(0.0));

    let rise = day.event_time(SolarEvent::Sunrise);
    let set = day.event_time(SolarEvent::Sunset);
    // When the sun never crosses the horizon both events collapse to the
    // same (meaningless) instant.
    if rise >= set {
        return None;
    }
    Some((
        OffsetDateTime::from_unix_timestamp(rise).ok()?,
        OffsetDateTime::from_unix_timestamp(set).ok()?,
    ))
}

/// Today's sunrise and sunset as `HH:MM` in `now`'s offset. Empty strings
/// when there is no location or the sun does not cross the horizon.
pub fn sun_times_hhmm(loc: Option<&Location>, now: OffsetDateTime) -> (String, String) {
    let hhmm = |t: OffsetDateTime| {
        t.to_offset(now.offset())
            .format(format_description!("[hour]:[minute]"))
            .unwrap_or_default()
    };
    loc.and_then(|l| sun_times(l, now.to_offset(UtcOffset::UTC).date()))
        .map(|(rise, set)| (hhmm(rise), hhmm(set)))
        .unwrap_or_default()
}

// ===========================================================================
// Tests
// ===========================================================================
