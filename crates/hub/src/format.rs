//! Display formatting for observations and hub status.
//!
//! Everything here is a pure function of its inputs. "Now" is passed in
//! so the freshness stamp (`when`) is the time of the formatting call, not
//! the sample time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::packet::{HubStatus, Observation};

/// Shown in every field until the first packet of its kind arrives.
pub const PENDING: &str = "⌛️";

const DIRECTIONS: [&str; 9] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW", "N"];

const OBSERVATION_KEYS: [&str; 11] = [
    "serial", "batt", "temp", "humid", "lumos", "press", "insol", "ultra", "wind", "wdir", "when",
];

const HUB_KEYS: [&str; 3] = ["hubsn", "hubfirm", "uptime"];

// ---------------------------------------------------------------------------
// Units
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TempUnit {
    #[default]
    #[serde(rename = "c")]
    Celsius,
    #[serde(rename = "f")]
    Fahrenheit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum WindUnit {
    #[default]
    #[serde(rename = "ms")]
    MetersPerSecond,
    #[serde(rename = "mph")]
    MilesPerHour,
}

/// Display unit preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Units {
    pub temperature: TempUnit,
    pub wind: WindUnit,
}

impl Units {
    pub const IMPERIAL: Units = Units {
        temperature: TempUnit::Fahrenheit,
        wind: WindUnit::MilesPerHour,
    };

    /// True when either quantity is rendered in a converted unit.
    pub fn is_converted(&self) -> bool {
        self.temperature != TempUnit::Celsius || self.wind != WindUnit::MetersPerSecond
    }
}

impl TempUnit {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
        }
    }
}

impl WindUnit {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MetersPerSecond => "m/s",
            Self::MilesPerHour => "mph",
        }
    }
}

impl FromStr for TempUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" | "celsius" => Ok(Self::Celsius),
            "f" | "fahrenheit" => Ok(Self::Fahrenheit),
            other => Err(format!("unknown temperature unit '{other}' (use c/f)")),
        }
    }
}

impl FromStr for WindUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ms" | "m/s" => Ok(Self::MetersPerSecond),
            "mph" => Ok(Self::MilesPerHour),
            other => Err(format!("unknown wind unit '{other}' (use ms/mph)")),
        }
    }
}

pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 1.8 + 32.0
}

pub fn mps_to_mph(v: f64) -> f64 {
    v * 2.236936
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Named, display-ready fields. Recomputed on every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<String, String>);

impl Snapshot {
    fn pending(keys: &[&str]) -> Self {
        Self(
            keys.iter()
                .map(|k| (k.to_string(), PENDING.to_string()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Merge `other` into `self`, overwriting shared keys.
    pub fn extend(&mut self, other: Snapshot) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Group the digits of `n` in threes with commas: `1234567` → `"1,234,567"`.
pub fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Map a bearing in degrees to an 8-point compass label.
///
/// Sectors are 45° wide and centred on each label; the index is clamped so
/// negative or oversized bearings (and NaN) still land on a label.
pub fn deg_to_compass(deg: f64) -> &'static str {
    let ix = ((deg + 22.5) / 45.0) as i64;
    let ix = ix.clamp(0, DIRECTIONS.len() as i64 - 1) as usize;
    DIRECTIONS[ix]
}

pub fn format_timestamp(t: OffsetDateTime) -> String {
    t.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Formatters
// ---------------------------------------------------------------------------

/// Format the first sample row of an observation for display.
///
/// A pending observation (zero firmware revision) or one without sample
/// rows yields the placeholder snapshot.
pub fn format_observation(obs: &Observation, units: Units, now: OffsetDateTime) -> Snapshot {
    let s = match obs.first() {
        Some(s) if !obs.is_pending() => s,
        _ => return Snapshot::pending(&OBSERVATION_KEYS),
    };

    let temp = match units.temperature {
        TempUnit::Celsius => s.temperature,
        TempUnit::Fahrenheit => celsius_to_fahrenheit(s.temperature),
    };
    let wind = match units.wind {
        WindUnit::MetersPerSecond => s.wind_avg,
        WindUnit::MilesPerHour => mps_to_mph(s.wind_avg),
    };

    let mut press = (s.pressure as i64).to_string();
    let mut lumos = group_thousands(s.illuminance as i64);
    let mut insol = group_thousands(s.solar_radiation as i64);
    if units.is_converted() {
        press.push_str(" mb");
        lumos.push_str(" lux");
        insol.push_str(" W/m²");
    }

    let mut snap = Snapshot::default();
    snap.insert("serial", obs.serial_number.as_str());
    snap.insert("batt", format!("{:.1} volts", s.battery));
    snap.insert("temp", format!("{temp:.1}"));
    snap.insert("humid", format!("{:.1}%", s.humidity));
    snap.insert("lumos", lumos);
    snap.insert("press", press);
    snap.insert("insol", insol);
    snap.insert("ultra", group_thousands(s.uv_index as i64));
    snap.insert("wind", format!("{wind:.1}"));
    snap.insert("wdir", deg_to_compass(s.wind_direction));
    snap.insert("when", format_timestamp(now));
    snap
}

/// Format hub diagnostics. A zero timestamp yields the placeholder snapshot.
pub fn format_hub_status(hub: &HubStatus) -> Snapshot {
    if hub.is_pending() {
        return Snapshot::pending(&HUB_KEYS);
    }
    let mut snap = Snapshot::default();
    snap.insert("hubsn", hub.serial_number.as_str());
    snap.insert("hubfirm", hub.firmware_revision.as_str());
    snap.insert("uptime", group_thousands(hub.uptime));
    snap
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.temperature.label(), self.wind.label())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
