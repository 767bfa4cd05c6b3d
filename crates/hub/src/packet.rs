//! Datagram decoding for the hub's local UDP broadcasts.
//!
//! Every datagram is a JSON document carrying a `type` discriminator. Two
//! shapes are understood (`obs_st` and `hub_status`); everything else on the
//! channel is background noise and decodes to `None`.

use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use thiserror::Error;

pub const OBS_ST: &str = "obs_st";
const KNOWN_TYPES: [&str; 2] = [OBS_ST, "hub_status"];

/// Minimum number of channels in one `obs_st` sample row.
pub const CHANNELS: usize = 18;

// ---------------------------------------------------------------------------
// Packet types
// ---------------------------------------------------------------------------

/// A decoded datagram, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Packet {
    #[serde(rename = "obs_st")]
    Observation(Observation),
    #[serde(rename = "hub_status")]
    HubStatus(HubStatus),
    /// Any other `type` value seen on the channel.
    #[serde(other)]
    Other,
}

/// One sensor observation batch (`obs_st`).
///
/// A zero `firmware_revision` marks the "nothing received yet" value held by
/// the store at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub serial_number: String,
    #[serde(default)]
    pub hub_sn: String,
    pub obs: Vec<Sample>,
    pub firmware_revision: i64,
}

impl Observation {
    /// The first sample row, if the batch has one.
    pub fn first(&self) -> Option<&Sample> {
        self.obs.first()
    }

    pub fn is_pending(&self) -> bool {
        self.firmware_revision == 0
    }
}

/// Periodic diagnostics from the hub itself (`hub_status`).
///
/// A zero `timestamp` marks the "nothing received yet" value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubStatus {
    pub serial_number: String,
    pub firmware_revision: String,
    pub uptime: i64,
    #[serde(default)]
    pub rssi: i64,
    pub timestamp: i64,
    #[serde(default)]
    pub reset_flags: String,
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub fs: Vec<i64>,
    #[serde(default)]
    pub radio_stats: Vec<i64>,
    #[serde(default)]
    pub mqtt_stats: Vec<i64>,
}

impl HubStatus {
    pub fn is_pending(&self) -> bool {
        self.timestamp == 0
    }
}

/// One row of an `obs_st` sample array with its channels named.
///
/// On the wire a row is a bare array whose column positions are fixed by
/// the sender. Nulls (sensor unavailable) decode as `0.0`; columns past
/// the last known channel are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Option<f64>>", into = "Vec<f64>")]
pub struct Sample {
    /// Sample time, Unix epoch seconds.
    pub epoch: f64,
    /// Minimum 3 second wind sample, m/s.
    pub wind_lull: f64,
    /// Average wind over the report interval, m/s.
    pub wind_avg: f64,
    /// Maximum 3 second wind sample, m/s.
    pub wind_gust: f64,
    /// Degrees.
    pub wind_direction: f64,
    /// Seconds.
    pub wind_interval: f64,
    /// Station pressure, mb.
    pub pressure: f64,
    /// Air temperature, °C.
    pub temperature: f64,
    /// Relative humidity, %.
    pub humidity: f64,
    /// Lux.
    pub illuminance: f64,
    pub uv_index: f64,
    /// W/m².
    pub solar_radiation: f64,
    /// Rain over the previous minute, mm.
    pub rain_1m: f64,
    /// 0 none, 1 rain, 2 hail, 3 rain + hail.
    pub precip_type: f64,
    /// km.
    pub strike_distance: f64,
    pub strike_count: f64,
    /// Volts.
    pub battery: f64,
    /// Minutes.
    pub report_interval: f64,
}

impl Sample {
    pub fn epoch_secs(&self) -> i64 {
        self.epoch as i64
    }
}

impl TryFrom<Vec<Option<f64>>> for Sample {
    type Error = String;

    fn try_from(row: Vec<Option<f64>>) -> Result<Self, Self::Error> {
        if row.len() < CHANNELS {
            return Err(format!(
                "sample row has {} channels, expected at least {CHANNELS}",
                row.len()
            ));
        }
        let c = |i: usize| row[i].unwrap_or(0.0);
        Ok(Self {
            epoch: c(0),
            wind_lull: c(1),
            wind_avg: c(2),
            wind_gust: c(3),
            wind_direction: c(4),
            wind_interval: c(5),
            pressure: c(6),
            temperature: c(7),
            humidity: c(8),
            illuminance: c(9),
            uv_index: c(10),
            solar_radiation: c(11),
            rain_1m: c(12),
            precip_type: c(13),
            strike_distance: c(14),
            strike_count: c(15),
            battery: c(16),
            report_interval: c(17),
        })
    }
}

impl From<Sample> for Vec<f64> {
    fn from(s: Sample) -> Self {
        vec![
            s.epoch,
            s.wind_lull,
            s.wind_avg,
            s.wind_gust,
            s.wind_direction,
            s.wind_interval,
            s.pressure,
            s.temperature,
            s.humidity,
            s.illuminance,
            s.uv_index,
            s.solar_radiation,
            s.rain_1m,
            s.precip_type,
            s.strike_distance,
            s.strike_count,
            s.battery,
            s.report_interval,
        ]
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A datagram declared a known type but did not match its schema.
#[derive(Debug, Error)]
#[error("malformed packet: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Decode a raw datagram in a single pass.
///
/// Returns `Ok(None)` for anything that is not ours: non-JSON bytes,
/// documents without a usable `type`, and unrecognised types.
pub fn decode(payload: &[u8]) -> Result<Option<Packet>, DecodeError> {
    match serde_json::from_slice::<Packet>(payload) {
        Ok(Packet::Other) => Ok(None),
        Ok(p) => Ok(Some(p)),
        Err(e) if is_noise(payload, &e) => Ok(None),
        Err(e) => Err(DecodeError(e)),
    }
}

/// Just the discriminator, read only after a failed decode.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// True when the failure is not about a known schema: the bytes are not
/// JSON, or the document does not declare one of our types.
fn is_noise(payload: &[u8], e: &serde_json::Error) -> bool {
    if e.classify() != Category::Data {
        return true;
    }
    match serde_json::from_slice::<Envelope>(payload) {
        Ok(Envelope { kind: Some(kind) }) => !KNOWN_TYPES.contains(&kind.as_str()),
        _ => true,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
