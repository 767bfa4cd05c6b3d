//! Stateful weather-station simulator for local development.
//!
//! Produces one 18-channel `obs_st` sample row per tick:
//! - Diurnal temperature and light cycle driven by the sample epoch
//! - Mean-reverting random walks for pressure, humidity and wind
//! - Per-reading sensor noise
//! - Occasional rain and lightning, depending on the scenario
//! - Slow battery drain

use std::f64::consts::PI;
use std::fmt;

/// Number of channels in one sample row.
pub const CHANNELS: usize = 18;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

/// Sample from N(mean, sigma).
fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured weather profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Clear skies, light wind, steady pressure.
    Fair,
    /// Overcast with gusty wind and drizzle now and then.
    Breezy,
    /// Falling pressure, strong gusts, frequent rain and lightning.
    Stormy,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "breezy" => Self::Breezy,
            "stormy" => Self::Stormy,
            _ => Self::Fair,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fair => write!(f, "fair"),
            Self::Breezy => write!(f, "breezy"),
            Self::Stormy => write!(f, "stormy"),
        }
    }
}

/// Tuning knobs derived from a scenario.
struct Profile {
    /// Mean wind speed, m/s.
    wind_mean: f64,
    wind_sigma: f64,
    /// Pressure the walk reverts to, mb.
    pressure_mean: f64,
    pressure_sigma: f64,
    /// Fraction of clear-sky light that reaches the sensor.
    cloud_factor: f64,
    rain_prob: f32,
    strike_prob: f32,
}

impl Profile {
    fn for_scenario(scenario: Scenario) -> Self {
        match scenario {
            Scenario::Fair => Self {
                wind_mean: 2.0,
                wind_sigma: 0.3,
                pressure_mean: 1020.0,
                pressure_sigma: 0.1,
                cloud_factor: 1.0,
                rain_prob: 0.0,
                strike_prob: 0.0,
            },
            Scenario::Breezy => Self {
                wind_mean: 6.0,
                wind_sigma: 0.8,
                pressure_mean: 1010.0,
                pressure_sigma: 0.2,
                cloud_factor: 0.5,
                rain_prob: 0.05,
                strike_prob: 0.0,
            },
            Scenario::Stormy => Self {
                wind_mean: 12.0,
                wind_sigma: 2.0,
                pressure_mean: 990.0,
                pressure_sigma: 0.5,
                cloud_factor: 0.2,
                rain_prob: 0.4,
                strike_prob: 0.1,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

/// Stateful simulator producing plausible `obs_st` sample rows.
pub struct WeatherSim {
    profile: Profile,

    // Diurnal cycle
    temp_mean: f64,
    temp_amplitude: f64,
    diurnal_period_s: f64,

    // Walk state
    pressure: f64,
    humidity: f64,
    wind: f64,
    wind_dir: f64,
    battery: f64,

    /// Minutes between reports, copied into the last channel.
    report_interval_min: f64,
}

impl WeatherSim {
    /// Create a simulator.
    ///
    /// `diurnal_period_s` controls the day/night cycle length. Use 600
    /// (10 min) for fast dev iteration or 86400 for real-time.
    pub fn new(scenario: Scenario, diurnal_period_s: f64, report_interval_s: u64) -> Self {
        let profile = Profile::for_scenario(scenario);
        Self {
            temp_mean: 15.0,
            temp_amplitude: 6.0,
            diurnal_period_s,
            pressure: profile.pressure_mean + gaussian(0.0, 2.0),
            humidity: 60.0,
            wind: profile.wind_mean,
            wind_dir: fastrand::f64() * 360.0,
            battery: 2.7,
            report_interval_min: (report_interval_s as f64 / 60.0).max(1.0).round(),
            profile,
        }
    }

    /// Where `epoch` sits in the day: 0.0 at midnight, 0.5 at noon.
    fn day_phase(&self, epoch: i64) -> f64 {
        (epoch as f64).rem_euclid(self.diurnal_period_s) / self.diurnal_period_s
    }

    /// Clear-sky brightness in 0..=1, zero at night.
    pub fn daylight(&self, epoch: i64) -> f64 {
        (-(2.0 * PI * self.day_phase(epoch)).cos()).max(0.0)
    }

    /// Produce the next sample row stamped with `epoch`.
    ///
    /// The walk state evolves with each call, so the order and frequency of
    /// calls matters.
    pub fn sample(&mut self, epoch: i64) -> [f64; CHANNELS] {
        let p = &self.profile;

        // -- Evolve the walks ---------------------------------------------

        self.pressure += 0.05 * (p.pressure_mean - self.pressure) + gaussian(0.0, p.pressure_sigma);
        self.pressure = self.pressure.clamp(950.0, 1060.0);

        self.wind += 0.1 * (p.wind_mean - self.wind) + gaussian(0.0, p.wind_sigma);
        self.wind = self.wind.clamp(0.0, 40.0);

        self.wind_dir = (self.wind_dir + gaussian(0.0, 10.0)).rem_euclid(360.0);

        self.battery = (self.battery - 0.0001).max(2.3);

        // -- Diurnal channels ---------------------------------------------

        let phase = 2.0 * PI * self.day_phase(epoch);
        // Coldest at midnight, warmest mid-afternoon.
        let temp = self.temp_mean - self.temp_amplitude * (phase - PI / 4.0).cos()
            + gaussian(0.0, 0.1);

        // Humidity falls as it warms.
        let target_humid = 75.0 - 2.5 * (temp - self.temp_mean);
        self.humidity += 0.2 * (target_humid - self.humidity) + gaussian(0.0, 0.5);
        self.humidity = self.humidity.clamp(5.0, 100.0);

        let light = self.daylight(epoch) * p.cloud_factor;
        let lux = (110_000.0 * light + gaussian(0.0, 50.0)).max(0.0);
        let solar = (lux / 120.0).max(0.0);
        let uv = (11.0 * light).max(0.0);

        // -- Events -------------------------------------------------------

        let raining = fastrand::f32() < p.rain_prob;
        let rain = if raining { fastrand::f64() * 0.5 } else { 0.0 };
        let (strike_distance, strike_count) = if fastrand::f32() < p.strike_prob {
            (fastrand::u32(1..40) as f64, fastrand::u32(1..4) as f64)
        } else {
            (0.0, 0.0)
        };

        let avg = self.wind + gaussian(0.0, 0.1).abs();
        let lull = avg * 0.6;
        let gust = avg * (1.3 + fastrand::f64() * 0.4);

        [
            epoch as f64,
            round_to(lull, 2),
            round_to(avg, 2),
            round_to(gust, 2),
            self.wind_dir.round(),
            3.0,
            round_to(self.pressure, 2),
            round_to(temp, 2),
            round_to(self.humidity, 2),
            lux.round(),
            round_to(uv, 2),
            solar.round(),
            round_to(rain, 3),
            if raining { 1.0 } else { 0.0 },
            strike_distance,
            strike_count,
            round_to(self.battery, 3),
            self.report_interval_min,
        ]
    }
}

fn round_to(v: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (v * scale).round() / scale
}

// ===========================================================================
// Tests
// ===========================================================================
