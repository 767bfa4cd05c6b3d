//! Receiver configuration: an optional TOML file, environment overrides on
//! top, then validation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::format::Units;
use crate::listener::DEFAULT_PORT;
use crate::solar::Location;

pub const DEFAULT_CONFIG_PATH: &str = "wx.toml";

// ---------------------------------------------------------------------------
// Config file structure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Station name shown on the dashboard.
    pub station: String,
    pub udp_port: u16,
    pub web_port: u16,
    /// Persistence, the range query and charts are disabled when unset.
    pub db_path: Option<String>,
    /// `/quit` is only registered when set.
    pub shutdown_token: Option<String>,
    /// Sunrise/sunset display is disabled when unset.
    pub location: Option<Location>,
    pub units: Units,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            station: String::new(),
            udp_port: DEFAULT_PORT,
            web_port: 8080,
            db_path: None,
            shutdown_token: None,
            location: None,
            units: Units::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every setting. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.udp_port == 0 {
            errors.push("udp_port must be non-zero".to_string());
        }
        if self.web_port == 0 {
            errors.push("web_port must be non-zero".to_string());
        }

        if let Some(path) = &self.db_path {
            if path.trim().is_empty() {
                errors.push("db_path is empty (omit it to disable persistence)".to_string());
            }
        }

        if let Some(token) = &self.shutdown_token {
            if token.trim().is_empty() {
                errors.push("shutdown_token is empty (omit it to disable /quit)".to_string());
            }
        }

        if let Some(loc) = &self.location {
            if !(-90.0..=90.0).contains(&loc.latitude) {
                errors.push(format!(
                    "location: latitude {} out of range [-90, 90]",
                    loc.latitude
                ));
            }
            if !(-180.0..=180.0).contains(&loc.longitude) {
                errors.push(format!(
                    "location: longitude {} out of range [-180, 180]",
                    loc.longitude
                ));
            }
            if !loc.elevation.is_finite() {
                errors.push("location: elevation must be a finite number".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{name}={value:?}: {e}"))
}

impl Config {
    /// Apply overrides from `lookup` (normally `std::env::var`). Unset
    /// variables leave the file/default value alone.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("STATION") {
            self.station = v;
        }
        if let Some(v) = lookup("UDP_PORT") {
            self.udp_port = parse_var("UDP_PORT", &v)?;
        }
        if let Some(v) = lookup("PORT") {
            self.web_port = parse_var("PORT", &v)?;
        }
        if let Some(v) = lookup("DB_PATH") {
            self.db_path = Some(v);
        }
        if let Some(v) = lookup("SHUTDOWN_TOKEN") {
            self.shutdown_token = Some(v);
        }
        if let Some(v) = lookup("TEMP_UNIT") {
            self.units.temperature = parse_var("TEMP_UNIT", &v)?;
        }
        if let Some(v) = lookup("WIND_UNIT") {
            self.units.wind = parse_var("WIND_UNIT", &v)?;
        }

        if let Some(lat) = lookup("LATITUDE") {
            let lon = lookup("LONGITUDE").context("LATITUDE is set but LONGITUDE is not")?;
            let elevation = match lookup("ELEVATION") {
                Some(v) => parse_var("ELEVATION", &v)?,
                None => 0.0,
            };
            self.location = Some(Location {
                latitude: parse_var("LATITUDE", &lat)?,
                longitude: parse_var("LONGITUDE", &lon)?,
                elevation,
            });
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file. A missing file is only an error when
/// `required` is set (an explicit `CONFIG_PATH`).
pub fn load(path: &str, required: bool) -> Result<Config> {
    if !required && !Path::new(path).exists() {
        return Ok(Config::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    Ok(config)
}

/// File, then environment, then validation.
pub fn resolve(path: &str, required: bool, lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config = load(path, required)?;
    config
        .apply_env(lookup)
        .context("invalid environment override")?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
