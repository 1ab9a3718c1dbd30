//! TOML config file loading and validation. Every field has a default, so a
//! missing file or a partial file is fine; environment variables override the
//! device URL and web port.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::controls::{check_range, Controls, PULSE_SEC_RANGE, SPEED_RANGE, THRESHOLD_RANGE};
use crate::policy::{Pulse, DEFAULT_CHECK_INTERVAL};
use crate::window::DEFAULT_RETENTION;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// Upper bound on `sampling.retention_min` (one day).
pub const MAX_RETENTION_MIN: i64 = 24 * 60;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceSection,
    pub sampling: SamplingSection,
    pub policy: PolicySection,
    pub controls: ControlsSection,
    pub web: WebSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SamplingSection {
    pub period_ms: u64,
    pub retention_min: i64,
    pub max_in_flight_reads: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    pub auto_irrigate: bool,
    pub threshold: f64,
    pub check_interval_sec: i64,
    pub pulse_speed: f64,
    pub pulse_sec: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsSection {
    pub speed: f64,
    pub pulse_sec: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub port: u16,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: 2000,
        }
    }
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            period_ms: 100,
            retention_min: DEFAULT_RETENTION.whole_minutes(),
            max_in_flight_reads: 4,
        }
    }
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            auto_irrigate: true,
            threshold: 0.3,
            check_interval_sec: DEFAULT_CHECK_INTERVAL.whole_seconds(),
            pulse_speed: Pulse::AUTO.speed,
            pulse_sec: Pulse::AUTO.duration_secs,
        }
    }
}

impl Default for ControlsSection {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pulse_sec: 1.0,
        }
    }
}

impl Default for WebSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

impl Config {
    pub fn sampling_period(&self) -> Duration {
        Duration::from_millis(self.sampling.period_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.device.request_timeout_ms)
    }

    pub fn retention(&self) -> time::Duration {
        time::Duration::minutes(self.sampling.retention_min)
    }

    pub fn check_interval(&self) -> time::Duration {
        time::Duration::seconds(self.policy.check_interval_sec)
    }

    pub fn auto_pulse(&self) -> Pulse {
        Pulse {
            speed: self.policy.pulse_speed,
            duration_secs: self.policy.pulse_sec,
        }
    }

    /// Initial value of the live controls cell.
    pub fn initial_controls(&self) -> Controls {
        Controls {
            speed: self.controls.speed,
            pulse_sec: self.controls.pulse_sec,
            threshold: self.policy.threshold,
            auto_irrigate: self.policy.auto_irrigate,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // ── Device ──────────────────────────────────────────────
        let url = self.device.base_url.trim();
        if url.is_empty() {
            errors.push("device.base_url is empty".to_string());
        } else if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(format!(
                "device.base_url '{url}' must start with http:// or https://"
            ));
        }
        if self.device.request_timeout_ms == 0 {
            errors.push("device.request_timeout_ms must be positive".to_string());
        }

        // ── Sampling ────────────────────────────────────────────
        if self.sampling.period_ms == 0 {
            errors.push("sampling.period_ms must be positive".to_string());
        }
        if !(1..=MAX_RETENTION_MIN).contains(&self.sampling.retention_min) {
            errors.push(format!(
                "sampling.retention_min {} out of range [1, {MAX_RETENTION_MIN}]",
                self.sampling.retention_min
            ));
        }
        if self.sampling.max_in_flight_reads == 0 {
            errors.push("sampling.max_in_flight_reads must be at least 1".to_string());
        }

        // ── Policy ──────────────────────────────────────────────
        check_range(&mut errors, "policy.threshold", self.policy.threshold, THRESHOLD_RANGE);
        if self.policy.check_interval_sec <= 0 {
            errors.push(format!(
                "policy.check_interval_sec must be positive, got {}",
                self.policy.check_interval_sec
            ));
        }
        check_range(&mut errors, "policy.pulse_speed", self.policy.pulse_speed, SPEED_RANGE);
        check_range(&mut errors, "policy.pulse_sec", self.policy.pulse_sec, PULSE_SEC_RANGE);

        // ── Manual controls ─────────────────────────────────────
        check_range(&mut errors, "controls.speed", self.controls.speed, SPEED_RANGE);
        check_range(&mut errors, "controls.pulse_sec", self.controls.pulse_sec, PULSE_SEC_RANGE);

        if self.web.port == 0 {
            errors.push("web.port must be non-zero".to_string());
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

    /// Apply `HYDRO_API_BASE_URL` / `WEB_PORT` style overrides. `lookup` is
    /// `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("HYDRO_API_BASE_URL") {
            self.device.base_url = url;
        }
        if let Some(port) = lookup("WEB_PORT") {
            self.web.port = port
                .parse()
                .with_context(|| format!("WEB_PORT '{port}' is not a valid port"))?;
        }
        self.device.base_url = self.device.base_url.trim_end_matches('/').to_string();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file. A missing file yields the defaults.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        tracing::info!(path, "no config file, using defaults");
        return Ok(Config::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    Ok(config)
}

/// Load the file, apply env overrides, then validate.
pub fn load_with_env(path: &str) -> Result<Config> {
    let mut config = load(path)?;
    config.apply_env(|k| std::env::var(k).ok())?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpDevice;
    use std::collections::HashMap;

    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_empty_config_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.device.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.sampling.period_ms, 100);
        assert_eq!(config.sampling.retention_min, 30);
        assert_eq!(config.policy.check_interval_sec, 10);
        assert_eq!(config.retention(), DEFAULT_RETENTION);
        assert_eq!(config.check_interval(), DEFAULT_CHECK_INTERVAL);
        assert_eq!(config.auto_pulse(), Pulse::AUTO);
        config.validate().unwrap();
    }

    #[test]
    fn parse_partial_config() {
        let toml_str = r#"
[device]
base_url = "http://rpi.local:5000/api"

[policy]
threshold = 0.45
auto_irrigate = false
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device.base_url, "http://rpi.local:5000/api");
        assert_eq!(config.device.request_timeout_ms, 2000);
        assert_eq!(config.policy.threshold, 0.45);
        assert!(!config.policy.auto_irrigate);
        assert_eq!(config.policy.pulse_sec, 5.0);

        let controls = config.initial_controls();
        assert_eq!(controls.threshold, 0.45);
        assert!(!controls.auto_irrigate);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = load("/nonexistent/hydro.toml").unwrap();
        assert_eq!(config.web.port, 8080);
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn bad_url_scheme_rejected() {
        let mut cfg = Config::default();
        cfg.device.base_url = "localhost:5000".into();
        assert_validation_err(&cfg, "must start with http://");
    }

    #[test]
    fn https_base_url_accepted() {
        let mut cfg = Config::default();
        cfg.device.base_url = "https://garden.local/api".into();
        cfg.validate().unwrap();
        HttpDevice::new(&cfg.device.base_url, cfg.request_timeout()).unwrap();
    }

    #[test]
    fn zero_period_rejected() {
        let mut cfg = Config::default();
        cfg.sampling.period_ms = 0;
        assert_validation_err(&cfg, "sampling.period_ms must be positive");
    }

    #[test]
    fn retention_longer_than_a_day_rejected() {
        let mut cfg = Config::default();
        cfg.sampling.retention_min = 10_000_000_000;
        assert_validation_err(&cfg, "sampling.retention_min 10000000000 out of range");

        cfg.sampling.retention_min = MAX_RETENTION_MIN;
        cfg.validate().unwrap();
        assert_eq!(cfg.retention(), time::Duration::days(1));
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let mut cfg = Config::default();
        cfg.policy.threshold = 1.2;
        assert_validation_err(&cfg, "policy.threshold 1.2 out of range");
    }

    #[test]
    fn pulse_longer_than_five_seconds_rejected() {
        let mut cfg = Config::default();
        cfg.policy.pulse_sec = 6.0;
        assert_validation_err(&cfg, "policy.pulse_sec 6 out of range");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = Config::default();
        cfg.device.base_url = "".into();
        cfg.sampling.retention_min = 0;
        cfg.sampling.max_in_flight_reads = 0;
        cfg.controls.speed = -3.0;
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("4 errors"), "{msg}");
        assert!(msg.contains("device.base_url is empty"), "{msg}");
        assert!(msg.contains("retention_min"), "{msg}");
        assert!(msg.contains("max_in_flight_reads"), "{msg}");
        assert!(msg.contains("controls.speed"), "{msg}");
    }

    // -- Env overrides ----------------------------------------------------

    #[test]
    fn env_overrides_base_url_and_port() {
        let env: HashMap<&str, &str> = [
            ("HYDRO_API_BASE_URL", "http://10.0.0.5:5000/api/"),
            ("WEB_PORT", "9090"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.device.base_url, "http://10.0.0.5:5000/api");
        assert_eq!(cfg.web.port, 9090);
    }

    #[test]
    fn env_bad_port_is_an_error() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(|k| (k == "WEB_PORT").then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(format!("{err:#}").contains("WEB_PORT 'eighty'"));
    }
}
