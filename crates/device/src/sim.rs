//! Soil moisture simulator standing in for the probe during development.
//!
//! Produces a moisture fraction in `[0, 1]` (1 = saturated):
//! - random walk with mean reversion, so consecutive readings stay close
//! - slow drying drift plus a day/night evaporation swing
//! - per-reading noise and the occasional spike
//! - closed-loop response to the pump (forward speed wets, reverse dries)

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// N(0,1) via Irwin-Hall: twelve uniforms minus six.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Selected with `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and dries steadily; crosses the default 0.3
    /// threshold within a few minutes of polling.
    Drying,
    /// Hovers around 0.55 with little noise. Never triggers the policy.
    Stable,
    /// Noisy with frequent spikes.
    Flaky,
    /// Starts near saturation and dries very slowly.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }

    fn params(self) -> Params {
        match self {
            Self::Drying => Params {
                start: 0.45,
                center: 0.4,
                drift: -0.0008,
                walk_sigma: 0.002,
                mean_reversion: 0.001,
                noise_sigma: 0.004,
                spike_prob: 0.02,
                spike_sigma: 0.08,
            },
            Self::Stable => Params {
                start: 0.55,
                center: 0.55,
                drift: 0.0,
                walk_sigma: 0.001,
                mean_reversion: 0.05,
                noise_sigma: 0.002,
                spike_prob: 0.0,
                spike_sigma: 0.0,
            },
            Self::Flaky => Params {
                start: 0.45,
                center: 0.4,
                drift: -0.0004,
                walk_sigma: 0.004,
                mean_reversion: 0.01,
                noise_sigma: 0.02,
                spike_prob: 0.10,
                spike_sigma: 0.2,
            },
            Self::Wet => Params {
                start: 0.85,
                center: 0.8,
                drift: -0.0001,
                walk_sigma: 0.001,
                mean_reversion: 0.01,
                noise_sigma: 0.003,
                spike_prob: 0.01,
                spike_sigma: 0.05,
            },
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Drying => "drying",
            Self::Stable => "stable",
            Self::Flaky => "flaky",
            Self::Wet => "wet",
        };
        f.write_str(name)
    }
}

/// Per-scenario tuning, in moisture-fraction units per sample.
#[derive(Debug, Clone, Copy)]
struct Params {
    start: f64,
    center: f64,
    drift: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    spike_prob: f64,
    spike_sigma: f64,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct MoistureSim {
    params: Params,
    /// "True" soil moisture, evolved on every sample.
    level: f64,
    diurnal_amplitude: f64,
    diurnal_period_s: f64,
    /// Current motor value; 0 when idle.
    pump_speed: f64,
    /// Moisture gained per sample at full forward speed.
    wet_rate: f64,
}

impl MoistureSim {
    /// `diurnal_period_s` is the length of one simulated day. 600 gives a
    /// ten-minute cycle for dev work; 86400 is real time.
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let params = scenario.params();
        Self {
            params,
            level: (params.start + gaussian(0.0, 0.02)).clamp(0.0, 1.0),
            diurnal_amplitude: 0.03,
            diurnal_period_s: diurnal_period_s.max(1.0),
            pump_speed: 0.0,
            wet_rate: 0.02,
        }
    }

    /// Tell the simulator what the pump is doing.
    pub fn set_pump(&mut self, speed: f64) {
        self.pump_speed = speed.clamp(-1.0, 1.0);
    }

    #[cfg(test)]
    pub fn pumping(&self) -> bool {
        self.pump_speed != 0.0
    }

    /// Next reading. Each call advances the underlying level.
    pub fn sample(&mut self) -> f64 {
        let p = self.params;

        let pull = p.mean_reversion * (p.center - self.level);
        let walk = gaussian(0.0, p.walk_sigma);
        let pumped = self.wet_rate * self.pump_speed;
        self.level = (self.level + p.drift + pull + walk + pumped).clamp(0.0, 1.0);

        let now_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let phase = 2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s;
        // Afternoon is driest.
        let diurnal = -self.diurnal_amplitude * phase.sin();

        let noise = gaussian(0.0, p.noise_sigma);
        let spike = if fastrand::f64() < p.spike_prob {
            gaussian(0.0, p.spike_sigma)
        } else {
            0.0
        };

        (self.level + diurnal + noise + spike).clamp(0.0, 1.0)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_of(sim: &mut MoistureSim, n: usize) -> f64 {
        (0..n).map(|_| sim.sample()).sum::<f64>() / n as f64
    }

    #[test]
    fn readings_are_fractions() {
        for scenario in [Scenario::Drying, Scenario::Stable, Scenario::Flaky, Scenario::Wet] {
            let mut sim = MoistureSim::new(scenario, 600.0);
            for _ in 0..500 {
                let v = sim.sample();
                assert!((0.0..=1.0).contains(&v), "{scenario}: out of range {v}");
            }
        }
    }

    #[test]
    fn stable_readings_are_coherent() {
        let mut sim = MoistureSim::new(Scenario::Stable, 600.0);
        let samples: Vec<f64> = (0..200).map(|_| sim.sample()).collect();
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0, f64::max);
        assert!(max_jump < 0.1, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn drying_trends_down() {
        let mut sim = MoistureSim::new(Scenario::Drying, 86_400.0);
        let before = mean_of(&mut sim, 20);
        for _ in 0..400 {
            sim.sample();
        }
        let after = mean_of(&mut sim, 20);
        assert!(after < before, "before={before:.3} after={after:.3}");
    }

    #[test]
    fn pumping_raises_moisture() {
        let mut sim = MoistureSim::new(Scenario::Drying, 86_400.0);
        let before = mean_of(&mut sim, 20);

        sim.set_pump(1.0);
        assert!(sim.pumping());
        for _ in 0..20 {
            sim.sample();
        }
        sim.set_pump(0.0);
        assert!(!sim.pumping());

        let after = mean_of(&mut sim, 20);
        assert!(after > before, "before={before:.3} after={after:.3}");
    }

    #[test]
    fn wet_starts_above_drying() {
        let mut wet = MoistureSim::new(Scenario::Wet, 600.0);
        let mut drying = MoistureSim::new(Scenario::Drying, 600.0);
        assert!(mean_of(&mut wet, 10) > mean_of(&mut drying, 10));
    }

    #[test]
    fn scenario_parsing_defaults_to_drying() {
        assert_eq!(Scenario::from_str_lossy("STABLE"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy(" flaky "), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("wet"), Scenario::Wet);
        assert_eq!(Scenario::from_str_lossy("desert"), Scenario::Drying);
        assert_eq!(Scenario::Wet.to_string(), "wet");
    }

    #[test]
    fn std_normal_is_centered() {
        let n = 5000;
        let mean = (0..n).map(|_| approx_std_normal()).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.15, "mean {mean}");
    }
}
