//! Live control parameters shared between the operator API (writer) and the
//! sampling loop (reader). The loop copies the current value on every tick.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const SPEED_RANGE: (f64, f64) = (-1.0, 1.0);
pub const PULSE_SEC_RANGE: (f64, f64) = (0.0, 5.0);
pub const THRESHOLD_RANGE: (f64, f64) = (0.0, 1.0);

pub type SharedControls = Arc<RwLock<Controls>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Controls {
    /// Manual pulse speed, -1 (reverse) to 1.
    pub speed: f64,
    /// Manual pulse run time in seconds.
    pub pulse_sec: f64,
    /// Auto-irrigation fires when moisture drops below this.
    pub threshold: f64,
    pub auto_irrigate: bool,
}

/// Partial update, as sent by the operator. Absent fields are left alone.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct ControlsPatch {
    pub speed: Option<f64>,
    pub pulse_sec: Option<f64>,
    pub threshold: Option<f64>,
    pub auto_irrigate: Option<bool>,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pulse_sec: 1.0,
            threshold: 0.3,
            auto_irrigate: true,
        }
    }
}

pub(crate) fn check_range(errors: &mut Vec<String>, name: &str, value: f64, (lo, hi): (f64, f64)) {
    if !value.is_finite() || value < lo || value > hi {
        errors.push(format!("{name} {value} out of range [{lo}, {hi}]"));
    }
}

impl Controls {
    /// Validate all fields, reporting every violation.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        check_range(&mut errors, "speed", self.speed, SPEED_RANGE);
        check_range(&mut errors, "pulse_sec", self.pulse_sec, PULSE_SEC_RANGE);
        check_range(&mut errors, "threshold", self.threshold, THRESHOLD_RANGE);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!("invalid controls: {}", errors.join("; "));
        }
    }

    /// Return a copy with `patch` applied, or an error if the result is out
    /// of range. `self` is never left half-updated.
    pub fn patched(&self, patch: &ControlsPatch) -> Result<Controls> {
        let next = Controls {
            speed: patch.speed.unwrap_or(self.speed),
            pulse_sec: patch.pulse_sec.unwrap_or(self.pulse_sec),
            threshold: patch.threshold.unwrap_or(self.threshold),
            auto_irrigate: patch.auto_irrigate.unwrap_or(self.auto_irrigate),
        };
        next.validate()?;
        Ok(next)
    }
}

pub fn shared(initial: Controls) -> SharedControls {
    Arc::new(RwLock::new(initial))
}

/// Apply `patch` to the shared cell atomically. On validation failure the
/// cell keeps its previous value.
pub async fn apply_patch(cell: &SharedControls, patch: &ControlsPatch) -> Result<Controls> {
    let mut guard = cell.write().await;
    let next = guard.patched(patch)?;
    *guard = next;
    Ok(next)
}

// ===========================================================================
// Tests
// ===========================================================================
