//! Auto-irrigation policy: compares the latest sample against the threshold,
//! at most once per check interval.
//!
//! The gate is strict rate limiting: once it opens, `last_check` moves to
//! `now` whether or not the pump is fired, and every call before the next
//! interval boundary returns `Skip` without looking at the window.

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::window::{SampleWindow, WindowError};

/// Default minimum spacing between two policy decisions.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::seconds(10);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Speed and run time of one pump command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pulse {
    pub speed: f64,
    pub duration_secs: f64,
}

impl Pulse {
    /// Full speed for five seconds.
    pub const AUTO: Pulse = Pulse {
        speed: 1.0,
        duration_secs: 5.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Fire(Pulse),
    Skip,
}

/// Cooldown gate for the policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Cooldown {
    #[serde(with = "time::serde::rfc3339")]
    pub last_check: OffsetDateTime,
    #[serde(skip)]
    pub interval: Duration,
}

impl Cooldown {
    pub fn new(last_check: OffsetDateTime, interval: Duration) -> Self {
        Self {
            last_check,
            interval,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Decide whether to irrigate.
///
/// Returns `Skip` while the cooldown is running. Otherwise restarts the
/// cooldown at `now` and fires `pulse` if the most recently appended sample
/// is strictly below `threshold`.
///
/// A clock that steps backwards keeps the gate closed until it catches up
/// with `last_check + interval` again.
pub fn evaluate(
    window: &SampleWindow,
    threshold: f64,
    pulse: Pulse,
    cooldown: &mut Cooldown,
    now: OffsetDateTime,
) -> Result<Decision, WindowError> {
    if now - cooldown.last_check < cooldown.interval {
        return Ok(Decision::Skip);
    }
    cooldown.last_check = now;

    let latest = window.latest()?;
    if latest.value < threshold {
        Ok(Decision::Fire(pulse))
    } else {
        Ok(Decision::Skip)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
