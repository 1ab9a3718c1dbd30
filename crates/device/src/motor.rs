//! Pump motor behind an H-bridge. The `gpio` feature drives the bridge with
//! software PWM through rppal; without it, a mock records the motor value
//! and logs changes.

use anyhow::Result;

/// H-bridge IN1.
pub const MOTOR_FWD_PIN: u8 = 20;
/// H-bridge IN2.
pub const MOTOR_REV_PIN: u8 = 21;

/// Map a pump speed to the bridge value. The pump is wired so that a
/// positive speed pushes water out, which is a reverse motor value.
pub fn motor_value(speed: f64) -> f64 {
    (-speed).clamp(-1.0, 1.0)
}

// ---------------------------------------------------------------------------
// Real H-bridge (production, needs rppal and a Raspberry Pi)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

#[cfg(feature = "gpio")]
const PWM_FREQUENCY_HZ: f64 = 100.0;

#[cfg(feature = "gpio")]
pub struct PumpMotor {
    fwd: OutputPin,
    rev: OutputPin,
}

#[cfg(feature = "gpio")]
impl PumpMotor {
    pub fn new() -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut fwd = gpio.get(MOTOR_FWD_PIN)?.into_output();
        let mut rev = gpio.get(MOTOR_REV_PIN)?.into_output();

        // Fail-safe: motor stopped at startup
        fwd.set_low();
        rev.set_low();

        tracing::info!(fwd = MOTOR_FWD_PIN, rev = MOTOR_REV_PIN, "h-bridge initialised");
        Ok(Self { fwd, rev })
    }

    pub fn run(&mut self, speed: f64) -> Result<()> {
        let value = motor_value(speed);
        if value > 0.0 {
            self.rev.clear_pwm()?;
            self.rev.set_low();
            self.fwd.set_pwm_frequency(PWM_FREQUENCY_HZ, value)?;
        } else if value < 0.0 {
            self.fwd.clear_pwm()?;
            self.fwd.set_low();
            self.rev.set_pwm_frequency(PWM_FREQUENCY_HZ, -value)?;
        } else {
            self.stop();
        }
        tracing::debug!(speed, value, "motor set");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Err(e) = self.fwd.clear_pwm().and(self.rev.clear_pwm()) {
            tracing::warn!(error = %e, "failed to clear pwm");
        }
        self.fwd.set_low();
        self.rev.set_low();
    }
}

// ---------------------------------------------------------------------------
// Mock motor (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct PumpMotor {
    pub(crate) value: f64,
}

#[cfg(not(feature = "gpio"))]
impl PumpMotor {
    pub fn new() -> Result<Self> {
        tracing::info!(
            fwd = MOTOR_FWD_PIN,
            rev = MOTOR_REV_PIN,
            "[mock-gpio] h-bridge initialised (no hardware)"
        );
        Ok(Self { value: 0.0 })
    }

    pub fn run(&mut self, speed: f64) -> Result<()> {
        self.value = motor_value(speed);
        tracing::info!(speed, value = self.value, "[mock-gpio] motor set");
        Ok(())
    }

    pub fn stop(&mut self) {
        tracing::info!(was = self.value, "[mock-gpio] motor stopped");
        self.value = 0.0;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
