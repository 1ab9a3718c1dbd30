//! Moisture probe. With the `gpio` feature this reads a capacitive sensor
//! through an MCP3008 ADC on SPI0; without it the simulator answers.

use anyhow::Result;

#[cfg(not(feature = "gpio"))]
use crate::sim::{MoistureSim, Scenario};

// ---------------------------------------------------------------------------
// MCP3008 over SPI (production, needs rppal and a Raspberry Pi)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

/// 10-bit converter full scale.
#[cfg(feature = "gpio")]
const MCP3008_MAX: f64 = 1023.0;

#[cfg(feature = "gpio")]
const SPI_CLOCK_HZ: u32 = 1_350_000;

#[cfg(feature = "gpio")]
pub struct Probe {
    spi: Spi,
    channel: u8,
}

#[cfg(feature = "gpio")]
impl Probe {
    pub fn new(channel: u8) -> Result<Self> {
        anyhow::ensure!(channel < 8, "MCP3008 channel {channel} out of range (0-7)");
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)?;
        tracing::info!(channel, "mcp3008 initialised");
        Ok(Self { spi, channel })
    }

    /// Moisture fraction; the sensor reads high when dry, so it is inverted.
    pub fn read(&mut self) -> Result<f64> {
        // Start bit, single-ended + channel in the high nibble, then clock out.
        let tx = [0x01, (0x08 | self.channel) << 4, 0x00];
        let mut rx = [0u8; 3];
        self.spi.transfer(&mut rx, &tx)?;
        let raw = (u16::from(rx[1] & 0x03) << 8) | u16::from(rx[2]);
        Ok(1.0 - f64::from(raw) / MCP3008_MAX)
    }

    /// The real soil answers for itself.
    pub fn set_pump(&mut self, _speed: f64) {}
}

// ---------------------------------------------------------------------------
// Simulated probe (development)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct Probe {
    sim: MoistureSim,
}

#[cfg(not(feature = "gpio"))]
impl Probe {
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Result<Self> {
        tracing::info!(%scenario, diurnal_period_s, "simulated probe initialised");
        Ok(Self {
            sim: MoistureSim::new(scenario, diurnal_period_s),
        })
    }

    pub fn read(&mut self) -> Result<f64> {
        Ok(self.sim.sample())
    }

    /// Feed the motor state into the simulated soil.
    pub fn set_pump(&mut self, speed: f64) {
        self.sim.set_pump(speed);
    }
}

#[cfg(all(test, not(feature = "gpio")))]
mod tests {
    use super::*;

    #[test]
    fn simulated_probe_reads_fractions() {
        let mut probe = Probe::new(Scenario::Stable, 600.0).unwrap();
        for _ in 0..50 {
            let v = probe.read().unwrap();
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn pump_state_reaches_simulator() {
        let mut probe = Probe::new(Scenario::Drying, 86_400.0).unwrap();
        probe.set_pump(0.5);
        assert!(probe.sim.pumping());
        probe.set_pump(0.0);
        assert!(!probe.sim.pumping());
    }
}
