mod api;
mod motor;
mod probe;
mod schedules;
#[cfg(not(feature = "gpio"))]
mod sim;
mod worker;

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use motor::PumpMotor;
use probe::Probe;
use schedules::ScheduleStore;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(feature = "gpio")]
fn open_probe() -> Result<Probe> {
    Probe::new(env_or("MCP3008_CHANNEL", 0u8))
}

#[cfg(not(feature = "gpio"))]
fn open_probe() -> Result<Probe> {
    let scenario = sim::Scenario::from_str_lossy(
        &env::var("SIM_SCENARIO").unwrap_or_else(|_| "drying".to_string()),
    );
    Probe::new(scenario, env_or("SIM_DIURNAL_PERIOD_S", 600.0))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port: u16 = env_or("DEVICE_PORT", 5000);

    let probe = open_probe().context("opening moisture probe")?;
    let motor = PumpMotor::new().context("opening pump motor")?;
    let device = api::Device::new(probe, motor, ScheduleStore::shared());

    // Short priming run at startup, as on a freshly booted Pi.
    device
        .run_pump(1.0, Duration::from_secs(1))
        .await
        .context("priming pump")?;

    let worker_period = Duration::from_secs(env_or(
        "HYDRO_WORKER_INTERVAL",
        worker::DEFAULT_INTERVAL_SEC,
    ));
    tokio::spawn(worker::run(device.clone(), worker_period));

    api::serve(device, port).await
}
