mod client;
mod config;
mod controls;
mod policy;
mod sampler;
mod series;
mod state;
mod web;
mod window;

use anyhow::{Context, Result};
use std::{env, sync::Arc};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use client::HttpDevice;
use policy::Cooldown;
use sampler::{Sampler, SamplerConfig};
use state::SystemState;
use window::SampleWindow;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file + env overrides ─────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "hydro.toml".to_string());
    let cfg = config::load_with_env(&config_path)?;

    // ── Device client ───────────────────────────────────────────────
    let device = HttpDevice::new(&cfg.device.base_url, cfg.request_timeout())
        .context("building device http client")?;
    info!(
        base_url = device.base_url(),
        period_ms = cfg.sampling.period_ms,
        auto_irrigate = cfg.policy.auto_irrigate,
        "monitor configured"
    );
    if !cfg.policy.auto_irrigate {
        warn!("auto irrigation disabled; pump runs on manual pulses only");
    }

    // ── Shared state ────────────────────────────────────────────────
    let now = OffsetDateTime::now_utc();
    let shared = Arc::new(RwLock::new(SystemState::new(
        SampleWindow::seeded(cfg.retention(), now),
        Cooldown::new(now, cfg.check_interval()),
    )));
    shared.write().await.record_system("monitor started".to_string());

    let controls = controls::shared(cfg.initial_controls());

    // ── Sampling loop ───────────────────────────────────────────────
    let device_arc = Arc::new(device.clone());
    let sampler = Sampler::new(
        device_arc.clone(),
        device_arc.clone(),
        Arc::clone(&shared),
        Arc::clone(&controls),
        SamplerConfig {
            period: cfg.sampling_period(),
            max_in_flight_reads: cfg.sampling.max_in_flight_reads,
            auto_pulse: cfg.auto_pulse(),
        },
    )
    .spawn();

    // ── Operator API ────────────────────────────────────────────────
    let app = web::AppState {
        shared: Arc::clone(&shared),
        controls,
        actuator: device_arc,
        device,
    };
    let served = web::serve(app, cfg.web.port, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c; running until killed");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    })
    .await;

    sampler.shutdown().await;
    info!("monitor stopped");
    served
}
