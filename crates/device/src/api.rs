use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::motor::PumpMotor;
use crate::probe::Probe;
use crate::schedules::{ScheduleError, ScheduleInput, SharedSchedules};

/// Hardware (or its stand-ins) plus the schedule store.
#[derive(Clone)]
pub struct Device {
    pub probe: Arc<Mutex<Probe>>,
    pub motor: Arc<Mutex<PumpMotor>>,
    pub schedules: SharedSchedules,
}

impl Device {
    pub fn new(probe: Probe, motor: PumpMotor, schedules: SharedSchedules) -> Self {
        Self {
            probe: Arc::new(Mutex::new(probe)),
            motor: Arc::new(Mutex::new(motor)),
            schedules,
        }
    }

    /// Run the pump for `duration`, then stop it. Runs on its own task so a
    /// caller that goes away mid-run cannot leave the motor on. Overlapping
    /// commands queue on the motor lock.
    pub async fn run_pump(&self, speed: f64, duration: Duration) -> anyhow::Result<()> {
        let device = self.clone();
        tokio::spawn(async move {
            let mut motor = device.motor.lock().await;
            motor.run(speed)?;
            device.probe.lock().await.set_pump(speed);

            sleep(duration).await;

            motor.stop();
            device.probe.lock().await.set_pump(0.0);
            Ok::<(), anyhow::Error>(())
        })
        .await?
    }
}

impl IntoResponse for ScheduleError {
    fn into_response(self) -> Response {
        let status = match self {
            ScheduleError::NotFound(_) => StatusCode::NOT_FOUND,
            ScheduleError::Invalid(_) => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

fn internal_error(e: anyhow::Error) -> Response {
    error!(error = %e, "device error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("{e:#}") })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(device: Device) -> Router {
    Router::new()
        .route("/api/moisture", get(get_moisture))
        .route("/api/pump/{speed}/{duration}", get(run_pump).post(run_pump))
        .route("/api/schedules", get(list_schedules).post(create_schedule))
        .route(
            "/api/schedules/{id}",
            get(get_schedule)
                .put(update_schedule)
                .delete(delete_schedule),
        )
        .route("/api/schedules/{id}/activate", put(activate_schedule))
        .route("/api/schedules/{id}/deactivate", put(deactivate_schedule))
        .route("/api/schedules/{id}/trigger", post(trigger_schedule))
        .with_state(device)
}

async fn get_moisture(State(device): State<Device>) -> Response {
    match device.probe.lock().await.read() {
        Ok(value) => Json(json!({ "value": value })).into_response(),
        Err(e) => internal_error(e),
    }
}

/// Longest run a single pump command may ask for.
pub const MAX_PULSE_SECS: f64 = 5.0;

fn parse_pump_args(speed: &str, duration: &str) -> Result<(f64, Duration), String> {
    let speed: f64 = speed
        .parse()
        .map_err(|_| format!("bad speed '{speed}'"))?;
    if !speed.is_finite() {
        return Err(format!("bad speed '{speed}'"));
    }
    let secs: f64 = duration
        .parse()
        .map_err(|_| format!("bad duration '{duration}'"))?;
    if !(0.0..=MAX_PULSE_SECS).contains(&secs) {
        return Err(format!("duration {secs} out of range [0, {MAX_PULSE_SECS}]"));
    }
    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("bad duration '{secs}'"))?;
    Ok((speed.clamp(-1.0, 1.0), duration))
}

async fn run_pump(
    State(device): State<Device>,
    Path((speed, duration)): Path<(String, String)>,
) -> Response {
    let (speed, duration) = match parse_pump_args(&speed, &duration) {
        Ok(args) => args,
        Err(msg) => {
            warn!(%msg, "rejected pump command");
            return (StatusCode::BAD_REQUEST, msg).into_response();
        }
    };

    info!(speed, duration_secs = duration.as_secs_f64(), "running pump");
    match device.run_pump(speed, duration).await {
        Ok(()) => format!(
            "Pump ran for {} seconds at speed {speed}",
            duration.as_secs_f64()
        )
        .into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

async fn list_schedules(State(device): State<Device>) -> impl IntoResponse {
    Json(device.schedules.read().await.all().to_vec())
}

async fn get_schedule(
    State(device): State<Device>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ScheduleError> {
    let store = device.schedules.read().await;
    Ok(Json(store.get(&id)?.clone()))
}

async fn create_schedule(
    State(device): State<Device>,
    Json(input): Json<ScheduleInput>,
) -> Result<impl IntoResponse, ScheduleError> {
    let schedule = device.schedules.write().await.create(input)?;
    info!(id = %schedule.id, plant = %schedule.plant_name, "schedule created");
    Ok((StatusCode::CREATED, Json(schedule)))
}

async fn update_schedule(
    State(device): State<Device>,
    Path(id): Path<String>,
    Json(input): Json<ScheduleInput>,
) -> Result<impl IntoResponse, ScheduleError> {
    let schedule = device.schedules.write().await.update(&id, input)?;
    info!(%id, "schedule updated");
    Ok(Json(schedule))
}

async fn delete_schedule(
    State(device): State<Device>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ScheduleError> {
    device.schedules.write().await.delete(&id)?;
    info!(%id, "schedule deleted");
    Ok(Json(json!({ "success": true })))
}

async fn activate_schedule(
    State(device): State<Device>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ScheduleError> {
    device.schedules.write().await.set_active(&id, true)?;
    Ok(Json(json!({ "success": true })))
}

async fn deactivate_schedule(
    State(device): State<Device>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ScheduleError> {
    device.schedules.write().await.set_active(&id, false)?;
    Ok(Json(json!({ "success": true })))
}

/// Water now at full speed for the schedule's pump duration.
async fn trigger_schedule(State(device): State<Device>, Path(id): Path<String>) -> Response {
    let secs = match device.schedules.read().await.get(&id) {
        Ok(s) => s.pump_duration_seconds,
        Err(e) => return e.into_response(),
    };

    info!(%id, duration_secs = secs, "schedule triggered");
    if let Err(e) = device.run_pump(1.0, Duration::from_secs(u64::from(secs))).await {
        return internal_error(e);
    }

    // The schedule may have been deleted while the pump ran.
    match device
        .schedules
        .write()
        .await
        .record_watering(&id, OffsetDateTime::now_utc())
    {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => e.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(device: Device, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("device api listening on http://{addr}");

    axum::serve(listener, router(device)).await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
