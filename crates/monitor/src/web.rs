use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::client::{ActuatorClient, HttpDevice};
use crate::controls::{self, ControlsPatch, SharedControls};
use crate::policy::Pulse;
use crate::series;
use crate::state::SharedState;

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub controls: SharedControls,
    pub actuator: Arc<dyn ActuatorClient>,
    pub device: HttpDevice,
}

/// Optional per-request override for a manual pulse.
#[derive(Debug, Default, Deserialize)]
struct PulseRequest {
    speed: Option<f64>,
    pulse_sec: Option<f64>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/series", get(api_series))
        .route("/api/controls", get(get_controls).put(put_controls))
        .route("/api/pump", post(api_pump))
        .route("/api/schedules", any(forward_schedules))
        .route("/api/schedules/{*rest}", any(forward_schedules))
        .with_state(app)
}

fn error_response(status: StatusCode, msg: String) -> Response {
    (status, Json(json!({ "error": msg }))).into_response()
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let controls = *app.controls.read().await;
    let st = app.shared.read().await;
    Json(st.to_status(controls))
}

async fn api_series(State(app): State<AppState>) -> impl IntoResponse {
    let threshold = app.controls.read().await.threshold;
    let st = app.shared.read().await;
    Json(series::build(&st.window, threshold, OffsetDateTime::now_utc()))
}

async fn get_controls(State(app): State<AppState>) -> impl IntoResponse {
    Json(*app.controls.read().await)
}

async fn put_controls(State(app): State<AppState>, Json(patch): Json<ControlsPatch>) -> Response {
    match controls::apply_patch(&app.controls, &patch).await {
        Ok(next) => {
            info!(
                speed = next.speed,
                pulse_sec = next.pulse_sec,
                threshold = next.threshold,
                auto_irrigate = next.auto_irrigate,
                "controls updated"
            );
            app.shared.write().await.record_system(format!(
                "controls: speed {} pulse {}s threshold {:.3} auto {}",
                next.speed, next.pulse_sec, next.threshold, next.auto_irrigate
            ));
            Json(next).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, format!("{e:#}")),
    }
}

/// Manual pulse with the live speed/duration, or with the body's override.
/// Device failures are reported to the operator; sampling is unaffected.
async fn api_pump(State(app): State<AppState>, body: Bytes) -> Response {
    let req: PulseRequest = if body.is_empty() {
        PulseRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("bad pulse body: {e}")),
        }
    };

    let current = *app.controls.read().await;
    let effective = match current.patched(&ControlsPatch {
        speed: req.speed,
        pulse_sec: req.pulse_sec,
        ..Default::default()
    }) {
        Ok(c) => c,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("{e:#}")),
    };
    let pulse = Pulse {
        speed: effective.speed,
        duration_secs: effective.pulse_sec,
    };

    match app.actuator.run_pump(pulse.speed, pulse.duration_secs).await {
        Ok(()) => {
            info!(speed = pulse.speed, duration_secs = pulse.duration_secs, "manual pulse sent");
            app.shared.write().await.record_pump(format!(
                "manual pulse {}s at {}",
                pulse.duration_secs, pulse.speed
            ));
            Json(json!({ "ok": true, "pulse": pulse })).into_response()
        }
        Err(e) => {
            warn!(error = %e, "manual pulse failed");
            app.shared
                .write()
                .await
                .record_error(format!("manual pulse failed: {e}"));
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// Relay `/api/schedules…` to the device verbatim.
async fn forward_schedules(
    State(app): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let path = path.strip_prefix("/api").unwrap_or(path);
    let body = (!body.is_empty()).then(|| body.to_vec());

    match app.device.forward(method, path, body).await {
        Ok(fwd) => {
            let status = StatusCode::from_u16(fwd.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut resp = Response::builder().status(status);
            if let Some(ct) = fwd.content_type {
                resp = resp.header(header::CONTENT_TYPE, ct);
            }
            resp.body(Body::from(fwd.body))
                .unwrap_or_else(|e| error_response(StatusCode::BAD_GATEWAY, e.to_string()))
        }
        Err(e) => {
            warn!(error = %e, "schedule forward failed");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve<F>(app: AppState, port: u16, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("operator api listening on http://{addr}");

    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
