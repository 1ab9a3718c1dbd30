//! HTTP clients for the remote sensor/pump device.
//!
//! The sampling loop only sees the `SensorClient` / `ActuatorClient` traits;
//! `HttpDevice` implements both against the device's REST surface and also
//! forwards the schedule endpoints untouched.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

use crate::window::Sample;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor unreachable: {0}")]
    Unreachable(String),
    #[error("bad sensor response: {0}")]
    BadResponse(String),
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("pump unreachable: {0}")]
    Unreachable(String),
    #[error("pump command rejected (status {0})")]
    Rejected(u16),
}

#[derive(Debug, Error)]
#[error("device unreachable: {0}")]
pub struct ForwardError(pub String);

// ---------------------------------------------------------------------------
// Seams used by the sampling loop
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SensorClient: Send + Sync {
    async fn read(&self) -> Result<Sample, SensorError>;
}

/// Delivers one pump command. Calls are independent; the device owns the
/// timing once a command is accepted.
#[async_trait]
pub trait ActuatorClient: Send + Sync {
    async fn run_pump(&self, speed: f64, duration_secs: f64) -> Result<(), ActuatorError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MoistureBody {
    value: f64,
}

/// A relayed device response.
#[derive(Debug)]
pub struct Forwarded {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Clone)]
pub struct HttpDevice {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpDevice {
    /// `base_url` is the API root, e.g. `http://localhost:5000/api`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn moisture_url(&self) -> String {
        format!("{}/moisture", self.base_url)
    }

    pub(crate) fn pump_url(&self, speed: f64, duration_secs: f64) -> String {
        format!("{}/pump/{speed}/{duration_secs}", self.base_url)
    }

    /// The device answers a pump command only after the run finishes.
    pub(crate) fn pump_timeout(&self, duration_secs: f64) -> Duration {
        self.timeout + Duration::try_from_secs_f64(duration_secs).unwrap_or_default()
    }

    /// Send `method {base}/{path}` with an optional JSON body and hand back
    /// whatever the device answered. The body is passed through unparsed.
    /// Only transport failures are errors.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Forwarded, ForwardError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut req = self.client.request(method, &url);
        if let Some(bytes) = body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes);
        }

        let resp = req.send().await.map_err(|e| ForwardError(describe(&e)))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(|e| ForwardError(describe(&e)))?
            .to_vec();

        Ok(Forwarded {
            status,
            content_type,
            body,
        })
    }
}

/// The error and its sources, `outer: inner: ...`. reqwest's own message
/// only names the URL; the cause sits further down the chain.
fn describe(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

#[async_trait]
impl SensorClient for HttpDevice {
    async fn read(&self) -> Result<Sample, SensorError> {
        let resp = self
            .client
            .get(self.moisture_url())
            .send()
            .await
            .map_err(|e| SensorError::Unreachable(describe(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SensorError::BadResponse(format!("status {}", status.as_u16())));
        }

        let body: MoistureBody = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                SensorError::Unreachable(describe(&e))
            } else {
                SensorError::BadResponse(describe(&e))
            }
        })?;
        if !body.value.is_finite() {
            return Err(SensorError::BadResponse(format!(
                "non-finite value {}",
                body.value
            )));
        }

        Ok(Sample::new(body.value, OffsetDateTime::now_utc()))
    }
}

#[async_trait]
impl ActuatorClient for HttpDevice {
    async fn run_pump(&self, speed: f64, duration_secs: f64) -> Result<(), ActuatorError> {
        let resp = self
            .client
            .get(self.pump_url(speed, duration_secs))
            .timeout(self.pump_timeout(duration_secs))
            .send()
            .await
            .map_err(|e| ActuatorError::Unreachable(describe(&e)))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ActuatorError::Rejected(status.as_u16()))
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
