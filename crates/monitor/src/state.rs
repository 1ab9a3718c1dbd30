use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::controls::Controls;
use crate::policy::Cooldown;
use crate::window::{Sample, SampleWindow};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Everything the sampling loop mutates. The window and the cooldown live
/// under the same lock so a policy evaluation never overlaps an append.
pub struct SystemState {
    pub started_at: Instant,
    pub sensor_connected: bool,
    pub window: SampleWindow,
    pub cooldown: Cooldown,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Pump,
    Policy,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub sensor_connected: bool,
    pub latest: Option<Sample>,
    pub window_len: usize,
    pub retention_secs: i64,
    pub controls: Controls,
    pub cooldown: Cooldown,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(window: SampleWindow, cooldown: Cooldown) -> Self {
        Self {
            started_at: Instant::now(),
            sensor_connected: false,
            window,
            cooldown,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Track sensor reachability. Only transitions produce an event, so a
    /// device that is down for an hour does not flood the log. Returns
    /// whether the state changed.
    pub fn set_sensor_connected(&mut self, connected: bool, detail: impl FnOnce() -> String) -> bool {
        if self.sensor_connected == connected {
            return false;
        }
        self.sensor_connected = connected;
        let kind = if connected {
            EventKind::System
        } else {
            EventKind::Error
        };
        self.push_event(kind, detail());
        true
    }

    pub fn record_pump(&mut self, detail: String) {
        self.push_event(EventKind::Pump, detail);
    }

    pub fn record_policy(&mut self, detail: String) {
        self.push_event(EventKind::Policy, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self, controls: Controls) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            sensor_connected: self.sensor_connected,
            latest: self.window.latest().ok().copied(),
            window_len: self.window.len(),
            retention_secs: self.window.retention().whole_seconds(),
            controls,
            cooldown: self.cooldown,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
