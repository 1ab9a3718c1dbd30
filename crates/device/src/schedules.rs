//! In-memory watering schedule store. Schedules are kept in creation order
//! and lost on restart.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;
use thiserror::Error;
use time::macros::format_description;
use time::{OffsetDateTime, Time};
use tokio::sync::RwLock;

pub type SharedSchedules = Arc<RwLock<ScheduleStore>>;

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("schedule {0} not found")]
    NotFound(String),
    #[error("invalid schedule: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Time of day as "HH:MM"
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay(pub Time);

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = self
            .0
            .format(format_description!("[hour]:[minute]"))
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&s)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Time::parse(&s, format_description!("[hour]:[minute]"))
            .map(TimeOfDay)
            .map_err(|e| serde::de::Error::custom(format!("bad time of day '{s}': {e}")))
    }
}

// ---------------------------------------------------------------------------
// Schedule types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schedule {
    pub id: String,
    pub plant_name: String,
    pub active: bool,
    pub schedule_times: Vec<TimeOfDay>,
    /// 0 = Monday … 6 = Sunday.
    pub days_of_week: Vec<u8>,
    pub moisture_threshold: Option<f64>,
    pub check_interval_minutes: u32,
    pub pump_duration_seconds: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_watered: Option<OffsetDateTime>,
}

/// Body of a create or update. Any `id` sent by the client is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleInput {
    pub plant_name: String,
    pub active: bool,
    pub schedule_times: Vec<TimeOfDay>,
    pub days_of_week: Vec<u8>,
    pub moisture_threshold: Option<f64>,
    pub check_interval_minutes: u32,
    pub pump_duration_seconds: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_watered: Option<OffsetDateTime>,
}

impl Default for ScheduleInput {
    fn default() -> Self {
        Self {
            plant_name: String::new(),
            active: true,
            schedule_times: Vec::new(),
            days_of_week: (0..7).collect(),
            moisture_threshold: None,
            check_interval_minutes: 30,
            pump_duration_seconds: 5,
            last_watered: None,
        }
    }
}

impl ScheduleInput {
    fn validate(&self) -> Result<(), ScheduleError> {
        let mut errors = Vec::new();
        if let Some(d) = self.days_of_week.iter().find(|&&d| d > 6) {
            errors.push(format!("day_of_week {d} out of range [0, 6]"));
        }
        if let Some(t) = self.moisture_threshold {
            if !(0.0..=100.0).contains(&t) {
                errors.push(format!("moisture_threshold {t} out of range [0, 100]"));
            }
        }
        if self.check_interval_minutes == 0 {
            errors.push("check_interval_minutes must be > 0".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ScheduleError::Invalid(errors.join("; ")))
        }
    }

    fn into_schedule(self, id: String) -> Schedule {
        Schedule {
            id,
            plant_name: self.plant_name,
            active: self.active,
            schedule_times: self.schedule_times,
            days_of_week: self.days_of_week,
            moisture_threshold: self.moisture_threshold,
            check_interval_minutes: self.check_interval_minutes,
            pump_duration_seconds: self.pump_duration_seconds,
            last_watered: self.last_watered,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ScheduleStore {
    schedules: Vec<Schedule>,
}

impl ScheduleStore {
    pub fn shared() -> SharedSchedules {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn all(&self) -> &[Schedule] {
        &self.schedules
    }

    pub fn get(&self, id: &str) -> Result<&Schedule, ScheduleError> {
        self.schedules
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Schedule, ScheduleError> {
        self.schedules
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ScheduleError::NotFound(id.to_string()))
    }

    pub fn create(&mut self, input: ScheduleInput) -> Result<Schedule, ScheduleError> {
        input.validate()?;
        let schedule = input.into_schedule(uuid::Uuid::new_v4().to_string());
        self.schedules.push(schedule.clone());
        Ok(schedule)
    }

    /// Replace every field but the id. A missing `last_watered` keeps the
    /// stored one.
    pub fn update(&mut self, id: &str, input: ScheduleInput) -> Result<Schedule, ScheduleError> {
        input.validate()?;
        let slot = self.get_mut(id)?;
        let last_watered = input.last_watered.or(slot.last_watered);
        *slot = input.into_schedule(id.to_string());
        slot.last_watered = last_watered;
        Ok(slot.clone())
    }

    pub fn delete(&mut self, id: &str) -> Result<(), ScheduleError> {
        let before = self.schedules.len();
        self.schedules.retain(|s| s.id != id);
        if self.schedules.len() == before {
            return Err(ScheduleError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_active(&mut self, id: &str, active: bool) -> Result<(), ScheduleError> {
        self.get_mut(id)?.active = active;
        Ok(())
    }

    pub fn record_watering(&mut self, id: &str, at: OffsetDateTime) -> Result<(), ScheduleError> {
        self.get_mut(id)?.last_watered = Some(at);
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
