//! Schedule worker: on every tick, waters each active schedule whose time
//! slot is due or whose soil has dried below its threshold, then stamps
//! `last_watered`.
//!
//! Schedule times and weekdays are read in UTC.

use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::Device;
use crate::schedules::{Schedule, TimeOfDay};

/// Default seconds between two passes over the schedules.
pub const DEFAULT_INTERVAL_SEC: u64 = 15;

const MIN_INTERVAL: StdDuration = StdDuration::from_secs(1);

/// How close to a slot the clock must be for the slot to fire.
const SLOT_WINDOW: Duration = Duration::seconds(60);

/// A slot does not fire again while a watering this recent is on record.
/// Covers the whole window around a slot.
const SLOT_REFIRE_GUARD: Duration = Duration::seconds(120);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reason {
    ScheduledTime(TimeOfDay),
    LowMoisture { percent: f64, threshold: f64 },
}

/// Whether `schedule` should water at `now`. `moisture_pct` is the current
/// reading in percent, if one was taken.
pub fn should_water(
    schedule: &Schedule,
    now: OffsetDateTime,
    moisture_pct: Option<f64>,
) -> Option<Reason> {
    if !schedule.active {
        return None;
    }

    let watered_within = |span: Duration| schedule.last_watered.is_some_and(|t| now - t < span);

    let today = now.weekday().number_days_from_monday();
    if schedule.days_of_week.contains(&today) && !watered_within(SLOT_REFIRE_GUARD) {
        let clock = now.time();
        if let Some(slot) = schedule
            .schedule_times
            .iter()
            .find(|slot| (clock - slot.0).abs() < SLOT_WINDOW)
        {
            return Some(Reason::ScheduledTime(*slot));
        }
    }

    if let (Some(threshold), Some(percent)) = (schedule.moisture_threshold, moisture_pct) {
        let cooldown = Duration::minutes(i64::from(schedule.check_interval_minutes));
        if percent < threshold && !watered_within(cooldown) {
            return Some(Reason::LowMoisture { percent, threshold });
        }
    }

    None
}

/// Run the worker forever. Intended to be `tokio::spawn`-ed from main.
pub async fn run(device: Device, period: StdDuration) {
    let period = period.max(MIN_INTERVAL);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(period_sec = period.as_secs_f64(), "schedule worker started");

    loop {
        ticker.tick().await;
        tick(&device, OffsetDateTime::now_utc()).await;
    }
}

/// One pass over the schedules. Returns how many were watered.
async fn tick(device: &Device, now: OffsetDateTime) -> usize {
    let active: Vec<Schedule> = {
        let store = device.schedules.read().await;
        store.all().iter().filter(|s| s.active).cloned().collect()
    };
    if active.is_empty() {
        return 0;
    }

    let moisture_pct = if active.iter().any(|s| s.moisture_threshold.is_some()) {
        match device.probe.lock().await.read() {
            Ok(fraction) => Some(fraction * 100.0),
            Err(e) => {
                warn!(error = %e, "schedule worker: moisture read failed");
                None
            }
        }
    } else {
        None
    };

    let mut watered = 0;
    for schedule in &active {
        let Some(reason) = should_water(schedule, now, moisture_pct) else {
            continue;
        };
        info!(
            id = %schedule.id,
            plant = %schedule.plant_name,
            ?reason,
            duration_secs = schedule.pump_duration_seconds,
            "watering"
        );

        let duration = StdDuration::from_secs(u64::from(schedule.pump_duration_seconds));
        if let Err(e) = device.run_pump(1.0, duration).await {
            warn!(id = %schedule.id, error = %e, "schedule worker: pump failed");
            continue;
        }
        if let Err(e) = device.schedules.write().await.record_watering(&schedule.id, now) {
            debug!(id = %schedule.id, error = %e, "schedule gone before watering was recorded");
        }
        watered += 1;
    }
    watered
}

// ===========================================================================
// Tests
// ===========================================================================
