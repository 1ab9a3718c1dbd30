//! Sampling loop: reads the sensor on a fixed period, feeds the rolling
//! window and runs the auto-irrigation policy after every successful append.
//!
//! ```text
//! tick ──▶ spawn read ──▶ Ok(sample) ──▶ append ──▶ evaluate ──▶ Fire? ──▶ spawn pump
//!                    └──▶ Err(e)     ──▶ log, window untouched
//! ```
//!
//! Ticks are not serialized on network latency: each firing spawns its own
//! read, and reads are applied in completion order. A semaphore caps how
//! many reads may be outstanding so a slow device cannot pile up requests;
//! a tick that finds no free permit is dropped.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::client::{ActuatorClient, SensorClient};
use crate::controls::SharedControls;
use crate::policy::{self, Decision, Pulse};
use crate::state::{SharedState, SystemState};

#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    pub period: Duration,
    pub max_in_flight_reads: usize,
    pub auto_pulse: Pulse,
}

pub struct Sampler {
    sensor: Arc<dyn SensorClient>,
    actuator: Arc<dyn ActuatorClient>,
    shared: SharedState,
    controls: SharedControls,
    cfg: SamplerConfig,
}

/// Owner of a running sampler. Dropping it without calling `shutdown` also
/// stops the ticker, but gives no guarantee about in-flight reads.
pub struct SamplerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    shared: SharedState,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

impl Sampler {
    pub fn new(
        sensor: Arc<dyn SensorClient>,
        actuator: Arc<dyn ActuatorClient>,
        shared: SharedState,
        controls: SharedControls,
        cfg: SamplerConfig,
    ) -> Self {
        Self {
            sensor,
            actuator,
            shared,
            controls,
            cfg,
        }
    }

    /// Start ticking on the current runtime.
    pub fn spawn(self) -> SamplerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(Arc::new(self).run(shutdown_rx));
        SamplerHandle {
            shutdown_tx,
            task,
            shared,
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let permits = Arc::new(Semaphore::new(self.cfg.max_in_flight_reads));
        let mut ticker = interval(self.cfg.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            period_ms = self.cfg.period.as_millis() as u64,
            max_in_flight = self.cfg.max_in_flight_reads,
            "sampler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let permit = match Arc::clone(&permits).try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    debug!("sensor reads still in flight, skipping tick");
                    continue;
                }
            };

            let this = Arc::clone(&self);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                this.sample_once(&shutdown).await;
                drop(permit);
            });
        }
    }

    // -----------------------------------------------------------------------
    // One tick
    // -----------------------------------------------------------------------

    async fn sample_once(&self, shutdown: &watch::Receiver<bool>) {
        let result = self.sensor.read().await;
        let controls = *self.controls.read().await;

        let mut st = self.shared.write().await;
        // Checked under the write lock; `SamplerHandle::shutdown` takes the
        // same lock after flipping the flag.
        if *shutdown.borrow() {
            debug!("discarding sensor read completed after shutdown");
            return;
        }

        let sample = match result {
            Ok(sample) => sample,
            Err(e) => {
                debug!(error = %e, "sensor read failed");
                if st.set_sensor_connected(false, || format!("sensor read failed: {e}")) {
                    warn!(error = %e, "sensor unreachable");
                }
                return;
            }
        };

        if st.set_sensor_connected(true, || "sensor reachable".to_string()) {
            info!(value = sample.value, "sensor reachable");
        }

        let now = OffsetDateTime::now_utc();
        st.window.append(sample, now);

        if controls.auto_irrigate {
            self.check_policy(&mut st, controls.threshold, now);
        }
    }

    /// Evaluate the policy against the window just appended to. Runs under
    /// the state write lock and only reads the window.
    fn check_policy(&self, st: &mut SystemState, threshold: f64, now: OffsetDateTime) {
        let SystemState {
            window, cooldown, ..
        } = &mut *st;

        let decision = match policy::evaluate(window, threshold, self.cfg.auto_pulse, cooldown, now) {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "policy evaluated against an empty window");
                return;
            }
        };

        if let Decision::Fire(pulse) = decision {
            let value = st.window.latest().map(|s| s.value).unwrap_or_default();
            info!(
                moisture = format!("{value:.3}"),
                threshold = format!("{threshold:.3}"),
                speed = pulse.speed,
                duration_secs = pulse.duration_secs,
                "policy: moisture below threshold, pulsing pump"
            );
            st.record_policy(format!(
                "moisture {value:.3} < threshold {threshold:.3}, auto pulse {}s at {}",
                pulse.duration_secs, pulse.speed
            ));
            self.spawn_auto_pulse(pulse);
        }
    }

    /// Send the auto pulse without holding any lock. Failures are logged
    /// only; the next policy evaluation is the retry.
    fn spawn_auto_pulse(&self, pulse: Pulse) {
        let actuator = Arc::clone(&self.actuator);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            match actuator.run_pump(pulse.speed, pulse.duration_secs).await {
                Ok(()) => {
                    shared.write().await.record_pump(format!(
                        "auto pulse {}s at {} accepted",
                        pulse.duration_secs, pulse.speed
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "auto pulse failed");
                    shared
                        .write()
                        .await
                        .record_error(format!("auto pulse failed: {e}"));
                }
            }
        });
    }
}

impl SamplerHandle {
    /// Stop ticking and wait until no read can touch the window any more.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "sampler task ended abnormally");
        }
        // Barrier: a read that saw the flag unset under the lock has finished
        // appending by the time we get the lock; later ones see it set.
        let mut st = self.shared.write().await;
        st.record_system("sampler stopped".to_string());
        info!("sampler stopped");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ActuatorError, SensorError};
    use crate::controls::{self, Controls, ControlsPatch};
    use crate::policy::{Cooldown, DEFAULT_CHECK_INTERVAL};
    use crate::window::{Sample, SampleWindow, DEFAULT_RETENTION};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::RwLock;
    use tokio::time::sleep;

    // -- Fakes --------------------------------------------------------------

    /// Scripted sensor: pops values from `script`, then repeats `fallback`.
    /// `None` means the read times out.
    struct FakeSensor {
        script: Mutex<VecDeque<Option<f64>>>,
        fallback: Option<f64>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeSensor {
        fn new(script: Vec<Option<f64>>, fallback: Option<f64>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                delay,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn constant(value: f64) -> Arc<Self> {
            Self::new(vec![], Some(value), Duration::ZERO)
        }
    }

    #[async_trait]
    impl SensorClient for FakeSensor {
        async fn read(&self) -> Result<Sample, SensorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let next = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
            match next {
                Some(v) => Ok(Sample::new(v, OffsetDateTime::now_utc())),
                None => Err(SensorError::Unreachable("operation timed out".into())),
            }
        }
    }

    #[derive(Default)]
    struct FakeActuator {
        calls: Mutex<Vec<(f64, f64)>>,
        fail: bool,
    }

    #[async_trait]
    impl ActuatorClient for FakeActuator {
        async fn run_pump(&self, speed: f64, duration_secs: f64) -> Result<(), ActuatorError> {
            self.calls.lock().unwrap().push((speed, duration_secs));
            if self.fail {
                Err(ActuatorError::Unreachable("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    // -- Helpers ------------------------------------------------------------

    fn test_shared(cooldown: Cooldown) -> SharedState {
        let now = OffsetDateTime::now_utc();
        Arc::new(RwLock::new(SystemState::new(
            SampleWindow::seeded(DEFAULT_RETENTION, now),
            cooldown,
        )))
    }

    /// Cooldown that will not open during a short test.
    fn closed_cooldown() -> Cooldown {
        Cooldown::new(OffsetDateTime::now_utc(), DEFAULT_CHECK_INTERVAL)
    }

    /// Cooldown that opens on the first evaluation.
    fn expired_cooldown() -> Cooldown {
        Cooldown::new(
            OffsetDateTime::now_utc() - time::Duration::seconds(11),
            DEFAULT_CHECK_INTERVAL,
        )
    }

    fn cfg(period_ms: u64, max_in_flight_reads: usize) -> SamplerConfig {
        SamplerConfig {
            period: Duration::from_millis(period_ms),
            max_in_flight_reads,
            auto_pulse: Pulse::AUTO,
        }
    }

    fn controls_with(threshold: f64, auto_irrigate: bool) -> SharedControls {
        controls::shared(Controls {
            threshold,
            auto_irrigate,
            ..Controls::default()
        })
    }

    // -- Sampling -----------------------------------------------------------

    #[tokio::test]
    async fn successful_reads_are_appended() {
        let sensor = FakeSensor::constant(0.5);
        let shared = test_shared(closed_cooldown());
        let handle = Sampler::new(
            sensor.clone(),
            Arc::new(FakeActuator::default()),
            Arc::clone(&shared),
            controls_with(0.3, true),
            cfg(10, 4),
        )
        .spawn();

        sleep(Duration::from_millis(150)).await;
        handle.shutdown().await;

        let st = shared.read().await;
        assert!(st.window.len() > 2, "window len {}", st.window.len());
        assert_eq!(st.window.latest().unwrap().value, 0.5);
        assert!(st.sensor_connected);
    }

    #[tokio::test]
    async fn failed_reads_leave_window_unchanged_and_ticking_continues() {
        let sensor = FakeSensor::new(vec![], None, Duration::ZERO);
        let shared = test_shared(closed_cooldown());
        let handle = Sampler::new(
            sensor.clone(),
            Arc::new(FakeActuator::default()),
            Arc::clone(&shared),
            controls_with(0.3, true),
            cfg(10, 4),
        )
        .spawn();

        sleep(Duration::from_millis(150)).await;
        handle.shutdown().await;

        assert!(sensor.calls.load(Ordering::SeqCst) >= 3);
        let st = shared.read().await;
        assert_eq!(st.window.len(), 1);
        assert_eq!(st.window.latest().unwrap().value, 0.0);
        assert!(!st.sensor_connected);
    }

    #[tokio::test]
    async fn timeout_then_recovery_appends_next_reads() {
        let sensor = FakeSensor::new(vec![None, None], Some(0.6), Duration::ZERO);
        let shared = test_shared(closed_cooldown());
        let handle = Sampler::new(
            sensor.clone(),
            Arc::new(FakeActuator::default()),
            Arc::clone(&shared),
            controls_with(0.3, true),
            cfg(10, 1),
        )
        .spawn();

        sleep(Duration::from_millis(150)).await;
        handle.shutdown().await;

        let st = shared.read().await;
        assert_eq!(st.window.latest().unwrap().value, 0.6);
        // Starts disconnected, so only the recovery is an event.
        let details: Vec<&str> = st.events.iter().map(|e| e.detail.as_str()).collect();
        assert!(details.iter().any(|d| d.contains("sensor reachable")), "{details:?}");
    }

    #[tokio::test]
    async fn in_flight_reads_are_bounded() {
        let sensor = FakeSensor::new(vec![], Some(0.5), Duration::from_millis(60));
        let shared = test_shared(closed_cooldown());
        let handle = Sampler::new(
            sensor.clone(),
            Arc::new(FakeActuator::default()),
            Arc::clone(&shared),
            controls_with(0.3, true),
            cfg(5, 2),
        )
        .spawn();

        sleep(Duration::from_millis(250)).await;
        handle.shutdown().await;

        let max = sensor.max_in_flight.load(Ordering::SeqCst);
        assert!(max >= 1 && max <= 2, "max in flight {max}");
    }

    #[tokio::test]
    async fn read_completing_after_shutdown_is_discarded() {
        let sensor = FakeSensor::new(vec![], Some(0.9), Duration::from_millis(150));
        let shared = test_shared(closed_cooldown());
        let handle = Sampler::new(
            sensor.clone(),
            Arc::new(FakeActuator::default()),
            Arc::clone(&shared),
            controls_with(0.3, true),
            cfg(10, 1),
        )
        .spawn();

        // First tick fires immediately; its read is now sleeping.
        sleep(Duration::from_millis(30)).await;
        handle.shutdown().await;
        assert_eq!(sensor.calls.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(250)).await;
        let st = shared.read().await;
        assert_eq!(st.window.len(), 1, "late read was applied");
        assert_eq!(st.window.latest().unwrap().value, 0.0);
    }

    // -- Auto irrigation ----------------------------------------------------

    #[tokio::test]
    async fn low_moisture_fires_auto_pulse_once_per_interval() {
        let actuator = Arc::new(FakeActuator::default());
        let shared = test_shared(expired_cooldown());
        let handle = Sampler::new(
            FakeSensor::constant(0.1),
            actuator.clone(),
            Arc::clone(&shared),
            controls_with(0.3, true),
            cfg(10, 4),
        )
        .spawn();

        sleep(Duration::from_millis(200)).await;
        handle.shutdown().await;
        // Let the spawned pump task run.
        sleep(Duration::from_millis(20)).await;

        assert_eq!(actuator.calls.lock().unwrap().as_slice(), &[(1.0, 5.0)]);
        let st = shared.read().await;
        assert!(st.events.iter().any(|e| e.detail.contains("auto pulse 5s at 1 accepted")));
    }

    #[tokio::test]
    async fn moisture_above_threshold_does_not_fire() {
        let actuator = Arc::new(FakeActuator::default());
        let handle = Sampler::new(
            FakeSensor::constant(0.4),
            actuator.clone(),
            test_shared(expired_cooldown()),
            controls_with(0.3, true),
            cfg(10, 4),
        )
        .spawn();

        sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert!(actuator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn auto_irrigation_disabled_never_fires() {
        let actuator = Arc::new(FakeActuator::default());
        let shared = test_shared(expired_cooldown());
        let handle = Sampler::new(
            FakeSensor::constant(0.05),
            actuator.clone(),
            Arc::clone(&shared),
            controls_with(0.3, false),
            cfg(10, 4),
        )
        .spawn();

        sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert!(actuator.calls.lock().unwrap().is_empty());
        // Gate never evaluated, so the cooldown was not consumed either.
        assert!(OffsetDateTime::now_utc() - shared.read().await.cooldown.last_check > time::Duration::seconds(10));
    }

    #[tokio::test]
    async fn threshold_changes_are_picked_up_live() {
        let actuator = Arc::new(FakeActuator::default());
        let controls = controls_with(0.05, true);
        let short = Cooldown::new(OffsetDateTime::now_utc(), time::Duration::milliseconds(20));
        let handle = Sampler::new(
            FakeSensor::constant(0.2),
            actuator.clone(),
            test_shared(short),
            Arc::clone(&controls),
            cfg(10, 4),
        )
        .spawn();

        sleep(Duration::from_millis(100)).await;
        assert!(actuator.calls.lock().unwrap().is_empty());

        controls::apply_patch(
            &controls,
            &ControlsPatch {
                threshold: Some(0.5),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;
        sleep(Duration::from_millis(20)).await;

        assert!(!actuator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn auto_pulse_failure_is_recorded_and_loop_keeps_running() {
        let actuator = Arc::new(FakeActuator {
            fail: true,
            ..Default::default()
        });
        let sensor = FakeSensor::constant(0.1);
        let shared = test_shared(expired_cooldown());
        let handle = Sampler::new(
            sensor.clone(),
            actuator.clone(),
            Arc::clone(&shared),
            controls_with(0.3, true),
            cfg(10, 4),
        )
        .spawn();

        sleep(Duration::from_millis(60)).await;
        let calls_mid = sensor.calls.load(Ordering::SeqCst);
        sleep(Duration::from_millis(60)).await;
        handle.shutdown().await;

        assert!(sensor.calls.load(Ordering::SeqCst) > calls_mid);
        let st = shared.read().await;
        assert!(st.events.iter().any(|e| e.detail.contains("auto pulse failed")));
    }
}
