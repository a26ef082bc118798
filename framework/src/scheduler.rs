//! Evaluator loop
//!
//! The scheduler owns every per-cycle component and runs one `tick` per
//! cadence period:
//!
//! 1. Install a pending configuration, if any
//! 2. Re-check input quality (always, even without new data)
//! 3. Stop here while a fault is active
//! 4. Skip when the current fix has already been evaluated
//! 5. Evaluate crossing, stopping distances and alert latches
//!
//! Time comes from a [`Clock`] so tests and the demo can drive the loop with
//! synthetic milliseconds.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::alert::{AlertLevel, AlertNotification, AlertSink};
use crate::config::RcvwConfig;
use crate::crossing::{CrossingContext, CrossingSnapshot};
use crate::inputs::CoreInputs;
use crate::quality::{FaultState, FaultTransition, QualityMonitor, QualityReport};
use crate::status;
use crate::stopping::{DecelerationCheck, DecelerationEstimator, StoppingModel};
use crate::warning::{WarningInputs, WarningStateMachine};

/// Monotonic millisecond time source
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock-free monotonic time since construction
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Clock advanced explicitly by the caller
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Advance and return the new time
    pub fn advance(&self, delta_ms: u64) -> u64 {
        self.now.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A configuration waiting to be installed at the next tick
#[derive(Debug)]
pub struct PendingConfig {
    config: RcvwConfig,
    /// `(key, new value)` pairs to announce
    changes: Vec<(String, String)>,
}

/// Hand-off slot for configuration reloads
#[derive(Debug, Default, Clone)]
pub struct ConfigSlot {
    pending: Arc<Mutex<Option<PendingConfig>>>,
}

impl ConfigSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a validated configuration; replaces anything not yet installed
    pub fn submit(&self, config: RcvwConfig, changes: Vec<(String, String)>) {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(PendingConfig { config, changes });
    }

    fn take(&self) -> Option<PendingConfig> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Per-cycle calculation results
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub crossing: CrossingSnapshot,
    pub speed_mps: f64,
    pub safe_stop_distance_m: f64,
    pub expected_stop_distance_m: f64,
}

/// What one tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A fault is active; the warning logic did not run
    Faulted(FaultState),
    /// No new fix since the last evaluation
    Skipped,
    Evaluated(CycleReport),
}

/// The evaluator: owns every per-cycle component
pub struct Scheduler<S: AlertSink> {
    config: RcvwConfig,
    inputs: Arc<CoreInputs>,
    config_slot: ConfigSlot,
    quality: QualityMonitor,
    crossing: CrossingContext,
    stopping: StoppingModel,
    deceleration: DecelerationEstimator,
    warnings: WarningStateMachine,
    sink: S,
    last_logged_speed: f64,
}

impl<S: AlertSink> Scheduler<S> {
    pub fn new(config: RcvwConfig, inputs: Arc<CoreInputs>, sink: S) -> Self {
        let quality = QualityMonitor::new(config.quality.clone(), config.known_crossings.clone());
        let crossing = CrossingContext::new(
            Arc::clone(&inputs.geometry),
            Arc::clone(&inputs.crossing),
            config.vehicle.clone(),
        );
        let stopping = Self::stopping_model(&config);
        Self {
            config,
            inputs,
            config_slot: ConfigSlot::new(),
            quality,
            crossing,
            stopping,
            deceleration: DecelerationEstimator::new(),
            warnings: WarningStateMachine::new(),
            sink,
            last_logged_speed: 0.0,
        }
    }

    fn stopping_model(config: &RcvwConfig) -> StoppingModel {
        StoppingModel::new(
            config.stopping.clone(),
            config.vehicle.class,
            config.vehicle.antenna_from_front_m,
        )
    }

    /// Handle for queueing configuration reloads from another thread
    pub fn config_slot(&self) -> ConfigSlot {
        self.config_slot.clone()
    }

    pub fn config(&self) -> &RcvwConfig {
        &self.config
    }

    pub fn warnings(&self) -> &WarningStateMachine {
        &self.warnings
    }

    pub fn fault(&self) -> FaultState {
        self.quality.fault()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn publish(&mut self, notification: AlertNotification) {
        self.sink.publish(&notification);
    }

    fn apply_pending_config(&mut self, now_ms: u64) {
        let Some(pending) = self.config_slot.take() else {
            return;
        };
        let config = pending.config;

        self.inputs.fusion.update_config(config.fusion.clone());
        self.quality
            .update_config(config.quality.clone(), config.known_crossings.clone());
        self.crossing.set_vehicle(config.vehicle.clone());
        self.stopping = Self::stopping_model(&config);
        self.config = config;

        for (key, value) in pending.changes {
            info!("{} value changed to {}", key, value);
            self.publish(AlertNotification::config_changed(&key, &value, now_ms));
        }
    }

    fn update_status(&self, report: &QualityReport, rtk: &str) {
        let board = &self.inputs.status;
        board.set_flag(status::MAP_RECEIVED, report.map_received);
        board.set_flag(status::SPAT_RECEIVED, report.spat_received);
        board.set_flag(status::LOCATION_RECEIVED, report.location_received);
        board.set(status::RTK_TYPE, rtk);
        board.set(
            status::NEAR_ACTIVE_HRI,
            report.near_crossing.clone().unwrap_or_default(),
        );
        board.set(status::FAULT, report.fault.description());
    }

    fn update_alert_status(&self) {
        let board = &self.inputs.status;
        let hri = if self.warnings.is_active(AlertLevel::Available) {
            "Present"
        } else {
            "Not Present"
        };
        board.set(status::HRI, hri);
        board.set(
            status::WARNING,
            self.warnings
                .highest_active()
                .map_or("Not Active", |level| level.description()),
        );
    }

    fn handle_fault_transition(&mut self, transition: FaultTransition, now_ms: u64) {
        match transition {
            FaultTransition::Entered(fault) => {
                self.publish(AlertNotification::fault(fault, now_ms));
                for cleared in self.warnings.clear_all(now_ms) {
                    self.publish(cleared);
                }
                self.deceleration.reset();
                self.update_alert_status();
            }
            FaultTransition::Cleared(fault) => {
                self.publish(AlertNotification::fault_cleared(fault, now_ms));
            }
            FaultTransition::Changed { from, to } => {
                self.publish(AlertNotification::fault_cleared(from, now_ms));
                self.publish(AlertNotification::fault(to, now_ms));
            }
        }
    }

    /// Run one evaluation cycle at `now_ms`
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        self.apply_pending_config(now_ms);

        let fused = self.inputs.fusion.snapshot();
        let seen = self.inputs.tracker.snapshot();

        let report = self.quality.evaluate(&seen, &fused, now_ms);
        self.update_status(&report, fused.rtk.as_str());
        if let Some(transition) = report.transition {
            self.handle_fault_transition(transition, now_ms);
        }
        if report.fault.is_fault() {
            return TickOutcome::Faulted(report.fault);
        }

        if !fused.location_received || fused.processed {
            return TickOutcome::Skipped;
        }

        let crossing = self.crossing.evaluate(fused.position(), fused.heading());
        let weather_factor = self.inputs.weather.condition().friction_factor();
        let safe = self
            .stopping
            .safe_stop_distance(fused.speed_mps, crossing.grade, weather_factor);

        let check = DecelerationCheck {
            use_fused: self.config.warning.use_deceleration,
            use_vbm: self.config.warning.use_vbm_deceleration,
            critical_expiration_ms: self.config.fusion.critical_expiration_ms,
        };
        let expected = self
            .deceleration
            .expected_stop_distance(&fused, now_ms, &check);

        let half_threshold = self.config.warning.hri_warning_speed_mps / 2.0;
        if fused.speed_mps > half_threshold || self.last_logged_speed > half_threshold {
            debug!(
                "Speed: {:.2}, Lane: {}/{}, CrossingDistance: {:.2}, SafeStopDistance: {:.2}, ExpectedStopDistance: {:.2}, Preemption: {}",
                fused.speed_mps,
                crossing.lane_number,
                crossing.lane_segment,
                crossing.distance_m,
                safe,
                expected,
                crossing.preemption_active
            );
            self.last_logged_speed = fused.speed_mps;
        }

        let warning_inputs = WarningInputs::new(
            &crossing,
            fused.speed_mps,
            safe,
            expected,
            check.enabled(),
            self.config.warning.hri_warning_speed_mps,
        );
        let notifications = self.warnings.evaluate(&warning_inputs, now_ms);
        if !notifications.is_empty() {
            for notification in notifications {
                self.publish(notification);
            }
            self.update_alert_status();
        }

        if !self.inputs.fusion.mark_processed(fused.sequence) {
            debug!("Newer fix arrived during evaluation; it stays pending");
        }

        TickOutcome::Evaluated(CycleReport {
            crossing,
            speed_mps: fused.speed_mps,
            safe_stop_distance_m: safe,
            expected_stop_distance_m: expected,
        })
    }

    /// Tick at the configured cadence until `stop` is set
    pub fn run(&mut self, clock: &dyn Clock, stop: &AtomicBool) {
        info!(
            "Evaluator running every {} ms",
            self.config.scheduler.cadence_ms
        );
        while !stop.load(Ordering::Relaxed) {
            let started = clock.now_ms();
            self.tick(started);

            let elapsed = clock.now_ms().saturating_sub(started);
            let cadence = self.config.scheduler.cadence_ms;
            if elapsed < cadence {
                std::thread::sleep(Duration::from_millis(cadence - elapsed));
            }
        }
        info!("Evaluator stopped");
    }
}
