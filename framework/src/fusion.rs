//! Sample Fusion Module
//!
//! This module handles:
//! 1. Merging GNSS fixes and in-vehicle dynamics (VBM) samples into one
//!    authoritative speed/heading/time estimate
//! 2. Rejecting duplicate and out-of-order GNSS fixes
//! 3. Holding position/heading through short runs of heading outliers
//! 4. A running estimate of the GNSS fix interval for frequency monitoring
//! 5. RTK fix-quality tracking
//!
//! Producers call `ingest_location` / `ingest_dynamics` from their own
//! threads; the evaluator takes a consistent copy with `snapshot`. All state
//! lives behind a single mutex so speed and its timestamp are never read
//! from different updates.

use std::sync::{Mutex, MutexGuard};

use log::{debug, info};

use crate::config::FusionConfig;
use crate::geo::heading_delta;
use crate::types::{DynamicsSample, GeoPoint, LocationSample, RtkState};

/// Latest dynamics sample as seen by the evaluator
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DynamicsSnapshot {
    /// Vehicle-bus speed (m/s)
    pub speed_mps: f64,
    /// Longitudinal acceleration (m/s², negative = braking)
    pub accel_mps2: f64,
    /// Producer timestamp (ms)
    pub timestamp_ms: u64,
    /// When the sample was handed to fusion (ms, evaluator clock)
    pub received_at_ms: u64,
}

/// Fused vehicle state, copied out for each evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FusedState {
    /// Current speed (m/s)
    pub speed_mps: f64,
    pub prev_speed_mps: f64,
    pub prev_prev_speed_mps: f64,
    /// Timestamp of the current speed (ms)
    pub speed_time_ms: u64,
    pub prev_speed_time_ms: u64,
    /// Course over ground of the last accepted moving fix (deg)
    pub heading_deg: f64,
    /// A moving fix has set `heading_deg`
    pub heading_valid: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub hdop: f64,
    pub rtk: RtkState,
    pub prev_rtk: RtkState,
    /// Set once the evaluator has run on the current fix
    pub processed: bool,
    /// Incremented for every fix that was not a duplicate
    pub sequence: u64,
    /// At least one fix has been fused
    pub location_received: bool,
    /// Running mean of the interval between fixes (ms)
    pub fix_interval_ms: f64,
    /// Number of intervals in the running mean
    pub interval_samples: u32,
    /// Consecutive heading-outlier fixes currently being ignored
    pub ignored_fixes: u32,
    pub dynamics: Option<DynamicsSnapshot>,
}

impl FusedState {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Course over ground, once a moving fix has reported one
    pub fn heading(&self) -> Option<f64> {
        self.heading_valid.then_some(self.heading_deg)
    }

    /// GNSS fix rate from the running interval mean (Hz)
    pub fn fix_frequency_hz(&self) -> Option<f64> {
        if self.interval_samples == 0 || self.fix_interval_ms <= 0.0 {
            return None;
        }
        Some(1000.0 / self.fix_interval_ms)
    }
}

/// What happened to a location fix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationOutcome {
    /// Timestamp not newer than the last fix; nothing changed
    Duplicate,
    /// Fix installed
    Accepted,
    /// Heading outlier; position and heading held, speed pair advanced
    HeadingRejected,
}

/// Result of `ingest_location`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationReport {
    pub outcome: LocationOutcome,
    /// `(previous, current)` when the RTK state changed with this fix
    pub rtk_transition: Option<(RtkState, RtkState)>,
}

/// Running mean of the interval between GNSS fixes
///
/// Incremental mean over the first N fixes, then a decaying mean over a
/// window of N. A gap longer than `reset_gap_ms` starts a fresh session.
#[derive(Debug, Clone)]
pub struct FixIntervalEstimator {
    sample_size: u32,
    reset_gap_ms: u64,
    /// Fixes seen in this session, capped at `sample_size`
    count: u32,
    mean_ms: f64,
    last_fix_ms: Option<u64>,
}

impl FixIntervalEstimator {
    pub fn new(sample_size: u32, reset_gap_ms: u64) -> Self {
        Self {
            sample_size: sample_size.max(2),
            reset_gap_ms,
            count: 0,
            mean_ms: 0.0,
            last_fix_ms: None,
        }
    }

    /// Record a fix timestamp (must be strictly increasing)
    pub fn record(&mut self, timestamp_ms: u64) {
        let Some(last) = self.last_fix_ms.replace(timestamp_ms) else {
            self.count = 1;
            return;
        };

        let interval = timestamp_ms.saturating_sub(last);
        if interval > self.reset_gap_ms {
            debug!("Fix gap of {} ms, restarting interval estimate", interval);
            self.count = 1;
            self.mean_ms = 0.0;
            return;
        }

        self.count = (self.count + 1).min(self.sample_size);
        let n = self.count as f64;
        self.mean_ms = ((n - 2.0) * self.mean_ms + interval as f64) / (n - 1.0);
    }

    pub fn mean_ms(&self) -> f64 {
        self.mean_ms
    }

    /// Number of intervals folded into the mean
    pub fn intervals(&self) -> u32 {
        self.count.saturating_sub(1)
    }

    fn set_limits(&mut self, sample_size: u32, reset_gap_ms: u64) {
        self.sample_size = sample_size.max(2);
        self.count = self.count.min(self.sample_size);
        self.reset_gap_ms = reset_gap_ms;
    }
}

/// Speed/time history of the dynamics source
#[derive(Debug, Clone, Copy, Default)]
struct DynamicsHistory {
    speed_mps: f64,
    prev_speed_mps: f64,
    prev_prev_speed_mps: f64,
    time_ms: u64,
    prev_time_ms: u64,
    prev_prev_time_ms: u64,
    accel_mps2: f64,
    received_at_ms: u64,
}

#[derive(Debug)]
struct Inner {
    config: FusionConfig,
    state: FusedState,
    last_location_ms: Option<u64>,
    intervals: FixIntervalEstimator,
    dynamics: Option<DynamicsHistory>,
}

impl Inner {
    /// Speed and timestamp for this shift: fresh dynamics win over GNSS
    fn arbitrated_speed(&self, now_ms: u64) -> Option<(f64, u64)> {
        let d = self.dynamics?;
        let age = now_ms.saturating_sub(d.received_at_ms);
        (age <= self.config.critical_expiration_ms).then_some((d.speed_mps, d.time_ms))
    }

    fn shift_speed(&mut self, speed_mps: f64, time_ms: u64) {
        let s = &mut self.state;
        s.prev_prev_speed_mps = s.prev_speed_mps;
        s.prev_speed_mps = s.speed_mps;
        s.prev_speed_time_ms = s.speed_time_ms;
        s.speed_mps = speed_mps;
        s.speed_time_ms = time_ms;
    }
}

/// Thread-safe GNSS + vehicle-bus fusion
#[derive(Debug)]
pub struct SampleFusion {
    inner: Mutex<Inner>,
}

impl SampleFusion {
    pub fn new(config: FusionConfig) -> Self {
        let intervals = FixIntervalEstimator::new(
            config.frequency_sample_size,
            2 * config.critical_expiration_ms,
        );
        Self {
            inner: Mutex::new(Inner {
                config,
                state: FusedState::default(),
                last_location_ms: None,
                intervals,
                dynamics: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install new fusion parameters; fused history is kept
    pub fn update_config(&self, config: FusionConfig) {
        let mut inner = self.lock();
        inner
            .intervals
            .set_limits(config.frequency_sample_size, 2 * config.critical_expiration_ms);
        inner.config = config;
    }

    /// Fuse a GNSS fix
    ///
    /// # Arguments
    /// * `sample` - The decoded fix
    /// * `now_ms` - Arrival time on the evaluator clock, used to judge
    ///   dynamics freshness
    pub fn ingest_location(&self, sample: &LocationSample, now_ms: u64) -> LocationReport {
        let mut inner = self.lock();

        if let Some(last) = inner.last_location_ms {
            if sample.timestamp_ms <= last {
                debug!(
                    "Dropping fix at {} ms (last accepted {} ms)",
                    sample.timestamp_ms, last
                );
                return LocationReport {
                    outcome: LocationOutcome::Duplicate,
                    rtk_transition: None,
                };
            }
        }
        inner.last_location_ms = Some(sample.timestamp_ms);
        inner.intervals.record(sample.timestamp_ms);

        let arbitrated = inner.arbitrated_speed(now_ms);
        let delta = heading_delta(sample.heading_deg, inner.state.heading_deg);
        let is_outlier = inner.state.heading_valid
            && delta > inner.config.heading_tolerance_deg
            && inner.state.ignored_fixes < inner.config.max_ignored_fixes;

        let outcome = if is_outlier {
            let (speed, time) = arbitrated.unwrap_or((inner.state.speed_mps, sample.timestamp_ms));
            inner.shift_speed(speed, time);
            inner.state.ignored_fixes += 1;
            debug!(
                "Heading jump of {:.1} deg, holding fix ({}/{})",
                delta, inner.state.ignored_fixes, inner.config.max_ignored_fixes
            );
            LocationOutcome::HeadingRejected
        } else {
            let (speed, time) = arbitrated.unwrap_or((sample.speed_mps, sample.timestamp_ms));
            inner.shift_speed(speed, time);

            let s = &mut inner.state;
            s.latitude = sample.latitude;
            s.longitude = sample.longitude;
            s.altitude = sample.altitude;
            s.hdop = sample.hdop;
            s.ignored_fixes = 0;
            if speed != 0.0 {
                s.heading_deg = sample.heading_deg;
                s.heading_valid = true;
            }
            LocationOutcome::Accepted
        };

        let rtk = RtkState::from_fix_quality(sample.fix_quality);
        let previous_rtk = inner.state.rtk;
        let rtk_transition = if rtk != previous_rtk && inner.state.location_received {
            info!("RTK state {} -> {}", previous_rtk.as_str(), rtk.as_str());
            Some((previous_rtk, rtk))
        } else {
            None
        };

        let mean = inner.intervals.mean_ms();
        let samples = inner.intervals.intervals();
        let s = &mut inner.state;
        s.prev_rtk = previous_rtk;
        s.rtk = rtk;
        s.fix_interval_ms = mean;
        s.interval_samples = samples;
        s.location_received = true;
        s.sequence += 1;
        s.processed = false;

        LocationReport {
            outcome,
            rtk_transition,
        }
    }

    /// Fuse a vehicle-bus dynamics sample
    ///
    /// No rejection logic applies; the sample is always shifted in.
    pub fn ingest_dynamics(&self, sample: &DynamicsSample, now_ms: u64) {
        let mut inner = self.lock();
        let mut history = inner.dynamics.unwrap_or_default();

        history.prev_prev_speed_mps = history.prev_speed_mps;
        history.prev_prev_time_ms = history.prev_time_ms;
        history.prev_speed_mps = history.speed_mps;
        history.prev_time_ms = history.time_ms;
        history.speed_mps = sample.speed_mps;
        history.time_ms = sample.timestamp_ms;
        history.accel_mps2 = sample.accel_mps2;
        history.received_at_ms = now_ms;

        inner.dynamics = Some(history);
        inner.state.dynamics = Some(DynamicsSnapshot {
            speed_mps: history.speed_mps,
            accel_mps2: history.accel_mps2,
            timestamp_ms: history.time_ms,
            received_at_ms: history.received_at_ms,
        });
    }

    /// Consistent copy of the fused state
    pub fn snapshot(&self) -> FusedState {
        self.lock().state
    }

    /// Mark the fix with `sequence` as evaluated
    ///
    /// Returns `false` if a newer fix arrived during evaluation; that fix
    /// stays unprocessed.
    pub fn mark_processed(&self, sequence: u64) -> bool {
        let mut inner = self.lock();
        if inner.state.sequence != sequence {
            return false;
        }
        inner.state.processed = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FixQuality;

    fn fix(timestamp_ms: u64, heading_deg: f64, speed_mps: f64) -> LocationSample {
        LocationSample {
            timestamp_ms,
            latitude: 39.0 + timestamp_ms as f64 * 1e-7,
            longitude: -77.0,
            altitude: 100.0,
            heading_deg,
            speed_mps,
            hdop: 0.8,
            fix_quality: FixQuality::FixedRtk,
        }
    }

    #[test]
    fn test_duplicate_fix_is_ignored() {
        let fusion = SampleFusion::new(FusionConfig::default());
        fusion.ingest_location(&fix(1_000, 10.0, 12.0), 1_000);
        let before = fusion.snapshot();

        let report = fusion.ingest_location(&fix(1_000, 50.0, 3.0), 1_010);
        assert_eq!(report.outcome, LocationOutcome::Duplicate);
        let report = fusion.ingest_location(&fix(900, 50.0, 3.0), 1_020);
        assert_eq!(report.outcome, LocationOutcome::Duplicate);

        assert_eq!(fusion.snapshot(), before);
    }

    #[test]
    fn test_speed_history_shifts() {
        let fusion = SampleFusion::new(FusionConfig::default());
        fusion.ingest_location(&fix(1_000, 10.0, 20.0), 1_000);
        fusion.ingest_location(&fix(1_100, 10.0, 15.0), 1_100);
        fusion.ingest_location(&fix(1_200, 10.0, 10.0), 1_200);

        let s = fusion.snapshot();
        assert_eq!(s.speed_mps, 10.0);
        assert_eq!(s.prev_speed_mps, 15.0);
        assert_eq!(s.prev_prev_speed_mps, 20.0);
        assert_eq!(s.speed_time_ms, 1_200);
        assert_eq!(s.prev_speed_time_ms, 1_100);
        assert!(!s.processed);
        assert_eq!(s.sequence, 3);
    }

    #[test]
    fn test_heading_outliers_held_then_accepted() {
        let config = FusionConfig::default(); // 90 deg, 2 ignored fixes
        let fusion = SampleFusion::new(config);
        fusion.ingest_location(&fix(1_000, 10.0, 10.0), 1_000);
        let anchor = fusion.snapshot();

        // 10 -> 170 deg is a 160 deg jump: rejected
        let report = fusion.ingest_location(&fix(1_100, 170.0, 10.0), 1_100);
        assert_eq!(report.outcome, LocationOutcome::HeadingRejected);
        let s = fusion.snapshot();
        assert_eq!(s.ignored_fixes, 1);
        assert_eq!(s.heading_deg, 10.0);
        assert_eq!(s.latitude, anchor.latitude);
        // Speed pair still advances
        assert_eq!(s.speed_time_ms, 1_100);
        assert_eq!(s.prev_speed_time_ms, 1_000);

        // Second consecutive outlier reaches the limit
        let report = fusion.ingest_location(&fix(1_200, 175.0, 10.0), 1_200);
        assert_eq!(report.outcome, LocationOutcome::HeadingRejected);
        assert_eq!(fusion.snapshot().ignored_fixes, 2);

        // Third is accepted regardless of magnitude
        let report = fusion.ingest_location(&fix(1_300, 190.0, 10.0), 1_300);
        assert_eq!(report.outcome, LocationOutcome::Accepted);
        let s = fusion.snapshot();
        assert_eq!(s.ignored_fixes, 0);
        assert_eq!(s.heading_deg, 190.0);
        assert!(s.latitude > anchor.latitude);
    }

    #[test]
    fn test_heading_not_updated_when_stopped() {
        let fusion = SampleFusion::new(FusionConfig::default());
        fusion.ingest_location(&fix(1_000, 45.0, 5.0), 1_000);
        fusion.ingest_location(&fix(1_100, 80.0, 0.0), 1_100);

        let s = fusion.snapshot();
        assert_eq!(s.heading_deg, 45.0);
        assert_eq!(s.speed_mps, 0.0);
    }

    #[test]
    fn test_heading_unknown_until_moving() {
        let fusion = SampleFusion::new(FusionConfig::default());
        fusion.ingest_location(&fix(1_000, 180.0, 0.0), 1_000);
        let s = fusion.snapshot();
        assert!(!s.heading_valid);
        assert_eq!(s.heading(), None);

        fusion.ingest_location(&fix(1_100, 180.0, 2.0), 1_100);
        assert_eq!(fusion.snapshot().heading(), Some(180.0));
    }

    #[test]
    fn test_fresh_dynamics_replace_gnss_speed() {
        let fusion = SampleFusion::new(FusionConfig::default());
        fusion.ingest_dynamics(
            &DynamicsSample {
                timestamp_ms: 990,
                speed_mps: 13.5,
                accel_mps2: -1.0,
            },
            995,
        );
        fusion.ingest_location(&fix(1_000, 0.0, 14.0), 1_000);

        let s = fusion.snapshot();
        assert_eq!(s.speed_mps, 13.5);
        assert_eq!(s.speed_time_ms, 990);

        // Dynamics now older than the critical window: GNSS speed is used
        fusion.ingest_location(&fix(1_600, 0.0, 14.2), 1_600);
        let s = fusion.snapshot();
        assert_eq!(s.speed_mps, 14.2);
        assert_eq!(s.speed_time_ms, 1_600);
    }

    #[test]
    fn test_dynamics_arbitration_applies_to_rejected_fix() {
        let fusion = SampleFusion::new(FusionConfig::default());
        fusion.ingest_location(&fix(1_000, 10.0, 10.0), 1_000);
        fusion.ingest_dynamics(
            &DynamicsSample {
                timestamp_ms: 1_090,
                speed_mps: 9.0,
                accel_mps2: -2.0,
            },
            1_095,
        );
        let report = fusion.ingest_location(&fix(1_100, 170.0, 10.0), 1_100);
        assert_eq!(report.outcome, LocationOutcome::HeadingRejected);

        let s = fusion.snapshot();
        assert_eq!(s.speed_mps, 9.0);
        assert_eq!(s.speed_time_ms, 1_090);
        assert_eq!(s.prev_speed_mps, 10.0);
    }

    #[test]
    fn test_dynamics_always_shift() {
        let fusion = SampleFusion::new(FusionConfig::default());
        for (i, speed) in [10.0, 9.0, 8.0].iter().enumerate() {
            fusion.ingest_dynamics(
                &DynamicsSample {
                    timestamp_ms: 100 * i as u64,
                    speed_mps: *speed,
                    accel_mps2: -10.0,
                },
                100 * i as u64,
            );
        }
        // Even an older producer timestamp is taken as-is
        fusion.ingest_dynamics(
            &DynamicsSample {
                timestamp_ms: 50,
                speed_mps: 7.5,
                accel_mps2: -5.0,
            },
            300,
        );
        let d = fusion.snapshot().dynamics.unwrap();
        assert_eq!(d.speed_mps, 7.5);
        assert_eq!(d.accel_mps2, -5.0);
        assert_eq!(d.received_at_ms, 300);
    }

    #[test]
    fn test_interval_running_mean() {
        let mut est = FixIntervalEstimator::new(4, 1_000);
        est.record(0);
        assert_eq!(est.intervals(), 0);
        est.record(100);
        assert_eq!(est.mean_ms(), 100.0);
        est.record(300);
        assert_eq!(est.mean_ms(), 150.0);
        est.record(400);
        assert!((est.mean_ms() - 400.0 / 3.0).abs() < 1e-9);
        assert_eq!(est.intervals(), 3);

        // Window full: decaying mean over 3 intervals
        est.record(500);
        let expected = (2.0 * (400.0 / 3.0) + 100.0) / 3.0;
        assert!((est.mean_ms() - expected).abs() < 1e-9);
        assert_eq!(est.intervals(), 3);
    }

    #[test]
    fn test_interval_resets_after_gap() {
        let mut est = FixIntervalEstimator::new(10, 1_000);
        est.record(0);
        est.record(100);
        est.record(200);
        est.record(5_000);
        assert_eq!(est.intervals(), 0);
        assert_eq!(est.mean_ms(), 0.0);
        est.record(5_200);
        assert_eq!(est.mean_ms(), 200.0);
    }

    #[test]
    fn test_fix_frequency() {
        let fusion = SampleFusion::new(FusionConfig::default());
        for i in 0..5 {
            fusion.ingest_location(&fix(1_000 + i * 100, 0.0, 10.0), 1_000 + i * 100);
        }
        let s = fusion.snapshot();
        assert_eq!(s.interval_samples, 4);
        assert!((s.fix_frequency_hz().unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_rtk_transition_reported_once() {
        let fusion = SampleFusion::new(FusionConfig::default());
        let mut sample = fix(1_000, 0.0, 10.0);
        assert_eq!(fusion.ingest_location(&sample, 1_000).rtk_transition, None);

        sample.timestamp_ms = 1_100;
        sample.fix_quality = FixQuality::FloatRtk;
        assert_eq!(
            fusion.ingest_location(&sample, 1_100).rtk_transition,
            Some((RtkState::Fixed, RtkState::Float))
        );

        sample.timestamp_ms = 1_200;
        assert_eq!(fusion.ingest_location(&sample, 1_200).rtk_transition, None);
        assert_eq!(fusion.snapshot().rtk, RtkState::Float);
    }

    #[test]
    fn test_mark_processed_ignores_stale_sequence() {
        let fusion = SampleFusion::new(FusionConfig::default());
        fusion.ingest_location(&fix(1_000, 0.0, 10.0), 1_000);
        let seq = fusion.snapshot().sequence;

        // A newer fix lands while the evaluator is working
        fusion.ingest_location(&fix(1_100, 0.0, 10.0), 1_100);
        assert!(!fusion.mark_processed(seq));
        assert!(!fusion.snapshot().processed);

        let seq = fusion.snapshot().sequence;
        assert!(fusion.mark_processed(seq));
        assert!(fusion.snapshot().processed);
    }
}
