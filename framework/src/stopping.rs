//! Stopping-distance models
//!
//! Two interchangeable formulas for the distance a vehicle needs to stop
//! from its current speed:
//!
//! - **Legacy**: reaction distance plus friction/incline braking distance,
//!   scaled by road weather and a safety multiplier
//! - **Literature**: AASHTO-style braking distance in km/h with per-class
//!   deceleration capability, system latencies and positioning margins
//!
//! Plus the expected stopping distance derived from observed braking, used to
//! suppress or confirm warnings when the driver is already slowing down.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::StoppingConfig;
use crate::fusion::FusedState;

/// Gravity used by the legacy formula (m/s²)
pub const LEGACY_GRAVITY: f64 = 9.8;
/// Gravity used to normalise deceleration in the literature formula (m/s²)
pub const GRAVITY: f64 = 9.81;
/// Returned when the braking denominator is not positive (vehicle cannot stop)
pub const UNSTOPPABLE_DISTANCE: f64 = f64::MAX;
/// Returned when no braking has been observed
pub const NO_STOP_EXPECTED: f64 = f64::MAX;

const MPS_TO_KPH: f64 = 3.6;

/// Which stopping-distance formula to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppingFormula {
    Legacy,
    #[default]
    Literature,
}

/// Vehicle classes with independently configured braking capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    #[default]
    Car,
    LightTruck,
    HeavyTruck,
}

impl VehicleClass {
    /// Minimum deceleration this class can be relied on to achieve (m/s²)
    pub fn min_deceleration(&self, config: &StoppingConfig) -> f64 {
        match self {
            VehicleClass::Car => config.min_decel_car,
            VehicleClass::LightTruck => config.min_decel_light_truck,
            VehicleClass::HeavyTruck => config.min_decel_heavy_truck,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Car => "car",
            VehicleClass::LightTruck => "light_truck",
            VehicleClass::HeavyTruck => "heavy_truck",
        }
    }
}

/// Where the road grade for the literature formula comes from
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeSource {
    /// Grade reported by the matched map lane
    #[default]
    Map,
    /// Constant grade (rise over run, positive = uphill)
    Fixed(f64),
}

impl GradeSource {
    pub fn resolve(&self, map_grade: f64) -> f64 {
        match self {
            GradeSource::Map => map_grade,
            GradeSource::Fixed(grade) => *grade,
        }
    }
}

/// Road surface condition from road-weather advisories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoadCondition {
    #[default]
    Clear,
    Rain,
    Snow,
    Ice,
}

impl RoadCondition {
    /// Classify an ITIS event code from a road-side alert
    pub fn from_itis(code: u32) -> Self {
        match code {
            4866..=4872 => RoadCondition::Snow,
            4875..=4876 => RoadCondition::Ice,
            4881..=4888 => RoadCondition::Rain,
            _ => RoadCondition::Clear,
        }
    }

    /// Multiplier applied to the dry-road friction coefficient
    pub fn friction_factor(&self) -> f64 {
        match self {
            RoadCondition::Clear => 1.0,
            RoadCondition::Rain => 0.6,
            RoadCondition::Snow | RoadCondition::Ice => 0.45,
        }
    }
}

/// Latest road condition, written by the weather-advisory producer
#[derive(Debug, Default)]
pub struct WeatherState {
    condition: Mutex<RoadCondition>,
}

impl WeatherState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advisory; returns the new condition if it changed
    pub fn apply_itis(&self, code: u32) -> Option<RoadCondition> {
        let next = RoadCondition::from_itis(code);
        let mut current = self.condition.lock().unwrap_or_else(|e| e.into_inner());
        if *current == next {
            return None;
        }
        *current = next;
        Some(next)
    }

    pub fn condition(&self) -> RoadCondition {
        *self.condition.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Safe stopping distance calculator
#[derive(Debug, Clone)]
pub struct StoppingModel {
    config: StoppingConfig,
    vehicle_class: VehicleClass,
    antenna_from_front_m: f64,
}

impl StoppingModel {
    pub fn new(config: StoppingConfig, vehicle_class: VehicleClass, antenna_from_front_m: f64) -> Self {
        Self {
            config,
            vehicle_class,
            antenna_from_front_m,
        }
    }

    pub fn config(&self) -> &StoppingConfig {
        &self.config
    }

    /// Legacy stopping distance (before the safety multiplier)
    ///
    /// # Arguments
    /// * `speed` - Current speed (m/s)
    /// * `friction` - Effective tire/road friction coefficient
    /// * `incline` - Road incline (radians, positive = uphill)
    pub fn legacy_distance(&self, speed: f64, friction: f64, incline: f64) -> f64 {
        let reaction = self.config.reaction_time_s * speed;
        if speed == 0.0 {
            return reaction;
        }
        let denom = 2.0 * LEGACY_GRAVITY * (friction * incline.cos() + incline.sin());
        if denom <= 0.0 {
            return UNSTOPPABLE_DISTANCE;
        }
        reaction + speed * speed / denom
    }

    /// Literature (V2) stopping distance
    ///
    /// # Arguments
    /// * `speed` - Current speed (m/s)
    /// * `grade` - Road grade (rise over run, positive = uphill)
    pub fn literature_distance(&self, speed: f64, grade: f64) -> f64 {
        if speed == 0.0 {
            return 0.0;
        }
        let v = speed * MPS_TO_KPH;
        let t = self.config.reaction_time_s
            + self.config.comm_latency_s
            + self.config.application_latency_s;
        let decel = self.vehicle_class.min_deceleration(&self.config);
        let denom = 254.0 * (decel / GRAVITY + grade);
        if denom <= 0.0 {
            return UNSTOPPABLE_DISTANCE;
        }
        self.antenna_from_front_m + self.config.gps_error_margin_m + 0.278 * v * t + v * v / denom
    }

    /// Safe stopping distance with the configured formula
    ///
    /// # Arguments
    /// * `speed` - Current speed (m/s)
    /// * `map_grade` - Grade reported for the matched lane
    /// * `weather_factor` - Friction multiplier from road weather
    pub fn safe_stop_distance(&self, speed: f64, map_grade: f64, weather_factor: f64) -> f64 {
        let grade = self.config.grade.resolve(map_grade);
        match self.config.formula {
            StoppingFormula::Legacy => {
                let mu = self.config.friction * weather_factor;
                let d = self.legacy_distance(speed, mu, grade.atan());
                if d == UNSTOPPABLE_DISTANCE {
                    d
                } else {
                    d * self.config.safety_offset
                }
            }
            StoppingFormula::Literature => self.literature_distance(speed, grade),
        }
    }
}

/// Which braking evidence feeds the expected stop distance
#[derive(Debug, Clone, Copy, Default)]
pub struct DecelerationCheck {
    /// Use speed deltas between fused fixes
    pub use_fused: bool,
    /// Use acceleration reported by the vehicle bus
    pub use_vbm: bool,
    /// Max age of a dynamics sample to be trusted (ms)
    pub critical_expiration_ms: u64,
}

impl DecelerationCheck {
    pub fn enabled(&self) -> bool {
        self.use_fused || self.use_vbm
    }
}

/// Expected stopping distance from observed braking
///
/// The fix-derived acceleration is recomputed only when a new location fix
/// has been fused; otherwise the previous cycle's value is reused. A fresh
/// negative VBM acceleration always takes precedence.
#[derive(Debug, Default)]
pub struct DecelerationEstimator {
    last_fix_time_ms: Option<u64>,
    fused_accel: Option<f64>,
}

impl DecelerationEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last fix-derived acceleration (m/s², negative)
    pub fn fused_accel(&self) -> Option<f64> {
        self.fused_accel
    }

    pub fn reset(&mut self) {
        self.last_fix_time_ms = None;
        self.fused_accel = None;
    }

    /// Expected stopping distance (m), or [`NO_STOP_EXPECTED`]
    pub fn expected_stop_distance(
        &mut self,
        fused: &FusedState,
        now_ms: u64,
        check: &DecelerationCheck,
    ) -> f64 {
        if self.last_fix_time_ms != Some(fused.speed_time_ms) {
            self.last_fix_time_ms = Some(fused.speed_time_ms);
            self.fused_accel = if check.use_fused {
                fused_deceleration(fused)
            } else {
                None
            };
        }

        let mut expected = match self.fused_accel {
            Some(accel) => stop_distance(fused.speed_mps, accel),
            None => NO_STOP_EXPECTED,
        };

        if check.use_vbm {
            if let Some(dynamics) = fused.dynamics {
                let age = now_ms.saturating_sub(dynamics.received_at_ms);
                if age <= check.critical_expiration_ms && dynamics.accel_mps2 < 0.0 {
                    expected = stop_distance(fused.speed_mps, dynamics.accel_mps2);
                }
            }
        }

        expected
    }
}

/// Acceleration between the two most recent fused speeds, if decelerating
///
/// Current speed must be below both previous speeds to avoid reacting to a
/// single noisy sample.
pub fn fused_deceleration(fused: &FusedState) -> Option<f64> {
    if !(fused.speed_mps < fused.prev_speed_mps && fused.speed_mps < fused.prev_prev_speed_mps) {
        return None;
    }
    let dt = fused.speed_time_ms.checked_sub(fused.prev_speed_time_ms)? as f64 / 1000.0;
    if dt <= 0.0 {
        return None;
    }
    let accel = (fused.speed_mps - fused.prev_speed_mps) / dt;
    (accel < 0.0).then_some(accel)
}

/// Distance to stop from `speed` at constant `accel` (negative)
pub fn stop_distance(speed: f64, accel: f64) -> f64 {
    if accel >= 0.0 {
        return NO_STOP_EXPECTED;
    }
    -(speed * speed) / (2.0 * accel)
}
