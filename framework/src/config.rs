//! Runtime configuration for the decision core
//!
//! Every section deserializes with defaults, so a partial file only needs to
//! name the values it changes. Loading and watching files belongs to the
//! process that embeds the core; this module only defines the shape, the
//! defaults and validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quality::KnownCrossing;
use crate::stopping::{GradeSource, StoppingFormula, VehicleClass};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Stopping-distance model parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoppingConfig {
    pub formula: StoppingFormula,
    /// Dry-road tire friction coefficient (legacy formula)
    pub friction: f64,
    /// Multiplier on the legacy stopping distance
    pub safety_offset: f64,
    /// Driver reaction time (s)
    pub reaction_time_s: f64,
    /// V2X message latency (s)
    pub comm_latency_s: f64,
    /// Processing latency of this application (s)
    pub application_latency_s: f64,
    /// Positioning error allowance (m)
    pub gps_error_margin_m: f64,
    pub grade: GradeSource,
    /// Minimum deceleration capability per vehicle class (m/s²)
    pub min_decel_car: f64,
    pub min_decel_light_truck: f64,
    pub min_decel_heavy_truck: f64,
}

impl Default for StoppingConfig {
    fn default() -> Self {
        Self {
            formula: StoppingFormula::Literature,
            friction: 0.7,
            safety_offset: 1.2,
            reaction_time_s: 1.5,
            comm_latency_s: 0.1,
            application_latency_s: 0.1,
            gps_error_margin_m: 1.0,
            grade: GradeSource::Map,
            min_decel_car: 3.4,
            min_decel_light_truck: 3.0,
            min_decel_heavy_truck: 2.1,
        }
    }
}

/// Vehicle description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub class: VehicleClass,
    /// Overall length (m)
    pub length_m: f64,
    /// GNSS antenna distance behind the front bumper (m)
    pub antenna_from_front_m: f64,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            class: VehicleClass::Car,
            length_m: 4.8,
            antenna_from_front_m: 1.5,
        }
    }
}

impl VehicleConfig {
    /// GNSS antenna distance ahead of the rear bumper (m)
    pub fn antenna_from_rear_m(&self) -> f64 {
        (self.length_m - self.antenna_from_front_m).max(0.0)
    }
}

/// Sample fusion parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Max age of dynamics data used in place of GNSS speed (ms)
    pub critical_expiration_ms: u64,
    /// Window of fixes for the fix-interval mean
    pub frequency_sample_size: u32,
    /// Heading change above which a fix is treated as an outlier (deg)
    pub heading_tolerance_deg: f64,
    /// Consecutive outlier fixes ignored before one is accepted anyway
    pub max_ignored_fixes: u32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            critical_expiration_ms: 500,
            frequency_sample_size: 10,
            heading_tolerance_deg: 90.0,
            max_ignored_fixes: 2,
        }
    }
}

/// Input quality gate parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Map freshness window (ms)
    pub message_expiration_ms: u64,
    /// Signal-phase and location freshness window (ms)
    pub critical_expiration_ms: u64,
    /// Require RTK fixed/float near an equipped crossing
    pub rtk_required: bool,
    pub frequency_check: bool,
    /// Lowest acceptable GNSS fix rate (Hz)
    pub min_frequency_hz: f64,
    /// Proximity radius for crossings that do not set their own (m)
    pub default_proximity_m: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            message_expiration_ms: 6000,
            critical_expiration_ms: 500,
            rtk_required: false,
            frequency_check: true,
            min_frequency_hz: 5.0,
            default_proximity_m: 300.0,
        }
    }
}

/// Warning state machine parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarningConfig {
    /// At or below this speed inside the crossing the HRI warning fires (m/s)
    pub hri_warning_speed_mps: f64,
    /// Suppress approach warnings using fix-derived braking
    pub use_deceleration: bool,
    /// Suppress approach warnings using vehicle-bus braking
    pub use_vbm_deceleration: bool,
}

impl Default for WarningConfig {
    fn default() -> Self {
        Self {
            hri_warning_speed_mps: 1.0,
            use_deceleration: false,
            use_vbm_deceleration: false,
        }
    }
}

/// Lane matching parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossingConfig {
    /// Extra lane width, as a percentage, that still counts as "near lane"
    pub near_lane_extent_pct: f64,
}

impl Default for CrossingConfig {
    fn default() -> Self {
        Self {
            near_lane_extent_pct: 50.0,
        }
    }
}

/// Evaluator loop parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub cadence_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { cadence_ms: 10 }
    }
}

/// Complete core configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RcvwConfig {
    pub stopping: StoppingConfig,
    pub vehicle: VehicleConfig,
    pub fusion: FusionConfig,
    pub quality: QualityConfig,
    pub warning: WarningConfig,
    pub crossing: CrossingConfig,
    pub scheduler: SchedulerConfig,
    pub known_crossings: Vec<KnownCrossing>,
}

impl RcvwConfig {
    /// Check ranges that would make the arithmetic meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.stopping;
        positive("stopping.friction", s.friction)?;
        positive("stopping.safety_offset", s.safety_offset)?;
        non_negative("stopping.reaction_time_s", s.reaction_time_s)?;
        non_negative("stopping.comm_latency_s", s.comm_latency_s)?;
        non_negative("stopping.application_latency_s", s.application_latency_s)?;
        non_negative("stopping.gps_error_margin_m", s.gps_error_margin_m)?;
        positive("stopping.min_decel_car", s.min_decel_car)?;
        positive("stopping.min_decel_light_truck", s.min_decel_light_truck)?;
        positive("stopping.min_decel_heavy_truck", s.min_decel_heavy_truck)?;
        if let GradeSource::Fixed(g) = s.grade {
            finite("stopping.grade", g)?;
        }

        positive("vehicle.length_m", self.vehicle.length_m)?;
        non_negative("vehicle.antenna_from_front_m", self.vehicle.antenna_from_front_m)?;

        if self.fusion.frequency_sample_size < 4 {
            return Err(ConfigError::InvalidValue {
                key: "fusion.frequency_sample_size",
                reason: "must be at least 4".to_string(),
            });
        }
        if !(0.0..=180.0).contains(&self.fusion.heading_tolerance_deg) {
            return Err(ConfigError::InvalidValue {
                key: "fusion.heading_tolerance_deg",
                reason: "must be within 0..=180".to_string(),
            });
        }

        positive("quality.min_frequency_hz", self.quality.min_frequency_hz)?;
        positive("quality.default_proximity_m", self.quality.default_proximity_m)?;
        if self.quality.message_expiration_ms == 0 || self.quality.critical_expiration_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "quality.*_expiration_ms",
                reason: "must be non-zero".to_string(),
            });
        }

        non_negative("warning.hri_warning_speed_mps", self.warning.hri_warning_speed_mps)?;
        non_negative("crossing.near_lane_extent_pct", self.crossing.near_lane_extent_pct)?;

        if self.scheduler.cadence_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.cadence_ms",
                reason: "must be non-zero".to_string(),
            });
        }

        for crossing in &self.known_crossings {
            if !(-90.0..=90.0).contains(&crossing.latitude)
                || !(-180.0..=180.0).contains(&crossing.longitude)
            {
                return Err(ConfigError::InvalidValue {
                    key: "known_crossings",
                    reason: format!("{} has out-of-range coordinates", crossing.name),
                });
            }
        }

        Ok(())
    }
}

fn finite(key: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key,
            reason: format!("{} is not finite", value),
        })
    }
}

fn positive(key: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(key, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key,
            reason: format!("{} must be > 0", value),
        })
    }
}

fn non_negative(key: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(key, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key,
            reason: format!("{} must be >= 0", value),
        })
    }
}
