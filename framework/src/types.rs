//! Input sample types shared by every module
//!
//! These are the already-decoded structures delivered by the GNSS and
//! in-vehicle (CAN) producers. They are plain `Copy` values: once a producer
//! hands one over it is never mutated.

use serde::{Deserialize, Serialize};

/// GNSS fix quality as reported by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixQuality {
    /// Autonomous or differential fix without carrier-phase correction
    #[default]
    None,
    /// RTK float solution
    FloatRtk,
    /// RTK fixed (integer ambiguity) solution
    FixedRtk,
}

/// RTK correction state derived from the fix quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RtkState {
    #[default]
    None,
    Float,
    Fixed,
}

impl RtkState {
    pub fn from_fix_quality(quality: FixQuality) -> Self {
        match quality {
            FixQuality::FixedRtk => RtkState::Fixed,
            FixQuality::FloatRtk => RtkState::Float,
            FixQuality::None => RtkState::None,
        }
    }

    /// Fixed or float corrections are trusted for lane-level matching
    pub fn is_corrected(&self) -> bool {
        !matches!(self, RtkState::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RtkState::None => "none",
            RtkState::Float => "float",
            RtkState::Fixed => "fixed",
        }
    }
}

/// One GNSS position/velocity fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Monotonic timestamp (ms)
    pub timestamp_ms: u64,
    /// Latitude (degrees, WGS-84)
    pub latitude: f64,
    /// Longitude (degrees, WGS-84)
    pub longitude: f64,
    /// Altitude above the ellipsoid (m)
    #[serde(default)]
    pub altitude: f64,
    /// Course over ground (degrees, 0 = north, clockwise)
    pub heading_deg: f64,
    /// Ground speed (m/s)
    pub speed_mps: f64,
    /// Horizontal dilution of precision
    #[serde(default)]
    pub hdop: f64,
    #[serde(default)]
    pub fix_quality: FixQuality,
}

impl LocationSample {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// One in-vehicle dynamics sample (VBM) from the CAN bus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicsSample {
    /// Monotonic timestamp (ms)
    pub timestamp_ms: u64,
    /// Vehicle speed (m/s)
    pub speed_mps: f64,
    /// Longitudinal acceleration (m/s², negative = decelerating)
    pub accel_mps2: f64,
}

/// A geodetic point (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}
