//! Input quality gate
//!
//! Decides every cycle whether the inputs are trustworthy enough to run the
//! warning logic at all. Staleness is judged from per-source last-seen
//! timestamps; proximity to an equipped crossing comes from a configured
//! list so it works before any map has been received.
//!
//! Priority when several conditions hold (first match wins):
//!
//! 1. Map missing near a known crossing
//! 2. Signal phase missing near a known crossing
//! 3. No fresh location fix
//! 4. Fix rate below the configured minimum
//! 5. RTK required but not available near a known crossing

use std::sync::Mutex;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::QualityConfig;
use crate::fusion::FusedState;
use crate::geo::haversine_distance;
use crate::types::GeoPoint;

/// Intervals needed in the fix-interval mean before the rate is judged
pub const MIN_FREQUENCY_INTERVALS: u32 = 3;

/// A crossing known to be equipped with map/signal broadcasts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownCrossing {
    #[serde(alias = "HRIName")]
    pub name: String,
    #[serde(alias = "Latitude")]
    pub latitude: f64,
    #[serde(alias = "Longitude")]
    pub longitude: f64,
    /// Proximity radius (m); the configured default applies when absent
    #[serde(default, alias = "Radius")]
    pub radius_m: Option<f64>,
}

impl KnownCrossing {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Per-source last-seen times (evaluator clock, ms)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastSeen {
    pub map_ms: Option<u64>,
    /// Only signal-phase snapshots matching the stored map count
    pub spat_ms: Option<u64>,
    pub location_ms: Option<u64>,
}

impl LastSeen {
    fn fresh(seen: Option<u64>, now_ms: u64, window_ms: u64) -> bool {
        seen.is_some_and(|t| now_ms.saturating_sub(t) <= window_ms)
    }
}

/// Records when each input source last delivered usable data
#[derive(Debug, Default)]
pub struct InputTracker {
    seen: Mutex<LastSeen>,
}

impl InputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_map(&self, now_ms: u64) {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).map_ms = Some(now_ms);
    }

    pub fn record_spat(&self, now_ms: u64) {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).spat_ms = Some(now_ms);
    }

    pub fn record_location(&self, now_ms: u64) {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).location_ms = Some(now_ms);
    }

    pub fn snapshot(&self) -> LastSeen {
        *self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The single active input fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultState {
    #[default]
    None,
    MapMissing,
    SpatMissing,
    LocationMissing,
    FrequencyLow,
    RtkMissing,
}

impl FaultState {
    pub fn is_fault(&self) -> bool {
        !matches!(self, FaultState::None)
    }

    /// Human-readable status string
    pub fn description(&self) -> &'static str {
        match self {
            FaultState::None => "None",
            FaultState::MapMissing => "MAP Data Not Received",
            FaultState::SpatMissing => "SPAT Data Not Received",
            FaultState::LocationMissing => "Location Data Invalid",
            FaultState::FrequencyLow => "GPS Frequency Too Low",
            FaultState::RtkMissing => "RTK Correction Not Available",
        }
    }
}

/// Fault change produced by one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultTransition {
    Entered(FaultState),
    Cleared(FaultState),
    Changed { from: FaultState, to: FaultState },
}

/// Result of one quality evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub fault: FaultState,
    pub transition: Option<FaultTransition>,
    pub map_received: bool,
    pub spat_received: bool,
    pub location_received: bool,
    /// Name of the known crossing the vehicle is near, if any
    pub near_crossing: Option<String>,
}

/// Fault state machine
#[derive(Debug)]
pub struct QualityMonitor {
    config: QualityConfig,
    crossings: Vec<KnownCrossing>,
    fault: FaultState,
}

impl QualityMonitor {
    pub fn new(config: QualityConfig, crossings: Vec<KnownCrossing>) -> Self {
        Self {
            config,
            crossings,
            fault: FaultState::None,
        }
    }

    /// Install new parameters; the current fault is kept until the next evaluation
    pub fn update_config(&mut self, config: QualityConfig, crossings: Vec<KnownCrossing>) {
        self.config = config;
        self.crossings = crossings;
    }

    pub fn fault(&self) -> FaultState {
        self.fault
    }

    /// Known crossing within its proximity radius of `position`
    pub fn nearby_crossing(&self, position: GeoPoint) -> Option<&KnownCrossing> {
        self.crossings.iter().find(|c| {
            let radius = c.radius_m.unwrap_or(self.config.default_proximity_m);
            haversine_distance(position, c.position()) <= radius
        })
    }

    /// Evaluate all conditions and update the fault state
    ///
    /// # Arguments
    /// * `seen` - Per-source last-seen times
    /// * `fused` - Current fused state (last known position, rate, RTK)
    /// * `now_ms` - Evaluator clock
    pub fn evaluate(&mut self, seen: &LastSeen, fused: &FusedState, now_ms: u64) -> QualityReport {
        let c = &self.config;
        let map_received = LastSeen::fresh(seen.map_ms, now_ms, c.message_expiration_ms);
        let spat_received = LastSeen::fresh(seen.spat_ms, now_ms, c.critical_expiration_ms);
        let location_received = fused.location_received
            && LastSeen::fresh(seen.location_ms, now_ms, c.critical_expiration_ms);

        let near_crossing = if fused.location_received {
            self.nearby_crossing(fused.position()).map(|c| c.name.clone())
        } else {
            None
        };
        let near = near_crossing.is_some();

        let frequency_low = c.frequency_check
            && fused.interval_samples >= MIN_FREQUENCY_INTERVALS
            && fused
                .fix_frequency_hz()
                .is_some_and(|hz| hz < self.config.min_frequency_hz);

        let next = if near && !map_received {
            FaultState::MapMissing
        } else if near && !spat_received {
            FaultState::SpatMissing
        } else if !location_received {
            FaultState::LocationMissing
        } else if frequency_low {
            FaultState::FrequencyLow
        } else if self.config.rtk_required && near && !fused.rtk.is_corrected() {
            FaultState::RtkMissing
        } else {
            FaultState::None
        };

        let previous = self.fault;
        self.fault = next;
        let transition = match (previous.is_fault(), next.is_fault()) {
            _ if previous == next => None,
            (false, true) => {
                warn!("Fault: {}", next.description());
                Some(FaultTransition::Entered(next))
            }
            (true, false) => {
                info!("Fault cleared: {}", previous.description());
                Some(FaultTransition::Cleared(previous))
            }
            _ => {
                warn!("Fault: {} (was {})", next.description(), previous.description());
                Some(FaultTransition::Changed {
                    from: previous,
                    to: next,
                })
            }
        };

        QualityReport {
            fault: next,
            transition,
            map_received,
            spat_received,
            location_received,
            near_crossing,
        }
    }
}
