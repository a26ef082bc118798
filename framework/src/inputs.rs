//! Producer-facing entry points
//!
//! One shared [`CoreInputs`] is handed to every producer thread (GNSS,
//! vehicle bus, map feed, signal-phase feed, weather advisories). Each call
//! takes only the lock of the structure it publishes into and never waits
//! on the evaluator.

use std::sync::Arc;

use log::{info, warn};

use crate::crossing::{CrossingInputs, MapError, MapGeometry, MapMessage, MapUpdate, SpatMessage};
use crate::config::FusionConfig;
use crate::fusion::{LocationOutcome, LocationReport, SampleFusion};
use crate::quality::InputTracker;
use crate::status::StatusBoard;
use crate::stopping::{RoadCondition, WeatherState};
use crate::types::{DynamicsSample, LocationSample};

/// Shared input state written by producers and read by the evaluator
pub struct CoreInputs {
    pub fusion: SampleFusion,
    pub crossing: Arc<CrossingInputs>,
    pub tracker: InputTracker,
    pub weather: WeatherState,
    pub geometry: Arc<dyn MapGeometry>,
    pub status: Arc<StatusBoard>,
}

impl CoreInputs {
    pub fn new(fusion: FusionConfig, geometry: Arc<dyn MapGeometry>, status: Arc<StatusBoard>) -> Self {
        Self {
            fusion: SampleFusion::new(fusion),
            crossing: Arc::new(CrossingInputs::new()),
            tracker: InputTracker::new(),
            weather: WeatherState::new(),
            geometry,
            status,
        }
    }

    /// Deliver a GNSS fix
    pub fn on_location(&self, sample: &LocationSample, now_ms: u64) -> LocationReport {
        let report = self.fusion.ingest_location(sample, now_ms);
        if report.outcome != LocationOutcome::Duplicate {
            self.tracker.record_location(now_ms);
        }
        report
    }

    /// Deliver a vehicle-bus dynamics sample
    pub fn on_dynamics(&self, sample: &DynamicsSample, now_ms: u64) {
        self.fusion.ingest_dynamics(sample, now_ms);
    }

    /// Deliver a decoded map message
    ///
    /// A map the geometry collaborator rejects is treated as not received.
    pub fn on_map(&self, message: &MapMessage, now_ms: u64) -> Result<MapUpdate, MapError> {
        let map = self.geometry.load_map(message).map_err(|e| {
            warn!("Rejected map for intersection {}: {}", message.intersection_id, e);
            e
        })?;
        let update = self.crossing.install_map(map);
        self.tracker.record_map(now_ms);
        Ok(update)
    }

    /// Deliver a signal-phase snapshot
    ///
    /// The snapshot is always stored; it only counts as received when it
    /// belongs to the stored map's intersection.
    ///
    /// # Returns
    /// * `true` if the snapshot matched the stored map
    pub fn on_spat(&self, spat: SpatMessage, now_ms: u64) -> bool {
        let matches = self
            .crossing
            .map()
            .is_some_and(|map| self.geometry.spat_matches_map(&spat, &map));
        self.crossing.publish_spat(spat);
        if matches {
            self.tracker.record_spat(now_ms);
        }
        matches
    }

    /// Deliver a road-weather advisory (ITIS code)
    pub fn on_weather(&self, itis_code: u32) -> Option<RoadCondition> {
        let changed = self.weather.apply_itis(itis_code);
        if let Some(condition) = changed {
            info!(
                "Road condition now {:?} (friction factor {})",
                condition,
                condition.friction_factor()
            );
        }
        changed
    }
}
