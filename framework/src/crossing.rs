//! Crossing context
//!
//! Turns the vehicle position into a per-cycle view of the crossing: which
//! lane the vehicle is in, whether it is inside the crossing itself (the
//! HRI), how far it is from the stop line along the lane, and whether the
//! signal serving that lane is preempted.
//!
//! Lane matching is delegated to a [`MapGeometry`] collaborator.
//! [`SimpleLaneMatcher`] is a self-contained implementation over a flat local
//! projection, good enough for short crossing approaches.
//!
//! Map and signal-phase snapshots are published by producer threads into
//! [`CrossingInputs`] and copied out before every geometry call.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::VehicleConfig;
use crate::geo::{destination_point, haversine_distance, heading_delta, to_local};
use crate::types::GeoPoint;

/// Crossing distance when it cannot be determined
pub const UNKNOWN_DISTANCE: f64 = -1.0;

/// Lane number the map uses for the crossing area itself
pub const HRI_LANE_NUMBER: i32 = 0;

/// Map rejected by the geometry collaborator
#[derive(Debug, Error, PartialEq)]
pub enum MapError {
    #[error("map for intersection {0} has no lanes")]
    NoLanes(u32),
    #[error("lane {lane} has {nodes} node(s), at least 2 are required")]
    TooFewNodes { lane: i32, nodes: usize },
    #[error("lane {0} appears more than once")]
    DuplicateLane(i32),
}

/// Lane type as published in the map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneKind {
    /// Ingress vehicle lane
    #[default]
    Vehicle,
    /// Lane computed from a reference lane
    Computed,
    /// Egress lane (leaving the crossing)
    Egress,
    /// The crossing area over the tracks
    Crossing,
}

/// One lane of a decoded map message
///
/// Nodes run outward from the stop line: node 0 sits at the crossing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLane {
    pub lane_number: i32,
    #[serde(default)]
    pub kind: LaneKind,
    #[serde(default)]
    pub signal_group: Option<u32>,
    /// Lane width (m)
    pub width_m: f64,
    /// Road grade along the lane (rise/run)
    #[serde(default)]
    pub grade: f64,
    pub nodes: Vec<GeoPoint>,
}

/// Decoded map message as delivered by the map feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMessage {
    pub intersection_id: u32,
    pub lanes: Vec<MapLane>,
}

/// A map accepted by the geometry collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionMap {
    pub intersection_id: u32,
    pub lanes: Vec<MapLane>,
}

impl IntersectionMap {
    pub fn new(intersection_id: u32, lanes: Vec<MapLane>) -> Self {
        Self {
            intersection_id,
            lanes,
        }
    }

    pub fn lane(&self, lane_number: i32) -> Option<&MapLane> {
        self.lanes.iter().find(|l| l.lane_number == lane_number)
    }
}

/// Signal head state for one signal group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAspect {
    Dark,
    Red,
    FlashingRed,
    Yellow,
    Green,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalGroupState {
    pub signal_group: u32,
    pub aspect: SignalAspect,
}

/// Decoded signal phase and timing snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatMessage {
    pub intersection_id: u32,
    pub groups: Vec<SignalGroupState>,
}

/// Lane-matching result for one point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneMatch {
    /// Matched lane, negative when unmatched
    pub lane_number: i32,
    /// 1-based index of the segment between node `n-1` and node `n`
    pub lane_segment: i32,
    pub is_in_lane: bool,
    pub is_near_lane: bool,
    pub is_egress: bool,
    pub grade: f64,
}

impl LaneMatch {
    pub fn unmatched() -> Self {
        Self {
            lane_number: -1,
            lane_segment: 0,
            is_in_lane: false,
            is_near_lane: false,
            is_egress: false,
            grade: 0.0,
        }
    }

    /// Point is inside the crossing area
    pub fn is_hri(&self) -> bool {
        self.is_in_lane && self.lane_number == HRI_LANE_NUMBER
    }
}

/// Map-matching collaborator
pub trait MapGeometry: Send + Sync {
    /// Validate a decoded map
    fn load_map(&self, message: &MapMessage) -> Result<IntersectionMap, MapError>;

    /// Match a point (and optional travel heading) against the map lanes
    fn match_point(&self, point: GeoPoint, heading_deg: Option<f64>, map: &IntersectionMap)
        -> LaneMatch;

    fn signal_group_for_lane(&self, lane_number: i32, map: &IntersectionMap) -> Option<u32>;

    fn spat_matches_map(&self, spat: &SpatMessage, map: &IntersectionMap) -> bool {
        spat.intersection_id == map.intersection_id
    }

    fn is_group_red(&self, spat: &SpatMessage, signal_group: u32) -> bool;

    /// Lane nodes, starting at the stop line
    fn lane_nodes(&self, map: &IntersectionMap, lane_number: i32) -> Vec<GeoPoint>;

    fn geodesic_distance(&self, a: GeoPoint, b: GeoPoint) -> f64 {
        haversine_distance(a, b)
    }
}

/// Lane matcher over a flat local projection of each lane polyline
///
/// A point is in a lane when its perpendicular distance to one of the
/// lane's segments is within half the lane width, and near the lane when it
/// is within the width extended by `near_lane_extent_pct`. With a heading,
/// approach lanes only match traffic heading toward the stop line and
/// egress lanes only traffic heading away from it.
#[derive(Debug, Clone)]
pub struct SimpleLaneMatcher {
    near_lane_extent_pct: f64,
}

/// Heading window for lane direction checks (deg)
const LANE_HEADING_TOLERANCE_DEG: f64 = 90.0;

impl SimpleLaneMatcher {
    pub fn new(near_lane_extent_pct: f64) -> Self {
        Self {
            near_lane_extent_pct,
        }
    }

    /// Closest segment of `lane` to `point`
    ///
    /// # Returns
    /// * `(segment_index, lateral_distance_m, travel_bearing_deg)` for the
    ///   nearest segment whose span covers the point
    fn nearest_segment(lane: &MapLane, point: GeoPoint) -> Option<(usize, f64, f64)> {
        let reference = *lane.nodes.first()?;
        let (px, py) = to_local(point, reference);

        let mut best: Option<(usize, f64, f64)> = None;
        for (i, pair) in lane.nodes.windows(2).enumerate() {
            let (ax, ay) = to_local(pair[0], reference);
            let (bx, by) = to_local(pair[1], reference);
            let (dx, dy) = (bx - ax, by - ay);
            let len_sq = dx * dx + dy * dy;
            if len_sq <= f64::EPSILON {
                continue;
            }

            let t = ((px - ax) * dx + (py - ay) * dy) / len_sq;
            if !(0.0..=1.0).contains(&t) {
                continue;
            }
            let (cx, cy) = (ax + t * dx, ay + t * dy);
            let lateral = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt();

            // Bearing of the segment from node i+1 toward node i (toward the stop line)
            let inbound = (-dx).atan2(-dy).to_degrees().rem_euclid(360.0);
            if best.map_or(true, |(_, d, _)| lateral < d) {
                best = Some((i, lateral, inbound));
            }
        }
        best
    }
}

impl MapGeometry for SimpleLaneMatcher {
    fn load_map(&self, message: &MapMessage) -> Result<IntersectionMap, MapError> {
        if message.lanes.is_empty() {
            return Err(MapError::NoLanes(message.intersection_id));
        }
        let mut seen = HashSet::new();
        for lane in &message.lanes {
            if lane.nodes.len() < 2 {
                return Err(MapError::TooFewNodes {
                    lane: lane.lane_number,
                    nodes: lane.nodes.len(),
                });
            }
            if !seen.insert(lane.lane_number) {
                return Err(MapError::DuplicateLane(lane.lane_number));
            }
        }
        Ok(IntersectionMap::new(
            message.intersection_id,
            message.lanes.clone(),
        ))
    }

    fn match_point(
        &self,
        point: GeoPoint,
        heading_deg: Option<f64>,
        map: &IntersectionMap,
    ) -> LaneMatch {
        let extent = 1.0 + self.near_lane_extent_pct / 100.0;
        let mut best: Option<(LaneMatch, f64)> = None;

        for lane in &map.lanes {
            let Some((segment, lateral, inbound)) = Self::nearest_segment(lane, point) else {
                continue;
            };

            if let Some(heading) = heading_deg {
                let travel = match lane.kind {
                    LaneKind::Crossing => None,
                    LaneKind::Egress => Some((inbound + 180.0).rem_euclid(360.0)),
                    LaneKind::Vehicle | LaneKind::Computed => Some(inbound),
                };
                if travel.is_some_and(|t| heading_delta(heading, t) > LANE_HEADING_TOLERANCE_DEG) {
                    continue;
                }
            }

            let half_width = lane.width_m / 2.0;
            let is_in_lane = lateral <= half_width;
            let is_near_lane = !is_in_lane && lateral <= half_width * extent;
            if !is_in_lane && !is_near_lane {
                continue;
            }

            let candidate = LaneMatch {
                lane_number: lane.lane_number,
                lane_segment: segment as i32 + 1,
                is_in_lane,
                is_near_lane,
                is_egress: lane.kind == LaneKind::Egress,
                grade: lane.grade,
            };

            // In-lane beats near-lane, the crossing beats approaches, then closest
            let rank = |m: &LaneMatch, d: f64| {
                (
                    !m.is_in_lane,
                    m.lane_number != HRI_LANE_NUMBER,
                    (d * 1000.0) as i64,
                )
            };
            if best
                .as_ref()
                .map_or(true, |(b, d)| rank(&candidate, lateral) < rank(b, *d))
            {
                best = Some((candidate, lateral));
            }
        }

        best.map_or_else(LaneMatch::unmatched, |(m, _)| m)
    }

    fn signal_group_for_lane(&self, lane_number: i32, map: &IntersectionMap) -> Option<u32> {
        map.lane(lane_number).and_then(|l| l.signal_group)
    }

    fn is_group_red(&self, spat: &SpatMessage, signal_group: u32) -> bool {
        spat.groups.iter().any(|g| {
            g.signal_group == signal_group
                && matches!(g.aspect, SignalAspect::Red | SignalAspect::FlashingRed)
        })
    }

    fn lane_nodes(&self, map: &IntersectionMap, lane_number: i32) -> Vec<GeoPoint> {
        map.lane(lane_number)
            .map(|l| l.nodes.clone())
            .unwrap_or_default()
    }
}

/// How a new map changed the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapUpdate {
    /// First map
    Installed,
    /// Same intersection, last-seen refreshed
    Refreshed,
    /// Different intersection replaced the stored map
    Replaced { previous: u32 },
}

/// Latest map and signal-phase snapshots shared with producers
#[derive(Debug, Default)]
pub struct CrossingInputs {
    map: Mutex<Option<Arc<IntersectionMap>>>,
    spat: Mutex<Option<SpatMessage>>,
}

impl CrossingInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a loaded map
    pub fn install_map(&self, map: IntersectionMap) -> MapUpdate {
        let id = map.intersection_id;
        let mut slot = self.map.lock().unwrap_or_else(|e| e.into_inner());
        let update = match slot.as_ref() {
            None => MapUpdate::Installed,
            Some(current) if current.intersection_id == id => MapUpdate::Refreshed,
            Some(current) => MapUpdate::Replaced {
                previous: current.intersection_id,
            },
        };
        *slot = Some(Arc::new(map));
        drop(slot);

        match update {
            MapUpdate::Installed => info!("Map loaded for intersection {}", id),
            MapUpdate::Replaced { previous } => {
                info!("Map for intersection {} replaced by {}", previous, id)
            }
            MapUpdate::Refreshed => debug!("Map refreshed for intersection {}", id),
        }
        update
    }

    /// Store a signal-phase snapshot regardless of intersection
    pub fn publish_spat(&self, spat: SpatMessage) {
        *self.spat.lock().unwrap_or_else(|e| e.into_inner()) = Some(spat);
    }

    pub fn map(&self) -> Option<Arc<IntersectionMap>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn spat(&self) -> Option<SpatMessage> {
        self.spat.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Where the vehicle sits relative to the mapped lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaneStatus {
    #[default]
    NotInMap,
    InLane,
    NearLane,
}

/// Per-cycle crossing view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossingSnapshot {
    pub lane_status: LaneStatus,
    /// Along-lane distance to the stop line (m) or [`UNKNOWN_DISTANCE`]
    pub distance_m: f64,
    pub grade: f64,
    pub preemption_active: bool,
    /// Reference point or either bumper is inside the crossing
    pub in_hri: bool,
    pub lane_number: i32,
    pub lane_segment: i32,
}

impl CrossingSnapshot {
    pub fn not_in_map() -> Self {
        Self {
            lane_status: LaneStatus::NotInMap,
            distance_m: UNKNOWN_DISTANCE,
            grade: 0.0,
            preemption_active: false,
            in_hri: false,
            lane_number: -1,
            lane_segment: 0,
        }
    }

    pub fn in_lane(&self) -> bool {
        self.lane_status == LaneStatus::InLane
    }
}

/// Per-cycle crossing evaluation
pub struct CrossingContext {
    geometry: Arc<dyn MapGeometry>,
    inputs: Arc<CrossingInputs>,
    vehicle: VehicleConfig,
}

impl CrossingContext {
    pub fn new(
        geometry: Arc<dyn MapGeometry>,
        inputs: Arc<CrossingInputs>,
        vehicle: VehicleConfig,
    ) -> Self {
        Self {
            geometry,
            inputs,
            vehicle,
        }
    }

    pub fn set_vehicle(&mut self, vehicle: VehicleConfig) {
        self.vehicle = vehicle;
    }

    /// Evaluate the vehicle's antenna position against the stored map
    ///
    /// # Arguments
    /// * `position` - GNSS antenna position
    /// * `heading_deg` - Course over ground, `None` until the vehicle has
    ///   moved; lanes are then matched without a direction check and the
    ///   bumpers are not projected
    pub fn evaluate(&self, position: GeoPoint, heading_deg: Option<f64>) -> CrossingSnapshot {
        let Some(map) = self.inputs.map() else {
            return CrossingSnapshot::not_in_map();
        };
        let spat = self.inputs.spat();
        let geometry = self.geometry.as_ref();

        let reference = geometry.match_point(position, heading_deg, &map);
        let in_hri = reference.is_hri()
            || heading_deg.is_some_and(|heading| self.bumper_in_hri(position, heading, &map));

        let lane_status = if reference.lane_number < 0 {
            LaneStatus::NotInMap
        } else if reference.is_in_lane {
            LaneStatus::InLane
        } else if reference.is_near_lane {
            LaneStatus::NearLane
        } else {
            LaneStatus::NotInMap
        };

        let usable_lane = ((reference.is_in_lane && !reference.is_egress) || reference.is_near_lane)
            && reference.lane_number >= 0
            && reference.lane_segment >= 1;
        let spat_matches = spat
            .as_ref()
            .is_some_and(|s| geometry.spat_matches_map(s, &map));

        let (distance_m, preemption_active) = match spat.as_ref() {
            Some(spat) if usable_lane && spat_matches => {
                let preempted = geometry
                    .signal_group_for_lane(reference.lane_number, &map)
                    .is_some_and(|group| geometry.is_group_red(spat, group));
                (self.distance_along_lane(position, &reference, &map), preempted)
            }
            _ => (UNKNOWN_DISTANCE, false),
        };

        CrossingSnapshot {
            lane_status,
            distance_m,
            grade: reference.grade,
            preemption_active,
            in_hri,
            lane_number: reference.lane_number,
            lane_segment: reference.lane_segment,
        }
    }

    /// Project the antenna to each bumper and test for the crossing
    fn bumper_in_hri(&self, position: GeoPoint, heading_deg: f64, map: &IntersectionMap) -> bool {
        let front = destination_point(position, heading_deg, self.vehicle.antenna_from_front_m);
        if self.geometry.match_point(front, Some(heading_deg), map).is_hri() {
            return true;
        }
        let rear = destination_point(position, heading_deg, -self.vehicle.antenna_from_rear_m());
        self.geometry.match_point(rear, Some(heading_deg), map).is_hri()
    }

    /// Node-to-node distance up to the matched segment, then to the vehicle
    fn distance_along_lane(
        &self,
        position: GeoPoint,
        matched: &LaneMatch,
        map: &IntersectionMap,
    ) -> f64 {
        let nodes = self.geometry.lane_nodes(map, matched.lane_number);
        let count = (matched.lane_segment as usize).min(nodes.len());
        let Some(last) = nodes[..count].last() else {
            return UNKNOWN_DISTANCE;
        };

        let along: f64 = nodes[..count]
            .windows(2)
            .map(|pair| self.geometry.geodesic_distance(pair[0], pair[1]))
            .sum();
        along + self.geometry.geodesic_distance(*last, position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Straight north-south road crossing tracks at 39.0 N.
    // Approach lane 1 comes from the south heading north.
    const STOP_LAT: f64 = 39.0;
    const LON: f64 = -77.0;
    const DEG_PER_M: f64 = 1.0 / 111_320.0;

    fn north_of(meters: f64) -> GeoPoint {
        GeoPoint::new(STOP_LAT + meters * DEG_PER_M, LON)
    }

    fn test_map() -> MapMessage {
        MapMessage {
            intersection_id: 42,
            lanes: vec![
                MapLane {
                    lane_number: HRI_LANE_NUMBER,
                    kind: LaneKind::Crossing,
                    signal_group: None,
                    width_m: 4.0,
                    grade: 0.0,
                    nodes: vec![north_of(1.0), north_of(9.0)],
                },
                MapLane {
                    lane_number: 1,
                    kind: LaneKind::Vehicle,
                    signal_group: Some(2),
                    width_m: 4.0,
                    grade: -0.02,
                    nodes: vec![north_of(0.0), north_of(-50.0), north_of(-150.0)],
                },
                MapLane {
                    lane_number: 2,
                    kind: LaneKind::Egress,
                    signal_group: None,
                    width_m: 4.0,
                    grade: 0.0,
                    nodes: vec![north_of(10.0), north_of(100.0)],
                },
            ],
        }
    }

    fn red_spat(id: u32) -> SpatMessage {
        SpatMessage {
            intersection_id: id,
            groups: vec![SignalGroupState {
                signal_group: 2,
                aspect: SignalAspect::Red,
            }],
        }
    }

    fn context(spat: Option<SpatMessage>) -> CrossingContext {
        let matcher = Arc::new(SimpleLaneMatcher::new(50.0));
        let inputs = Arc::new(CrossingInputs::new());
        inputs.install_map(matcher.load_map(&test_map()).unwrap());
        if let Some(spat) = spat {
            inputs.publish_spat(spat);
        }
        CrossingContext::new(matcher, inputs, VehicleConfig::default())
    }

    #[test]
    fn test_load_map_validation() {
        let matcher = SimpleLaneMatcher::new(50.0);
        let mut message = test_map();
        message.lanes[1].nodes.truncate(1);
        assert_eq!(
            matcher.load_map(&message),
            Err(MapError::TooFewNodes { lane: 1, nodes: 1 })
        );

        let mut message = test_map();
        message.lanes[2].lane_number = 1;
        assert_eq!(matcher.load_map(&message), Err(MapError::DuplicateLane(1)));

        let message = MapMessage {
            intersection_id: 7,
            lanes: Vec::new(),
        };
        assert_eq!(matcher.load_map(&message), Err(MapError::NoLanes(7)));
    }

    #[test]
    fn test_match_approach_lane() {
        let matcher = SimpleLaneMatcher::new(50.0);
        let map = matcher.load_map(&test_map()).unwrap();

        let m = matcher.match_point(north_of(-80.0), Some(0.0), &map);
        assert_eq!(m.lane_number, 1);
        assert_eq!(m.lane_segment, 2);
        assert!(m.is_in_lane);
        assert!(!m.is_egress);

        // Wrong direction of travel for an approach lane
        let m = matcher.match_point(north_of(-80.0), Some(180.0), &map);
        assert_eq!(m.lane_number, -1);
    }

    #[test]
    fn test_match_near_lane() {
        let matcher = SimpleLaneMatcher::new(50.0);
        let map = matcher.load_map(&test_map()).unwrap();
        // 2.5 m east of the lane center: outside 2 m, inside 3 m
        let point = GeoPoint::new(
            north_of(-30.0).lat,
            LON + 2.5 * DEG_PER_M / STOP_LAT.to_radians().cos(),
        );
        let m = matcher.match_point(point, Some(0.0), &map);
        assert_eq!(m.lane_number, 1);
        assert!(!m.is_in_lane);
        assert!(m.is_near_lane);
    }

    #[test]
    fn test_distance_along_lane() {
        let ctx = context(Some(red_spat(42)));
        let snapshot = ctx.evaluate(north_of(-80.0), Some(0.0));

        assert_eq!(snapshot.lane_status, LaneStatus::InLane);
        assert_eq!(snapshot.lane_number, 1);
        assert!((snapshot.distance_m - 80.0).abs() < 0.5, "distance {}", snapshot.distance_m);
        assert_eq!(snapshot.grade, -0.02);
        assert!(snapshot.preemption_active);
        assert!(!snapshot.in_hri);
    }

    #[test]
    fn test_distance_unknown_without_matching_spat() {
        let ctx = context(None);
        let snapshot = ctx.evaluate(north_of(-80.0), Some(0.0));
        assert_eq!(snapshot.distance_m, UNKNOWN_DISTANCE);
        assert!(!snapshot.preemption_active);

        let ctx = context(Some(red_spat(99)));
        let snapshot = ctx.evaluate(north_of(-80.0), Some(0.0));
        assert_eq!(snapshot.lane_status, LaneStatus::InLane);
        assert_eq!(snapshot.distance_m, UNKNOWN_DISTANCE);
        assert!(!snapshot.preemption_active);
    }

    #[test]
    fn test_no_preemption_on_green() {
        let mut spat = red_spat(42);
        spat.groups[0].aspect = SignalAspect::Green;
        let snapshot = context(Some(spat)).evaluate(north_of(-80.0), Some(0.0));
        assert!(!snapshot.preemption_active);
        assert!(snapshot.distance_m > 0.0);
    }

    #[test]
    fn test_front_bumper_detects_hri() {
        let ctx = context(Some(red_spat(42)));
        // Antenna 0.5 m short of the crossing, front bumper 1.5 m ahead of it
        let snapshot = ctx.evaluate(north_of(0.5), Some(0.0));
        assert!(snapshot.in_hri);

        let snapshot = ctx.evaluate(north_of(-20.0), Some(0.0));
        assert!(!snapshot.in_hri);
    }

    #[test]
    fn test_reference_point_in_hri() {
        let ctx = context(Some(red_spat(42)));
        let snapshot = ctx.evaluate(north_of(5.0), Some(0.0));
        assert!(snapshot.in_hri);
        assert_eq!(snapshot.lane_number, HRI_LANE_NUMBER);
        assert_eq!(snapshot.lane_status, LaneStatus::InLane);
    }

    #[test]
    fn test_egress_lane_has_no_distance() {
        let ctx = context(Some(red_spat(42)));
        let snapshot = ctx.evaluate(north_of(50.0), Some(0.0));
        assert_eq!(snapshot.lane_number, 2);
        assert_eq!(snapshot.distance_m, UNKNOWN_DISTANCE);
        assert!(!snapshot.preemption_active);
    }

    #[test]
    fn test_near_lane_has_distance_and_preemption() {
        let ctx = context(Some(red_spat(42)));
        // 2.5 m east of the lane center: outside 2 m, inside 3 m
        let point = GeoPoint::new(
            north_of(-30.0).lat,
            LON + 2.5 * DEG_PER_M / STOP_LAT.to_radians().cos(),
        );
        let snapshot = ctx.evaluate(point, Some(0.0));
        assert_eq!(snapshot.lane_status, LaneStatus::NearLane);
        assert_eq!(snapshot.lane_number, 1);
        assert!((snapshot.distance_m - 30.0).abs() < 0.5, "distance {}", snapshot.distance_m);
        assert!(snapshot.preemption_active);
    }

    /// Reports every match on the stop-line segment
    struct StopLineMatcher(SimpleLaneMatcher);

    impl MapGeometry for StopLineMatcher {
        fn load_map(&self, message: &MapMessage) -> Result<IntersectionMap, MapError> {
            self.0.load_map(message)
        }

        fn match_point(
            &self,
            point: GeoPoint,
            heading_deg: Option<f64>,
            map: &IntersectionMap,
        ) -> LaneMatch {
            let mut m = self.0.match_point(point, heading_deg, map);
            if m.lane_number >= 0 {
                m.lane_segment = 0;
            }
            m
        }

        fn signal_group_for_lane(&self, lane_number: i32, map: &IntersectionMap) -> Option<u32> {
            self.0.signal_group_for_lane(lane_number, map)
        }

        fn is_group_red(&self, spat: &SpatMessage, signal_group: u32) -> bool {
            self.0.is_group_red(spat, signal_group)
        }

        fn lane_nodes(&self, map: &IntersectionMap, lane_number: i32) -> Vec<GeoPoint> {
            self.0.lane_nodes(map, lane_number)
        }
    }

    #[test]
    fn test_segment_zero_is_not_usable() {
        let matcher = Arc::new(StopLineMatcher(SimpleLaneMatcher::new(50.0)));
        let inputs = Arc::new(CrossingInputs::new());
        inputs.install_map(matcher.load_map(&test_map()).unwrap());
        inputs.publish_spat(red_spat(42));
        let ctx = CrossingContext::new(matcher, inputs, VehicleConfig::default());

        let snapshot = ctx.evaluate(north_of(-80.0), Some(0.0));
        assert_eq!(snapshot.lane_number, 1);
        assert_eq!(snapshot.lane_segment, 0);
        assert_eq!(snapshot.distance_m, UNKNOWN_DISTANCE);
        assert!(!snapshot.preemption_active);
    }

    #[test]
    fn test_stationary_without_heading_matches_lane() {
        let ctx = context(Some(red_spat(42)));
        let snapshot = ctx.evaluate(north_of(-30.0), None);
        assert_eq!(snapshot.lane_status, LaneStatus::InLane);
        assert_eq!(snapshot.lane_number, 1);
        assert!(snapshot.preemption_active);
        assert!((snapshot.distance_m - 30.0).abs() < 0.5);

        // A heading away from the stop line would reject the approach lane
        let snapshot = ctx.evaluate(north_of(-30.0), Some(180.0));
        assert_eq!(snapshot.lane_number, -1);
    }

    #[test]
    fn test_without_map() {
        let matcher = Arc::new(SimpleLaneMatcher::new(50.0));
        let ctx = CrossingContext::new(
            matcher,
            Arc::new(CrossingInputs::new()),
            VehicleConfig::default(),
        );
        assert_eq!(ctx.evaluate(north_of(-80.0), Some(0.0)), CrossingSnapshot::not_in_map());
    }

    #[test]
    fn test_map_refresh_and_replace() {
        let matcher = SimpleLaneMatcher::new(50.0);
        let inputs = CrossingInputs::new();
        let map = matcher.load_map(&test_map()).unwrap();
        assert_eq!(inputs.install_map(map.clone()), MapUpdate::Installed);
        assert_eq!(inputs.install_map(map.clone()), MapUpdate::Refreshed);

        let mut other = map;
        other.intersection_id = 43;
        assert_eq!(inputs.install_map(other), MapUpdate::Replaced { previous: 42 });
        assert_eq!(inputs.map().unwrap().intersection_id, 43);
    }
}
