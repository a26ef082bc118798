//! Warning state machine
//!
//! Four independent latches, one per [`AlertLevel`]. Each is driven by its
//! own predicate every evaluated cycle and emits exactly one notification
//! per transition. Several may be active at once (e.g. Available together
//! with HriWarning).
//!
//! | Level           | Active while                                                   |
//! |-----------------|----------------------------------------------------------------|
//! | Available       | in lane or in the crossing                                     |
//! | ApproachInform  | preempted and not in the crossing                              |
//! | ApproachWarning | preempted, not in the crossing, cannot stop before it          |
//! | HriWarning      | in the crossing at or below the HRI warning speed              |

use log::info;

use crate::alert::{AlertLevel, AlertNotification};
use crate::crossing::CrossingSnapshot;

/// Everything the predicates look at for one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarningInputs {
    pub in_lane: bool,
    pub in_hri: bool,
    pub preemption_active: bool,
    pub speed_mps: f64,
    /// Along-lane distance to the crossing, negative when unknown
    pub crossing_distance_m: f64,
    pub safe_stop_distance_m: f64,
    pub expected_stop_distance_m: f64,
    /// Require observed braking to fall short before warning
    pub deceleration_check: bool,
    pub hri_warning_speed_mps: f64,
}

impl WarningInputs {
    /// Collect inputs from the per-cycle results
    pub fn new(
        crossing: &CrossingSnapshot,
        speed_mps: f64,
        safe_stop_distance_m: f64,
        expected_stop_distance_m: f64,
        deceleration_check: bool,
        hri_warning_speed_mps: f64,
    ) -> Self {
        Self {
            in_lane: crossing.in_lane(),
            in_hri: crossing.in_hri,
            preemption_active: crossing.preemption_active,
            speed_mps,
            crossing_distance_m: crossing.distance_m,
            safe_stop_distance_m,
            expected_stop_distance_m,
            deceleration_check,
            hri_warning_speed_mps,
        }
    }

    /// Whether `level` should be active for these inputs
    pub fn predicate(&self, level: AlertLevel) -> bool {
        match level {
            AlertLevel::Available => self.in_lane || self.in_hri,
            AlertLevel::ApproachInform => self.preemption_active && !self.in_hri,
            AlertLevel::ApproachWarning => {
                let distance = self.crossing_distance_m;
                self.preemption_active
                    && !self.in_hri
                    && distance >= 0.0
                    && distance < self.safe_stop_distance_m
                    && (!self.deceleration_check || self.expected_stop_distance_m > distance)
            }
            AlertLevel::HriWarning => self.in_hri && self.speed_mps <= self.hri_warning_speed_mps,
        }
    }
}

/// One hysteretic alert flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latch {
    pub active: bool,
    /// Evaluator time of the last transition (ms)
    pub changed_at_ms: u64,
}

/// The four alert latches
#[derive(Debug, Default)]
pub struct WarningStateMachine {
    latches: [Latch; 4],
}

impl WarningStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, level: AlertLevel) -> bool {
        self.latches[level.index()].active
    }

    pub fn latch(&self, level: AlertLevel) -> Latch {
        self.latches[level.index()]
    }

    /// Active levels, lowest severity first
    pub fn active_levels(&self) -> Vec<AlertLevel> {
        AlertLevel::ALL
            .into_iter()
            .filter(|l| self.is_active(*l))
            .collect()
    }

    /// Highest active level
    pub fn highest_active(&self) -> Option<AlertLevel> {
        self.active_levels().pop()
    }

    /// Drive every latch from `inputs`
    ///
    /// # Returns
    /// * One notification per latch that changed, lowest severity first
    pub fn evaluate(&mut self, inputs: &WarningInputs, now_ms: u64) -> Vec<AlertNotification> {
        AlertLevel::ALL
            .into_iter()
            .filter_map(|level| self.set(level, inputs.predicate(level), now_ms))
            .collect()
    }

    /// Force every latch off
    ///
    /// # Returns
    /// * One cleared notification per latch that was active, lowest severity first
    pub fn clear_all(&mut self, now_ms: u64) -> Vec<AlertNotification> {
        AlertLevel::ALL
            .into_iter()
            .filter_map(|level| self.set(level, false, now_ms))
            .collect()
    }

    fn set(&mut self, level: AlertLevel, active: bool, now_ms: u64) -> Option<AlertNotification> {
        let latch = &mut self.latches[level.index()];
        if latch.active == active {
            return None;
        }
        latch.active = active;
        latch.changed_at_ms = now_ms;

        if active {
            info!("{} active", level.description());
            Some(AlertNotification::activated(level, now_ms))
        } else {
            info!("{} cleared", level.description());
            Some(AlertNotification::cleared(level, now_ms))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertEvent;
    use crate::stopping::NO_STOP_EXPECTED;

    fn approaching(distance: f64, safe: f64) -> WarningInputs {
        WarningInputs {
            in_lane: true,
            in_hri: false,
            preemption_active: true,
            speed_mps: 20.0,
            crossing_distance_m: distance,
            safe_stop_distance_m: safe,
            expected_stop_distance_m: NO_STOP_EXPECTED,
            deceleration_check: false,
            hri_warning_speed_mps: 1.0,
        }
    }

    #[test]
    fn test_approach_warning_sets_and_clears_once() {
        let mut sm = WarningStateMachine::new();

        let events: Vec<_> = sm
            .evaluate(&approaching(40.0, 55.0), 100)
            .into_iter()
            .map(|n| n.event)
            .collect();
        assert_eq!(
            events,
            vec![
                AlertEvent::Activated(AlertLevel::Available),
                AlertEvent::Activated(AlertLevel::ApproachInform),
                AlertEvent::Activated(AlertLevel::ApproachWarning),
            ]
        );

        // Unchanged predicate: nothing repeated
        assert!(sm.evaluate(&approaching(40.0, 55.0), 200).is_empty());

        let notes = sm.evaluate(&approaching(60.0, 55.0), 300);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].event, AlertEvent::Cleared(AlertLevel::ApproachWarning));
        assert!(sm.evaluate(&approaching(60.0, 55.0), 400).is_empty());
        assert_eq!(sm.latch(AlertLevel::ApproachWarning).changed_at_ms, 300);
    }

    #[test]
    fn test_deceleration_check_suppresses_warning() {
        let mut inputs = approaching(40.0, 55.0);
        inputs.deceleration_check = true;
        inputs.expected_stop_distance_m = 30.0;
        assert!(!inputs.predicate(AlertLevel::ApproachWarning));

        inputs.expected_stop_distance_m = 45.0;
        assert!(inputs.predicate(AlertLevel::ApproachWarning));

        // Not braking at all
        inputs.expected_stop_distance_m = NO_STOP_EXPECTED;
        assert!(inputs.predicate(AlertLevel::ApproachWarning));
    }

    #[test]
    fn test_unknown_distance_never_warns() {
        let inputs = approaching(-1.0, 55.0);
        assert!(!inputs.predicate(AlertLevel::ApproachWarning));
        assert!(inputs.predicate(AlertLevel::ApproachInform));
    }

    #[test]
    fn test_hri_warning_requires_hri_and_slow_speed() {
        let mut inputs = approaching(-1.0, 10.0);
        inputs.in_hri = true;
        inputs.speed_mps = 0.5;
        assert!(inputs.predicate(AlertLevel::HriWarning));
        assert!(inputs.predicate(AlertLevel::Available));
        assert!(!inputs.predicate(AlertLevel::ApproachInform));
        assert!(!inputs.predicate(AlertLevel::ApproachWarning));

        inputs.speed_mps = 1.0;
        assert!(inputs.predicate(AlertLevel::HriWarning));
        inputs.speed_mps = 1.1;
        assert!(!inputs.predicate(AlertLevel::HriWarning));
    }

    #[test]
    fn test_clear_all_emits_one_per_active_latch() {
        let mut sm = WarningStateMachine::new();
        let mut inputs = approaching(-1.0, 10.0);
        inputs.in_hri = true;
        inputs.speed_mps = 0.0;
        sm.evaluate(&inputs, 0);
        assert_eq!(
            sm.active_levels(),
            vec![AlertLevel::Available, AlertLevel::HriWarning]
        );
        assert_eq!(sm.highest_active(), Some(AlertLevel::HriWarning));

        let events: Vec<_> = sm.clear_all(50).into_iter().map(|n| n.event).collect();
        assert_eq!(
            events,
            vec![
                AlertEvent::Cleared(AlertLevel::Available),
                AlertEvent::Cleared(AlertLevel::HriWarning),
            ]
        );
        assert!(sm.active_levels().is_empty());
        assert!(sm.clear_all(60).is_empty());
    }

    #[test]
    fn test_crossing_snapshot_inputs() {
        let snapshot = CrossingSnapshot {
            in_hri: true,
            ..CrossingSnapshot::not_in_map()
        };
        let inputs = WarningInputs::new(&snapshot, 0.0, 0.0, NO_STOP_EXPECTED, false, 1.0);
        assert!(!inputs.in_lane);
        assert!(inputs.predicate(AlertLevel::Available));
        assert_eq!(inputs.crossing_distance_m, -1.0);
    }
}
