//! Simulates a vehicle approaching an active rail crossing
//!
//! Drives the full decision core with synthetic time: a straight approach
//! lane heading north into a crossing, a signal-phase feed that switches to
//! preemption, a GNSS dropout that trips the fault gate, and a stop on the
//! tracks.
//!
//! **Key test**: every alert transition is printed exactly once, the fault
//! clears all active alerts, and the HRI warning only fires inside the
//! crossing.
//!
//! Run with: cargo run -p rcvw-core --example crossing_sim

use std::sync::Arc;

use rcvw_core::crossing::{LaneKind, MapLane, SignalAspect, SignalGroupState};
use rcvw_core::{
    Clock, CoreInputs, DynamicsSample, FixQuality, GeoPoint, KnownCrossing, LocationSample,
    ManualClock, MapMessage, RcvwConfig, RecordingSink, Scheduler, SimpleLaneMatcher,
    SpatMessage, StatusBoard, TickOutcome,
};

const STOP_LAT: f64 = 39.0;
const LON: f64 = -77.0;
const DEG_PER_M: f64 = 1.0 / 111_320.0;
const FIX_PERIOD_MS: u64 = 100;

/// Simple pseudo-random noise generator (deterministic for reproducibility)
struct NoiseGen {
    state: u32,
}

impl NoiseGen {
    fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Returns noise in range [-amplitude, +amplitude]
    fn next(&mut self, amplitude: f64) -> f64 {
        self.state = self.state.wrapping_mul(1103515245).wrapping_add(12345);
        let normalized = (self.state as f64 / u32::MAX as f64) * 2.0 - 1.0;
        normalized * amplitude
    }
}

fn north_of(meters: f64) -> GeoPoint {
    GeoPoint::new(STOP_LAT + meters * DEG_PER_M, LON)
}

fn crossing_map() -> MapMessage {
    MapMessage {
        intersection_id: 1201,
        lanes: vec![
            MapLane {
                lane_number: 0,
                kind: LaneKind::Crossing,
                signal_group: None,
                width_m: 5.0,
                grade: 0.0,
                nodes: vec![north_of(0.5), north_of(12.0)],
            },
            MapLane {
                lane_number: 1,
                kind: LaneKind::Vehicle,
                signal_group: Some(2),
                width_m: 3.6,
                grade: -0.01,
                nodes: vec![north_of(0.0), north_of(-150.0), north_of(-400.0)],
            },
        ],
    }
}

fn spat(aspect: SignalAspect) -> SpatMessage {
    SpatMessage {
        intersection_id: 1201,
        groups: vec![SignalGroupState {
            signal_group: 2,
            aspect,
        }],
    }
}

struct Vehicle {
    position_m: f64,
    speed_mps: f64,
    accel_mps2: f64,
}

impl Vehicle {
    fn step(&mut self, dt_s: f64) {
        self.speed_mps = (self.speed_mps + self.accel_mps2 * dt_s).max(0.0);
        self.position_m += self.speed_mps * dt_s;
    }
}

struct Sim {
    clock: ManualClock,
    inputs: Arc<CoreInputs>,
    scheduler: Scheduler<RecordingSink>,
    vehicle: Vehicle,
    noise: NoiseGen,
}

impl Sim {
    /// Advance one GNSS period: dynamics at 50 Hz, one fix, ten evaluator ticks
    fn run_period(&mut self, gnss_available: bool) {
        for _ in 0..5 {
            let now = self.clock.advance(FIX_PERIOD_MS / 5);
            self.vehicle.step(FIX_PERIOD_MS as f64 / 5000.0);
            self.inputs.on_dynamics(
                &DynamicsSample {
                    timestamp_ms: now,
                    speed_mps: self.vehicle.speed_mps,
                    accel_mps2: self.vehicle.accel_mps2,
                },
                now,
            );
        }

        let now = self.clock.now_ms();
        if gnss_available {
            let p = north_of(self.vehicle.position_m + self.noise.next(0.05));
            self.inputs.on_location(
                &LocationSample {
                    timestamp_ms: now,
                    latitude: p.lat,
                    longitude: p.lon,
                    altitude: 120.0,
                    heading_deg: self.noise.next(0.5).rem_euclid(360.0),
                    speed_mps: self.vehicle.speed_mps + self.noise.next(0.05),
                    hdop: 0.7,
                    fix_quality: FixQuality::FixedRtk,
                },
                now,
            );
        }

        for i in 0..10 {
            let outcome = self.scheduler.tick(now + i);
            if let TickOutcome::Evaluated(report) = outcome {
                if report.crossing.distance_m >= 0.0 && (now / FIX_PERIOD_MS) % 10 == 0 {
                    println!(
                        "  t={:>5}ms  pos={:>7.1}m  v={:>5.1}m/s  dist={:>6.1}m  safe={:>6.1}m",
                        now,
                        self.vehicle.position_m,
                        report.speed_mps,
                        report.crossing.distance_m,
                        report.safe_stop_distance_m
                    );
                }
            }
            for n in self.scheduler.sink_mut().take() {
                println!("  >> [{:?}] {}", n.severity, n.description);
            }
        }
    }

    /// Keep map and signal-phase feeds alive
    fn feed(&self, aspect: SignalAspect) {
        let now = self.clock.now_ms();
        let _ = self.inputs.on_map(&crossing_map(), now);
        self.inputs.on_spat(spat(aspect), now);
    }
}

fn main() {
    let mut config = RcvwConfig::default();
    config.warning.use_vbm_deceleration = true;
    config.known_crossings = vec![KnownCrossing {
        name: "Depot Rd".to_string(),
        latitude: STOP_LAT,
        longitude: LON,
        radius_m: Some(500.0),
    }];

    let status = StatusBoard::new();
    let inputs = Arc::new(CoreInputs::new(
        config.fusion.clone(),
        Arc::new(SimpleLaneMatcher::new(config.crossing.near_lane_extent_pct)),
        Arc::clone(&status),
    ));
    let scheduler = Scheduler::new(config, Arc::clone(&inputs), RecordingSink::new());
    let mut sim = Sim {
        clock: ManualClock::new(0),
        inputs,
        scheduler,
        vehicle: Vehicle {
            position_m: -350.0,
            speed_mps: 20.0,
            accel_mps2: 0.0,
        },
        noise: NoiseGen::new(42),
    };

    println!("=== Rail Crossing Violation Warning Simulation ===\n");
    println!("This simulates: APPROACH → PREEMPTION → BRAKE → GNSS DROPOUT → STOP ON TRACKS → CLEAR\n");

    println!("Phase 1: APPROACH, signal green (5s)");
    for _ in 0..50 {
        sim.feed(SignalAspect::Green);
        sim.run_period(true);
    }

    println!("\nPhase 2: PREEMPTION, train approaching (3s)");
    for _ in 0..30 {
        sim.feed(SignalAspect::Red);
        sim.run_period(true);
    }

    println!("\nPhase 3: DRIVER BRAKES at 4 m/s² (until stopped)");
    sim.vehicle.accel_mps2 = -4.0;
    while sim.vehicle.speed_mps > 0.0 {
        sim.feed(SignalAspect::Red);
        sim.run_period(true);
    }
    sim.vehicle.accel_mps2 = 0.0;
    println!(
        "  Stopped {:.1} m before the stop line",
        -sim.vehicle.position_m
    );

    println!("\nPhase 4: GNSS DROPOUT (1s)");
    for _ in 0..10 {
        sim.feed(SignalAspect::Red);
        sim.run_period(false);
    }

    println!("\nPhase 5: SIGNAL CLEARS, vehicle creeps onto the tracks and stalls");
    sim.vehicle.speed_mps = 2.0;
    while sim.vehicle.position_m < 4.0 {
        sim.feed(SignalAspect::Green);
        sim.run_period(true);
    }
    sim.vehicle.speed_mps = 0.0;
    for _ in 0..20 {
        sim.feed(SignalAspect::Green);
        sim.run_period(true);
    }

    println!("\nPhase 6: VEHICLE CLEARS THE CROSSING");
    sim.vehicle.speed_mps = 5.0;
    while sim.vehicle.position_m < 40.0 {
        sim.feed(SignalAspect::Green);
        sim.run_period(true);
    }

    println!("\n=== Final status ===");
    for (key, value) in status.snapshot() {
        println!("  {:<18} {}", key, value);
    }
}
