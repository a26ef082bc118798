//! Rail Crossing Violation Warning Core
//!
//! The decision core of a highway-rail grade-crossing violation warning
//! (RCVW) function for a connected vehicle. Given GNSS fixes, in-vehicle
//! dynamics, an intersection map and a live signal-phase feed, it decides
//! every control cycle whether the vehicle is approaching, inside or clear
//! of an active rail crossing, and raises or clears driver alerts.
//!
//! ## Features
//!
//! - **Sample Fusion**: GNSS + vehicle-bus speed arbitration, heading-outlier
//!   rejection and fix-rate estimation
//! - **Stopping Models**: legacy friction/incline and literature (AASHTO)
//!   formulas, plus expected stop distance from observed braking
//! - **Four-Level Warnings**: independent hysteretic latches with exactly one
//!   notification per transition
//! - **Fault Gate**: prioritised input-quality faults that suspend evaluation
//! - **Testable Time**: the evaluator is driven by an explicit `tick` with a
//!   pluggable clock
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ GNSS / CAN   │──▶│ SampleFusion │──▶│ StoppingModel │──┐
//! └──────────────┘   └──────────────┘   └───────────────┘  │
//! ┌──────────────┐   ┌─────────────────┐                   ▼
//! │ MAP / SPaT   │──▶│ CrossingContext │──────────▶ WarningStateMachine ──▶ AlertSink
//! └──────────────┘   └─────────────────┘                   ▲
//!                    ┌────────────────┐                    │
//!                    │ QualityMonitor │─── gates ──────────┘
//!                    └────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rcvw_core::{CoreInputs, RcvwConfig, RecordingSink, Scheduler, SimpleLaneMatcher, StatusBoard};
//!
//! let config = RcvwConfig::default();
//! let inputs = Arc::new(CoreInputs::new(
//!     config.fusion.clone(),
//!     Arc::new(SimpleLaneMatcher::new(config.crossing.near_lane_extent_pct)),
//!     StatusBoard::new(),
//! ));
//! let mut scheduler = Scheduler::new(config, Arc::clone(&inputs), RecordingSink::new());
//!
//! // Producers call inputs.on_location(..), inputs.on_map(..), ...
//! let outcome = scheduler.tick(0);
//! println!("{:?}", outcome);
//! ```
//!
//! ## Modules
//!
//! - [`fusion`] - GNSS / dynamics fusion
//! - [`stopping`] - Stopping-distance models and braking estimation
//! - [`crossing`] - Map-matching collaborator and per-cycle crossing view
//! - [`quality`] - Input fault gate
//! - [`warning`] - Alert latches
//! - [`scheduler`] - Evaluator loop and clocks

pub mod alert;
pub mod config;
pub mod crossing;
pub mod fusion;
pub mod geo;
pub mod inputs;
pub mod quality;
pub mod scheduler;
pub mod status;
pub mod stopping;
pub mod types;
pub mod warning;

// Re-export commonly used types
pub use alert::{AlertEvent, AlertLevel, AlertNotification, AlertSink, LogSink, RecordingSink, Severity};
pub use config::{ConfigError, RcvwConfig};
pub use crossing::{
    CrossingSnapshot, LaneStatus, MapError, MapGeometry, MapMessage, SimpleLaneMatcher,
    SpatMessage, UNKNOWN_DISTANCE,
};
pub use fusion::{FusedState, SampleFusion};
pub use inputs::CoreInputs;
pub use quality::{FaultState, KnownCrossing};
pub use scheduler::{Clock, ConfigSlot, ManualClock, MonotonicClock, Scheduler, TickOutcome};
pub use status::StatusBoard;
pub use stopping::{StoppingModel, NO_STOP_EXPECTED};
pub use types::{DynamicsSample, FixQuality, GeoPoint, LocationSample};
