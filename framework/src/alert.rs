//! Outbound driver-facing notifications
//!
//! Every alert-level transition, fault change and configuration change is
//! turned into one `AlertNotification` and handed to an `AlertSink`. The
//! core never talks to a transport directly; the embedding process supplies
//! a sink that broadcasts.

use log::info;
use serde::Serialize;

use crate::quality::FaultState;

/// The four independent alert latches
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Vehicle is on a mapped approach lane or in the crossing
    Available,
    /// Crossing is preempted ahead of the vehicle
    ApproachInform,
    /// Crossing is preempted and the vehicle cannot stop comfortably before it
    ApproachWarning,
    /// Vehicle is stopped (or crawling) on the tracks
    HriWarning,
}

impl AlertLevel {
    /// All levels, lowest severity first
    pub const ALL: [AlertLevel; 4] = [
        AlertLevel::Available,
        AlertLevel::ApproachInform,
        AlertLevel::ApproachWarning,
        AlertLevel::HriWarning,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Severity of the activation notification
    pub fn severity(self) -> Severity {
        match self {
            AlertLevel::Available => Severity::Info,
            AlertLevel::ApproachInform => Severity::Inform,
            AlertLevel::ApproachWarning | AlertLevel::HriWarning => Severity::Warning,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            AlertLevel::Available => "Application Active",
            AlertLevel::ApproachInform => "Train Approaching Crossing",
            AlertLevel::ApproachWarning => "RCVW",
            AlertLevel::HriWarning => "Stopped in HRI",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Available => "available",
            AlertLevel::ApproachInform => "approach_inform",
            AlertLevel::ApproachWarning => "approach_warning",
            AlertLevel::HriWarning => "hri_warning",
        }
    }
}

/// Notification severity, as understood by the driver display
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Inform,
    Warning,
}

/// What a notification reports
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "subject", rename_all = "snake_case")]
pub enum AlertEvent {
    Activated(AlertLevel),
    Cleared(AlertLevel),
    Fault(FaultState),
    FaultCleared(FaultState),
    /// Name of the configuration key that changed
    ConfigChanged(String),
}

/// One outbound notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertNotification {
    pub event: AlertEvent,
    pub severity: Severity,
    pub description: String,
    /// Evaluator clock (ms)
    pub timestamp_ms: u64,
}

impl AlertNotification {
    pub fn activated(level: AlertLevel, timestamp_ms: u64) -> Self {
        Self {
            event: AlertEvent::Activated(level),
            severity: level.severity(),
            description: level.description().to_string(),
            timestamp_ms,
        }
    }

    pub fn cleared(level: AlertLevel, timestamp_ms: u64) -> Self {
        Self {
            event: AlertEvent::Cleared(level),
            severity: Severity::Info,
            description: format!("{} Cleared", level.description()),
            timestamp_ms,
        }
    }

    pub fn fault(kind: FaultState, timestamp_ms: u64) -> Self {
        Self {
            event: AlertEvent::Fault(kind),
            severity: Severity::Inform,
            description: kind.description().to_string(),
            timestamp_ms,
        }
    }

    pub fn fault_cleared(kind: FaultState, timestamp_ms: u64) -> Self {
        Self {
            event: AlertEvent::FaultCleared(kind),
            severity: Severity::Info,
            description: format!("{} Cleared", kind.description()),
            timestamp_ms,
        }
    }

    /// `"<key> value changed to <value>"`
    pub fn config_changed(key: &str, value: &str, timestamp_ms: u64) -> Self {
        Self {
            event: AlertEvent::ConfigChanged(key.to_string()),
            severity: Severity::Info,
            description: format!("{} value changed to {}", key, value),
            timestamp_ms,
        }
    }
}

/// Destination for outbound notifications
pub trait AlertSink {
    fn publish(&mut self, notification: &AlertNotification);
}

impl<S: AlertSink + ?Sized> AlertSink for Box<S> {
    fn publish(&mut self, notification: &AlertNotification) {
        (**self).publish(notification);
    }
}

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    notifications: Vec<AlertNotification>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> &[AlertNotification] {
        &self.notifications
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.notifications.iter().map(|n| n.event.clone()).collect()
    }

    /// Drain everything recorded so far
    pub fn take(&mut self) -> Vec<AlertNotification> {
        std::mem::take(&mut self.notifications)
    }
}

impl AlertSink for RecordingSink {
    fn publish(&mut self, notification: &AlertNotification) {
        self.notifications.push(notification.clone());
    }
}

/// Writes each notification to the log at `info` level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn publish(&mut self, notification: &AlertNotification) {
        info!(
            "[{:?}] {} @ {} ms",
            notification.severity, notification.description, notification.timestamp_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(AlertLevel::Available < AlertLevel::ApproachInform);
        assert!(AlertLevel::ApproachWarning < AlertLevel::HriWarning);
        for (i, level) in AlertLevel::ALL.iter().enumerate() {
            assert_eq!(level.index(), i);
        }
    }

    #[test]
    fn test_severities() {
        assert_eq!(
            AlertNotification::activated(AlertLevel::HriWarning, 0).severity,
            Severity::Warning
        );
        assert_eq!(
            AlertNotification::cleared(AlertLevel::HriWarning, 0).severity,
            Severity::Info
        );
        assert_eq!(
            AlertNotification::fault(FaultState::MapMissing, 0).severity,
            Severity::Inform
        );
    }

    #[test]
    fn test_config_changed_text() {
        let n = AlertNotification::config_changed("stopping.friction", "0.5", 42);
        assert_eq!(n.description, "stopping.friction value changed to 0.5");
        assert_eq!(n.event, AlertEvent::ConfigChanged("stopping.friction".to_string()));
    }

    #[test]
    fn test_serializes_to_json() {
        let n = AlertNotification::activated(AlertLevel::ApproachWarning, 1_500);
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event"]["type"], "activated");
        assert_eq!(json["event"]["subject"], "approach_warning");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["timestamp_ms"], 1_500);
    }

    #[test]
    fn test_recording_sink_through_box() {
        let mut sink: Box<RecordingSink> = Box::new(RecordingSink::new());
        sink.publish(&AlertNotification::activated(AlertLevel::Available, 1));
        assert_eq!(sink.events(), vec![AlertEvent::Activated(AlertLevel::Available)]);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.notifications().is_empty());
    }
}
