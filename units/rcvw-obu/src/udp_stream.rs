/// UDP alert streaming
/// One JSON datagram per notification, connectionless and fire-and-forget
use std::net::UdpSocket;

use log::{info, warn};
use rcvw_core::{AlertNotification, AlertSink};

pub struct UdpAlertSink {
    socket: Option<UdpSocket>,
    target_addr: String,
    send_failures: u32,
}

impl UdpAlertSink {
    pub fn new(target_addr: &str) -> Self {
        info!("UDP alert client created for: {}", target_addr);

        Self {
            socket: None,
            target_addr: target_addr.to_string(),
            send_failures: 0,
        }
    }

    /// Initialize the UDP socket (bind to any available port)
    pub fn init(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Initializing UDP socket for {}", self.target_addr);

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(false)?;

        self.socket = Some(socket);
        info!("UDP socket ready");

        Ok(())
    }

    /// Send data to the receiver (fire and forget)
    pub fn send(&self, data: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(ref socket) = self.socket {
            socket.send_to(data, &self.target_addr)?;
            Ok(())
        } else {
            Err("UDP socket not initialized".into())
        }
    }

    /// Check if socket is initialized
    pub fn is_ready(&self) -> bool {
        self.socket.is_some()
    }

    pub fn send_failures(&self) -> u32 {
        self.send_failures
    }
}

impl AlertSink for UdpAlertSink {
    fn publish(&mut self, notification: &AlertNotification) {
        let result = match serde_json::to_vec(notification) {
            Ok(payload) => self.send(&payload),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            self.send_failures += 1;
            warn!("UDP alert to {} failed: {}", self.target_addr, e);
        }
    }
}

/// Publishes every notification to each inner sink in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn AlertSink + Send>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn AlertSink + Send>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutSink {
    fn publish(&mut self, notification: &AlertNotification) {
        for sink in &mut self.sinks {
            sink.publish(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rcvw_core::AlertLevel;

    #[test]
    fn test_publish_sends_json_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let addr = receiver.local_addr().unwrap().to_string();

        let mut sink = UdpAlertSink::new(&addr);
        sink.init().unwrap();
        assert!(sink.is_ready());
        sink.publish(&AlertNotification::activated(AlertLevel::ApproachWarning, 1_500));

        let mut buf = [0u8; 1024];
        let n = receiver.recv(&mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(value["description"], "RCVW");
        assert_eq!(value["timestamp_ms"], 1_500);
        assert_eq!(value["event"]["type"], "activated");
        assert_eq!(sink.send_failures(), 0);
    }

    #[test]
    fn test_uninitialized_sink_counts_failure() {
        let mut sink = UdpAlertSink::new("127.0.0.1:9");
        sink.publish(&AlertNotification::activated(AlertLevel::Available, 0));
        assert_eq!(sink.send_failures(), 1);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        use std::sync::{Arc, Mutex};

        struct Shared(Arc<Mutex<Vec<String>>>);
        impl AlertSink for Shared {
            fn publish(&mut self, notification: &AlertNotification) {
                self.0.lock().unwrap().push(notification.description.clone());
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut fanout = FanoutSink::new();
        fanout.push(Box::new(Shared(Arc::clone(&seen))));
        fanout.push(Box::new(Shared(Arc::clone(&seen))));
        assert_eq!(fanout.len(), 2);

        fanout.publish(&AlertNotification::cleared(AlertLevel::HriWarning, 10));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["Stopped in HRI Cleared".to_string(); 2]
        );
    }
}
