//! Operational status board
//!
//! A small key/value map mirroring what the evaluator currently believes
//! about its inputs and alerts. Producers and the evaluator write it on
//! every state change; readers (log dumps, a status endpoint) take copies.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const MAP_RECEIVED: &str = "Map Received";
pub const SPAT_RECEIVED: &str = "Spat Received";
pub const LOCATION_RECEIVED: &str = "Location Received";
pub const RTK_TYPE: &str = "RTK Type";
pub const NEAR_ACTIVE_HRI: &str = "Near Active HRI";
pub const HRI: &str = "HRI";
pub const WARNING: &str = "Warning";
pub const FAULT: &str = "Fault";

/// Thread-safe status key/value map
#[derive(Debug)]
pub struct StatusBoard {
    entries: Mutex<BTreeMap<&'static str, String>>,
}

impl StatusBoard {
    /// Create a board with every key at its idle value, wrapped in Arc for sharing
    pub fn new() -> Arc<Self> {
        let mut entries = BTreeMap::new();
        entries.insert(MAP_RECEIVED, "false".to_string());
        entries.insert(SPAT_RECEIVED, "false".to_string());
        entries.insert(LOCATION_RECEIVED, "false".to_string());
        entries.insert(RTK_TYPE, "none".to_string());
        entries.insert(NEAR_ACTIVE_HRI, String::new());
        entries.insert(HRI, "Not Present".to_string());
        entries.insert(WARNING, "Not Active".to_string());
        entries.insert(FAULT, "None".to_string());
        Arc::new(Self {
            entries: Mutex::new(entries),
        })
    }

    /// Set a value
    ///
    /// # Returns
    /// * `true` if the stored value changed
    pub fn set(&self, key: &'static str, value: impl Into<String>) -> bool {
        let value = value.into();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.get(key) == Some(&value) {
            return false;
        }
        entries.insert(key, value);
        true
    }

    pub fn set_flag(&self, key: &'static str, value: bool) -> bool {
        self.set(key, if value { "true" } else { "false" })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Copy of every entry
    pub fn snapshot(&self) -> BTreeMap<&'static str, String> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
