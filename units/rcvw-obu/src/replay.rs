//! Recorded-input replay
//!
//! A recording is a JSON-lines file of decoded inputs, one record per line:
//!
//! ```text
//! {"at_ms":0,"kind":"map","intersection_id":1201,"lanes":[...]}
//! {"at_ms":0,"kind":"spat","intersection_id":1201,"groups":[...]}
//! {"at_ms":100,"kind":"location","timestamp_ms":0,"latitude":39.0,...}
//! {"at_ms":100,"kind":"nmea","sentence":"$GNGGA,..."}
//! {"at_ms":120,"kind":"dynamics","timestamp_ms":0,"speed_mps":12.0,"accel_mps2":0.0}
//! {"at_ms":5000,"kind":"weather","itis":4884}
//! ```
//!
//! Each source gets its own producer thread, so the core sees the same
//! interleaving it would with live receivers. Sample timestamps are replaced
//! with the replay clock at delivery. NMEA fixes keep their UTC spacing,
//! anchored to the replay clock at the first fix.

use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use nmea_gnss::{GgaQuality, GnssFix, NmeaParser};
use rcvw_core::{
    Clock, CoreInputs, DynamicsSample, FixQuality, LocationSample, MapMessage, SpatMessage,
};
use serde::Deserialize;

/// One recorded input
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputRecord {
    Map(MapMessage),
    Spat(SpatMessage),
    Location(LocationSample),
    Dynamics(DynamicsSample),
    Weather { itis: u32 },
    Nmea { sentence: String },
}

impl InputRecord {
    /// Producer thread this record belongs to
    pub fn source(&self) -> &'static str {
        match self {
            InputRecord::Map(_) => "map",
            InputRecord::Spat(_) => "spat",
            InputRecord::Location(_) | InputRecord::Nmea { .. } => "gnss",
            InputRecord::Dynamics(_) => "dynamics",
            InputRecord::Weather { .. } => "weather",
        }
    }
}

/// A record with its offset from the start of the replay
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimedRecord {
    pub at_ms: u64,
    #[serde(flatten)]
    pub record: InputRecord,
}

/// Parse a recording; blank lines and `#` comments are skipped
///
/// # Returns
/// Records grouped by source, each group in file order
pub fn parse_recording<R: BufRead>(
    reader: R,
) -> Result<Vec<(&'static str, Vec<TimedRecord>)>, Box<dyn std::error::Error>> {
    let mut groups: Vec<(&'static str, Vec<TimedRecord>)> = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record: TimedRecord = serde_json::from_str(trimmed)
            .map_err(|e| format!("line {}: {}", index + 1, e))?;

        let source = record.record.source();
        match groups.iter_mut().find(|(name, _)| *name == source) {
            Some((_, records)) => records.push(record),
            None => groups.push((source, vec![record])),
        }
    }

    Ok(groups)
}

const MS_PER_DAY: i64 = 86_400_000;

/// Convert a combined NMEA fix into a core location sample
pub fn location_from_fix(fix: &GnssFix, timestamp_ms: u64) -> LocationSample {
    LocationSample {
        timestamp_ms,
        latitude: fix.lat,
        longitude: fix.lon,
        altitude: fix.altitude_m,
        heading_deg: fix.course_deg,
        speed_mps: fix.speed_mps,
        hdop: fix.hdop,
        fix_quality: match fix.quality {
            GgaQuality::RtkFixed => FixQuality::FixedRtk,
            GgaQuality::RtkFloat => FixQuality::FloatRtk,
            _ => FixQuality::None,
        },
    }
}

/// Hands records to the core
pub struct Delivery {
    inputs: Arc<CoreInputs>,
    parser: NmeaParser,
    /// UTC millisecond of day and replay time of the first fix
    utc_anchor: Option<(u32, u64)>,
}

impl Delivery {
    pub fn new(inputs: Arc<CoreInputs>) -> Self {
        Self {
            inputs,
            parser: NmeaParser::new(),
            utc_anchor: None,
        }
    }

    pub fn deliver(&mut self, record: &InputRecord, now_ms: u64) {
        match record {
            InputRecord::Map(map) => {
                if let Err(e) = self.inputs.on_map(map, now_ms) {
                    debug!("Recorded map rejected: {}", e);
                }
            }
            InputRecord::Spat(spat) => {
                self.inputs.on_spat(spat.clone(), now_ms);
            }
            InputRecord::Location(sample) => {
                let sample = LocationSample {
                    timestamp_ms: now_ms,
                    ..*sample
                };
                self.inputs.on_location(&sample, now_ms);
            }
            InputRecord::Dynamics(sample) => {
                let sample = DynamicsSample {
                    timestamp_ms: now_ms,
                    ..*sample
                };
                self.inputs.on_dynamics(&sample, now_ms);
            }
            InputRecord::Weather { itis } => {
                self.inputs.on_weather(*itis);
            }
            InputRecord::Nmea { sentence } => {
                if self.parser.feed_sentence(sentence) {
                    self.feed_fix(now_ms);
                }
            }
        }
    }

    /// Feed raw receiver bytes
    pub fn deliver_byte(&mut self, byte: u8, now_ms: u64) {
        if self.parser.feed_byte(byte) {
            self.feed_fix(now_ms);
        }
    }

    fn feed_fix(&mut self, now_ms: u64) {
        let Some(fix) = self.parser.last_fix().copied() else {
            return;
        };
        let timestamp_ms = self.fix_timestamp(fix.time.millis_of_day(), now_ms);
        self.inputs.on_location(&location_from_fix(&fix, timestamp_ms), now_ms);
    }

    /// Replay time of a fix, keeping the receiver's spacing across midnight
    fn fix_timestamp(&mut self, utc_ms: u32, now_ms: u64) -> u64 {
        let (anchor_utc, anchor_now) = *self.utc_anchor.get_or_insert((utc_ms, now_ms));
        let elapsed = (utc_ms as i64 - anchor_utc as i64).rem_euclid(MS_PER_DAY);
        anchor_now + elapsed as u64
    }
}

/// Start one producer thread per source in the recording
pub fn spawn_replay(
    path: &Path,
    inputs: Arc<CoreInputs>,
    clock: Arc<dyn Clock>,
    stop: Arc<AtomicBool>,
) -> Result<Vec<JoinHandle<()>>, Box<dyn std::error::Error>> {
    let file = fs::File::open(path)?;
    let groups = parse_recording(BufReader::new(file))?;
    let start_ms = clock.now_ms();

    let mut handles = Vec::new();
    for (source, records) in groups {
        info!("Replaying {} {} records", records.len(), source);
        let mut delivery = Delivery::new(Arc::clone(&inputs));
        let clock = Arc::clone(&clock);
        let stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name(format!("replay-{}", source))
            .spawn(move || {
                for timed in records {
                    let due = start_ms + timed.at_ms;
                    while !stop.load(Ordering::Relaxed) && clock.now_ms() < due {
                        let wait = due.saturating_sub(clock.now_ms()).min(50);
                        thread::sleep(Duration::from_millis(wait.max(1)));
                    }
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    delivery.deliver(&timed.record, clock.now_ms());
                }
                info!("Replay of {} finished", source);
            })?;
        handles.push(handle);
    }

    Ok(handles)
}

/// Read raw NMEA bytes from a serial device or capture file
pub fn spawn_gnss_reader(
    path: &Path,
    inputs: Arc<CoreInputs>,
    clock: Arc<dyn Clock>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, Box<dyn std::error::Error>> {
    let file = fs::File::open(path)?;
    let display = path.display().to_string();
    info!("Reading NMEA from {}", display);

    let handle = thread::Builder::new()
        .name("gnss".to_string())
        .spawn(move || {
            let mut delivery = Delivery::new(inputs);
            let mut reader = BufReader::new(file);
            let mut buf = [0u8; 256];
            while !stop.load(Ordering::Relaxed) {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        info!("GNSS source {} closed", display);
                        break;
                    }
                    Ok(n) => {
                        let now = clock.now_ms();
                        for &byte in &buf[..n] {
                            delivery.deliver_byte(byte, now);
                        }
                    }
                    Err(e) => {
                        warn!("GNSS read failed on {}: {}", display, e);
                        break;
                    }
                }
            }
        })?;

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcvw_core::config::FusionConfig;
    use rcvw_core::{SimpleLaneMatcher, StatusBoard};

    fn inputs() -> Arc<CoreInputs> {
        Arc::new(CoreInputs::new(
            FusionConfig::default(),
            Arc::new(SimpleLaneMatcher::new(50.0)),
            StatusBoard::new(),
        ))
    }

    const RECORDING: &str = r#"
# short approach
{"at_ms":0,"kind":"spat","intersection_id":7,"groups":[{"signal_group":1,"aspect":"red"}]}
{"at_ms":100,"kind":"location","timestamp_ms":0,"latitude":39.0,"longitude":-77.0,"heading_deg":0.0,"speed_mps":10.0,"fix_quality":"fixed_rtk"}
{"at_ms":110,"kind":"dynamics","timestamp_ms":0,"speed_mps":9.5,"accel_mps2":-0.5}
{"at_ms":200,"kind":"location","timestamp_ms":0,"latitude":39.0001,"longitude":-77.0,"heading_deg":0.0,"speed_mps":10.0}
{"at_ms":300,"kind":"weather","itis":4884}
"#;

    #[test]
    fn test_parse_groups_by_source() {
        let groups = parse_recording(RECORDING.as_bytes()).unwrap();
        let names: Vec<&str> = groups.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["spat", "gnss", "dynamics", "weather"]);

        let gnss = &groups[1].1;
        assert_eq!(gnss.len(), 2);
        assert_eq!(gnss[1].at_ms, 200);
        match &gnss[0].record {
            InputRecord::Location(sample) => {
                assert_eq!(sample.fix_quality, FixQuality::FixedRtk);
                assert_eq!(sample.hdop, 0.0);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_names_line() {
        let err = parse_recording("{\"at_ms\":0,\"kind\":\"bogus\"}\n".as_bytes()).unwrap_err();
        assert!(err.to_string().starts_with("line 1"));
    }

    #[test]
    fn test_delivery_restamps_samples() {
        let inputs = inputs();
        let mut delivery = Delivery::new(Arc::clone(&inputs));
        let groups = parse_recording(RECORDING.as_bytes()).unwrap();

        for (_, records) in &groups {
            for timed in records {
                delivery.deliver(&timed.record, 1_000 + timed.at_ms);
            }
        }

        let fused = inputs.fusion.snapshot();
        assert!(fused.location_received);
        assert_eq!(fused.speed_time_ms, 1_200);
        assert!(inputs.crossing.spat().is_some());
    }

    #[test]
    fn test_location_from_fix() {
        let fix = GnssFix {
            lat: 39.5,
            lon: -77.5,
            speed_mps: 3.0,
            course_deg: 270.0,
            hdop: 0.9,
            altitude_m: 80.0,
            quality: GgaQuality::RtkFloat,
            ..GnssFix::default()
        };
        let sample = location_from_fix(&fix, 42);
        assert_eq!(sample.timestamp_ms, 42);
        assert_eq!(sample.latitude, 39.5);
        assert_eq!(sample.fix_quality, FixQuality::FloatRtk);
        assert_eq!(sample.heading_deg, 270.0);

        let autonomous = GnssFix {
            quality: GgaQuality::Autonomous,
            ..fix
        };
        assert_eq!(location_from_fix(&autonomous, 0).fix_quality, FixQuality::None);
    }

    fn with_checksum(body: &str) -> String {
        let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${}*{:02X}\r\n", body, sum)
    }

    fn fix_pair(time: &str, north: &str) -> String {
        let gga = format!("GNGGA,{},{},N,07700.0000,W,4,12,0.8,100.0,M,0.0,M,,", time, north);
        let rmc = format!("GNRMC,{},A,{},N,07700.0000,W,019.4,000.0,191026,,,D", time, north);
        format!("{}{}", with_checksum(&gga), with_checksum(&rmc))
    }

    #[test]
    fn test_fixes_in_one_chunk_are_all_fused() {
        let inputs = inputs();
        let mut delivery = Delivery::new(Arc::clone(&inputs));
        let chunk = [
            fix_pair("123519.00", "3900.0000"),
            fix_pair("123519.10", "3900.0005"),
            fix_pair("123519.20", "3900.0010"),
        ]
        .concat();

        for byte in chunk.bytes() {
            delivery.deliver_byte(byte, 5_000);
        }

        let fused = inputs.fusion.snapshot();
        assert_eq!(fused.sequence, 3);
        assert_eq!(fused.speed_time_ms, 5_200);
        assert_eq!(fused.prev_speed_time_ms, 5_100);
    }

    #[test]
    fn test_fix_spacing_survives_midnight() {
        let mut delivery = Delivery::new(inputs());
        assert_eq!(delivery.fix_timestamp(86_399_900, 1_000), 1_000);
        assert_eq!(delivery.fix_timestamp(0, 1_000), 1_100);
        assert_eq!(delivery.fix_timestamp(100, 1_050), 1_200);
    }
}
