//! NMEA 0183 GNSS Parser
//!
//! Pure Rust, byte-fed parser for RTK-capable GNSS receivers. It pairs the
//! two sentences a crossing-warning unit needs:
//!
//! - **RMC**: position, ground speed, course over ground, validity
//! - **GGA**: fix quality (including RTK fixed/float), HDOP, altitude
//!
//! A [`GnssFix`] is produced when a valid RMC completes after a GGA carrying
//! the same UTC time, so every fix has a consistent position/quality pair.
//!
//! # Example
//!
//! ```no_run
//! use nmea_gnss::NmeaParser;
//!
//! let mut parser = NmeaParser::new();
//! # let uart_bytes: Vec<u8> = Vec::new();
//!
//! // Feed bytes from the serial port
//! for byte in uart_bytes {
//!     if parser.feed_byte(byte) {
//!         if let Some(fix) = parser.last_fix() {
//!             println!("Position: {}, {} ({:?})", fix.lat, fix.lon, fix.quality);
//!             println!("Speed: {:.1} m/s", fix.speed_mps);
//!         }
//!     }
//! }
//! ```

#[cfg(feature = "logging")]
use log::{debug, warn};

const LINE_CAPACITY: usize = 120;
const KNOTS_TO_MPS: f64 = 0.514444;

/// GGA fix quality indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GgaQuality {
    #[default]
    Invalid,
    Autonomous,
    Differential,
    Pps,
    RtkFixed,
    RtkFloat,
    Estimated,
    Other(u8),
}

impl GgaQuality {
    pub fn from_indicator(value: u8) -> Self {
        match value {
            0 => GgaQuality::Invalid,
            1 => GgaQuality::Autonomous,
            2 => GgaQuality::Differential,
            3 => GgaQuality::Pps,
            4 => GgaQuality::RtkFixed,
            5 => GgaQuality::RtkFloat,
            6 => GgaQuality::Estimated,
            other => GgaQuality::Other(other),
        }
    }
}

/// UTC time of day from an NMEA time field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UtcTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millis: u16,
}

impl UtcTime {
    /// Milliseconds since midnight
    pub fn millis_of_day(&self) -> u32 {
        ((self.hour as u32 * 60 + self.minute as u32) * 60 + self.second as u32) * 1000
            + self.millis as u32
    }
}

/// One combined RMC + GGA fix
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GnssFix {
    pub time: UtcTime,
    /// Latitude in degrees (positive = North, negative = South)
    pub lat: f64,
    /// Longitude in degrees (positive = East, negative = West)
    pub lon: f64,
    /// Altitude above mean sea level (m)
    pub altitude_m: f64,
    /// Ground speed in m/s
    pub speed_mps: f64,
    /// Course over ground in degrees (0 = north, clockwise)
    pub course_deg: f64,
    pub hdop: f64,
    pub satellites: u8,
    pub quality: GgaQuality,
}

#[derive(Debug, Clone, Copy)]
struct GgaData {
    time: UtcTime,
    altitude_m: f64,
    hdop: f64,
    satellites: u8,
    quality: GgaQuality,
}

/// NMEA sentence parser
pub struct NmeaParser {
    line_buffer: [u8; LINE_CAPACITY],
    line_len: usize,
    pending_gga: Option<GgaData>,
    last_fix: Option<GnssFix>,
    /// Course is omitted by some receivers when stationary; keep the last one
    last_course_deg: f64,
    checksum_errors: u32,
}

impl NmeaParser {
    pub fn new() -> Self {
        Self {
            line_buffer: [0; LINE_CAPACITY],
            line_len: 0,
            pending_gga: None,
            last_fix: None,
            last_course_deg: 0.0,
            checksum_errors: 0,
        }
    }

    /// Feed a single byte from the receiver
    ///
    /// Returns `true` when a sentence completed a new [`GnssFix`].
    pub fn feed_byte(&mut self, byte: u8) -> bool {
        match byte {
            b'$' => {
                self.line_len = 0;
                self.line_buffer[self.line_len] = byte;
                self.line_len += 1;
                false
            }
            b'\r' => false,
            b'\n' => {
                if self.line_len > 0 {
                    let produced = self.parse_line();
                    self.line_len = 0;
                    produced
                } else {
                    false
                }
            }
            _ => {
                if self.line_len < LINE_CAPACITY {
                    self.line_buffer[self.line_len] = byte;
                    self.line_len += 1;
                }
                false
            }
        }
    }

    /// Feed a complete sentence (with or without line terminator)
    pub fn feed_sentence(&mut self, sentence: &str) -> bool {
        let mut produced = false;
        for byte in sentence.trim_end().bytes() {
            produced |= self.feed_byte(byte);
        }
        produced | self.feed_byte(b'\n')
    }

    /// Most recent combined fix
    pub fn last_fix(&self) -> Option<&GnssFix> {
        self.last_fix.as_ref()
    }

    /// Sentences dropped because of a bad checksum
    pub fn checksum_errors(&self) -> u32 {
        self.checksum_errors
    }

    fn parse_line(&mut self) -> bool {
        let len = self.line_len;
        let mut local_buf = [0u8; LINE_CAPACITY];
        local_buf[..len].copy_from_slice(&self.line_buffer[..len]);

        let Ok(line) = std::str::from_utf8(&local_buf[..len]) else {
            return false;
        };
        let Some(body) = verify_checksum(line) else {
            self.checksum_errors += 1;
            #[cfg(feature = "logging")]
            warn!("NMEA checksum mismatch: {}", line);
            return false;
        };

        let fields: Vec<&str> = body.split(',').collect();
        match fields.first().map(|talker| talker.get(2..).unwrap_or("")) {
            Some("GGA") => {
                self.parse_gga(&fields);
                false
            }
            Some("RMC") => self.parse_rmc(&fields),
            _ => false,
        }
    }

    fn parse_gga(&mut self, fields: &[&str]) {
        if fields.len() < 10 {
            return;
        }
        let Some(time) = parse_time(fields[1]) else {
            return;
        };
        let quality = fields[6]
            .parse::<u8>()
            .map(GgaQuality::from_indicator)
            .unwrap_or_default();

        self.pending_gga = Some(GgaData {
            time,
            altitude_m: fields[9].parse().unwrap_or(0.0),
            hdop: fields[8].parse().unwrap_or(0.0),
            satellites: fields[7].parse().unwrap_or(0),
            quality,
        });
    }

    fn parse_rmc(&mut self, fields: &[&str]) -> bool {
        if fields.len() < 10 || fields[2] != "A" {
            return false;
        }
        let Some(time) = parse_time(fields[1]) else {
            return false;
        };
        let Some(gga) = self.pending_gga.filter(|g| g.time == time) else {
            #[cfg(feature = "logging")]
            debug!("RMC at {:?} without matching GGA", time);
            return false;
        };
        let (Some(lat), Some(lon)) = (
            parse_coordinate(fields[3], fields[4]),
            parse_coordinate(fields[5], fields[6]),
        ) else {
            return false;
        };

        let speed_mps = fields[7].parse::<f64>().map_or(0.0, |knots| knots * KNOTS_TO_MPS);
        if let Ok(course) = fields[8].parse::<f64>() {
            self.last_course_deg = course;
        }

        self.last_fix = Some(GnssFix {
            time,
            lat,
            lon,
            altitude_m: gga.altitude_m,
            speed_mps,
            course_deg: self.last_course_deg,
            hdop: gga.hdop,
            satellites: gga.satellites,
            quality: gga.quality,
        });
        self.pending_gga = None;
        true
    }
}

impl Default for NmeaParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip `$` and `*hh`, returning the body when the checksum matches
///
/// Sentences without a checksum are accepted as-is.
fn verify_checksum(line: &str) -> Option<&str> {
    let line = line.strip_prefix('$')?;
    let Some((body, checksum)) = line.split_once('*') else {
        return Some(line);
    };
    let expected = u8::from_str_radix(checksum.trim(), 16).ok()?;
    let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);
    (actual == expected).then_some(body)
}

/// Parse NMEA coordinate field (ddmm.mmmm format)
fn parse_coordinate(coord_str: &str, dir_str: &str) -> Option<f64> {
    if coord_str.is_empty() || dir_str.is_empty() {
        return None;
    }

    let value = coord_str.parse::<f64>().ok()?;

    let degrees = (value / 100.0).floor();
    let minutes = value - (degrees * 100.0);

    let mut decimal = degrees + (minutes / 60.0);

    if dir_str == "S" || dir_str == "W" {
        decimal = -decimal;
    }

    Some(decimal)
}

/// Parse NMEA time field (hhmmss.ss format)
fn parse_time(time_str: &str) -> Option<UtcTime> {
    if time_str.len() < 6 {
        return None;
    }

    let hour = time_str.get(0..2)?.parse::<u8>().ok()?;
    let minute = time_str.get(2..4)?.parse::<u8>().ok()?;
    let second = time_str.get(4..6)?.parse::<u8>().ok()?;
    let millis = match time_str.get(6..) {
        Some(frac) if frac.starts_with('.') && frac.len() > 1 => {
            (format!("0{}", frac).parse::<f64>().ok()? * 1000.0).round() as u16
        }
        _ => 0,
    };

    Some(UtcTime {
        hour,
        minute,
        second,
        millis,
    })
}
