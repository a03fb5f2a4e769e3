//! Sensor reading type and device line parser.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};

/// Marker that starts a comment line in the device stream.
pub const COMMENT_PREFIX: char = '#';

/// One temperature/humidity sample reported by the sensor.
///
/// The device emits lines of the form `serial, temperature, humidity, touch`.
/// The timestamp is not part of the line; it is stamped when the line is
/// parsed.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorReading {
    /// Serial number of the sensor unit.
    pub serial: u64,
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Relative humidity percentage.
    pub humidity: f32,
    /// Whether the touch flag was set on this sample.
    pub touched: bool,
    /// When the line was parsed.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl SensorReading {
    /// Create a reading without the touch flag.
    pub fn new(serial: u64, temperature: f32, humidity: f32, timestamp: OffsetDateTime) -> Self {
        Self {
            serial,
            temperature,
            humidity,
            touched: false,
            timestamp,
        }
    }

    /// Parse one line from the device stream.
    ///
    /// Returns `Ok(None)` for blank lines and comments, `Ok(Some(_))` when all
    /// four fields parse, and an error otherwise. Whitespace around fields is
    /// ignored, as is anything after the fourth field.
    ///
    /// # Examples
    ///
    /// ```
    /// use sht4x_types::SensorReading;
    /// use time::OffsetDateTime;
    ///
    /// let now = OffsetDateTime::now_utc();
    /// let reading = SensorReading::parse_line("1001, 21.50, 55.25, 0", now)
    ///     .unwrap()
    ///     .unwrap();
    /// assert_eq!(reading.serial, 1001);
    ///
    /// assert_eq!(SensorReading::parse_line("# header", now), Ok(None));
    /// ```
    pub fn parse_line(line: &str, captured_at: OffsetDateTime) -> ParseResult<Option<Self>> {
        if is_comment_or_blank(line) {
            return Ok(None);
        }

        let mut fields = line.split(',');
        let serial = next_field(&mut fields, "serial")?;
        let temperature = next_field(&mut fields, "temperature")?;
        let humidity = next_field(&mut fields, "humidity")?;
        let touch = next_field(&mut fields, "touch")?;

        let serial = serial
            .parse::<u64>()
            .map_err(|_| ParseError::invalid("serial", serial))?;
        let temperature = parse_float(temperature, "temperature")?;
        let humidity = parse_float(humidity, "humidity")?;
        // Only the leading integer of the last field counts.
        let touch_token = touch.split_whitespace().next().unwrap_or_default();
        let touch = touch_token
            .parse::<i32>()
            .map_err(|_| ParseError::invalid("touch", touch))?;

        Ok(Some(Self {
            serial,
            temperature,
            humidity,
            touched: touch != 0,
            timestamp: captured_at,
        }))
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "serial={}, temperature={:.2}C, humidity={:.2}%, timestamp={}",
            self.serial,
            self.temperature,
            self.humidity,
            self.timestamp.unix_timestamp()
        )
    }
}

/// Check whether a line carries no sample at all.
pub fn is_comment_or_blank(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with(COMMENT_PREFIX)
}

fn next_field<'a>(
    fields: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
) -> ParseResult<&'a str> {
    match fields.next().map(str::trim) {
        Some(field) if !field.is_empty() => Ok(field),
        _ => Err(ParseError::MissingField(name)),
    }
}

fn parse_float(value: &str, field: &'static str) -> ParseResult<f32> {
    let parsed = value
        .parse::<f32>()
        .map_err(|_| ParseError::invalid(field, value))?;
    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(ParseError::invalid(field, value))
    }
}
