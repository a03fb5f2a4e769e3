//! Reading types for SHT4x temperature/humidity sensors.
//!
//! This crate holds the [`SensorReading`] model and the parser for the
//! line-oriented text format exposed by the sensor's character device:
//!
//! ```text
//! # serial, temperature, humidity, touch
//! 1001, 21.50, 55.25, 0
//! ```
//!
//! It has no I/O of its own and can be shared by the device reader and any
//! consumer that needs to decode captured device output.

pub mod error;
pub mod reading;

pub use error::{ParseError, ParseResult};
pub use reading::{COMMENT_PREFIX, SensorReading, is_comment_or_blank};
