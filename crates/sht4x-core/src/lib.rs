//! Core library for SHT4x sensor daemons.
//!
//! This crate provides the pieces that sit between the sensor's character
//! device and whatever publishes its readings:
//!
//! - **Device access**: [`DeviceReader`] opens the device node and yields one
//!   [`SensorReading`] per valid line, skipping comments and noise
//! - **Throttling**: [`IntervalGate`] fires at most once per period
//! - **Counters**: [`Counters`] and [`Stats`] for uptime, messages and errors
//! - **Testing**: [`MockDevice`] implements [`SensorDevice`] with a script
//!
//! # Quick Start
//!
//! ```no_run
//! use sht4x_core::{DeviceReader, SensorDevice};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut device = DeviceReader::new("/dev/sht4x");
//!     device.open().await?;
//!
//!     let reading = device.read_next().await?;
//!     println!("{:.2}C {:.2}%", reading.temperature, reading.humidity);
//!
//!     device.close();
//!     Ok(())
//! }
//! ```

pub mod device;
pub mod error;
pub mod interval;
pub mod metrics;
pub mod mock;
pub mod traits;

pub use device::DeviceReader;
pub use error::{Error, Result};
pub use interval::IntervalGate;
pub use metrics::{Counters, Stats, rate_per_minute};
pub use mock::MockDevice;
pub use traits::SensorDevice;

// Re-export from sht4x-types
pub use sht4x_types::{ParseError, SensorReading};
