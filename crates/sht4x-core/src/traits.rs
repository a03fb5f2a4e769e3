//! Trait abstractions for sensor device access.
//!
//! This module provides the [`SensorDevice`] trait that abstracts over the
//! real character device and mock devices for testing.

use std::path::Path;

use async_trait::async_trait;

use sht4x_types::SensorReading;

use crate::error::Result;

/// Trait abstracting a line-oriented sensor device.
///
/// # Example
///
/// ```ignore
/// use sht4x_core::{SensorDevice, Result};
///
/// async fn print_reading<D: SensorDevice>(device: &mut D) -> Result<()> {
///     let reading = device.read_next().await?;
///     println!("{:.2}C", reading.temperature);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SensorDevice: Send {
    /// Path of the underlying device.
    fn path(&self) -> &Path;

    /// Whether a stream is currently open.
    fn is_open(&self) -> bool;

    /// Open the device for reading.
    ///
    /// Opening an already open device replaces the previous stream.
    async fn open(&mut self) -> Result<()>;

    /// Read lines until one parses into a reading.
    ///
    /// Comments and malformed lines are skipped. Fails only when the stream
    /// ends, an I/O error occurs, or the device is closed.
    async fn read_next(&mut self) -> Result<SensorReading>;

    /// Release the stream. Calling this on a closed device does nothing.
    fn close(&mut self);
}
