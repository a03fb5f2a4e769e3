//! Mock device implementation for testing.
//!
//! This module provides a scripted device that can be used for unit testing
//! without a real sensor attached.
//!
//! The [`MockDevice`] implements the [`SensorDevice`] trait, allowing it to be
//! used interchangeably with [`DeviceReader`](crate::DeviceReader) in generic
//! code.
//!
//! # Features
//!
//! - **Scripted reads**: queue readings and read failures in order
//! - **Failure injection**: queue open failures for recovery tests
//! - **Shared handle**: clones share state, so a test can keep a handle after
//!   moving the device into a pipeline

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;

use sht4x_types::SensorReading;

use crate::error::{Error, Result};
use crate::traits::SensorDevice;

#[derive(Debug)]
enum ReadStep {
    Reading(SensorReading),
    Fail,
}

#[derive(Debug, Default)]
struct MockState {
    open_failures: Mutex<VecDeque<bool>>,
    reads: Mutex<VecDeque<ReadStep>>,
    open: AtomicBool,
    open_count: AtomicU32,
    close_count: AtomicU32,
    read_count: AtomicU32,
}

/// A scripted sensor device for testing.
///
/// Once the read script is exhausted every read succeeds with
/// [`MockDevice::default_reading`].
///
/// # Example
///
/// ```
/// use sht4x_core::{MockDevice, SensorDevice};
///
/// #[tokio::main]
/// async fn main() {
///     let mut device = MockDevice::new("/dev/mock").with_read_failure();
///     device.open().await.unwrap();
///     assert!(device.read_next().await.is_err());
///     assert!(device.read_next().await.is_ok());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockDevice {
    path: PathBuf,
    state: Arc<MockState>,
}

impl MockDevice {
    /// Create a closed mock device with an empty script.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Arc::new(MockState::default()),
        }
    }

    /// The reading returned once the script runs out.
    pub fn default_reading() -> SensorReading {
        SensorReading::new(1001, 21.5, 55.25, OffsetDateTime::now_utc())
    }

    /// Queue a successful reading.
    pub fn with_reading(self, reading: SensorReading) -> Self {
        self.push_reading(reading);
        self
    }

    /// Queue a read failure (reported as end of stream).
    pub fn with_read_failure(self) -> Self {
        self.push_read_failure();
        self
    }

    /// Make the next `open` call fail.
    pub fn with_open_failure(self) -> Self {
        self.push_open_failure();
        self
    }

    /// Queue a successful reading through a shared handle.
    pub fn push_reading(&self, reading: SensorReading) {
        lock(&self.state.reads).push_back(ReadStep::Reading(reading));
    }

    /// Queue a read failure through a shared handle.
    pub fn push_read_failure(&self) {
        lock(&self.state.reads).push_back(ReadStep::Fail);
    }

    /// Queue an open failure through a shared handle.
    pub fn push_open_failure(&self) {
        lock(&self.state.open_failures).push_back(true);
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> u32 {
        self.state.open_count.load(Ordering::SeqCst)
    }

    /// Number of close calls that released an open stream.
    pub fn close_count(&self) -> u32 {
        self.state.close_count.load(Ordering::SeqCst)
    }

    /// Number of read attempts, successful or not.
    pub fn read_count(&self) -> u32 {
        self.state.read_count.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SensorDevice for MockDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    async fn open(&mut self) -> Result<()> {
        if lock(&self.state.open_failures).pop_front().unwrap_or(false) {
            return Err(Error::device_open(
                &self.path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "mock open failure"),
            ));
        }
        self.state.open.store(true, Ordering::SeqCst);
        self.state.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_next(&mut self) -> Result<SensorReading> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        self.state.read_count.fetch_add(1, Ordering::SeqCst);

        match lock(&self.state.reads).pop_front() {
            Some(ReadStep::Reading(reading)) => Ok(reading),
            Some(ReadStep::Fail) => Err(Error::end_of_stream(&self.path)),
            None => Ok(Self::default_reading()),
        }
    }

    fn close(&mut self) {
        if self.state.open.swap(false, Ordering::SeqCst) {
            self.state.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}
