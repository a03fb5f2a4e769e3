//! Tick loop with device recovery and graceful shutdown.
//!
//! The supervisor drives a [`Pipeline`] once per tick. When a tick fails it
//! closes the device, waits, and reopens it according to a
//! [`RecoveryPolicy`]. Shutdown is requested through a
//! [`CancellationToken`]; a tick in flight always completes, but sleeps and
//! recovery backoff end as soon as the token is cancelled.

use std::time::Duration;

use sht4x_core::{SensorDevice, Stats};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, RecoveryConfig};
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::publisher::Publisher;

/// Fatal service errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Could not open sensor device: {0}")]
    DeviceOpen(#[source] sht4x_core::Error),
    #[error("Device recovery failed after {attempts} attempt(s): {source}")]
    RecoveryFailed {
        attempts: u32,
        #[source]
        source: sht4x_core::Error,
    },
}

/// How a failed device is reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Reopen attempts before giving up.
    pub attempts: u32,
    /// Wait before each attempt.
    pub delay: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay: Duration::from_secs(5),
        }
    }
}

impl From<&RecoveryConfig> for RecoveryPolicy {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            attempts: config.attempts,
            delay: config.delay,
        }
    }
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub pipeline: PipelineOptions,
    /// Pause between ticks.
    pub tick_interval: Duration,
    pub recovery: RecoveryPolicy,
}

impl SupervisorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pipeline: PipelineOptions::from_config(config),
            tick_interval: Duration::from_secs(1),
            recovery: RecoveryPolicy::from(&config.recovery),
        }
    }
}

enum Recovery {
    Recovered,
    Cancelled,
    Failed(ServiceError),
}

/// Owner of the running pipeline.
pub struct Supervisor<D, P> {
    pipeline: Pipeline<D, P>,
    tick_interval: Duration,
    recovery: RecoveryPolicy,
}

impl<D: SensorDevice, P: Publisher> Supervisor<D, P> {
    /// Open the device and assemble the pipeline.
    ///
    /// The publisher should already be connected. If the device cannot be
    /// opened the publisher is disconnected before the error is returned.
    pub async fn start(
        mut device: D,
        mut publisher: P,
        options: SupervisorOptions,
    ) -> Result<Self, ServiceError> {
        if let Err(e) = device.open().await {
            error!("Failed to open device {}: {}", device.path().display(), e);
            publisher.disconnect().await;
            return Err(ServiceError::DeviceOpen(e));
        }

        Ok(Self {
            pipeline: Pipeline::new(device, publisher, options.pipeline),
            tick_interval: options.tick_interval,
            recovery: options.recovery,
        })
    }

    pub fn pipeline(&self) -> &Pipeline<D, P> {
        &self.pipeline
    }

    /// Run until `shutdown` is cancelled or recovery fails.
    ///
    /// Either way the device is closed and the publisher disconnected before
    /// returning. On a clean shutdown the final statistics are returned.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<Stats, ServiceError> {
        info!(
            "Reading {} every {:?}, reporting to '{}'",
            self.pipeline.device().path().display(),
            self.tick_interval,
            self.pipeline.topic()
        );

        let outcome = loop {
            if shutdown.is_cancelled() {
                break Ok(());
            }

            if let Err(e) = self.pipeline.tick().await {
                match self.recover(e, &shutdown).await {
                    Recovery::Recovered => {}
                    Recovery::Cancelled => break Ok(()),
                    Recovery::Failed(err) => break Err(err),
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                _ = sleep(self.tick_interval) => {}
            }
        };

        let stats = self.stop().await;
        outcome.map(|()| stats)
    }

    async fn recover(&mut self, cause: sht4x_core::Error, shutdown: &CancellationToken) -> Recovery {
        let device = self.pipeline.device_mut();
        device.close();

        let mut last_error = cause;
        for attempt in 1..=self.recovery.attempts {
            info!(
                "Reopening device in {:?} (attempt {}/{})",
                self.recovery.delay, attempt, self.recovery.attempts
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Recovery::Cancelled,
                _ = sleep(self.recovery.delay) => {}
            }

            match device.open().await {
                Ok(()) => {
                    info!("Device recovered");
                    return Recovery::Recovered;
                }
                Err(e) => {
                    warn!("Reopen attempt {} failed: {}", attempt, e);
                    last_error = e;
                }
            }
        }

        error!(
            "Giving up on device after {} attempt(s)",
            self.recovery.attempts
        );
        Recovery::Failed(ServiceError::RecoveryFailed {
            attempts: self.recovery.attempts,
            source: last_error,
        })
    }

    async fn stop(&mut self) -> Stats {
        info!("Shutting down");
        self.pipeline.device_mut().close();
        self.pipeline.publisher_mut().disconnect().await;

        let stats = self.pipeline.stats();
        info!("Final stats: {}", stats);
        stats
    }
}
