//! Reading, throttling and publishing of sensor data.
//!
//! A [`Pipeline`] owns the device, the publisher, both interval gates and the
//! counters. Each [`Pipeline::tick`] reads one reading; when the report gate
//! fires the reading is formatted as JSON and published.

use std::time::Duration;

use sht4x_core::{Counters, IntervalGate, SensorDevice, SensorReading, Stats};
use time::UtcOffset;
use time::macros::format_description;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::publisher::Publisher;

/// Where the pipeline is in its read/report cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// Nothing read yet.
    #[default]
    Idle,
    /// Latest reading held but not published.
    Read,
    /// Latest reading published.
    Reported,
}

/// Pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub topic: String,
    pub report_period: Duration,
    pub stats_period: Duration,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            topic: config.mqtt.topic.clone(),
            report_period: config.sensor.report_period,
            stats_period: config.sensor.stats_period,
        }
    }
}

/// Device-to-broker reporting pipeline.
pub struct Pipeline<D, P> {
    device: D,
    publisher: P,
    topic: String,
    report_gate: IntervalGate,
    stats_gate: IntervalGate,
    counters: Counters,
    current: Option<SensorReading>,
    state: PipelineState,
}

impl<D: SensorDevice, P: Publisher> Pipeline<D, P> {
    pub fn new(device: D, publisher: P, options: PipelineOptions) -> Self {
        Self {
            device,
            publisher,
            topic: options.topic,
            report_gate: IntervalGate::new(options.report_period),
            stats_gate: IntervalGate::new(options.stats_period),
            counters: Counters::new(),
            current: None,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// The most recent reading, reported or not.
    pub fn current(&self) -> Option<&SensorReading> {
        self.current.as_ref()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }

    /// Read one reading and publish it if the report period has passed.
    ///
    /// A read failure is counted and returned; the caller decides how to
    /// recover the device.
    pub async fn tick(&mut self) -> sht4x_core::Result<()> {
        let reading = match self.device.read_next().await {
            Ok(reading) => reading,
            Err(e) => {
                let errors = self.counters.record_error();
                error!(
                    "Failed to read sensor data from {} (errors={}): {}",
                    self.device.path().display(),
                    errors,
                    e
                );
                return Err(e);
            }
        };

        self.state = PipelineState::Read;
        self.current = Some(reading);

        if !self.report_gate.elapsed().is_zero() {
            self.report();
        }
        if self.stats_gate.is_due() {
            self.log_stats();
        }
        Ok(())
    }

    fn report(&mut self) {
        let Some(reading) = self.current.as_ref() else {
            return;
        };
        info!("Sensor reading: {}", reading);

        let payload = format_payload(reading);
        debug!("Payload: {}", payload);
        self.publisher.publish(&self.topic, &payload);

        let total = self.counters.record_message();
        self.state = PipelineState::Reported;
        info!("Published to '{}' (total={})", self.topic, total);
    }

    pub fn stats(&self) -> Stats {
        self.counters.stats()
    }

    pub fn log_stats(&self) {
        info!("Stats: {}", self.stats());
    }
}

/// Format a reading as the JSON message body.
///
/// Values carry exactly two decimals and the timestamp is UTC with whole
/// seconds, e.g.
/// `{"temperature":21.50,"humidity":55.26,"timestamp":"2024-05-01T12:30:00Z"}`.
pub fn format_payload(reading: &SensorReading) -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    let timestamp = reading
        .timestamp
        .to_offset(UtcOffset::UTC)
        .format(&format)
        .unwrap_or_default();
    format!(
        "{{\"temperature\":{:.2},\"humidity\":{:.2},\"timestamp\":\"{}\"}}",
        reading.temperature, reading.humidity, timestamp
    )
}
