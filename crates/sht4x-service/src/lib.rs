//! Daemon that republishes SHT4x sensor readings to an MQTT broker.
//!
//! This crate provides a service that:
//! - Reads `serial, temperature, humidity, touch` lines from the sensor's
//!   character device
//! - Publishes the latest reading as JSON at a fixed report period
//! - Reopens the device after read failures
//! - Logs uptime, message and error statistics periodically and on exit
//!
//! # Message format
//!
//! ```json
//! {"temperature":21.50,"humidity":55.26,"timestamp":"2024-05-01T12:30:00Z"}
//! ```
//!
//! Messages are published at QoS 0 with the retain flag set, so a new
//! subscriber immediately sees the last reading.
//!
//! # Configuration
//!
//! The service reads `key=value` lines from `sht4x_reader.cfg` (or the file
//! given by `--config`). Every key can also be passed as a flag, which wins
//! over the file:
//!
//! ```text
//! # sht4x_reader.cfg
//! mqtt-server=mqtts://broker.lan:8883
//! mqtt-client=attic
//! mqtt-topic=home/attic/conditions
//! device-path=/dev/sht4x
//! report-period=60
//! debug=false
//! ```

pub mod config;
pub mod mqtt;
pub mod pipeline;
pub mod publisher;
pub mod supervisor;

pub use config::{Args, Config, ConfigError, ConfigStore, MqttConfig, RecoveryConfig, SensorConfig};
pub use mqtt::{BrokerAddress, BrokerClient, BrokerOptions, MqttError, client_id, parse_broker_uri};
pub use pipeline::{Pipeline, PipelineOptions, PipelineState, format_payload};
pub use publisher::{MemoryPublisher, Published, Publisher};
pub use supervisor::{RecoveryPolicy, ServiceError, Supervisor, SupervisorOptions};
