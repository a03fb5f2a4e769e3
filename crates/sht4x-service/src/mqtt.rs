//! MQTT client for publishing sensor readings.
//!
//! [`BrokerClient`] owns at most one broker connection. Connecting waits for
//! the broker's CONNACK within a bounded timeout and then hands the rumqttc
//! event loop to a background task that keeps the session alive and delivers
//! incoming messages.
//!
//! # Broker URIs
//!
//! - `mqtt://host[:port]` - plain TCP, default port 1883
//! - `mqtts://host[:port]` - TLS, default port 8883
//! - `host[:port]` - plain TCP, default port 1883
//!
//! # TLS
//!
//! TLS connections skip certificate and hostname validation unless
//! `mqtt-tls-insecure=false` is configured. This matches what deployed
//! sensors expect from self-signed brokers; a warning is logged on every
//! insecure connect.
//!
//! # Delivery
//!
//! Publishing is fire-and-forget: messages go out at QoS 0 with the retain
//! flag set, and nothing is queued while the client is disconnected. If the
//! connection drops, the background task logs the error and lets rumqttc
//! re-dial every few seconds.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport,
};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::publisher::Publisher;

/// Client name used when no hint is configured.
pub const DEFAULT_CLIENT_NAME: &str = "sht4x_reader";
/// Port for `mqtt://` and bare host URIs.
pub const DEFAULT_PORT: u16 = 1883;
/// Port for `mqtts://` URIs.
pub const DEFAULT_TLS_PORT: u16 = 8883;
/// How long `connect` waits for the broker.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
/// QoS used for subscriptions.
pub const SUBSCRIBE_QOS: QoS = QoS::AtMostOnce;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Callback for incoming messages: `(topic, payload)`.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// MQTT errors.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Invalid broker URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("Connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("Connection refused by broker: {0:?}")]
    Refused(ConnectReturnCode),
    #[error("No response from broker within {0:?}")]
    Timeout(Duration),
}

/// Host, port and transport parsed from a broker URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "mqtts" } else { "mqtt" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Parse a broker URI into host, port and transport.
pub fn parse_broker_uri(uri: &str) -> Result<BrokerAddress, MqttError> {
    let invalid = |reason: String| MqttError::InvalidUri {
        uri: uri.to_string(),
        reason,
    };

    let (rest, tls) = if let Some(stripped) = uri.strip_prefix("mqtts://") {
        (stripped, true)
    } else if let Some(stripped) = uri.strip_prefix("mqtt://") {
        (stripped, false)
    } else if uri.contains("://") {
        return Err(invalid("scheme must be mqtt:// or mqtts://".to_string()));
    } else {
        (uri, false)
    };
    let default_port = if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT };

    // Tolerate a trailing slash after the authority
    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rsplit_once(':') {
        Some((h, p)) => {
            let port = p
                .parse::<u16>()
                .map_err(|_| invalid(format!("invalid port '{}'", p)))?;
            (h, port)
        }
        None => (rest, default_port),
    };

    if host.is_empty() {
        return Err(invalid("host cannot be empty".to_string()));
    }

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Build a client id from a hint and a random 24-bit suffix.
///
/// The suffix keeps several readers on one broker from kicking each other
/// off. An empty or missing hint uses [`DEFAULT_CLIENT_NAME`].
pub fn client_id(hint: Option<&str>) -> String {
    let name = hint.filter(|h| !h.is_empty()).unwrap_or(DEFAULT_CLIENT_NAME);
    format!("{}-{:06X}", name, rand::random::<u32>() & 0x00FF_FFFF)
}

/// Options for [`BrokerClient::connect`].
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    /// Broker URI.
    pub uri: String,
    /// Client name hint.
    pub client_hint: Option<String>,
    /// Log subscription acks and per-message details.
    pub debug: bool,
    /// Skip certificate validation for TLS.
    pub tls_insecure: bool,
    /// Limit on waiting for CONNACK.
    pub connect_timeout: Duration,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// QoS for every publish.
    pub qos: QoS,
    /// Retain flag for every publish.
    pub retain: bool,
    /// Request queue capacity between client and event loop.
    pub capacity: usize,
}

impl BrokerOptions {
    /// Options with defaults for the given broker.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            client_hint: None,
            debug: false,
            tls_insecure: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keep_alive: Duration::from_secs(60),
            qos: QoS::AtMostOnce,
            retain: true,
            capacity: 100,
        }
    }

    /// Options from the service configuration.
    pub fn from_config(config: &MqttConfig, debug: bool) -> Self {
        Self {
            client_hint: Some(config.client.clone()),
            debug,
            tls_insecure: config.tls_insecure,
            ..Self::new(config.server.clone())
        }
    }
}

struct Shared {
    connected: AtomicBool,
    debug: AtomicBool,
    handler: Mutex<Option<MessageHandler>>,
}

impl Shared {
    fn handler(&self) -> MutexGuard<'_, Option<MessageHandler>> {
        self.handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch(&self, topic: &str, payload: &[u8]) {
        // Clone out so the handler runs without the lock held
        let handler = self.handler().clone();
        match handler {
            Some(handler) => handler(topic, payload),
            None => debug!("No handler for message on '{}'", topic),
        }
    }
}

struct Connection {
    client: AsyncClient,
    task: JoinHandle<()>,
    address: BrokerAddress,
    client_id: String,
    qos: QoS,
    retain: bool,
}

/// Owner of a single broker connection.
///
/// Every operation is safe on a disconnected client: publishes are dropped
/// and subscription requests report `false`.
pub struct BrokerClient {
    connection: Option<Connection>,
    shared: Arc<Shared>,
}

impl fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerClient")
            .field(
                "address",
                &self.connection.as_ref().map(|c| c.address.to_string()),
            )
            .field("client_id", &self.client_id())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Default for BrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerClient {
    /// Create a disconnected client.
    pub fn new() -> Self {
        Self {
            connection: None,
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                debug: AtomicBool::new(false),
                handler: Mutex::new(None),
            }),
        }
    }

    /// Whether the broker session is currently up.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some() && self.shared.connected.load(Ordering::SeqCst)
    }

    /// The client id of the current connection.
    pub fn client_id(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.client_id.as_str())
    }

    /// Connect to the broker and start the background network task.
    ///
    /// Fails if the URI is invalid, TLS cannot be set up, the broker refuses
    /// the session, or no CONNACK arrives within `connect_timeout`. There is
    /// no retry. An existing connection is closed first.
    pub async fn connect(&mut self, options: &BrokerOptions) -> Result<(), MqttError> {
        if self.connection.is_some() {
            self.disconnect().await;
        }

        let address = parse_broker_uri(&options.uri)?;
        let client_id = client_id(options.client_hint.as_deref());
        info!(
            "Connecting to MQTT broker (host='{}', port={}, tls={}, client='{}')",
            address.host, address.port, address.tls, client_id
        );

        let mut mqtt_options = MqttOptions::new(&client_id, &address.host, address.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(true);
        if address.tls {
            mqtt_options.set_transport(tls_transport(options.tls_insecure)?);
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, options.capacity);
        match timeout(options.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Error connecting to broker {}: {}", address, e);
                return Err(e);
            }
            Err(_) => {
                error!(
                    "Timed out connecting to broker {} after {:?}",
                    address, options.connect_timeout
                );
                return Err(MqttError::Timeout(options.connect_timeout));
            }
        }
        info!("MQTT connected to {}", address);

        self.shared.connected.store(true, Ordering::SeqCst);
        self.shared.debug.store(options.debug, Ordering::SeqCst);
        let task = tokio::spawn(run_event_loop(eventloop, Arc::clone(&self.shared)));

        self.connection = Some(Connection {
            client,
            task,
            address,
            client_id,
            qos: options.qos,
            retain: options.retain,
        });
        Ok(())
    }

    /// [`connect`](Self::connect), abandoned as soon as `shutdown` is
    /// cancelled.
    ///
    /// Returns `Ok(false)` if shutdown won; the client is then left
    /// disconnected.
    pub async fn connect_or_cancel(
        &mut self,
        options: &BrokerOptions,
        shutdown: &CancellationToken,
    ) -> Result<bool, MqttError> {
        tokio::select! {
            result = self.connect(options) => result.map(|()| true),
            _ = shutdown.cancelled() => {
                info!("Shutdown requested while connecting to broker");
                self.disconnect().await;
                Ok(false)
            }
        }
    }

    fn active(&self) -> Option<&Connection> {
        self.connection
            .as_ref()
            .filter(|_| self.shared.connected.load(Ordering::SeqCst))
    }

    /// Queue a message for the broker.
    ///
    /// Does nothing when disconnected. Failures are logged, not returned.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        let Some(connection) = self.active() else {
            debug!("Not connected, dropping message for '{}'", topic);
            return;
        };
        if let Err(e) =
            connection
                .client
                .try_publish(topic, connection.qos, connection.retain, payload)
        {
            error!("MQTT publish error on '{}': {}", topic, e);
        }
    }

    /// Subscribe to a topic filter. Returns `false` when disconnected or the
    /// request could not be queued.
    pub fn subscribe(&self, topic: &str) -> bool {
        let Some(connection) = self.active() else {
            return false;
        };
        match connection.client.try_subscribe(topic, SUBSCRIBE_QOS) {
            Ok(()) => {
                info!("Subscribed '{}' ({:?})", topic, SUBSCRIBE_QOS);
                true
            }
            Err(e) => {
                error!("Subscribe failed '{}': {}", topic, e);
                false
            }
        }
    }

    /// Unsubscribe from a topic filter. Returns `false` when disconnected or
    /// the request could not be queued.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        let Some(connection) = self.active() else {
            return false;
        };
        match connection.client.try_unsubscribe(topic) {
            Ok(()) => {
                info!("Unsubscribed '{}'", topic);
                true
            }
            Err(e) => {
                error!("Unsubscribe failed '{}': {}", topic, e);
                false
            }
        }
    }

    /// Install the handler for incoming messages, replacing any previous one.
    ///
    /// The handler runs on the background network task, never on the caller's
    /// task, so any state it shares with the rest of the program must be
    /// synchronized.
    pub fn register_message_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        *self.shared.handler() = Some(Arc::new(handler));
    }

    /// Remove the message handler.
    pub fn cancel_message_handler(&self) {
        self.shared.handler().take();
    }

    /// Close the connection and stop the background task.
    ///
    /// Safe to call repeatedly or on a client that never connected.
    pub async fn disconnect(&mut self) {
        self.cancel_message_handler();
        let Some(connection) = self.connection.take() else {
            return;
        };
        self.shared.connected.store(false, Ordering::SeqCst);

        if let Err(e) = connection.client.try_disconnect() {
            debug!("Error disconnecting MQTT client: {}", e);
        }
        let mut task = connection.task;
        if timeout(DISCONNECT_GRACE, &mut task).await.is_err() {
            task.abort();
        }
        info!("MQTT disconnected from {}", connection.address);
    }
}

#[async_trait]
impl Publisher for BrokerClient {
    fn publish(&self, topic: &str, payload: &str) {
        BrokerClient::publish(self, topic, payload);
    }

    async fn disconnect(&mut self) {
        BrokerClient::disconnect(self).await;
    }
}

fn tls_transport(insecure: bool) -> Result<Transport, MqttError> {
    if !insecure {
        return Ok(Transport::tls_with_config(TlsConfiguration::Native));
    }

    warn!("TLS certificate validation is disabled for this broker");
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()?;
    Ok(Transport::tls_with_config(
        TlsConfiguration::NativeConnector(connector),
    ))
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), MqttError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
            return match ack.code {
                ConnectReturnCode::Success => Ok(()),
                code => Err(MqttError::Refused(code)),
            };
        }
    }
}

/// Drive the event loop until the client disconnects.
async fn run_event_loop(mut eventloop: EventLoop, shared: Arc<Shared>) {
    loop {
        match eventloop.poll().await {
            Ok(event) => {
                if !handle_event(&shared, event) {
                    debug!("MQTT event loop stopping");
                    break;
                }
            }
            Err(e) => {
                shared.connected.store(false, Ordering::SeqCst);
                warn!("MQTT connection error: {}. Reconnecting...", e);
                sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Apply one event to the shared state. Returns `false` once the client has
/// sent DISCONNECT.
fn handle_event(shared: &Shared, event: Event) -> bool {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => {
            if ack.code == ConnectReturnCode::Success {
                shared.connected.store(true, Ordering::SeqCst);
                info!("MQTT reconnected");
            } else {
                shared.connected.store(false, Ordering::SeqCst);
                warn!("MQTT reconnect refused: {:?}", ack.code);
            }
        }
        Event::Incoming(Packet::Publish(publish)) => {
            shared.dispatch(&publish.topic, &publish.payload);
        }
        Event::Incoming(Packet::SubAck(ack)) => {
            if shared.debug.load(Ordering::Relaxed) {
                info!("MQTT subscribed (pkid={})", ack.pkid);
            }
        }
        Event::Incoming(Packet::PingResp) => {
            debug!("MQTT ping response received");
        }
        Event::Outgoing(Outgoing::Disconnect) => {
            shared.connected.store(false, Ordering::SeqCst);
            return false;
        }
        _ => {}
    }
    true
}
