//! Secure session management
//!
//! The `SessionManager` owns one authenticated connection:
//! - explicit `SessionState` machine published through a watch channel
//! - connect with bounded wait for the broker acknowledgment
//! - QoS 1 telemetry publish that fails fast when not connected
//! - background event pump applying transport events (acks, drops, C2D messages)
//! - `SessionStatistics` owned here, exposed as a snapshot

pub mod reconnect;
pub mod stats;
pub mod transport;

pub use reconnect::{ExponentialBackoff, NoReconnect, ReconnectPolicy};
pub use stats::{SessionStatistics, StatsSnapshot};
pub use transport::{EventStream, MqttTransport, Transport, TransportEvent};

use crate::config::DeviceIdentity;
use crate::error::{ConnectionError, PublishError};
use crate::telemetry::TelemetryMessage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const INBOUND_CAPACITY: usize = 32;
const PUMP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Cloud-to-device message, surfaced to the caller but never interpreted
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn payload_text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}

/// What the transport accepted for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub topic: String,
    pub message_id: String,
    pub sequence_number: u64,
    pub bytes: usize,
}

/// State shared between the foreground calls and the event pump
struct Shared {
    state: watch::Sender<SessionState>,
    stats: SessionStatistics,
    /// Transport gave up reconnecting; publishing can never succeed again.
    closed: AtomicBool,
    inbound: broadcast::Sender<InboundMessage>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Session state {:?} -> {:?}", previous, next);
        }
    }
}

pub struct SessionManager<T: Transport> {
    device_id: String,
    endpoint: String,
    telemetry_topic: String,
    devicebound_filter: String,
    connect_timeout: Duration,
    transport: Arc<T>,
    shared: Arc<Shared>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(identity: &DeviceIdentity, transport: T, connect_timeout: Duration) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);

        Self {
            device_id: identity.device_id().to_string(),
            endpoint: format!("{}:{}", identity.hostname(), identity.port()),
            telemetry_topic: identity.telemetry_topic(),
            devicebound_filter: identity.devicebound_filter(),
            connect_timeout,
            transport: Arc::new(transport),
            shared: Arc::new(Shared {
                state,
                stats: SessionStatistics::new(),
                closed: AtomicBool::new(false),
                inbound,
            }),
            pump: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// True once the transport has permanently given up
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Observe state transitions
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Receive cloud-to-device messages
    pub fn inbound_messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.shared.inbound.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Connect and wait for the broker acknowledgment. No-op (besides the
    /// attempt counter) when already connected.
    pub async fn connect(&self, keep_alive: Duration) -> Result<(), ConnectionError> {
        self.shared.stats.record_connection_attempt();

        if self.is_connected() {
            debug!("Already connected to {}, nothing to do", self.endpoint);
            return Ok(());
        }
        let stale_pump = self.pump.lock().is_some();
        if stale_pump {
            // A previous transport may still be retrying in the background.
            self.shutdown_transport().await;
        }

        info!("Connecting to {} as {}...", self.endpoint, self.device_id);
        self.shared.closed.store(false, Ordering::Release);
        self.shared.set_state(SessionState::Connecting);

        let mut events = match self.transport.open(keep_alive).await {
            Ok(events) => events,
            Err(e) => return Err(self.fail_connect(e.into()).await),
        };

        let mut last_drop = None;
        let waited =
            tokio::time::timeout(self.connect_timeout, await_connack(&mut events, &mut last_drop)).await;
        let outcome = match (waited, last_drop) {
            (Ok(result), _) => result,
            (Err(_), Some(reason)) => Err(ConnectionError::Transport(reason)),
            (Err(_), None) => Err(ConnectionError::Timeout(self.connect_timeout.as_secs())),
        };
        if let Err(e) = outcome {
            return Err(self.fail_connect(e).await);
        }

        self.shared.set_state(SessionState::Connected);
        info!("MQTT connection established (TLS handshake and X.509 authentication completed)");

        if let Err(e) = self.transport.subscribe(&self.devicebound_filter).await {
            warn!("Failed to subscribe to C2D messages: {}", e);
            self.shared.stats.record_error(&e);
        } else {
            info!("Subscribed to C2D messages: {}", self.devicebound_filter);
        }

        let pump = tokio::spawn(pump_events(
            events,
            self.shared.clone(),
            self.transport.clone(),
            self.devicebound_filter.clone(),
        ));
        *self.pump.lock() = Some(pump);
        Ok(())
    }

    /// `connect` that gives up as soon as `cancel` resolves. `None` means
    /// cancelled; the half-open transport is closed before returning.
    pub async fn connect_until<F: Future<Output = ()>>(
        &self,
        keep_alive: Duration,
        cancel: F,
    ) -> Option<Result<(), ConnectionError>> {
        let attempt = tokio::select! {
            biased;
            result = self.connect(keep_alive) => Some(result),
            _ = cancel => None,
        };
        if attempt.is_none() {
            info!("Connection attempt cancelled");
            self.disconnect().await;
        }
        attempt
    }

    /// Publish one telemetry message with at-least-once delivery. Every call
    /// counts exactly once as sent or failed.
    pub async fn publish(&self, message: &TelemetryMessage) -> Result<PublishAck, PublishError> {
        let result = self.try_publish(message).await;
        match &result {
            Ok(_) => self.shared.stats.record_sent(),
            Err(e) => self.shared.stats.record_failed(e),
        }
        result
    }

    async fn try_publish(&self, message: &TelemetryMessage) -> Result<PublishAck, PublishError> {
        if self.is_closed() {
            return Err(PublishError::SessionClosed);
        }
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }

        let payload = message.to_payload()?;
        let bytes = payload.len();
        self.transport
            .publish(&self.telemetry_topic, payload)
            .await
            .map_err(|e| PublishError::Rejected(e.to_string()))?;

        Ok(PublishAck {
            topic: self.telemetry_topic.clone(),
            message_id: message.message_id.clone(),
            sequence_number: message.reading.sequence_number,
            bytes,
        })
    }

    /// Graceful disconnect. Calling it while disconnected does nothing.
    pub async fn disconnect(&self) {
        let pump_running = self.pump.lock().is_some();
        if self.state() == SessionState::Disconnected && !pump_running {
            debug!("Already disconnected");
            return;
        }

        self.shared.set_state(SessionState::Disconnecting);
        self.shutdown_transport().await;
        self.shared.set_state(SessionState::Disconnected);
        info!("Disconnected from {}", self.endpoint);
    }

    async fn shutdown_transport(&self) {
        if let Err(e) = self.transport.close().await {
            warn!("Error while closing transport: {}", e);
            self.shared.stats.record_error(&e);
        }

        let pump = self.pump.lock().take();
        if let Some(mut pump) = pump {
            if tokio::time::timeout(PUMP_GRACE, &mut pump).await.is_err() {
                pump.abort();
            }
        }
    }

    async fn fail_connect(&self, error: ConnectionError) -> ConnectionError {
        error!("Connection error: {}", error);
        self.shared.stats.record_error(&error);
        if let Err(e) = self.transport.close().await {
            debug!("Closing transport after failed connect: {}", e);
        }
        self.shared.set_state(SessionState::Disconnected);
        error
    }
}

/// Consume events until the first CONNACK. Drops are retried by the
/// transport; the last drop reason is kept in `last_drop` so it survives a timeout.
async fn await_connack(
    events: &mut EventStream,
    last_drop: &mut Option<String>,
) -> Result<(), ConnectionError> {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::ConnAck { code: 0 } => return Ok(()),
            TransportEvent::ConnAck { code } => return Err(ConnectionError::from_return_code(code)),
            TransportEvent::Dropped { reason } => {
                warn!("Connection attempt failed: {}", reason);
                *last_drop = Some(reason);
            }
            TransportEvent::Closed => break,
            TransportEvent::PubAck { .. } | TransportEvent::Message { .. } => {}
        }
    }

    Err(ConnectionError::Transport(
        last_drop
            .take()
            .unwrap_or_else(|| "transport closed before acknowledgment".to_string()),
    ))
}

/// Background half of the session: applies transport events to state and statistics.
async fn pump_events<T: Transport>(
    mut events: EventStream,
    shared: Arc<Shared>,
    transport: Arc<T>,
    devicebound_filter: String,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::ConnAck { code: 0 } => {
                let state = shared.state();
                if !matches!(state, SessionState::Disconnected | SessionState::Connected) {
                    debug!("Ignoring CONNACK while {:?}", state);
                    continue;
                }
                shared.set_state(SessionState::Connected);
                info!("Reconnected to broker");
                // Clean session: the broker forgot our subscription.
                if let Err(e) = transport.subscribe(&devicebound_filter).await {
                    warn!("Failed to re-subscribe to C2D messages: {}", e);
                    shared.stats.record_error(&e);
                }
            }
            TransportEvent::ConnAck { code } => {
                let e = ConnectionError::from_return_code(code);
                warn!("Reconnect refused: {}", e);
                shared.stats.record_error(&e);
                if shared.state() == SessionState::Connected {
                    shared.set_state(SessionState::Disconnected);
                }
            }
            TransportEvent::PubAck { packet_id } => {
                debug!("PUBACK for packet {}", packet_id);
                shared.stats.record_acknowledged();
            }
            TransportEvent::Message { topic, payload } => {
                shared.stats.record_received();
                let message = InboundMessage {
                    topic,
                    payload,
                    received_at: Utc::now(),
                };
                match message.payload_text() {
                    Ok(text) => info!("C2D message on {}: {}", message.topic, text),
                    Err(e) => warn!("C2D message on {} is not UTF-8: {}", message.topic, e),
                }
                // Nobody listening is fine.
                let _ = shared.inbound.send(message);
            }
            TransportEvent::Dropped { reason } => {
                if shared.state() == SessionState::Connected {
                    warn!("Unexpected disconnect: {}", reason);
                    shared.set_state(SessionState::Disconnected);
                }
                shared.stats.record_error(format!("Connection lost: {reason}"));
            }
            TransportEvent::Closed => {
                if shared.state() != SessionState::Disconnecting {
                    error!("Transport closed, session cannot recover");
                    shared.closed.store(true, Ordering::Release);
                    shared.set_state(SessionState::Disconnected);
                }
                break;
            }
        }
    }
}
