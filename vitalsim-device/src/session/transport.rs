//! Secure transport seam
//!
//! `Transport` is what the session manager needs from an MQTT client. The
//! production implementation drives a `rumqttc` event loop over rustls with
//! the device certificate; the devkit provides an in-memory one for tests.

use crate::config::{DeviceIdentity, TlsMaterial};
use crate::error::TransportError;
use crate::session::reconnect::ReconnectPolicy;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS,
    TlsConfiguration,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Notifications delivered by the transport's background activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// CONNACK received; `code` 0 means accepted
    ConnAck { code: u8 },
    /// Broker acknowledged a QoS 1 publish
    PubAck { packet_id: u16 },
    /// Message on a subscribed topic
    Message { topic: String, payload: Vec<u8> },
    /// Connection lost; the transport may retry on its own
    Dropped { reason: String },
    /// No further events will follow
    Closed,
}

pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

pub trait Transport: Send + Sync + 'static {
    /// Starts connecting in the background and returns the event stream.
    fn open(
        &self,
        keep_alive: Duration,
    ) -> impl Future<Output = Result<EventStream, TransportError>> + Send;

    /// Subscribes with at-least-once delivery.
    fn subscribe(&self, filter: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Publishes with at-least-once delivery, not retained.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Graceful DISCONNECT, then stops the background activity.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

const REQUEST_CAPACITY: usize = 10;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// MQTT 3.1.1 over TLS with X.509 client authentication
pub struct MqttTransport {
    options: MqttOptions,
    policy: Arc<dyn ReconnectPolicy>,
    client: Mutex<Option<AsyncClient>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new(identity: &DeviceIdentity, tls: TlsMaterial, policy: Arc<dyn ReconnectPolicy>) -> Self {
        let mut options = MqttOptions::new(identity.device_id(), identity.hostname(), identity.port());
        options.set_clean_session(true);
        // Password stays empty: the broker authenticates the client certificate.
        options.set_credentials(identity.username(), "");
        options.set_transport(rumqttc::Transport::Tls(TlsConfiguration::Simple {
            ca: tls.ca,
            alpn: None,
            client_auth: Some((tls.client_cert, tls.client_key)),
        }));

        Self {
            options,
            policy,
            client: Mutex::new(None),
            poller: Mutex::new(None),
        }
    }

    fn current_client(&self) -> Result<AsyncClient, TransportError> {
        self.client.lock().clone().ok_or(TransportError::NotOpen)
    }
}

impl Transport for MqttTransport {
    async fn open(&self, keep_alive: Duration) -> Result<EventStream, TransportError> {
        let mut options = self.options.clone();
        options.set_keep_alive(keep_alive);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (events, stream) = mpsc::unbounded_channel();
        let handle = tokio::spawn(drive_event_loop(eventloop, events, self.policy.clone()));

        if let Some(previous) = self.poller.lock().replace(handle) {
            previous.abort();
        }
        *self.client.lock() = Some(client);
        Ok(stream)
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        let client = self.current_client()?;
        client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let client = self.current_client()?;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let client = self.client.lock().take();
        let poller = self.poller.lock().take();

        let result = match client {
            Some(client) => client
                .disconnect()
                .await
                .map_err(|e| TransportError::Request(e.to_string())),
            None => Ok(()),
        };

        if let Some(mut poller) = poller {
            if tokio::time::timeout(CLOSE_GRACE, &mut poller).await.is_err() {
                debug!("Event loop still running after DISCONNECT, aborting");
                poller.abort();
            }
        }
        result
    }
}

fn return_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

/// What the poll loop does with one rumqttc event
#[derive(Debug, PartialEq, Eq)]
enum Polled {
    Forward(TransportEvent),
    Skip,
    Stop,
}

/// What the poll loop does after a connection error
#[derive(Debug, PartialEq, Eq)]
enum Recovery {
    RetryAfter(Duration),
    GiveUp,
}

/// Decision half of the poll loop: maps rumqttc events and errors and
/// counts consecutive failures for the reconnect policy.
#[derive(Default)]
struct Supervisor {
    failures: u32,
}

impl Supervisor {
    fn on_event(&mut self, event: Event) -> Polled {
        match event {
            Event::Incoming(Incoming::ConnAck(ack)) => {
                self.failures = 0;
                Polled::Forward(TransportEvent::ConnAck { code: return_code(ack.code) })
            }
            Event::Incoming(Incoming::PubAck(ack)) => {
                Polled::Forward(TransportEvent::PubAck { packet_id: ack.pkid })
            }
            Event::Incoming(Incoming::Publish(publish)) => Polled::Forward(TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Event::Incoming(Incoming::Disconnect) => Polled::Forward(TransportEvent::Dropped {
                reason: "broker sent DISCONNECT".to_string(),
            }),
            Event::Outgoing(Outgoing::Disconnect) => Polled::Stop,
            _ => Polled::Skip,
        }
    }

    /// A refused CONNACK surfaces as an error in rumqttc; it is reported as
    /// the CONNACK it was.
    fn on_error(
        &mut self,
        error: &rumqttc::ConnectionError,
        policy: &dyn ReconnectPolicy,
    ) -> (TransportEvent, Recovery) {
        self.failures = self.failures.saturating_add(1);
        let event = match error {
            rumqttc::ConnectionError::ConnectionRefused(code) => {
                TransportEvent::ConnAck { code: return_code(*code) }
            }
            other => TransportEvent::Dropped { reason: other.to_string() },
        };
        let recovery = match policy.next_delay(self.failures) {
            Some(delay) => Recovery::RetryAfter(delay),
            None => Recovery::GiveUp,
        };
        (event, recovery)
    }
}

/// Polls the rumqttc event loop until DISCONNECT is sent, the policy gives
/// up, or the session drops its event stream.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    events: mpsc::UnboundedSender<TransportEvent>,
    policy: Arc<dyn ReconnectPolicy>,
) {
    let mut supervisor = Supervisor::default();

    loop {
        let event = match eventloop.poll().await {
            Ok(event) => match supervisor.on_event(event) {
                Polled::Forward(event) => event,
                Polled::Skip => continue,
                Polled::Stop => {
                    debug!("DISCONNECT sent, stopping event loop");
                    let _ = events.send(TransportEvent::Closed);
                    return;
                }
            },
            Err(e) => {
                let (event, recovery) = supervisor.on_error(&e, policy.as_ref());
                if events.send(event).is_err() {
                    return;
                }

                match recovery {
                    Recovery::RetryAfter(delay) => {
                        info!("Reconnecting in {:?} (attempt {})", delay, supervisor.failures);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    Recovery::GiveUp => {
                        error!("Giving up after {} failed connection attempts", supervisor.failures);
                        let _ = events.send(TransportEvent::Closed);
                        return;
                    }
                }
            }
        };

        if events.send(event).is_err() {
            warn!("Session dropped its event stream, stopping event loop");
            return;
        }
    }
}
