/*!
Transport MQTT en mémoire pour tester sans broker

Implémente `vitalsim_device::Transport`. Enregistre les publications et les
abonnements, et permet de simuler ce que ferait le broker (CONNACK, PUBACK,
messages C2D, coupures réseau, abandon de la reconnexion).
*/

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use vitalsim_device::{EventStream, Transport, TransportError, TransportEvent};

/// Réaction du faux broker à l'ouverture de la connexion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehaviour {
    /// CONNACK accepté
    Accept,
    /// CONNACK refusé avec ce code de retour
    Refuse(u8),
    /// Aucun CONNACK (pour tester le timeout)
    Silent,
    /// Erreur réseau puis abandon
    Unreachable(String),
    /// Erreur réseau, le transport continue de réessayer sans succès
    Flaky(String),
}

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

struct MockState {
    behaviour: Mutex<ConnectBehaviour>,
    reject_publish: AtomicBool,
    auto_ack: AtomicBool,
    connack_on_close: AtomicBool,
    publish_delay: Mutex<Duration>,
    sender: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<String>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    next_packet_id: AtomicU16,
}

/// Transport simulé; les clones partagent le même état
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_behaviour(ConnectBehaviour::Accept)
    }

    pub fn with_behaviour(behaviour: ConnectBehaviour) -> Self {
        Self {
            state: Arc::new(MockState {
                behaviour: Mutex::new(behaviour),
                reject_publish: AtomicBool::new(false),
                auto_ack: AtomicBool::new(true),
                connack_on_close: AtomicBool::new(false),
                publish_delay: Mutex::new(Duration::ZERO),
                sender: Mutex::new(None),
                published: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                next_packet_id: AtomicU16::new(1),
            }),
        }
    }

    /// Change la réaction aux prochaines ouvertures
    pub fn set_behaviour(&self, behaviour: ConnectBehaviour) {
        *self.state.behaviour.lock().unwrap() = behaviour;
    }

    /// Les publications suivantes échouent côté transport
    pub fn reject_publishes(&self, reject: bool) {
        self.state.reject_publish.store(reject, Ordering::SeqCst);
    }

    /// Envoie (ou non) un PUBACK pour chaque publication
    pub fn auto_ack(&self, enabled: bool) {
        self.state.auto_ack.store(enabled, Ordering::SeqCst);
    }

    /// Chaque publication met ce temps avant d'être acceptée
    pub fn set_publish_delay(&self, delay: Duration) {
        *self.state.publish_delay.lock().unwrap() = delay;
    }

    /// Un CONNACK retardataire arrive juste avant la fermeture
    pub fn connack_on_close(&self, enabled: bool) {
        self.state.connack_on_close.store(enabled, Ordering::SeqCst);
    }

    fn emit(&self, event: TransportEvent) -> Result<()> {
        let guard = self.state.sender.lock().unwrap();
        let sender = guard
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Transport not open"))?;
        sender
            .send(event)
            .map_err(|e| anyhow::anyhow!("Send error: {}", e))?;
        Ok(())
    }

    /// Simule un message cloud-to-device
    pub fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let topic = topic.into();
        log::info!("📨 [MOCK] Simulated incoming: {}", topic);
        self.emit(TransportEvent::Message {
            topic,
            payload: payload.into(),
        })
    }

    /// Simule une coupure réseau inattendue
    pub fn simulate_drop(&self, reason: &str) -> Result<()> {
        log::info!("💥 [MOCK] Simulated drop: {}", reason);
        self.emit(TransportEvent::Dropped {
            reason: reason.to_string(),
        })
    }

    /// Simule une reconnexion automatique réussie
    pub fn simulate_reconnect(&self) -> Result<()> {
        log::info!("🔁 [MOCK] Simulated reconnect");
        self.emit(TransportEvent::ConnAck { code: 0 })
    }

    /// Simule l'abandon définitif du transport
    pub fn simulate_closed(&self) -> Result<()> {
        log::info!("🛑 [MOCK] Simulated close");
        self.emit(TransportEvent::Closed)?;
        self.state.sender.lock().unwrap().take();
        Ok(())
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.lock().unwrap().clone()
    }

    /// Parse tous les payloads publiés en JSON
    pub fn published_json(&self) -> Result<Vec<serde_json::Value>> {
        self.published()
            .iter()
            .map(|msg| Ok(serde_json::from_slice(&msg.payload)?))
            .collect()
    }

    /// Récupère les abonnements (pour assertions de tests)
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.subscriptions.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.state.sender.lock().unwrap().is_some()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    async fn open(&self, keep_alive: Duration) -> Result<EventStream, TransportError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let (sender, stream) = mpsc::unbounded_channel();

        let behaviour = self.state.behaviour.lock().unwrap().clone();
        log::info!("🔌 [MOCK] Open (keep-alive {:?}, {:?})", keep_alive, behaviour);
        match behaviour {
            ConnectBehaviour::Accept => {
                let _ = sender.send(TransportEvent::ConnAck { code: 0 });
            }
            ConnectBehaviour::Refuse(code) => {
                let _ = sender.send(TransportEvent::ConnAck { code });
            }
            ConnectBehaviour::Silent => {}
            ConnectBehaviour::Unreachable(reason) => {
                let _ = sender.send(TransportEvent::Dropped { reason });
                let _ = sender.send(TransportEvent::Closed);
            }
            ConnectBehaviour::Flaky(reason) => {
                let _ = sender.send(TransportEvent::Dropped { reason });
            }
        }

        *self.state.sender.lock().unwrap() = Some(sender);
        Ok(stream)
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        self.state.subscriptions.lock().unwrap().push(filter.to_string());
        log::info!("📥 [MOCK] Subscribed to {}", filter);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        if self.state.reject_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Request("request queue full".to_string()));
        }
        let delay = *self.state.publish_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        log::info!("📤 [MOCK] Published to {}: {} bytes", topic, payload.len());
        self.state.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });

        if self.state.auto_ack.load(Ordering::SeqCst) {
            let packet_id = self.state.next_packet_id.fetch_add(1, Ordering::SeqCst);
            let _ = self.emit(TransportEvent::PubAck { packet_id });
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(sender) = self.state.sender.lock().unwrap().take() {
            if self.state.connack_on_close.load(Ordering::SeqCst) {
                let _ = sender.send(TransportEvent::ConnAck { code: 0 });
            }
            let _ = sender.send(TransportEvent::Closed);
        }
        Ok(())
    }
}
