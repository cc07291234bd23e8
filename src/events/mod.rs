// events/mod.rs
use dashmap::DashMap;
use metrics::gauge;
use std::sync::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::ClientMessage;

/// Fans light-server state pushes out to every connected browser.
pub struct StateHub {
    tx: broadcast::Sender<ClientMessage>,
    clients: DashMap<Uuid, ()>,
    latest: RwLock<Option<serde_json::Value>>,
}

impl StateHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self {
            tx,
            clients: DashMap::new(),
            latest: RwLock::new(None),
        }
    }

    pub fn publish(&self, state: serde_json::Value) -> usize {
        if let Ok(mut latest) = self.latest.write() {
            *latest = Some(state.clone());
        }
        self.tx.send(ClientMessage::PushState { state }).unwrap_or(0)
    }

    /// Registers a browser and returns its receiver plus the last known state.
    pub fn subscribe(
        &self,
        client_id: Uuid,
    ) -> (broadcast::Receiver<ClientMessage>, Option<ClientMessage>) {
        self.clients.insert(client_id, ());
        gauge!("gateway_browser_clients").set(self.clients.len() as f64);
        let latest = self
            .latest
            .read()
            .ok()
            .and_then(|latest| latest.clone())
            .map(|state| ClientMessage::PushState { state });
        (self.tx.subscribe(), latest)
    }

    pub fn unsubscribe(&self, client_id: &Uuid) {
        self.clients.remove(client_id);
        gauge!("gateway_browser_clients").set(self.clients.len() as f64);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

impl Default for StateHub {
    fn default() -> Self {
        Self::new()
    }
}
