// backend/mod.rs
use dashmap::DashMap;
use metrics::counter;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{error::AppError, models::GatewayMessage};

/// The one light-server connection queries are routed to.
///
/// Every registration gets a new generation. Only the newest generation may
/// answer queries; a takeover fails whatever was still waiting on the old one.
pub struct BackendLink {
    current: Mutex<Option<Registration>>,
    generation: AtomicU64,
    pending: DashMap<Uuid, PendingQuery>,
    attached: watch::Sender<Option<u64>>,
    timeout: Duration,
}

struct Registration {
    generation: u64,
    tx: mpsc::UnboundedSender<GatewayMessage>,
}

struct PendingQuery {
    generation: u64,
    reply: oneshot::Sender<Result<Value, AppError>>,
}

impl BackendLink {
    pub fn new(timeout: Duration) -> Self {
        let (attached, _) = watch::channel(None);
        Self {
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
            pending: DashMap::new(),
            attached,
            timeout,
        }
    }

    /// Makes `tx` the light server queries go to. Registering again on the
    /// channel that already owns the link keeps its generation.
    pub async fn register(&self, tx: mpsc::UnboundedSender<GatewayMessage>) -> u64 {
        let mut current = self.current.lock().await;
        if let Some(owner) = current.as_ref().filter(|owner| owner.tx.same_channel(&tx)) {
            let generation = owner.generation;
            let _ = tx.send(GatewayMessage::Registered { generation });
            debug!(%generation, "Light server registered again on its own connection");
            return generation;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = current.replace(Registration {
            generation,
            tx: tx.clone(),
        });

        if let Some(previous) = previous {
            warn!(
                old = previous.generation,
                new = generation,
                "Light server registration taken over"
            );
            let _ = previous.tx.send(GatewayMessage::Superseded { generation });
            self.fail_pending(previous.generation, || AppError::BackendReplaced);
        }

        let _ = tx.send(GatewayMessage::Registered { generation });
        self.attached.send_replace(Some(generation));
        counter!("gateway_backend_registrations_total").increment(1);
        info!(%generation, "Light server registered");
        generation
    }

    pub async fn detach(&self, generation: u64) {
        {
            let mut current = self.current.lock().await;
            if current.as_ref().is_some_and(|r| r.generation == generation) {
                *current = None;
                self.attached.send_replace(None);
                info!(%generation, "Light server detached");
            }
        }
        self.fail_pending(generation, || AppError::BackendGone);
    }

    pub async fn is_current(&self, generation: u64) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| r.generation == generation)
    }

    pub fn current_generation(&self) -> Option<u64> {
        *self.attached.borrow()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Hands a reply to the query waiting on it. Replies from a generation
    /// other than the one the query was sent to are dropped.
    pub fn deliver(&self, generation: u64, id: Uuid, data: Value) -> bool {
        match self.pending.remove_if(&id, |_, query| query.generation == generation) {
            Some((_, query)) => {
                let _ = query.reply.send(Ok(data));
                true
            }
            None => {
                warn!(%generation, %id, "Dropping reply for unknown or stale query");
                false
            }
        }
    }

    /// Sends one query and waits for its reply. Waiting for a light server
    /// to attach and for the reply share one deadline.
    pub async fn query(&self, payload: Value) -> Result<Value, AppError> {
        let deadline = Instant::now() + self.timeout;
        let id = Uuid::new_v4();

        let mut attached = self.attached.subscribe();
        match timeout_at(deadline, attached.wait_for(Option::is_some)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => return Err(AppError::BackendUnavailable),
        }

        let rx = {
            let current = self.current.lock().await;
            let Some(registration) = current.as_ref() else {
                return Err(AppError::BackendUnavailable);
            };
            let (reply, rx) = oneshot::channel();
            self.pending.insert(
                id,
                PendingQuery {
                    generation: registration.generation,
                    reply,
                },
            );
            if registration
                .tx
                .send(GatewayMessage::Query { id, payload })
                .is_err()
            {
                self.pending.remove(&id);
                return Err(AppError::BackendGone);
            }
            debug!(%id, generation = registration.generation, "Query sent");
            rx
        };

        match timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AppError::BackendGone),
            Err(_) => {
                self.pending.remove(&id);
                warn!(%id, "Query timed out");
                Err(AppError::BackendTimeout)
            }
        }
    }

    fn fail_pending(&self, generation: u64, error: impl Fn() -> AppError) {
        let stale: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|entry| entry.generation == generation)
            .map(|entry| *entry.key())
            .collect();
        for id in stale {
            if let Some((_, query)) = self.pending.remove(&id) {
                let _ = query.reply.send(Err(error()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn link(timeout_ms: u64) -> Arc<BackendLink> {
        Arc::new(BackendLink::new(Duration::from_millis(timeout_ms)))
    }

    async fn next_query(rx: &mut mpsc::UnboundedReceiver<GatewayMessage>) -> (Uuid, Value) {
        loop {
            match rx.recv().await.expect("channel open") {
                GatewayMessage::Query { id, payload } => return (id, payload),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn query_round_trip() {
        let link = link(1_000);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let generation = link.register(tx).await;
        assert_eq!(
            rx.recv().await,
            Some(GatewayMessage::Registered { generation })
        );

        let querying = tokio::spawn({
            let link = Arc::clone(&link);
            async move { link.query(json!({"reqtype": "getstate"})).await }
        });

        let (id, payload) = next_query(&mut rx).await;
        assert_eq!(payload, json!({"reqtype": "getstate"}));
        assert!(link.deliver(generation, id, json!({"state": ["1"]})));
        assert_eq!(querying.await.unwrap().unwrap(), json!({"state": ["1"]}));
        assert_eq!(link.pending_count(), 0);
    }

    #[tokio::test]
    async fn takeover_fails_queries_of_old_registrant() {
        let link = link(1_000);
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let old = link.register(old_tx).await;

        let querying = tokio::spawn({
            let link = Arc::clone(&link);
            async move { link.query(json!({"reqtype": "setstate"})).await }
        });
        let (id, _) = next_query(&mut old_rx).await;

        let (new_tx, _new_rx) = mpsc::unbounded_channel();
        let new = link.register(new_tx).await;
        assert!(new > old);
        assert_eq!(
            old_rx.recv().await,
            Some(GatewayMessage::Superseded { generation: new })
        );
        assert!(matches!(
            querying.await.unwrap(),
            Err(AppError::BackendReplaced)
        ));

        // a late reply from the replaced connection goes nowhere
        assert!(!link.deliver(old, id, json!("1")));
        assert!(!link.is_current(old).await);
        assert!(link.is_current(new).await);
    }

    #[tokio::test]
    async fn registering_again_on_same_connection_keeps_ownership() {
        let link = link(1_000);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let generation = link.register(tx.clone()).await;
        assert_eq!(rx.recv().await, Some(GatewayMessage::Registered { generation }));

        let querying = tokio::spawn({
            let link = Arc::clone(&link);
            async move { link.query(json!({"reqtype": "getstate"})).await }
        });
        let (id, _) = next_query(&mut rx).await;

        assert_eq!(link.register(tx.clone()).await, generation);
        assert_eq!(rx.recv().await, Some(GatewayMessage::Registered { generation }));
        assert!(link.is_current(generation).await);
        assert!(link.deliver(generation, id, json!({"state": ["0"]})));
        assert_eq!(querying.await.unwrap().unwrap(), json!({"state": ["0"]}));
        assert_eq!(link.current_generation(), Some(generation));
    }

    #[tokio::test]
    async fn concurrent_registrations_leave_newest_generation_in_charge() {
        let link = link(1_000);
        let registering: Vec<_> = (0..8)
            .map(|_| {
                let link = Arc::clone(&link);
                tokio::spawn(async move {
                    let (tx, rx) = mpsc::unbounded_channel();
                    (link.register(tx).await, rx)
                })
            })
            .collect();
        let mut newest = 0;
        let mut receivers = Vec::new();
        for task in registering {
            let (generation, rx) = task.await.unwrap();
            newest = newest.max(generation);
            receivers.push(rx);
        }
        assert!(link.is_current(newest).await);
        assert_eq!(link.current_generation(), Some(newest));
    }

    #[tokio::test]
    async fn reply_from_other_generation_is_rejected() {
        let link = link(200);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let generation = link.register(tx).await;

        let querying = tokio::spawn({
            let link = Arc::clone(&link);
            async move { link.query(json!({"reqtype": "getconfig"})).await }
        });
        let (id, _) = next_query(&mut rx).await;
        assert!(!link.deliver(generation + 1, id, json!({})));
        assert!(matches!(
            querying.await.unwrap(),
            Err(AppError::BackendTimeout)
        ));
        assert_eq!(link.pending_count(), 0);
    }

    #[tokio::test]
    async fn no_backend_is_unavailable_after_timeout() {
        let link = link(50);
        assert!(matches!(
            link.query(json!({"reqtype": "getstate"})).await,
            Err(AppError::BackendUnavailable)
        ));
    }

    #[tokio::test]
    async fn query_waits_for_late_registration() {
        let link = link(1_000);
        let querying = tokio::spawn({
            let link = Arc::clone(&link);
            async move { link.query(json!({"reqtype": "getstate"})).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let generation = link.register(tx).await;
        let (id, _) = next_query(&mut rx).await;
        link.deliver(generation, id, json!("ok"));
        assert_eq!(querying.await.unwrap().unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn detach_fails_pending_queries() {
        let link = link(1_000);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let generation = link.register(tx).await;
        let querying = tokio::spawn({
            let link = Arc::clone(&link);
            async move { link.query(json!({"reqtype": "reconnect"})).await }
        });
        next_query(&mut rx).await;
        link.detach(generation).await;
        assert!(matches!(querying.await.unwrap(), Err(AppError::BackendGone)));
        assert_eq!(link.current_generation(), None);
    }
}
