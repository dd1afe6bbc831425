//! Live-connection tracking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::protocol::OutboundEvent;

/// Unique connection identifier, used for registry keys and logging.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl Default for ClientId {
    fn default() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl ClientId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected client. The session's writer task owns the socket; everyone
/// else talks to the client through the bounded send queue here.
pub struct Client {
    pub id: ClientId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Client {
    fn new(id: ClientId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_millis()),
        }
    }

    /// Enqueue raw text for the writer task.
    ///
    /// Returns `false` when the queue is full or the writer is gone; the
    /// message is dropped either way.
    pub fn send(&self, text: String) -> bool {
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(client_id = %self.id, msg_len = msg.len(), "send queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Serialize an event and enqueue it.
    pub fn send_event(&self, event: &OutboundEvent) -> bool {
        let json = event.to_json();
        if json.is_empty() {
            return false;
        }
        self.send(json)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    /// Record transport-level pong (or ping) activity.
    pub fn record_pong(&self) {
        self.last_pong.store(now_millis(), Ordering::Relaxed);
    }

    /// Time since the last recorded pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        let last = self.last_pong.load(Ordering::Relaxed);
        Duration::from_millis(now_millis().saturating_sub(last))
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The set of live connections. Mutated only by the session lifecycle:
/// add on accept, remove on terminal close. Size is read for observability.
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
    max_send_queue: usize,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new client and hand back its send-queue receiver.
    pub fn register(&self) -> (Arc<Client>, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let client = Arc::new(Client::new(id.clone(), tx));
        self.clients.insert(id, client.clone());
        (client, rx)
    }

    /// Remove a client. Removing an absent id is a no-op.
    pub fn unregister(&self, id: &ClientId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.mark_disconnected();
        }
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_unique_with_prefix() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
        assert!(a.0.starts_with("conn_"));
    }

    #[test]
    fn register_and_unregister() {
        let registry = ClientRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (c1, _rx1) = registry.register();
        let (c2, _rx2) = registry.register();
        assert_eq!(registry.count(), 2);

        registry.unregister(&c1.id);
        assert_eq!(registry.count(), 1);
        registry.unregister(&c2.id);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ClientRegistry::new(32);
        let (client, _rx) = registry.register();

        registry.unregister(&client.id);
        registry.unregister(&client.id);
        registry.unregister(&ClientId::new());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn unregister_marks_disconnected() {
        let registry = ClientRegistry::new(32);
        let (client, _rx) = registry.register();
        assert!(client.is_connected());

        registry.unregister(&client.id);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn send_reaches_receiver() {
        let registry = ClientRegistry::new(32);
        let (client, mut rx) = registry.register();

        assert!(client.send("hello".into()));
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn send_event_serializes() {
        let registry = ClientRegistry::new(32);
        let (client, mut rx) = registry.register();

        assert!(client.send_event(&OutboundEvent::typing(true)));
        let raw = rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["type"], "typing");
        assert_eq!(v["status"], true);
    }

    #[test]
    fn send_to_full_queue_drops() {
        let registry = ClientRegistry::new(1);
        let (client, _rx) = registry.register();

        assert!(client.send("first".into()));
        assert!(!client.send("second".into()));
    }

    #[test]
    fn send_to_closed_receiver_fails() {
        let registry = ClientRegistry::new(4);
        let (client, rx) = registry.register();
        drop(rx);
        assert!(!client.send("late".into()));
    }

    #[test]
    fn pong_tracking() {
        let registry = ClientRegistry::new(4);
        let (client, _rx) = registry.register();

        client.record_pong();
        assert!(client.last_pong_elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn concurrent_register_unregister_keeps_count_consistent() {
        let registry = Arc::new(ClientRegistry::new(4));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let reg = registry.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..50 {
                    let (client, _rx) = reg.register();
                    ids.push(client.id.clone());
                }
                // Close half from each task, concurrently with other tasks.
                for id in ids.iter().take(25) {
                    reg.unregister(id);
                }
                ids
            }));
        }

        let mut remaining = Vec::new();
        for handle in handles {
            let ids = handle.await.unwrap();
            remaining.extend(ids.into_iter().skip(25));
        }

        // 16 tasks x (50 opened - 25 closed)
        assert_eq!(registry.count(), 16 * 25);

        for id in &remaining {
            registry.unregister(id);
        }
        assert_eq!(registry.count(), 0);
    }
}
