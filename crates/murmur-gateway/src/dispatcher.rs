use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use murmur_sync::{PresenceStream, Subscription, SubscriptionId};
use murmur_types::{ConversationKey, LiveEvent, PresenceNotice, PresencePayload};

/// A row event tagged with the conversation it belongs to.
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub key: ConversationKey,
    pub event: LiveEvent,
}

/// Fans out row events per conversation and presence notices to every
/// joined connection.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// All row events; each subscription filters for its own key
    events_tx: broadcast::Sender<RoutedEvent>,

    presence_tx: broadcast::Sender<PresenceNotice>,

    /// Tracked presence: connection id -> (payload, forwarding stream id)
    presence: RwLock<HashMap<Uuid, (PresencePayload, u64)>>,

    /// Forwarding tasks behind every open stream
    forwarders: RwLock<HashMap<u64, JoinHandle<()>>>,

    next_stream: AtomicU64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        let (presence_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                events_tx,
                presence_tx,
                presence: RwLock::new(HashMap::new()),
                forwarders: RwLock::new(HashMap::new()),
                next_stream: AtomicU64::new(1),
            }),
        }
    }

    /// Publish a row event to every subscriber of `key`.
    pub fn publish(&self, key: ConversationKey, event: LiveEvent) {
        let _ = self.inner.events_tx.send(RoutedEvent { key, event });
    }

    /// Open an ordered event stream for one conversation.
    pub async fn subscribe(&self, key: ConversationKey) -> Subscription {
        let id = self.inner.next_stream.fetch_add(1, Ordering::Relaxed);
        let mut rx = self.inner.events_tx.subscribe();
        let (tx, events) = mpsc::unbounded_channel();

        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(routed) if routed.key == key => {
                        if tx.send(routed.event).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Subscription {} to {} lagged, {} events skipped", id, key, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.register(id, forwarder).await;

        debug!("Subscription {} opened for {}", id, key);
        Subscription {
            id: SubscriptionId(id),
            events,
        }
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(forwarder) = self.inner.forwarders.write().await.remove(&id.0) {
            forwarder.abort();
            debug!("Subscription {} closed", id.0);
        }
    }

    /// Number of open streams, event and presence alike.
    pub async fn open_streams(&self) -> usize {
        self.inner
            .forwarders
            .read()
            .await
            .values()
            .filter(|forwarder| !forwarder.is_finished())
            .count()
    }

    /// Track a new forwarder, dropping the handles of those whose receiver
    /// went away.
    async fn register(&self, stream_id: u64, forwarder: JoinHandle<()>) {
        let mut forwarders = self.inner.forwarders.write().await;
        forwarders.retain(|_, existing| !existing.is_finished());
        forwarders.insert(stream_id, forwarder);
    }

    /// Drop every open stream as a transport failure would. Tracked presence
    /// is kept so rejoining connections see a consistent snapshot.
    pub async fn disconnect_all(&self) {
        let mut forwarders = self.inner.forwarders.write().await;
        for (_, forwarder) in forwarders.drain() {
            forwarder.abort();
        }
        warn!("All live streams disconnected");
    }

    /// Join presence as connection `conn_id`. The returned stream starts with
    /// a full snapshot, followed by every later notice.
    pub async fn presence_join(&self, conn_id: Uuid, payload: PresencePayload) -> PresenceStream {
        let stream_id = self.inner.next_stream.fetch_add(1, Ordering::Relaxed);
        let (tx, notices) = mpsc::unbounded_channel();

        // Notices are only sent under the presence lock, so nothing can slip
        // between the snapshot and the receiver.
        let (mut rx, previous) = {
            let mut presence = self.inner.presence.write().await;
            let rx = self.inner.presence_tx.subscribe();
            let previous = presence.insert(conn_id, (payload.clone(), stream_id));
            let entries = presence.values().map(|(p, _)| p.clone()).collect();
            let _ = tx.send(PresenceNotice::Sync { entries });
            let _ = self.inner.presence_tx.send(PresenceNotice::Join {
                entries: vec![payload.clone()],
            });
            (rx, previous)
        };

        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notice) => {
                        if tx.send(notice).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Presence stream {} lagged, {} notices skipped", stream_id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Some((_, old_stream)) = previous {
            if let Some(old) = self.inner.forwarders.write().await.remove(&old_stream) {
                old.abort();
            }
        }
        self.register(stream_id, forwarder).await;

        debug!("{} ({}) joined presence", payload.display_name, payload.user_id);
        PresenceStream { notices }
    }

    /// Replace the tracked payload of a joined connection. Returns false if
    /// the connection never joined.
    pub async fn presence_track(&self, conn_id: Uuid, payload: PresencePayload) -> bool {
        let mut presence = self.inner.presence.write().await;
        let Some(entry) = presence.get_mut(&conn_id) else {
            return false;
        };
        entry.0 = payload.clone();
        let _ = self.inner.presence_tx.send(PresenceNotice::Join {
            entries: vec![payload],
        });
        true
    }

    pub async fn presence_leave(&self, conn_id: Uuid) {
        let removed = {
            let mut presence = self.inner.presence.write().await;
            let Some((payload, stream_id)) = presence.remove(&conn_id) else {
                return;
            };

            // Another connection of the same user keeps them online.
            let remaining = presence
                .values()
                .find(|(p, _)| p.user_id == payload.user_id)
                .map(|(p, _)| p.clone());
            let notice = match remaining {
                Some(other) => PresenceNotice::Join { entries: vec![other] },
                None => PresenceNotice::Leave {
                    entries: vec![payload.clone()],
                },
            };
            let _ = self.inner.presence_tx.send(notice);
            (payload, stream_id)
        };

        let (payload, stream_id) = removed;
        if let Some(forwarder) = self.inner.forwarders.write().await.remove(&stream_id) {
            forwarder.abort();
        }
        debug!("{} ({}) left presence", payload.display_name, payload.user_id);
    }

    /// Tracked payloads of every joined connection.
    pub async fn online(&self) -> Vec<PresencePayload> {
        self.inner
            .presence
            .read()
            .await
            .values()
            .map(|(p, _)| p.clone())
            .collect()
    }
}
