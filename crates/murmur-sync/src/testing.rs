//! In-memory collaborators for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use murmur_types::{
    ConversationKey, LiveEvent, Message, MessageEdit, PagedMessage, PresenceNotice, PresencePayload,
    Reaction,
};

use crate::backend::{
    EventSubscription, PagedQuery, PresenceChannel, PresenceStream, Subscription, SubscriptionId,
    WriteApi,
};
use crate::error::BackendError;

pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub(crate) fn message_at(key: ConversationKey, n: usize, at: DateTime<Utc>) -> Message {
    Message {
        id: Uuid::new_v4(),
        conversation: key,
        author_id: Uuid::from_u128(1 + (n % 3) as u128),
        author_name: format!("user{}", 1 + n % 3),
        author_avatar: None,
        body: format!("message {}", n),
        created_at: at,
        edited: false,
        edited_at: None,
        reactions: Vec::new(),
    }
}

/// `count` messages for `key`, oldest first, one second apart.
pub(crate) fn history(key: ConversationKey, count: usize) -> Vec<Message> {
    (0..count)
        .map(|n| message_at(key, n, base_time() + Duration::seconds(n as i64)))
        .collect()
}

pub(crate) fn paged<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Vec<PagedMessage> {
    messages
        .into_iter()
        .map(|m| PagedMessage {
            message: m.clone(),
            reactions: Vec::new(),
        })
        .collect()
}

pub(crate) fn reaction(user: u128, emoji: &str) -> Reaction {
    Reaction {
        emoji: emoji.to_string(),
        user_id: Uuid::from_u128(user),
        user_name: format!("user{}", user),
    }
}

/// Holds a fetch until the test releases it.
#[derive(Default)]
pub(crate) struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    pub(crate) fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Write {
    Create(ConversationKey, String),
    Edit(ConversationKey, Uuid, String),
    Delete(ConversationKey, Uuid),
    React(ConversationKey, Uuid, String),
    Unreact(ConversationKey, Uuid, String),
}

#[derive(Default)]
struct FakeState {
    histories: HashMap<ConversationKey, Vec<Message>>,
    gates: HashMap<(ConversationKey, u32), Arc<Gate>>,
    failing: HashSet<(ConversationKey, u32)>,
    subscribers: HashMap<SubscriptionId, (ConversationKey, mpsc::UnboundedSender<LiveEvent>)>,
    log: Vec<String>,
    writes: Vec<Write>,
    reject_writes: Option<BackendError>,
    reject_subscribe: bool,
    unsubscribe_delay: Option<std::time::Duration>,
    peak_subscribers: usize,
}

/// Scripted backend: fixed histories, optional gated or failing pages and
/// manual event emission.
pub(crate) struct FakeBackend {
    pub(crate) user_id: Uuid,
    next_sub: AtomicU64,
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub(crate) fn new(user_id: Uuid) -> Arc<Self> {
        Arc::new(Self {
            user_id,
            next_sub: AtomicU64::new(1),
            state: Mutex::new(FakeState::default()),
        })
    }

    fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub(crate) fn set_history(&self, key: ConversationKey, messages: Vec<Message>) {
        self.with(|s| s.histories.insert(key, messages));
    }

    pub(crate) fn gate(&self, key: ConversationKey, page: u32) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.with(|s| s.gates.insert((key, page), gate.clone()));
        gate
    }

    pub(crate) fn fail_page(&self, key: ConversationKey, page: u32, failing: bool) {
        self.with(|s| {
            if failing {
                s.failing.insert((key, page));
            } else {
                s.failing.remove(&(key, page));
            }
        });
    }

    pub(crate) fn reject_writes(&self, error: Option<BackendError>) {
        self.with(|s| s.reject_writes = error);
    }

    pub(crate) fn reject_subscribe(&self, reject: bool) {
        self.with(|s| s.reject_subscribe = reject);
    }

    /// Make every unsubscribe take `delay` before the stream is released.
    pub(crate) fn slow_unsubscribe(&self, delay: std::time::Duration) {
        self.with(|s| s.unsubscribe_delay = Some(delay));
    }

    /// Most subscriptions ever open at the same time.
    pub(crate) fn peak_subscribers(&self) -> usize {
        self.with(|s| s.peak_subscribers)
    }

    /// Deliver `event` to every open subscription for `key`.
    pub(crate) fn emit(&self, key: ConversationKey, event: LiveEvent) -> usize {
        self.with(|s| {
            s.subscribers
                .values()
                .filter(|(k, _)| *k == key)
                .filter(|(_, tx)| tx.send(event.clone()).is_ok())
                .count()
        })
    }

    /// Simulate the transport dropping every subscription.
    pub(crate) fn drop_subscriptions(&self) {
        self.with(|s| s.subscribers.clear());
    }

    pub(crate) fn active_keys(&self) -> Vec<ConversationKey> {
        self.with(|s| s.subscribers.values().map(|(k, _)| *k).collect())
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.with(|s| s.log.clone())
    }

    pub(crate) fn writes(&self) -> Vec<Write> {
        self.with(|s| s.writes.clone())
    }

    fn record_write(&self, write: Write) -> Result<(), BackendError> {
        self.with(|s| {
            if let Some(err) = s.reject_writes.clone() {
                return Err(err);
            }
            s.writes.push(write);
            Ok(())
        })
    }
}

#[async_trait]
impl PagedQuery for FakeBackend {
    async fn fetch_page(
        &self,
        key: &ConversationKey,
        page_index: u32,
        page_size: u32,
    ) -> Result<Vec<PagedMessage>, BackendError> {
        let gate = self.with(|s| {
            s.log.push(format!("fetch {} {}", key, page_index));
            s.gates.get(&(*key, page_index)).cloned()
        });
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        self.with(|s| {
            if s.failing.contains(&(*key, page_index)) {
                return Err(BackendError::Unavailable("scripted failure".into()));
            }
            let history = s.histories.get(key).cloned().unwrap_or_default();
            Ok(paged(
                history
                    .iter()
                    .rev()
                    .skip((page_index * page_size) as usize)
                    .take(page_size as usize),
            ))
        })
    }
}

#[async_trait]
impl EventSubscription for FakeBackend {
    async fn subscribe(&self, key: &ConversationKey) -> Result<Subscription, BackendError> {
        let id = SubscriptionId(self.next_sub.fetch_add(1, Ordering::Relaxed));
        let (tx, events) = mpsc::unbounded_channel();
        self.with(|s| {
            s.log.push(format!("subscribe {}", key));
            if s.reject_subscribe {
                return Err(BackendError::Unavailable("subscribe refused".into()));
            }
            s.subscribers.insert(id, (*key, tx));
            s.peak_subscribers = s.peak_subscribers.max(s.subscribers.len());
            Ok(Subscription { id, events })
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(delay) = self.with(|s| s.unsubscribe_delay) {
            tokio::time::sleep(delay).await;
        }
        self.with(|s| {
            if let Some((key, _)) = s.subscribers.remove(&id) {
                s.log.push(format!("unsubscribe {}", key));
            }
        });
    }
}

#[async_trait]
impl WriteApi for FakeBackend {
    async fn create_message(&self, key: &ConversationKey, body: &str) -> Result<Message, BackendError> {
        self.record_write(Write::Create(*key, body.to_string()))?;
        Ok(Message {
            id: Uuid::new_v4(),
            conversation: *key,
            author_id: self.user_id,
            author_name: "me".into(),
            author_avatar: None,
            body: body.to_string(),
            created_at: Utc::now(),
            edited: false,
            edited_at: None,
            reactions: Vec::new(),
        })
    }

    async fn edit_message(&self, key: &ConversationKey, id: Uuid, body: &str) -> Result<(), BackendError> {
        self.record_write(Write::Edit(*key, id, body.to_string()))
    }

    async fn delete_message(&self, key: &ConversationKey, id: Uuid) -> Result<(), BackendError> {
        self.record_write(Write::Delete(*key, id))
    }

    async fn add_reaction(&self, key: &ConversationKey, message_id: Uuid, emoji: &str) -> Result<(), BackendError> {
        self.record_write(Write::React(*key, message_id, emoji.to_string()))
    }

    async fn remove_reaction(&self, key: &ConversationKey, message_id: Uuid, emoji: &str) -> Result<(), BackendError> {
        self.record_write(Write::Unreact(*key, message_id, emoji.to_string()))
    }
}

/// Presence channel that echoes tracked payloads back as join notices.
#[derive(Default)]
pub(crate) struct FakePresence {
    inner: Mutex<FakePresenceState>,
}

#[derive(Default)]
struct FakePresenceState {
    others: Vec<PresencePayload>,
    tracked: Vec<PresencePayload>,
    tx: Option<mpsc::UnboundedSender<PresenceNotice>>,
    joins: usize,
    leaves: usize,
}

impl FakePresence {
    pub(crate) fn with_others(others: Vec<PresencePayload>) -> Arc<Self> {
        let fake = Self::default();
        fake.inner.lock().unwrap().others = others;
        Arc::new(fake)
    }

    pub(crate) fn push(&self, notice: PresenceNotice) {
        if let Some(tx) = &self.inner.lock().unwrap().tx {
            let _ = tx.send(notice);
        }
    }

    pub(crate) fn drop_stream(&self) {
        self.inner.lock().unwrap().tx = None;
    }

    pub(crate) fn tracked(&self) -> Vec<PresencePayload> {
        self.inner.lock().unwrap().tracked.clone()
    }

    pub(crate) fn joins(&self) -> usize {
        self.inner.lock().unwrap().joins
    }

    pub(crate) fn leaves(&self) -> usize {
        self.inner.lock().unwrap().leaves
    }
}

#[async_trait]
impl PresenceChannel for FakePresence {
    async fn join(&self, payload: &PresencePayload) -> Result<PresenceStream, BackendError> {
        let mut state = self.inner.lock().unwrap();
        let (tx, notices) = mpsc::unbounded_channel();
        let mut entries = state.others.clone();
        entries.push(payload.clone());
        let _ = tx.send(PresenceNotice::Sync { entries });
        state.tx = Some(tx);
        state.tracked.push(payload.clone());
        state.joins += 1;
        Ok(PresenceStream { notices })
    }

    async fn track(&self, payload: &PresencePayload) -> Result<(), BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.tracked.push(payload.clone());
        match &state.tx {
            Some(tx) => {
                let _ = tx.send(PresenceNotice::Join {
                    entries: vec![payload.clone()],
                });
                Ok(())
            }
            None => Err(BackendError::Closed),
        }
    }

    async fn leave(&self) -> Result<(), BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.tx = None;
        state.leaves += 1;
        Ok(())
    }
}

/// Edit event helper.
pub(crate) fn edit(id: Uuid, body: &str) -> LiveEvent {
    LiveEvent::MessageUpdate {
        edit: MessageEdit {
            id,
            body: body.to_string(),
            edited: true,
            edited_at: Some(base_time() + Duration::hours(1)),
        },
    }
}
