//! Conversation session controller.
//!
//! Every selection gets a fresh epoch and cancellation token. The previous
//! subscription is torn down before the timeline is touched, and every page
//! fetch or live event is applied only while its epoch is still current, so a
//! late result for an abandoned conversation can never reach the timeline.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_types::{ConversationKey, LiveEvent, Message};

use crate::backend::{ChatBackend, Subscription};
use crate::config::SyncConfig;
use crate::error::{BackendError, Result, SyncError};
use crate::timeline::TimelineStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading(ConversationKey),
    Active(ConversationKey),
    Closed,
}

/// Handle to the conversation session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    backend: Arc<dyn ChatBackend>,
    user_id: Uuid,
    config: SyncConfig,
    shared: Arc<Shared>,
    live: Mutex<LiveLink>,
    /// Parent of every per-selection token.
    shutdown: CancellationToken,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// State reachable from the listener task.
struct Shared {
    state: RwLock<SessionState>,
    changes: watch::Sender<u64>,
}

struct SessionState {
    phase: Phase,
    epoch: u64,
    timeline: TimelineStore,
}

struct LiveLink {
    epoch: u64,
    token: CancellationToken,
    listener: Option<JoinHandle<()>>,
}

enum Next {
    Cancelled,
    Event(LiveEvent),
    Dropped,
}

impl Session {
    pub fn new(backend: Arc<dyn ChatBackend>, user_id: Uuid, config: SyncConfig) -> Self {
        let shutdown = CancellationToken::new();
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(SessionInner {
                backend,
                user_id,
                shared: Arc::new(Shared {
                    state: RwLock::new(SessionState {
                        phase: Phase::Idle,
                        epoch: 0,
                        timeline: TimelineStore::new(config.page_size),
                    }),
                    changes,
                }),
                live: Mutex::new(LiveLink {
                    epoch: 0,
                    token: shutdown.child_token(),
                    listener: None,
                }),
                config,
                shutdown,
            }),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.inner.user_id
    }

    /// Revision counter, bumped whenever the visible timeline changes.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.shared.changes.subscribe()
    }

    pub async fn phase(&self) -> Phase {
        self.inner.shared.state.read().await.phase
    }

    pub async fn current_key(&self) -> Option<ConversationKey> {
        self.inner.shared.state.read().await.timeline.key()
    }

    /// Snapshot of the timeline, ascending.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.shared.state.read().await.timeline.messages().to_vec()
    }

    pub async fn message(&self, id: Uuid) -> Option<Message> {
        self.inner.shared.state.read().await.timeline.get(id).cloned()
    }

    pub async fn has_more(&self) -> bool {
        self.inner.shared.state.read().await.timeline.has_more()
    }

    pub async fn is_loading_older(&self) -> bool {
        self.inner.shared.state.read().await.timeline.is_loading_older()
    }

    /// Switch to `key`: tear down the previous subscription, reset the
    /// timeline, load the newest page and subscribe to live events.
    ///
    /// A failed first page leaves the timeline empty with paging stopped and
    /// is returned as [`SyncError::FetchFailed`]; the subscription is opened
    /// regardless. If another selection overtakes this one, this call returns
    /// `Ok(())` without touching the timeline.
    ///
    /// The selection runs on its own task, so dropping the returned future
    /// does not leave the session half switched.
    pub async fn select_conversation(&self, key: ConversationKey) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SyncError::Closed);
        }

        let session = self.clone();
        match tokio::spawn(async move { session.run_selection(key).await }).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                warn!("Selection of {} ended abnormally: {}", key, e);
                Err(SyncError::Closed)
            }
        }
    }

    async fn run_selection(&self, key: ConversationKey) -> Result<()> {
        let (epoch, token) = {
            let mut live = self.inner.live.lock().await;
            live.token.cancel();
            live.epoch += 1;
            live.token = self.inner.shutdown.child_token();

            // The old listener unsubscribes on cancellation. Waiting for it
            // under the lock keeps every later selection behind the teardown.
            if let Some(listener) = live.listener.take() {
                if let Err(e) = listener.await {
                    warn!("Listener task ended abnormally: {}", e);
                }
            }
            (live.epoch, live.token.clone())
        };

        {
            let mut state = self.inner.shared.state.write().await;
            if state.epoch > epoch || token.is_cancelled() {
                return Ok(());
            }
            state.epoch = epoch;
            state.phase = Phase::Loading(key);
            state.timeline.reset(Some(key));
        }
        self.inner.shared.bump();
        info!("{} selected {}", self.inner.user_id, key);

        let page_size = self.inner.config.page_size;
        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("First page of {} abandoned", key);
                return Ok(());
            }
            result = self.inner.backend.fetch_page(&key, 0, page_size) => result,
        };

        let outcome = {
            let mut state = self.inner.shared.state.write().await;
            if state.epoch != epoch {
                debug!("Discarding first page of {}: selection moved on", key);
                return Ok(());
            }
            let outcome = match fetched {
                Ok(page) => {
                    debug!("Loaded {} messages for {}", page.len(), key);
                    state.timeline.load_initial_page(page);
                    Ok(())
                }
                Err(source) => {
                    warn!("Failed to load {}: {}", key, source);
                    state.timeline.fail_initial();
                    Err(SyncError::FetchFailed { key, page: 0, source })
                }
            };
            state.phase = Phase::Active(key);
            outcome
        };
        self.inner.shared.bump();

        self.open_subscription(key, epoch, token).await;
        outcome
    }

    /// Fetch the next older page and merge it at the head.
    ///
    /// No-op (returns `Ok(0)`) when no conversation is active, another older
    /// load is in flight, history is exhausted, or the conversation changes
    /// before the page arrives. Returns the number of messages prepended.
    pub async fn load_older(&self) -> Result<usize> {
        let (live_epoch, token) = {
            let live = self.inner.live.lock().await;
            (live.epoch, live.token.clone())
        };

        let (key, epoch, page_index) = {
            let mut state = self.inner.shared.state.write().await;
            let Phase::Active(key) = state.phase else {
                return Ok(0);
            };
            if state.epoch != live_epoch {
                return Ok(0);
            }
            let Some(page_index) = state.timeline.begin_older() else {
                return Ok(0);
            };
            (key, state.epoch, page_index)
        };
        self.inner.shared.bump();

        let page_size = self.inner.config.page_size;
        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Older page {} of {} abandoned", page_index, key);
                return Ok(0);
            }
            result = self.inner.backend.fetch_page(&key, page_index, page_size) => result,
        };

        let outcome = {
            let mut state = self.inner.shared.state.write().await;
            if state.epoch != epoch {
                debug!("Discarding page {} of {}: selection moved on", page_index, key);
                return Ok(0);
            }
            match fetched {
                Ok(page) => {
                    let added = state.timeline.finish_older(page);
                    debug!("Prepended {} messages to {}", added, key);
                    Ok(added)
                }
                Err(source) => {
                    warn!("Failed to load page {} of {}: {}", page_index, key, source);
                    state.timeline.abort_older();
                    Err(SyncError::FetchFailed { key, page: page_index, source })
                }
            }
        };
        self.inner.shared.bump();
        outcome
    }

    /// Post a message. The timeline changes only when the insert event
    /// comes back through the subscription.
    pub async fn send(&self, body: &str) -> Result<Message> {
        if body.trim().is_empty() {
            return Err(SyncError::EmptyBody);
        }
        let key = self.active_key().await?;
        self.inner
            .backend
            .create_message(&key, body)
            .await
            .map_err(|e| self.write_failed("send", e))
    }

    pub async fn edit(&self, id: Uuid, body: &str) -> Result<()> {
        if body.trim().is_empty() {
            return Err(SyncError::EmptyBody);
        }
        let key = self.active_key().await?;
        self.inner
            .backend
            .edit_message(&key, id, body)
            .await
            .map_err(|e| self.write_failed("edit", e))
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let key = self.active_key().await?;
        self.inner
            .backend
            .delete_message(&key, id)
            .await
            .map_err(|e| self.write_failed("delete", e))
    }

    pub async fn react(&self, id: Uuid, emoji: &str) -> Result<()> {
        let key = self.active_key().await?;
        self.inner
            .backend
            .add_reaction(&key, id, emoji)
            .await
            .map_err(|e| self.write_failed("react", e))
    }

    pub async fn unreact(&self, id: Uuid, emoji: &str) -> Result<()> {
        let key = self.active_key().await?;
        self.inner
            .backend
            .remove_reaction(&key, id, emoji)
            .await
            .map_err(|e| self.write_failed("unreact", e))
    }

    /// Remove our `emoji` from the message if the timeline shows we hold it,
    /// otherwise add it. Returns `true` when a reaction was added.
    pub async fn toggle_reaction(&self, id: Uuid, emoji: &str) -> Result<bool> {
        let reacted = self
            .inner
            .shared
            .state
            .read()
            .await
            .timeline
            .get(id)
            .is_some_and(|m| m.has_reacted(self.inner.user_id, emoji));

        if reacted {
            self.unreact(id, emoji).await?;
        } else {
            self.react(id, emoji).await?;
        }
        Ok(!reacted)
    }

    /// Cancel the subscription and any in-flight fetch, and close the
    /// session. Further selections fail with [`SyncError::Closed`].
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let epoch = {
            let mut live = self.inner.live.lock().await;
            live.epoch += 1;
            if let Some(listener) = live.listener.take() {
                if let Err(e) = listener.await {
                    warn!("Listener task ended abnormally: {}", e);
                }
            }
            live.epoch
        };

        {
            let mut state = self.inner.shared.state.write().await;
            state.epoch = state.epoch.max(epoch);
            state.phase = Phase::Closed;
            state.timeline.reset(None);
        }
        self.inner.shared.bump();
        info!("{} session closed", self.inner.user_id);
    }

    async fn active_key(&self) -> Result<ConversationKey> {
        match self.inner.shared.state.read().await.phase {
            Phase::Active(key) => Ok(key),
            Phase::Closed => Err(SyncError::Closed),
            Phase::Idle | Phase::Loading(_) => Err(SyncError::NoActiveConversation),
        }
    }

    fn write_failed(&self, op: &str, source: BackendError) -> SyncError {
        if source.is_definitive() {
            warn!("{} {} rejected: {}", self.inner.user_id, op, source);
        } else {
            warn!("{} {} failed: {}", self.inner.user_id, op, source);
        }
        SyncError::WriteFailed(source)
    }

    async fn open_subscription(&self, key: ConversationKey, epoch: u64, token: CancellationToken) {
        // Subscribing under the lock means a newer selection cannot start
        // its own subscription until this one is installed or never opened.
        let mut live = self.inner.live.lock().await;
        if live.epoch != epoch || token.is_cancelled() {
            debug!("Selection of {} moved on before subscribing", key);
            return;
        }

        let subscription = match self.inner.backend.subscribe(&key).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!("Subscribing to {} failed, will retry: {}", key, e);
                None
            }
        };

        let listener = Listener {
            backend: self.inner.backend.clone(),
            shared: self.inner.shared.clone(),
            config: self.inner.config.clone(),
            key,
            epoch,
            token,
        };
        live.listener = Some(tokio::spawn(listener.run(subscription)));
    }
}

impl Shared {
    fn bump(&self) {
        self.changes.send_modify(|revision| *revision += 1);
    }

    async fn apply_live(&self, epoch: u64, event: LiveEvent) {
        let changed = {
            let mut state = self.state.write().await;
            if state.epoch != epoch {
                debug!("Dropping stale event for message {}", event.message_id());
                return;
            }
            state.timeline.apply(event)
        };
        if changed {
            self.bump();
        }
    }
}

/// Owns the live subscription of one selection.
struct Listener {
    backend: Arc<dyn ChatBackend>,
    shared: Arc<Shared>,
    config: SyncConfig,
    key: ConversationKey,
    epoch: u64,
    token: CancellationToken,
}

impl Listener {
    async fn run(self, mut subscription: Option<Subscription>) {
        let mut attempts: u32 = 0;

        loop {
            let Some(sub) = subscription.as_mut() else {
                let max = self.config.max_resubscribe_attempts;
                if max > 0 && attempts >= max {
                    warn!("Giving up on {} after {} resubscribe attempts", self.key, attempts);
                    return;
                }
                attempts += 1;

                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => return,
                    _ = tokio::time::sleep(self.config.resubscribe_delay) => {}
                }

                match self.backend.subscribe(&self.key).await {
                    Ok(sub) if self.token.is_cancelled() => {
                        self.backend.unsubscribe(sub.id).await;
                        return;
                    }
                    Ok(sub) => {
                        info!("Resubscribed to {} (attempt {})", self.key, attempts);
                        subscription = Some(sub);
                    }
                    Err(e) if e.is_definitive() => {
                        warn!("Subscription to {} refused: {}", self.key, e);
                        return;
                    }
                    Err(e) => warn!("Resubscribing to {} failed: {}", self.key, e),
                }
                continue;
            };

            let id = sub.id;
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => Next::Cancelled,
                event = sub.events.recv() => event.map_or(Next::Dropped, Next::Event),
            };

            match next {
                Next::Cancelled => {
                    self.backend.unsubscribe(id).await;
                    debug!("Unsubscribed from {}", self.key);
                    return;
                }
                Next::Event(event) => {
                    attempts = 0;
                    self.shared.apply_live(self.epoch, event).await;
                }
                Next::Dropped => {
                    warn!("{}", SyncError::SubscriptionDropped { key: self.key });
                    subscription = None;
                    self.backend.unsubscribe(id).await;
                }
            }
        }
    }
}
