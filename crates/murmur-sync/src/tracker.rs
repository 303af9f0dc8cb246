//! Long-lived presence session: tracks our own payload on the shared
//! channel, reduces incoming notices, and owns the typing idle timer.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_types::{ConversationKey, PresencePayload};

use crate::backend::{PresenceChannel, PresenceStream};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::presence::{PresenceEntry, PresenceReducer, TypingEntry};

#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    user_id: Uuid,
    channel: Arc<dyn PresenceChannel>,
    config: SyncConfig,
    shared: Arc<TrackerShared>,
    listener: Mutex<Option<JoinHandle<()>>>,
    typing_timer: std::sync::Mutex<Option<JoinHandle<()>>>,
    token: CancellationToken,
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct TrackerShared {
    reducer: RwLock<PresenceReducer>,
    own: Mutex<PresencePayload>,
    changes: watch::Sender<u64>,
}

impl TrackerShared {
    fn bump(&self) {
        self.changes.send_modify(|revision| *revision += 1);
    }
}

impl PresenceTracker {
    /// Join the presence channel as `payload` and start reducing notices.
    pub async fn start(
        channel: Arc<dyn PresenceChannel>,
        payload: PresencePayload,
        config: SyncConfig,
    ) -> Result<Self> {
        let stream = channel.join(&payload).await.map_err(SyncError::PresenceFailed)?;
        info!("{} ({}) joined presence", payload.display_name, payload.user_id);

        let (changes, _) = watch::channel(0);
        let token = CancellationToken::new();
        let shared = Arc::new(TrackerShared {
            reducer: RwLock::new(PresenceReducer::new()),
            own: Mutex::new(payload.clone()),
            changes,
        });

        let listener = tokio::spawn(run_listener(
            shared.clone(),
            channel.clone(),
            config.clone(),
            token.clone(),
            stream,
        ));

        Ok(Self {
            inner: Arc::new(TrackerInner {
                user_id: payload.user_id,
                channel,
                config,
                shared,
                listener: Mutex::new(Some(listener)),
                typing_timer: std::sync::Mutex::new(None),
                token,
            }),
        })
    }

    pub fn user_id(&self) -> Uuid {
        self.inner.user_id
    }

    /// Revision counter, bumped whenever presence or typing state changes.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.shared.changes.subscribe()
    }

    pub async fn online_users(&self) -> Vec<PresenceEntry> {
        self.inner.shared.reducer.read().await.online_users()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.shared.reducer.read().await.is_online(user_id)
    }

    pub async fn typing_entry(&self, user_id: Uuid) -> Option<TypingEntry> {
        self.inner.shared.reducer.read().await.typing_entry(user_id).cloned()
    }

    /// Typers to show in the view of `key`.
    pub async fn typing_in(&self, key: &ConversationKey) -> Vec<TypingEntry> {
        self.inner
            .shared
            .reducer
            .read()
            .await
            .typing_in(key, self.inner.user_id)
    }

    /// The payload we currently track.
    pub async fn own_payload(&self) -> PresencePayload {
        self.inner.shared.own.lock().await.clone()
    }

    /// Update our tracked typing flag and target.
    pub async fn send_typing_status(&self, is_typing: bool, target: Option<Uuid>) -> Result<()> {
        let payload = {
            let mut own = self.inner.shared.own.lock().await;
            *own = own.clone().with_typing(is_typing, target);
            own.clone()
        };
        debug!("{} typing={} target={:?}", self.inner.user_id, is_typing, payload.typing_target);
        self.inner
            .channel
            .track(&payload)
            .await
            .map_err(SyncError::PresenceFailed)
    }

    /// Record a keystroke aimed at `target`. The first keystroke announces
    /// typing; every keystroke restarts the idle window, after which typing
    /// is cleared automatically.
    pub async fn keystroke(&self, target: Option<Uuid>) -> Result<()> {
        let announced = {
            let own = self.inner.shared.own.lock().await;
            own.is_typing && own.typing_target == target
        };
        if !announced {
            self.send_typing_status(true, target).await?;
        }
        self.restart_idle_timer();
        Ok(())
    }

    /// Clear typing right away after a message went out.
    pub async fn message_sent(&self) -> Result<()> {
        self.cancel_idle_timer();
        if self.inner.shared.own.lock().await.is_typing {
            self.send_typing_status(false, None).await?;
        }
        Ok(())
    }

    /// Leave the channel and forget all presence state.
    pub async fn sign_out(&self) -> Result<()> {
        self.cancel_idle_timer();
        self.inner.token.cancel();
        if let Some(listener) = self.inner.listener.lock().await.take() {
            if let Err(e) = listener.await {
                warn!("Presence listener ended abnormally: {}", e);
            }
        }

        let left = self.inner.channel.leave().await;
        self.inner.shared.reducer.write().await.clear();
        self.inner.shared.bump();
        info!("{} left presence", self.inner.user_id);
        left.map_err(SyncError::PresenceFailed)
    }

    fn restart_idle_timer(&self) {
        let tracker = self.clone();
        let idle = self.inner.config.typing_idle;
        let token = self.inner.token.clone();
        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(idle) => {
                    debug!("{} typing idle, clearing", tracker.inner.user_id);
                    if let Err(e) = tracker.send_typing_status(false, None).await {
                        warn!("Failed to clear typing status: {}", e);
                    }
                }
            }
        });

        let mut slot = self
            .inner
            .typing_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = slot.replace(timer) {
            previous.abort();
        }
    }

    fn cancel_idle_timer(&self) {
        let previous = self
            .inner
            .typing_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

async fn run_listener(
    shared: Arc<TrackerShared>,
    channel: Arc<dyn PresenceChannel>,
    config: SyncConfig,
    token: CancellationToken,
    stream: PresenceStream,
) {
    let mut stream = Some(stream);
    let mut attempts: u32 = 0;

    loop {
        let Some(current) = stream.as_mut() else {
            let max = config.max_resubscribe_attempts;
            if max > 0 && attempts >= max {
                warn!("Giving up on presence after {} rejoin attempts", attempts);
                return;
            }
            attempts += 1;

            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(config.resubscribe_delay) => {}
            }

            let payload = shared.own.lock().await.clone();
            match channel.join(&payload).await {
                Ok(rejoined) => {
                    info!("Rejoined presence (attempt {})", attempts);
                    stream = Some(rejoined);
                }
                Err(e) if e.is_definitive() => {
                    warn!("Presence rejoin refused: {}", e);
                    return;
                }
                Err(e) => warn!("Rejoining presence failed: {}", e),
            }
            continue;
        };

        let notice = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            notice = current.notices.recv() => notice,
        };

        match notice {
            Some(notice) => {
                attempts = 0;
                shared.reducer.write().await.apply(notice);
                shared.bump();
            }
            None => {
                // Keep the last known state until a fresh sync arrives.
                warn!("Presence channel closed, rejoining");
                stream = None;
            }
        }
    }
}
