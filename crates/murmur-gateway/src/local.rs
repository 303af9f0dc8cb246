use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use murmur_db::{Database, format_timestamp};
use murmur_sync::{
    BackendError, EventSubscription, PagedQuery, PresenceChannel, PresenceStream, Subscription,
    SubscriptionId, WriteApi,
};
use murmur_types::{
    ConversationKey, LiveEvent, Message, MessageEdit, PagedMessage, PresencePayload, Reaction,
};

use crate::convert::{display_name, message_from_row, paged_messages};
use crate::dispatcher::Dispatcher;

/// Run a blocking DB call off the async runtime.
async fn with_db<T, F>(db: &Arc<Database>, f: F) -> Result<T, BackendError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            BackendError::Unavailable(e.to_string())
        })?
        .map_err(|e| {
            error!("Storage failure: {:#}", e);
            BackendError::Storage(e.to_string())
        })
}

/// Shared storage and dispatcher. Hand out one [`LocalClient`] per
/// signed-in user.
#[derive(Clone)]
pub struct LocalBackend {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl LocalBackend {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::with_database(Database::open(path)?))
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::with_database(Database::open_in_memory()?))
    }

    fn with_database(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn upsert_profile(
        &self,
        user_id: Uuid,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<(), BackendError> {
        let id = user_id.to_string();
        let name = display_name.map(str::to_string);
        let avatar = avatar_url.map(str::to_string);
        with_db(&self.db, move |db| {
            db.upsert_profile(&id, name.as_deref(), avatar.as_deref())
        })
        .await
    }

    /// Presence payload built from the stored profile.
    pub async fn presence_payload(&self, user_id: Uuid) -> Result<PresencePayload, BackendError> {
        let id = user_id.to_string();
        let profile = with_db(&self.db, move |db| db.get_profile(&id)).await?;
        let (name, avatar) = match profile {
            Some(p) => (p.display_name, p.avatar_url),
            None => (None, None),
        };
        Ok(PresencePayload::new(user_id, display_name(name), avatar))
    }

    /// A connection authenticated as `user_id`.
    pub fn connect(&self, user_id: Uuid) -> LocalClient {
        let conn_id = Uuid::new_v4();
        info!("{} connected as {}", user_id, conn_id);
        LocalClient {
            user_id,
            conn_id,
            db: self.db.clone(),
            dispatcher: self.dispatcher.clone(),
            joined: Mutex::new(false),
        }
    }
}

/// One user's view of the local backend. Every call acts as that user.
pub struct LocalClient {
    user_id: Uuid,
    conn_id: Uuid,
    db: Arc<Database>,
    dispatcher: Dispatcher,
    joined: Mutex<bool>,
}

impl LocalClient {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    fn authorize(&self, key: &ConversationKey) -> Result<(), BackendError> {
        if key.includes(self.user_id) {
            Ok(())
        } else {
            Err(BackendError::Forbidden(format!(
                "{} is not a participant of {}",
                self.user_id, key
            )))
        }
    }

    /// Load a message and check the caller may modify it.
    async fn own_message(&self, key: &ConversationKey, id: Uuid) -> Result<Message, BackendError> {
        self.authorize(key)?;
        let k = *key;
        let mid = id.to_string();
        let row = with_db(&self.db, move |db| db.get_message(&k, &mid))
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("message {}", id)))?;

        let message = message_from_row(*key, row);
        if message.author_id != self.user_id {
            return Err(BackendError::Forbidden(format!(
                "message {} belongs to {}",
                id, message.author_id
            )));
        }
        Ok(message)
    }

    async fn require_message(&self, key: &ConversationKey, id: Uuid) -> Result<(), BackendError> {
        self.authorize(key)?;
        let k = *key;
        let mid = id.to_string();
        match with_db(&self.db, move |db| db.get_message(&k, &mid)).await? {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound(format!("message {}", id))),
        }
    }

    async fn own_reaction(&self, emoji: &str) -> Result<Reaction, BackendError> {
        let id = self.user_id.to_string();
        let profile = with_db(&self.db, move |db| db.get_profile(&id)).await?;
        Ok(Reaction {
            emoji: emoji.to_string(),
            user_id: self.user_id,
            user_name: display_name(profile.and_then(|p| p.display_name)),
        })
    }
}

#[async_trait]
impl PagedQuery for LocalClient {
    async fn fetch_page(
        &self,
        key: &ConversationKey,
        page_index: u32,
        page_size: u32,
    ) -> Result<Vec<PagedMessage>, BackendError> {
        self.authorize(key)?;
        let k = *key;
        let offset = page_index.saturating_mul(page_size);

        let (rows, reaction_rows) = with_db(&self.db, move |db| {
            let rows = db.get_messages(&k, page_size, offset)?;
            let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let reaction_rows = db.get_reactions_for_messages(&message_ids)?;
            Ok((rows, reaction_rows))
        })
        .await?;

        debug!("Page {} of {}: {} rows", page_index, key, rows.len());
        Ok(paged_messages(*key, rows, &reaction_rows))
    }
}

#[async_trait]
impl EventSubscription for LocalClient {
    async fn subscribe(&self, key: &ConversationKey) -> Result<Subscription, BackendError> {
        self.authorize(key)?;
        Ok(self.dispatcher.subscribe(*key).await)
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        self.dispatcher.unsubscribe(id).await;
    }
}

#[async_trait]
impl WriteApi for LocalClient {
    async fn create_message(&self, key: &ConversationKey, body: &str) -> Result<Message, BackendError> {
        self.authorize(key)?;
        let k = *key;
        let id = Uuid::new_v4();
        // Stored with microsecond precision; keep the live copy identical.
        let created_at = Utc::now().trunc_subsecs(6);

        let (mid, author, content, stamp) = (
            id.to_string(),
            self.user_id.to_string(),
            body.to_string(),
            format_timestamp(created_at),
        );
        // Snapshot the sender's profile at insert time.
        let profile = with_db(&self.db, move |db| {
            db.insert_message(&k, &mid, &author, &content, &stamp)?;
            db.get_profile(&author)
        })
        .await?;

        let (name, avatar) = match profile {
            Some(p) => (p.display_name, p.avatar_url),
            None => (None, None),
        };
        let message = Message {
            id,
            conversation: *key,
            author_id: self.user_id,
            author_name: display_name(name),
            author_avatar: avatar,
            body: body.to_string(),
            created_at,
            edited: false,
            edited_at: None,
            reactions: Vec::new(),
        };

        self.dispatcher.publish(
            *key,
            LiveEvent::MessageInsert {
                message: message.clone(),
            },
        );
        Ok(message)
    }

    async fn edit_message(&self, key: &ConversationKey, id: Uuid, body: &str) -> Result<(), BackendError> {
        self.own_message(key, id).await?;
        let k = *key;
        let edited_at = Utc::now().trunc_subsecs(6);
        let (mid, content, stamp) = (id.to_string(), body.to_string(), format_timestamp(edited_at));
        let updated = with_db(&self.db, move |db| db.update_message_body(&k, &mid, &content, &stamp)).await?;
        if !updated {
            return Err(BackendError::NotFound(format!("message {}", id)));
        }

        self.dispatcher.publish(
            *key,
            LiveEvent::MessageUpdate {
                edit: MessageEdit {
                    id,
                    body: body.to_string(),
                    edited: true,
                    edited_at: Some(edited_at),
                },
            },
        );
        Ok(())
    }

    async fn delete_message(&self, key: &ConversationKey, id: Uuid) -> Result<(), BackendError> {
        self.own_message(key, id).await?;
        let k = *key;
        let mid = id.to_string();
        if !with_db(&self.db, move |db| db.delete_message(&k, &mid)).await? {
            return Err(BackendError::NotFound(format!("message {}", id)));
        }
        self.dispatcher.publish(*key, LiveEvent::MessageDelete { id });
        Ok(())
    }

    async fn add_reaction(&self, key: &ConversationKey, message_id: Uuid, emoji: &str) -> Result<(), BackendError> {
        self.require_message(key, message_id).await?;
        let reaction = self.own_reaction(emoji).await?;
        let (mid, uid, e) = (message_id.to_string(), self.user_id.to_string(), emoji.to_string());
        let added = with_db(&self.db, move |db| db.add_reaction(&mid, &uid, &e)).await?;

        if added {
            self.dispatcher
                .publish(*key, LiveEvent::ReactionAdd { message_id, reaction });
        }
        Ok(())
    }

    async fn remove_reaction(&self, key: &ConversationKey, message_id: Uuid, emoji: &str) -> Result<(), BackendError> {
        self.require_message(key, message_id).await?;
        let reaction = self.own_reaction(emoji).await?;
        let (mid, uid, e) = (message_id.to_string(), self.user_id.to_string(), emoji.to_string());
        let removed = with_db(&self.db, move |db| db.remove_reaction(&mid, &uid, &e)).await?;

        if removed {
            self.dispatcher
                .publish(*key, LiveEvent::ReactionRemove { message_id, reaction });
        }
        Ok(())
    }
}

#[async_trait]
impl PresenceChannel for LocalClient {
    async fn join(&self, payload: &PresencePayload) -> Result<PresenceStream, BackendError> {
        if payload.user_id != self.user_id {
            return Err(BackendError::Forbidden(format!(
                "cannot track presence for {}",
                payload.user_id
            )));
        }
        let mut joined = self.joined.lock().await;
        let stream = self.dispatcher.presence_join(self.conn_id, payload.clone()).await;
        *joined = true;
        Ok(stream)
    }

    async fn track(&self, payload: &PresencePayload) -> Result<(), BackendError> {
        if payload.user_id != self.user_id {
            return Err(BackendError::Forbidden(format!(
                "cannot track presence for {}",
                payload.user_id
            )));
        }
        if !*self.joined.lock().await {
            return Err(BackendError::Closed);
        }
        if self.dispatcher.presence_track(self.conn_id, payload.clone()).await {
            Ok(())
        } else {
            Err(BackendError::Closed)
        }
    }

    async fn leave(&self) -> Result<(), BackendError> {
        let mut joined = self.joined.lock().await;
        if *joined {
            self.dispatcher.presence_leave(self.conn_id).await;
            *joined = false;
        }
        Ok(())
    }
}
