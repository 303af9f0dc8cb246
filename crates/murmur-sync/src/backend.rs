//! Contracts for the external collaborators the engine is built on.
//!
//! A backend handle is bound to one authenticated participant: writes and
//! presence act on behalf of that participant.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use murmur_types::{ConversationKey, LiveEvent, Message, PagedMessage, PresenceNotice, PresencePayload};

use crate::error::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// An open event subscription for one conversation.
///
/// `events` ends (yields `None`) when the transport drops the subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: mpsc::UnboundedReceiver<LiveEvent>,
}

/// Notices from the shared presence channel. The first notice after a join
/// is always a full [`PresenceNotice::Sync`].
#[derive(Debug)]
pub struct PresenceStream {
    pub notices: mpsc::UnboundedReceiver<PresenceNotice>,
}

#[async_trait]
pub trait PagedQuery: Send + Sync {
    /// Page `page_index` of the history of `key`, newest first.
    /// The page may be shorter than `page_size` when history runs out.
    async fn fetch_page(
        &self,
        key: &ConversationKey,
        page_index: u32,
        page_size: u32,
    ) -> Result<Vec<PagedMessage>, BackendError>;
}

#[async_trait]
pub trait EventSubscription: Send + Sync {
    /// Start delivering message and reaction row events scoped to `key`.
    async fn subscribe(&self, key: &ConversationKey) -> Result<Subscription, BackendError>;

    /// Stop delivery. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId);
}

/// Authoritative writes. The resulting row change comes back through the
/// event subscription.
#[async_trait]
pub trait WriteApi: Send + Sync {
    async fn create_message(&self, key: &ConversationKey, body: &str) -> Result<Message, BackendError>;

    async fn edit_message(&self, key: &ConversationKey, id: Uuid, body: &str) -> Result<(), BackendError>;

    async fn delete_message(&self, key: &ConversationKey, id: Uuid) -> Result<(), BackendError>;

    async fn add_reaction(&self, key: &ConversationKey, message_id: Uuid, emoji: &str) -> Result<(), BackendError>;

    async fn remove_reaction(&self, key: &ConversationKey, message_id: Uuid, emoji: &str) -> Result<(), BackendError>;
}

/// Everything a [`Session`](crate::Session) needs from a backend.
pub trait ChatBackend: PagedQuery + EventSubscription + WriteApi {}

impl<T: PagedQuery + EventSubscription + WriteApi + ?Sized> ChatBackend for T {}

#[async_trait]
pub trait PresenceChannel: Send + Sync {
    /// Start tracking `payload` on the channel and receive its notices.
    async fn join(&self, payload: &PresencePayload) -> Result<PresenceStream, BackendError>;

    /// Replace the tracked payload.
    async fn track(&self, payload: &PresencePayload) -> Result<(), BackendError>;

    /// Stop tracking and close the notice stream.
    async fn leave(&self) -> Result<(), BackendError>;
}
