use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, PresencePayload, Reaction};

/// Fields carried by a message update row event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEdit {
    pub id: Uuid,
    pub body: String,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
}

/// A single row change pushed by the event subscription for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LiveEvent {
    /// A message row was inserted
    MessageInsert { message: Message },

    /// A message row was edited
    MessageUpdate { edit: MessageEdit },

    /// A message row was deleted
    MessageDelete { id: Uuid },

    /// A reaction row was inserted
    ReactionAdd { message_id: Uuid, reaction: Reaction },

    /// A reaction row was deleted
    ReactionRemove { message_id: Uuid, reaction: Reaction },
}

impl LiveEvent {
    /// The message this event touches.
    pub fn message_id(&self) -> Uuid {
        match self {
            Self::MessageInsert { message } => message.id,
            Self::MessageUpdate { edit } => edit.id,
            Self::MessageDelete { id } => *id,
            Self::ReactionAdd { message_id, .. } | Self::ReactionRemove { message_id, .. } => {
                *message_id
            }
        }
    }
}

/// Notices delivered on the shared presence channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresenceNotice {
    /// Full state of the channel; replaces everything known before
    Sync { entries: Vec<PresencePayload> },

    /// Participants started tracking, or re-tracked an updated payload
    Join { entries: Vec<PresencePayload> },

    /// Participants stopped tracking
    Leave { entries: Vec<PresencePayload> },
}
