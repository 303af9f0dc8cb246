use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key::ConversationKey;

/// A chat message as held in a timeline.
///
/// Author name and avatar are snapshots taken when the message was loaded or
/// inserted; they are not kept in sync with later profile edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation: ConversationKey,
    pub author_id: Uuid,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// Display order key: creation time, then id as a stable tie-break.
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }

    pub fn is_own(&self, self_id: Uuid) -> bool {
        self.author_id == self_id
    }

    pub fn has_reacted(&self, user_id: Uuid, emoji: &str) -> bool {
        self.reactions
            .iter()
            .any(|r| r.user_id == user_id && r.emoji == emoji)
    }

    /// Reactions grouped by emoji, in the order each emoji first appeared.
    pub fn reaction_groups(&self) -> Vec<ReactionGroup> {
        let mut groups: Vec<ReactionGroup> = Vec::new();
        for reaction in &self.reactions {
            match groups.iter_mut().find(|g| g.emoji == reaction.emoji) {
                Some(group) => {
                    group.count += 1;
                    group.user_ids.push(reaction.user_id);
                    group.user_names.push(reaction.user_name.clone());
                }
                None => groups.push(ReactionGroup {
                    emoji: reaction.emoji.clone(),
                    count: 1,
                    user_ids: vec![reaction.user_id],
                    user_names: vec![reaction.user_name.clone()],
                }),
            }
        }
        groups
    }
}

/// One user's emoji on one message. Unique per (message, user, emoji).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub user_id: Uuid,
    pub user_name: String,
}

impl Reaction {
    pub fn matches(&self, user_id: Uuid, emoji: &str) -> bool {
        self.user_id == user_id && self.emoji == emoji
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
    pub user_names: Vec<String>,
}

/// A row returned by a history page: the message plus its current reactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedMessage {
    pub message: Message,
    pub reactions: Vec<Reaction>,
}

impl PagedMessage {
    pub fn into_message(self) -> Message {
        let PagedMessage { mut message, reactions } = self;
        for reaction in reactions {
            if !message.has_reacted(reaction.user_id, &reaction.emoji) {
                message.reactions.push(reaction);
            }
        }
        message
    }
}

/// What each participant tracks on the shared presence channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_typing: bool,
    /// `None` while typing in the broadcast room, otherwise the recipient.
    #[serde(default)]
    pub typing_target: Option<Uuid>,
}

impl PresencePayload {
    pub fn new(user_id: Uuid, display_name: impl Into<String>, avatar_url: Option<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            avatar_url,
            is_typing: false,
            typing_target: None,
        }
    }

    pub fn with_typing(mut self, is_typing: bool, target: Option<Uuid>) -> Self {
        self.is_typing = is_typing;
        self.typing_target = if is_typing { target } else { None };
        self
    }
}
