//! Online and typing state reduced from presence channel notices.

use std::collections::HashMap;

use uuid::Uuid;

use murmur_types::{ConversationKey, PresenceNotice, PresencePayload};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEntry {
    pub user_id: Uuid,
    pub display_name: String,
    /// `None` for the broadcast room, otherwise the recipient.
    pub target: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceReducer {
    online: HashMap<Uuid, PresenceEntry>,
    typing: HashMap<Uuid, TypingEntry>,
}

impl PresenceReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, notice: PresenceNotice) {
        match notice {
            PresenceNotice::Sync { entries } => self.apply_sync(entries),
            PresenceNotice::Join { entries } => self.apply_join(entries),
            PresenceNotice::Leave { entries } => self.apply_leave(entries),
        }
    }

    /// Rebuild both sets from a full snapshot.
    pub fn apply_sync(&mut self, entries: Vec<PresencePayload>) {
        self.online.clear();
        self.typing.clear();
        for payload in entries {
            // A participant with several sessions counts as typing if any is.
            let typing = payload.is_typing;
            let (presence, typing_entry) = split(payload);
            self.online.insert(presence.user_id, presence);
            if typing {
                self.typing.insert(typing_entry.user_id, typing_entry);
            }
        }
    }

    /// Add or refresh participants. A joined payload that is not typing
    /// clears that participant's typing entry.
    pub fn apply_join(&mut self, entries: Vec<PresencePayload>) {
        for payload in entries {
            let typing = payload.is_typing;
            let (presence, typing_entry) = split(payload);
            let user_id = presence.user_id;
            self.online.insert(user_id, presence);
            if typing {
                self.typing.insert(user_id, typing_entry);
            } else {
                self.typing.remove(&user_id);
            }
        }
    }

    /// Drop participants along with any typing entry they owned.
    pub fn apply_leave(&mut self, entries: Vec<PresencePayload>) {
        for payload in entries {
            self.online.remove(&payload.user_id);
            self.typing.remove(&payload.user_id);
        }
    }

    pub fn clear(&mut self) {
        self.online.clear();
        self.typing.clear();
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online.contains_key(&user_id)
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    /// Online participants sorted by display name.
    pub fn online_users(&self) -> Vec<PresenceEntry> {
        let mut users: Vec<PresenceEntry> = self.online.values().cloned().collect();
        users.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then(a.user_id.cmp(&b.user_id))
        });
        users
    }

    pub fn typing_entry(&self, user_id: Uuid) -> Option<&TypingEntry> {
        self.typing.get(&user_id)
    }

    /// Who to show as typing in the view of `key`, as seen by `self_id`.
    ///
    /// The broadcast view lists everyone else typing into the room. A direct
    /// view shows only the peer, and only while they are typing to us.
    pub fn typing_in(&self, key: &ConversationKey, self_id: Uuid) -> Vec<TypingEntry> {
        match key {
            ConversationKey::Broadcast => {
                let mut typers: Vec<TypingEntry> = self
                    .typing
                    .values()
                    .filter(|t| t.target.is_none() && t.user_id != self_id)
                    .cloned()
                    .collect();
                typers.sort_by(|a, b| a.display_name.cmp(&b.display_name));
                typers
            }
            ConversationKey::Direct { .. } => key
                .peer_of(self_id)
                .filter(|peer| *peer != self_id)
                .and_then(|peer| self.typing.get(&peer))
                .filter(|t| t.target == Some(self_id))
                .cloned()
                .into_iter()
                .collect(),
        }
    }
}

fn split(payload: PresencePayload) -> (PresenceEntry, TypingEntry) {
    let typing = TypingEntry {
        user_id: payload.user_id,
        display_name: payload.display_name.clone(),
        target: payload.typing_target,
    };
    let presence = PresenceEntry {
        user_id: payload.user_id,
        display_name: payload.display_name,
        avatar_url: payload.avatar_url,
    };
    (presence, typing)
}
