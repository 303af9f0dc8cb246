use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic name of the shared presence channel.
pub const PRESENCE_TOPIC: &str = "online-users";

const BROADCAST_TOPIC: &str = "global-chat-room";

/// Identifies a single timeline: the broadcast room or one two-party thread.
///
/// Direct keys are canonical: the pair is stored sorted, so
/// `direct(a, b) == direct(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationKey {
    Broadcast,
    Direct { low: Uuid, high: Uuid },
}

impl ConversationKey {
    pub fn direct(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self::Direct { low: a, high: b }
        } else {
            Self::Direct { low: b, high: a }
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Broadcast)
    }

    /// Both participants of a direct key, sorted.
    pub fn participants(&self) -> Option<(Uuid, Uuid)> {
        match self {
            Self::Broadcast => None,
            Self::Direct { low, high } => Some((*low, *high)),
        }
    }

    /// Whether `user_id` may see this timeline. Everyone sees the broadcast room.
    pub fn includes(&self, user_id: Uuid) -> bool {
        match self {
            Self::Broadcast => true,
            Self::Direct { low, high } => *low == user_id || *high == user_id,
        }
    }

    /// The other participant of a direct key, seen from `self_id`.
    /// Returns `None` for the broadcast room or when `self_id` is not a participant.
    pub fn peer_of(&self, self_id: Uuid) -> Option<Uuid> {
        match self {
            Self::Broadcast => None,
            Self::Direct { low, high } if *low == self_id => Some(*high),
            Self::Direct { low, high } if *high == self_id => Some(*low),
            Self::Direct { .. } => None,
        }
    }

    /// Subscription topic for this timeline.
    pub fn topic(&self) -> String {
        match self {
            Self::Broadcast => BROADCAST_TOPIC.to_string(),
            Self::Direct { low, high } => format!("private-chat-{}_{}", low, high),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_key_is_unordered() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(ConversationKey::direct(a, b), ConversationKey::direct(b, a));
        assert_eq!(
            ConversationKey::direct(a, b).topic(),
            ConversationKey::direct(b, a).topic()
        );
    }

    #[test]
    fn peer_lookup() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let key = ConversationKey::direct(a, b);
        assert_eq!(key.peer_of(a), Some(b));
        assert_eq!(key.peer_of(b), Some(a));
        assert_eq!(key.peer_of(Uuid::new_v4()), None);
        assert_eq!(ConversationKey::Broadcast.peer_of(a), None);
    }

    #[test]
    fn membership() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        assert!(ConversationKey::direct(a, b).includes(a));
        assert!(!ConversationKey::direct(a, b).includes(outsider));
        assert!(ConversationKey::Broadcast.includes(outsider));
    }

    #[test]
    fn topics() {
        assert_eq!(ConversationKey::Broadcast.topic(), "global-chat-room");
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        assert_eq!(
            ConversationKey::direct(b, a).to_string(),
            format!("private-chat-{}_{}", a, b)
        );
    }

    #[test]
    fn serde_shape() {
        let json = serde_json::to_value(ConversationKey::Broadcast).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "broadcast" }));
    }
}
