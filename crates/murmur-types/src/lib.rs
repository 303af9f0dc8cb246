//! Shared value types for murmur: conversation keys, messages, reactions,
//! live row events and presence payloads.

pub mod events;
pub mod key;
pub mod models;

pub use events::{LiveEvent, MessageEdit, PresenceNotice};
pub use key::{ConversationKey, PRESENCE_TOPIC};
pub use models::{Message, PagedMessage, PresencePayload, Reaction, ReactionGroup};

/// Display name used when a profile has none.
pub const ANONYMOUS: &str = "Anonymous";
