//! Row to model conversion. Corrupt rows are logged and patched with
//! defaults rather than failing a whole page.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use murmur_db::models::{MessageRow, ReactionRow};
use murmur_db::parse_timestamp;
use murmur_types::{ANONYMOUS, ConversationKey, Message, PagedMessage, Reaction};

fn parse_id(raw: &str, what: &str, owner: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on '{}': {}", what, raw, owner, e);
        Uuid::default()
    })
}

fn parse_time(raw: &str, what: &str, owner: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on '{}': {}", what, raw, owner, e);
        DateTime::default()
    })
}

pub fn display_name(name: Option<String>) -> String {
    name.filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

pub fn message_from_row(key: ConversationKey, row: MessageRow) -> Message {
    Message {
        id: parse_id(&row.id, "message id", &row.id),
        conversation: key,
        author_id: parse_id(&row.author_id, "author_id", &row.id),
        author_name: display_name(row.author_name),
        author_avatar: row.author_avatar,
        created_at: parse_time(&row.created_at, "created_at", &row.id),
        edited: row.edited,
        edited_at: row
            .edited_at
            .as_deref()
            .map(|raw| parse_time(raw, "edited_at", &row.id)),
        body: row.content,
        reactions: Vec::new(),
    }
}

pub fn reaction_from_row(row: &ReactionRow) -> Reaction {
    Reaction {
        emoji: row.emoji.clone(),
        user_id: parse_id(&row.user_id, "reaction user_id", &row.message_id),
        user_name: display_name(row.user_name.clone()),
    }
}

/// Pair each message row with its reactions, keeping page order.
pub fn paged_messages(
    key: ConversationKey,
    rows: Vec<MessageRow>,
    reaction_rows: &[ReactionRow],
) -> Vec<PagedMessage> {
    let mut by_message: HashMap<&str, Vec<Reaction>> = HashMap::new();
    for r in reaction_rows {
        by_message
            .entry(r.message_id.as_str())
            .or_default()
            .push(reaction_from_row(r));
    }

    rows.into_iter()
        .map(|row| {
            let reactions = by_message.remove(row.id.as_str()).unwrap_or_default();
            PagedMessage {
                message: message_from_row(key, row),
                reactions,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: Uuid, name: Option<&str>) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            author_id: Uuid::from_u128(1).to_string(),
            receiver_id: None,
            author_name: name.map(str::to_string),
            author_avatar: None,
            content: "hi".into(),
            created_at: "2024-05-01T12:00:00.000000Z".into(),
            edited: false,
            edited_at: None,
        }
    }

    #[test]
    fn missing_or_blank_name_falls_back() {
        assert_eq!(display_name(None), "Anonymous");
        assert_eq!(display_name(Some("  ".into())), "Anonymous");
        assert_eq!(display_name(Some("ann".into())), "ann");
    }

    #[test]
    fn corrupt_fields_are_patched() {
        let mut bad = row(Uuid::from_u128(5), Some("ann"));
        bad.author_id = "not-a-uuid".into();
        bad.created_at = "yesterday".into();
        let message = message_from_row(ConversationKey::Broadcast, bad);
        assert_eq!(message.author_id, Uuid::nil());
        assert_eq!(message.created_at, DateTime::<Utc>::default());
        assert_eq!(message.body, "hi");
    }

    #[test]
    fn reactions_attach_to_their_message() {
        let (a, b) = (Uuid::from_u128(10), Uuid::from_u128(11));
        let reactions = vec![ReactionRow {
            message_id: b.to_string(),
            user_id: Uuid::from_u128(2).to_string(),
            user_name: None,
            emoji: "👍".into(),
            created_at: "2024-05-01T12:00:01.000Z".into(),
        }];

        let page = paged_messages(ConversationKey::Broadcast, vec![row(a, None), row(b, None)], &reactions);
        assert_eq!(page[0].message.id, a);
        assert!(page[0].reactions.is_empty());
        assert_eq!(page[1].reactions.len(), 1);
        assert_eq!(page[1].reactions[0].user_name, "Anonymous");
    }
}
