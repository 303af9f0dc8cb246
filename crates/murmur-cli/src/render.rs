//! Incremental terminal output: only new or changed messages are printed.

use std::collections::HashMap;

use uuid::Uuid;

use murmur_types::{ConversationKey, Message};

/// Short id shown next to every line and accepted by the commands.
pub fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

pub fn render_line(message: &Message, self_id: Uuid) -> String {
    let mut line = format!(
        "{} {}{}: {}",
        message.created_at.format("%H:%M:%S"),
        message.author_name,
        if message.is_own(self_id) { " (you)" } else { "" },
        message.body,
    );
    if message.edited {
        line.push_str(" (edited)");
    }
    for group in message.reaction_groups() {
        line.push_str(&format!(" [{} {}]", group.emoji, group.count));
    }
    line.push_str(&format!("  #{}", short_id(message.id)));
    line
}

pub struct Renderer {
    self_id: Uuid,
    key: Option<ConversationKey>,
    printed: HashMap<Uuid, String>,
}

impl Renderer {
    pub fn new(self_id: Uuid) -> Self {
        Self {
            self_id,
            key: None,
            printed: HashMap::new(),
        }
    }

    /// Lines to print for the latest timeline snapshot.
    pub fn update(&mut self, key: Option<ConversationKey>, messages: &[Message]) -> Vec<String> {
        let mut out = Vec::new();
        if key != self.key {
            self.key = key;
            self.printed.clear();
            if let Some(key) = key {
                out.push(format!("== {} ==", key));
            }
        }

        for message in messages {
            let line = render_line(message, self.self_id);
            if self.printed.get(&message.id) != Some(&line) {
                out.push(line.clone());
                self.printed.insert(message.id, line);
            }
        }

        let mut gone: Vec<Uuid> = self
            .printed
            .keys()
            .filter(|id| !messages.iter().any(|m| m.id == **id))
            .copied()
            .collect();
        gone.sort();
        for id in gone {
            self.printed.remove(&id);
            out.push(format!("(message #{} deleted)", short_id(id)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use murmur_types::Reaction;

    fn message(n: u128, author: u128, body: &str) -> Message {
        Message {
            id: Uuid::from_u128(n << 96),
            conversation: ConversationKey::Broadcast,
            author_id: Uuid::from_u128(author),
            author_name: format!("user{}", author),
            author_avatar: None,
            body: body.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, n as u32).unwrap(),
            edited: false,
            edited_at: None,
            reactions: Vec::new(),
        }
    }

    #[test]
    fn line_shows_author_edit_and_reactions() {
        let mut m = message(1, 2, "hello");
        m.edited = true;
        m.reactions = vec![
            Reaction { emoji: "👍".into(), user_id: Uuid::from_u128(3), user_name: "c".into() },
            Reaction { emoji: "👍".into(), user_id: Uuid::from_u128(4), user_name: "d".into() },
        ];
        assert_eq!(
            render_line(&m, Uuid::from_u128(2)),
            "09:30:01 user2 (you): hello (edited) [👍 2]  #00000001"
        );
    }

    #[test]
    fn prints_only_changes() {
        let mut renderer = Renderer::new(Uuid::from_u128(9));
        let a = message(1, 2, "a");
        let b = message(2, 2, "b");

        let first = renderer.update(Some(ConversationKey::Broadcast), &[a.clone()]);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0], "== global-chat-room ==");

        let second = renderer.update(Some(ConversationKey::Broadcast), &[a.clone(), b.clone()]);
        assert_eq!(second, vec![render_line(&b, Uuid::from_u128(9))]);

        let mut edited = a.clone();
        edited.body = "a2".into();
        let third = renderer.update(Some(ConversationKey::Broadcast), &[edited, b.clone()]);
        assert_eq!(third.len(), 1);

        let fourth = renderer.update(Some(ConversationKey::Broadcast), &[b]);
        assert_eq!(fourth, vec!["(message #00000001 deleted)".to_string()]);
    }

    #[test]
    fn switching_conversation_starts_over() {
        let mut renderer = Renderer::new(Uuid::from_u128(9));
        let a = message(1, 2, "a");
        renderer.update(Some(ConversationKey::Broadcast), &[a]);

        let key = ConversationKey::direct(Uuid::from_u128(9), Uuid::from_u128(2));
        let out = renderer.update(Some(key), &[]);
        assert_eq!(out, vec![format!("== {} ==", key)]);
    }
}
