//! Ordered, deduplicated message timeline for one conversation.
//!
//! The store is plain synchronous state. [`Session`](crate::Session) decides
//! when pages and live events are allowed to reach it.

use tracing::debug;
use uuid::Uuid;

use murmur_types::{ConversationKey, LiveEvent, Message, MessageEdit, PagedMessage, Reaction};

#[derive(Debug, Clone)]
pub struct TimelineStore {
    key: Option<ConversationKey>,
    page_size: u32,
    /// Ascending by (created_at, id). Live inserts are appended as they come.
    messages: Vec<Message>,
    pages_loaded: u32,
    has_more: bool,
    loading_older: bool,
}

impl TimelineStore {
    pub fn new(page_size: u32) -> Self {
        Self {
            key: None,
            page_size: page_size.max(1),
            messages: Vec::new(),
            pages_loaded: 0,
            has_more: false,
            loading_older: false,
        }
    }

    /// Drop everything and start over for `key`.
    pub fn reset(&mut self, key: Option<ConversationKey>) {
        self.key = key;
        self.messages.clear();
        self.pages_loaded = 0;
        self.has_more = false;
        self.loading_older = false;
    }

    pub fn key(&self) -> Option<ConversationKey> {
        self.key
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether an older page might still exist.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading_older(&self) -> bool {
        self.loading_older
    }

    pub fn pages_loaded(&self) -> u32 {
        self.pages_loaded
    }

    /// Replace the whole timeline with the first (newest) page.
    pub fn load_initial_page(&mut self, page: Vec<PagedMessage>) {
        let fetched = page.len();
        self.messages = self.ordered(page);
        self.pages_loaded = 1;
        self.has_more = fetched == self.page_size as usize;
        self.loading_older = false;
    }

    /// The first page could not be fetched: stay empty and stop paging.
    pub fn fail_initial(&mut self) {
        self.messages.clear();
        self.pages_loaded = 0;
        self.has_more = false;
        self.loading_older = false;
    }

    /// Claim the next older page. Returns `None` while another older load is
    /// in flight or when history is exhausted.
    pub fn begin_older(&mut self) -> Option<u32> {
        if self.loading_older || !self.has_more {
            return None;
        }
        self.loading_older = true;
        Some(self.pages_loaded)
    }

    /// Merge an older page at the head. Messages already present keep their
    /// place; returns how many were prepended.
    pub fn finish_older(&mut self, page: Vec<PagedMessage>) -> usize {
        let fetched = page.len();
        let mut older: Vec<Message> = self
            .ordered(page)
            .into_iter()
            .filter(|m| !self.contains(m.id))
            .collect();
        let added = older.len();

        older.append(&mut self.messages);
        self.messages = older;
        self.pages_loaded += 1;
        self.has_more = fetched == self.page_size as usize;
        self.loading_older = false;
        added
    }

    /// The older page failed; keep what is loaded and allow a retry.
    pub fn abort_older(&mut self) {
        self.loading_older = false;
    }

    /// Apply one live row event. Returns whether anything visible changed.
    pub fn apply(&mut self, event: LiveEvent) -> bool {
        match event {
            LiveEvent::MessageInsert { message } => self.apply_insert(message),
            LiveEvent::MessageUpdate { edit } => self.apply_update(&edit),
            LiveEvent::MessageDelete { id } => self.apply_delete(id),
            LiveEvent::ReactionAdd { message_id, reaction } => {
                self.apply_reaction_change(message_id, reaction, false)
            }
            LiveEvent::ReactionRemove { message_id, reaction } => {
                self.apply_reaction_change(message_id, reaction, true)
            }
        }
    }

    /// Append at the tail unless the id is already present. Live inserts are
    /// taken to be newer than all loaded history and are not reordered.
    pub fn apply_insert(&mut self, message: Message) -> bool {
        if self.key.is_some_and(|key| key != message.conversation) {
            debug!("Dropping insert {} for {}, timeline is {:?}", message.id, message.conversation, self.key);
            return false;
        }
        if self.contains(message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Merge an edit into a loaded message. Unknown ids are ignored.
    pub fn apply_update(&mut self, edit: &MessageEdit) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == edit.id) else {
            return false;
        };
        message.body.clone_from(&edit.body);
        message.edited = edit.edited;
        message.edited_at = edit.edited_at;
        true
    }

    pub fn apply_delete(&mut self, id: Uuid) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.messages.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Add or remove `reaction`, matched by (user, emoji), on a loaded message.
    pub fn apply_reaction_change(&mut self, message_id: Uuid, reaction: Reaction, is_removal: bool) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        let existing = message
            .reactions
            .iter()
            .position(|r| r.matches(reaction.user_id, &reaction.emoji));

        match (existing, is_removal) {
            (Some(idx), true) => {
                message.reactions.remove(idx);
                true
            }
            (None, false) => {
                message.reactions.push(reaction);
                true
            }
            _ => false,
        }
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Newest-first page to ascending display order, duplicates inside the
    /// page dropped.
    fn ordered(&self, page: Vec<PagedMessage>) -> Vec<Message> {
        let mut messages: Vec<Message> = Vec::with_capacity(page.len());
        for paged in page.into_iter().rev() {
            let message = paged.into_message();
            if !messages.iter().any(|m| m.id == message.id) {
                messages.push(message);
            }
        }
        messages.sort_by_key(Message::sort_key);
        messages
    }
}
