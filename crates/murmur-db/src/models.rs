/// Database row types. These map directly to SQLite rows and stay
/// independent of the murmur-types models; ids and timestamps are raw text.

pub struct ProfileRow {
    pub id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub author_id: String,
    /// Set for two-participant conversations only.
    pub receiver_id: Option<String>,
    pub author_name: Option<String>,
    pub author_avatar: Option<String>,
    pub content: String,
    pub created_at: String,
    pub edited: bool,
    pub edited_at: Option<String>,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub emoji: String,
    pub created_at: String,
}
