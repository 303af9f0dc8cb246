use crate::Database;
use crate::models::{MessageRow, ProfileRow, ReactionRow};
use anyhow::{Result, bail};
use murmur_types::ConversationKey;
use rusqlite::types::ToSql;
use rusqlite::{Connection, Row};
use uuid::Uuid;

/// Where one conversation's messages live.
struct Scope {
    table: &'static str,
    author_col: &'static str,
    receiver_col: &'static str,
    pair: Option<String>,
}

impl Scope {
    fn of(key: &ConversationKey) -> Self {
        match key {
            ConversationKey::Broadcast => Self {
                table: "messages",
                author_col: "user_id",
                receiver_col: "NULL",
                pair: None,
            },
            ConversationKey::Direct { .. } => Self {
                table: "private_messages",
                author_col: "sender_id",
                receiver_col: "m.receiver_id",
                pair: Some(key.topic()),
            },
        }
    }

    fn select(&self) -> String {
        format!(
            "SELECT m.id, m.{author}, {receiver}, p.display_name, p.avatar_url,
                    m.content, m.created_at, m.edited, m.edited_at
             FROM {table} m
             LEFT JOIN profiles p ON p.id = m.{author}",
            author = self.author_col,
            receiver = self.receiver_col,
            table = self.table,
        )
    }

    /// Pair filter clause, empty for the broadcast room.
    fn filter(&self, lead: &str) -> String {
        match self.pair {
            Some(_) => format!("{} pair_key = ?", lead),
            None => String::new(),
        }
    }
}

impl Database {
    // -- Profiles --

    pub fn upsert_profile(
        &self,
        id: &str,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, display_name, avatar_url, updated_at)
                 VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                 ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    avatar_url = excluded.avatar_url,
                    updated_at = excluded.updated_at",
                rusqlite::params![id, display_name, avatar_url],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, id))
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        key: &ConversationKey,
        id: &str,
        author_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            match key {
                ConversationKey::Broadcast => {
                    conn.execute(
                        "INSERT INTO messages (id, user_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![id, author_id, content, created_at],
                    )?;
                }
                ConversationKey::Direct { .. } => {
                    let Some(receiver) = key.peer_of(Uuid::parse_str(author_id)?) else {
                        bail!("{} is not a participant of {}", author_id, key);
                    };
                    conn.execute(
                        "INSERT INTO private_messages (id, pair_key, sender_id, receiver_id, content, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        rusqlite::params![id, key.topic(), author_id, receiver.to_string(), content, created_at],
                    )?;
                }
            }
            Ok(())
        })
    }

    pub fn get_message(&self, key: &ConversationKey, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let scope = Scope::of(key);
            let sql = format!("{} WHERE m.id = ? {}", scope.select(), scope.filter("AND"));
            let mut params: Vec<&dyn ToSql> = vec![&id as &dyn ToSql];
            if let Some(pair) = &scope.pair {
                params.push(pair);
            }
            let row = conn
                .query_row(&sql, params.as_slice(), message_from_row)
                .optional()?;
            Ok(row)
        })
    }

    /// One page of a conversation, newest first.
    pub fn get_messages(
        &self,
        key: &ConversationKey,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let scope = Scope::of(key);
            let sql = format!(
                "{} {} ORDER BY m.created_at DESC, m.id DESC LIMIT ? OFFSET ?",
                scope.select(),
                scope.filter("WHERE"),
            );
            let mut params: Vec<&dyn ToSql> = Vec::new();
            if let Some(pair) = &scope.pair {
                params.push(pair);
            }
            params.push(&limit);
            params.push(&offset);

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Replace a message body and mark it edited. Returns false if no such
    /// message exists in `key`.
    pub fn update_message_body(
        &self,
        key: &ConversationKey,
        id: &str,
        content: &str,
        edited_at: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let scope = Scope::of(key);
            let sql = format!(
                "UPDATE {} SET content = ?, edited = 1, edited_at = ? WHERE id = ? {}",
                scope.table,
                scope.filter("AND"),
            );
            let mut params: Vec<&dyn ToSql> = vec![&content as &dyn ToSql, &edited_at, &id];
            if let Some(pair) = &scope.pair {
                params.push(pair);
            }
            Ok(conn.execute(&sql, params.as_slice())? > 0)
        })
    }

    /// Delete a message together with its reactions.
    pub fn delete_message(&self, key: &ConversationKey, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let scope = Scope::of(key);
            let sql = format!("DELETE FROM {} WHERE id = ? {}", scope.table, scope.filter("AND"));
            let mut params: Vec<&dyn ToSql> = vec![&id as &dyn ToSql];
            if let Some(pair) = &scope.pair {
                params.push(pair);
            }

            let tx = conn.unchecked_transaction()?;
            let deleted = tx.execute(&sql, params.as_slice())? > 0;
            if deleted {
                tx.execute("DELETE FROM reactions WHERE message_id = ?1", [id])?;
            }
            tx.commit()?;
            Ok(deleted)
        })
    }

    // -- Reactions --

    /// Returns true if the reaction was not already present.
    pub fn add_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                rusqlite::params![message_id, user_id, emoji],
            )?;
            Ok(inserted > 0)
        })
    }

    /// Returns true if a reaction was removed.
    pub fn remove_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                rusqlite::params![message_id, user_id, emoji],
            )?;
            Ok(removed > 0)
        })
    }

    /// Batch-fetch reactions for a set of message IDs, oldest first.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT r.message_id, r.user_id, p.display_name, r.emoji, r.created_at
                 FROM reactions r
                 LEFT JOIN profiles p ON p.id = r.user_id
                 WHERE r.message_id IN ({})
                 ORDER BY r.created_at, r.rowid",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn ToSql> = message_ids.iter().map(|id| id as &dyn ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        user_name: row.get(2)?,
                        emoji: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_profile(conn: &Connection, id: &str) -> Result<Option<ProfileRow>> {
    let mut stmt =
        conn.prepare("SELECT id, display_name, avatar_url, updated_at FROM profiles WHERE id = ?1")?;

    let row = stmt
        .query_row([id], |row| {
            Ok(ProfileRow {
                id: row.get(0)?,
                display_name: row.get(1)?,
                avatar_url: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        receiver_id: row.get(2)?,
        author_name: row.get(3)?,
        author_avatar: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
        edited: row.get(7)?,
        edited_at: row.get(8)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
