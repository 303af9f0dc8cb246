use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id            TEXT PRIMARY KEY,
            display_name  TEXT,
            avatar_url    TEXT,
            updated_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- Broadcast room
        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            edited      INTEGER NOT NULL DEFAULT 0,
            edited_at   TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_order
            ON messages(created_at, id);

        -- Two-participant conversations, keyed by their sorted pair topic
        CREATE TABLE IF NOT EXISTS private_messages (
            id           TEXT PRIMARY KEY,
            pair_key     TEXT NOT NULL,
            sender_id    TEXT NOT NULL,
            receiver_id  TEXT NOT NULL,
            content      TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            edited       INTEGER NOT NULL DEFAULT 0,
            edited_at    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_private_messages_pair
            ON private_messages(pair_key, created_at, id);

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
