use rusqlite::Connection;
use tracing::info;

use crate::DbResult;
use crate::messages::fold;

pub fn run(conn: &mut Connection) -> DbResult<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, rooms, messages)");
        let tx = conn.transaction()?;
        tx.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            -- direct_key is the sorted user-id pair; NULL for groups
            CREATE TABLE rooms (
                id          TEXT PRIMARY KEY,
                kind        TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
                name        TEXT,
                direct_key  TEXT UNIQUE,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE room_members (
                room_id     TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id),
                joined_at   TEXT NOT NULL,
                PRIMARY KEY (room_id, user_id)
            );

            CREATE INDEX idx_room_members_user
                ON room_members(user_id);

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id         TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                sender_id       TEXT NOT NULL REFERENCES users(id),
                content         TEXT NOT NULL DEFAULT '',
                message_type    TEXT NOT NULL,
                attachment_path TEXT,
                attachment_name TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_room
                ON messages(room_id, created_at, id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
        tx.commit()?;
    }

    if version < 2 {
        info!("Running migration v2 (folded message content for search)");
        let tx = conn.transaction()?;
        tx.execute_batch(
            "ALTER TABLE messages ADD COLUMN content_folded TEXT NOT NULL DEFAULT '';",
        )?;

        // SQLite's lower() only folds ASCII, so existing rows are folded here.
        let rows: Vec<(i64, String)> = {
            let mut stmt = tx.prepare("SELECT id, content FROM messages")?;
            let rows = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<Result<_, _>>()?;
            rows
        };
        for (id, content) in rows {
            tx.execute(
                "UPDATE messages SET content_folded = ?1 WHERE id = ?2",
                rusqlite::params![fold(&content), id],
            )?;
        }

        tx.execute("INSERT INTO schema_version (version) VALUES (2)", [])?;
        tx.commit()?;
    }

    info!("Database migrations complete");
    Ok(())
}
