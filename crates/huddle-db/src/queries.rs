use chrono::Utc;
use rusqlite::Connection;
use uuid::Uuid;

use huddle_types::models::User;

use crate::models::UserRow;
use crate::{Database, DbError, DbResult, OptionalExt, format_ts};

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, username: &str, password_hash: &str) -> DbResult<User> {
        let created_at = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id.to_string(), username, password_hash, format_ts(created_at)),
            )?;
            Ok(User {
                id,
                username: username.to_string(),
                created_at,
            })
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> DbResult<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password, created_at FROM users WHERE username = ?1",
                [username],
                user_row,
            )
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: Uuid) -> DbResult<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, password, created_at FROM users WHERE id = ?1",
                [id.to_string()],
                user_row,
            )
            .optional()?
            .map(|row| row.to_user())
            .transpose()
        })
    }

    pub fn list_users(&self) -> DbResult<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, created_at FROM users ORDER BY username COLLATE NOCASE",
            )?;
            let rows = stmt
                .query_map([], user_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.iter().map(UserRow::to_user).collect()
        })
    }
}

fn user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Fails with `NotFound` unless the user exists.
pub(crate) fn ensure_user(conn: &Connection, id: Uuid) -> DbResult<()> {
    conn.query_row("SELECT 1 FROM users WHERE id = ?1", [id.to_string()], |_| Ok(()))
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("user {}", id)))
}

pub(crate) fn username_of(conn: &Connection, id: Uuid) -> DbResult<String> {
    conn.query_row(
        "SELECT username FROM users WHERE id = ?1",
        [id.to_string()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| DbError::NotFound(format!("user {}", id)))
}
