//! Room directory: rooms and their membership sets.
//!
//! Every mutation runs inside one transaction so a room never exists without
//! its members. Direct rooms are keyed by the sorted user pair under a UNIQUE
//! constraint, which makes `get_or_create_direct` idempotent even if two
//! callers race past the lookup.

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use huddle_types::models::{Member, Room, RoomKind};

use crate::queries::ensure_user;
use crate::{Database, DbError, DbResult, OptionalExt, format_ts, parse_ts, parse_uuid};

/// Uniqueness key for the direct room between two users, independent of argument order.
pub fn direct_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", lo, hi)
}

impl Database {
    pub fn get_or_create_direct(&self, user_a: Uuid, user_b: Uuid) -> DbResult<Room> {
        if user_a == user_b {
            return Err(DbError::InvalidArgument(
                "a direct room needs two distinct users".into(),
            ));
        }

        let key = direct_key(user_a, user_b);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            ensure_user(&tx, user_a)?;
            ensure_user(&tx, user_b)?;

            let now = format_ts(Utc::now());
            let candidate = Uuid::new_v4().to_string();
            let inserted = tx.execute(
                "INSERT INTO rooms (id, kind, name, direct_key, created_at)
                 VALUES (?1, 'direct', NULL, ?2, ?3)
                 ON CONFLICT(direct_key) DO NOTHING",
                (&candidate, &key, &now),
            )?;

            if inserted == 1 {
                for user in [user_a, user_b] {
                    insert_member(&tx, &candidate, user, &now)?;
                }
                info!("Created direct room {} for {}", candidate, key);
            }

            let room_id: String = tx.query_row(
                "SELECT id FROM rooms WHERE direct_key = ?1",
                [&key],
                |row| row.get(0),
            )?;
            let room = load_room(&tx, &room_id)?;
            tx.commit()?;
            Ok(room)
        })
    }

    pub fn create_group(&self, creator: Uuid, name: &str, member_ids: &[Uuid]) -> DbResult<Room> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DbError::InvalidArgument("group name must not be empty".into()));
        }
        if member_ids.is_empty() {
            return Err(DbError::InvalidArgument("group needs at least one member".into()));
        }

        // Creator first, then the requested members in order, without duplicates.
        let mut members = vec![creator];
        for id in member_ids {
            if !members.contains(id) {
                members.push(*id);
            }
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for id in &members {
                ensure_user(&tx, *id)?;
            }

            let room_id = Uuid::new_v4().to_string();
            let now = format_ts(Utc::now());
            tx.execute(
                "INSERT INTO rooms (id, kind, name, direct_key, created_at)
                 VALUES (?1, 'group', ?2, NULL, ?3)",
                (&room_id, name, &now),
            )?;
            for id in &members {
                insert_member(&tx, &room_id, *id, &now)?;
            }

            let room = load_room(&tx, &room_id)?;
            tx.commit()?;
            info!(
                "Created group '{}' ({}) with {} members",
                name,
                room_id,
                members.len()
            );
            Ok(room)
        })
    }

    /// Adds a user to a group room. Adding an existing member is a no-op.
    pub fn add_member(&self, room_id: Uuid, user_id: Uuid) -> DbResult<Room> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let rid = room_id.to_string();
            match room_kind(&tx, &rid)? {
                RoomKind::Direct => {
                    return Err(DbError::InvalidArgument(
                        "direct rooms have a fixed membership".into(),
                    ));
                }
                RoomKind::Group => {}
            }
            ensure_user(&tx, user_id)?;
            insert_member(&tx, &rid, user_id, &format_ts(Utc::now()))?;

            let room = load_room(&tx, &rid)?;
            tx.commit()?;
            Ok(room)
        })
    }

    pub fn is_member(&self, room_id: Uuid, user_id: Uuid) -> DbResult<bool> {
        self.with_conn(|conn| {
            let (room, user, member): (Option<i64>, Option<i64>, Option<i64>) = conn.query_row(
                "SELECT (SELECT 1 FROM rooms WHERE id = ?1),
                        (SELECT 1 FROM users WHERE id = ?2),
                        (SELECT 1 FROM room_members WHERE room_id = ?1 AND user_id = ?2)",
                (room_id.to_string(), user_id.to_string()),
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            if room.is_none() {
                return Err(DbError::NotFound(format!("room {}", room_id)));
            }
            if user.is_none() {
                return Err(DbError::NotFound(format!("user {}", user_id)));
            }
            Ok(member.is_some())
        })
    }

    pub fn get_room(&self, room_id: Uuid) -> DbResult<Room> {
        self.with_conn(|conn| load_room(conn, &room_id.to_string()))
    }

    pub fn member_ids(&self, room_id: Uuid) -> DbResult<Vec<Uuid>> {
        self.with_conn(|conn| {
            let rid = room_id.to_string();
            room_kind(conn, &rid)?;
            let mut stmt = conn
                .prepare("SELECT user_id FROM room_members WHERE room_id = ?1 ORDER BY rowid")?;
            let ids = stmt
                .query_map([&rid], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids.iter().map(|id| parse_uuid(id)).collect()
        })
    }

    /// Rooms the user belongs to, oldest first, optionally filtered by kind.
    pub fn list_rooms_for_user(&self, user_id: Uuid, kind: Option<RoomKind>) -> DbResult<Vec<Room>> {
        self.with_conn(|conn| {
            ensure_user(conn, user_id)?;

            let mut stmt = conn.prepare(
                "SELECT r.id FROM rooms r
                 JOIN room_members rm ON rm.room_id = r.id
                 WHERE rm.user_id = ?1 AND (?2 IS NULL OR r.kind = ?2)
                 ORDER BY r.created_at, r.id",
            )?;
            let ids = stmt
                .query_map(
                    (user_id.to_string(), kind.map(|k| k.as_str())),
                    |row| row.get::<_, String>(0),
                )?
                .collect::<Result<Vec<_>, _>>()?;

            debug!("User {} belongs to {} rooms", user_id, ids.len());
            ids.iter().map(|id| load_room(conn, id)).collect()
        })
    }
}

fn insert_member(conn: &Connection, room_id: &str, user_id: Uuid, now: &str) -> DbResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        (room_id, user_id.to_string(), now),
    )?;
    Ok(())
}

fn room_kind(conn: &Connection, room_id: &str) -> DbResult<RoomKind> {
    let kind: String = conn
        .query_row("SELECT kind FROM rooms WHERE id = ?1", [room_id], |row| row.get(0))
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("room {}", room_id)))?;
    kind.parse().map_err(DbError::Corrupt)
}

pub(crate) fn load_room(conn: &Connection, room_id: &str) -> DbResult<Room> {
    let (kind, name, created_at): (String, Option<String>, String) = conn
        .query_row(
            "SELECT kind, name, created_at FROM rooms WHERE id = ?1",
            [room_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?
        .ok_or_else(|| DbError::NotFound(format!("room {}", room_id)))?;

    let mut stmt = conn.prepare(
        "SELECT u.id, u.username FROM room_members rm
         JOIN users u ON u.id = rm.user_id
         WHERE rm.room_id = ?1
         ORDER BY rm.rowid",
    )?;
    let rows = stmt
        .query_map([room_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let members = rows
        .into_iter()
        .map(|(id, username)| {
            Ok(Member {
                id: parse_uuid(&id)?,
                username,
            })
        })
        .collect::<DbResult<Vec<_>>>()?;

    Ok(Room {
        id: parse_uuid(room_id)?,
        kind: kind.parse().map_err(DbError::Corrupt)?,
        name,
        created_at: parse_ts(&created_at)?,
        members,
    })
}
