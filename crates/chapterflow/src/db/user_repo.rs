//! Principals and their point balances.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// Starting balance for principals created without an explicit one.
pub const DEFAULT_STARTING_POINTS: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub points: i64,
    pub is_privileged: bool,
    pub created_at: String,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            points: row.get("points")?,
            is_privileged: row.get("is_privileged")?,
            created_at: row.get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub id: Option<String>,
    pub username: String,
    pub points: Option<i64>,
    pub is_privileged: bool,
}

pub fn create(db: &Database, user: &NewUser) -> Result<UserRow, DatabaseError> {
    let row = UserRow {
        id: user
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        username: user.username.clone(),
        points: user.points.unwrap_or(DEFAULT_STARTING_POINTS),
        is_privileged: user.is_privileged,
        created_at: Utc::now().to_rfc3339(),
    };

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO users (id, username, points, is_privileged, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.id,
                row.username,
                row.points,
                row.is_privileged,
                row.created_at
            ],
        )?;
        Ok(())
    })?;

    log::info!("Created user '{}' with {} points", row.username, row.points);
    Ok(row)
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<UserRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM users WHERE id = ?1",
                params![id],
                UserRow::from_row,
            )
            .optional()?)
    })
}

/// Current balance, or `None` for an unknown user.
pub fn balance(conn: &Connection, id: &str) -> Result<Option<i64>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT points FROM users WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Debits `amount` only if the balance covers it. Returns whether the
/// debit happened.
pub fn deduct(conn: &Connection, id: &str, amount: i64) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE users SET points = points - ?2 WHERE id = ?1 AND points >= ?2",
        params![id, amount],
    )?;
    Ok(changed == 1)
}

pub fn credit(conn: &Connection, id: &str, amount: i64) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE users SET points = points + ?2 WHERE id = ?1",
        params![id, amount],
    )?;
    if changed == 0 {
        return Err(DatabaseError::MissingRow {
            table: "users",
            id: id.to_string(),
        });
    }
    Ok(())
}
