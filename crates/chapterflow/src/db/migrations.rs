//! Schema versioning.
//!
//! Applied versions are recorded in `schema_version`. Each pending step and
//! its version row commit together, so a crash mid-upgrade leaves the
//! schema at the last complete version.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

const STEPS: &[(u32, &str, &str)] = &[
    (1, "users", include_str!("sql/001_create_users.sql")),
    (2, "jobs", include_str!("sql/002_create_jobs.sql")),
    (3, "ledger_entries", include_str!("sql/003_create_ledger_entries.sql")),
    (4, "chapter_pages", include_str!("sql/004_create_chapter_pages.sql")),
];

pub fn latest_version() -> u32 {
    STEPS.last().map(|(version, _, _)| *version).unwrap_or(0)
}

pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?)
}

/// Brings the schema up to [`latest_version`].
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let from = current_version(conn)?;
    for (version, name, sql) in STEPS.iter().filter(|(v, _, _)| *v > from) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql).map_err(|e| DatabaseError::Migration {
            version: *version,
            reason: e.to_string(),
        })?;
        tx.execute(
            "INSERT INTO schema_version (version, name) VALUES (?1, ?2)",
            params![version, name],
        )?;
        tx.commit()?;
        log::info!("Schema upgraded to v{} ({})", version, name);
    }

    Ok(())
}
