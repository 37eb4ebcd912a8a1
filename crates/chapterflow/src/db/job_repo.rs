//! Job repository: the durable side of the job record.
//!
//! `cost_charged` and `cost_refunded` are owned by the ledger and only
//! change through [`mark_charged`] and [`mark_refunded`], never through
//! [`update`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::pipeline::job::{Job, JobKind};
use crate::pipeline::stage::JobStage;

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub kind: String,
    pub owner_id: String,
    pub original_filename: String,
    pub chapter_id: Option<i64>,
    pub chapter_title: Option<String>,
    pub chapter_number: Option<u32>,
    pub stage: String,
    pub total_items: u32,
    pub completed_items: u32,
    pub failed_items: u32,
    pub error_text: Option<String>,
    pub cost: i64,
    pub cost_charged: bool,
    pub cost_refunded: bool,
    pub output_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind: row.get("kind")?,
            owner_id: row.get("owner_id")?,
            original_filename: row.get("original_filename")?,
            chapter_id: row.get("chapter_id")?,
            chapter_title: row.get("chapter_title")?,
            chapter_number: row.get("chapter_number")?,
            stage: row.get("stage")?,
            total_items: row.get("total_items")?,
            completed_items: row.get("completed_items")?,
            failed_items: row.get("failed_items")?,
            error_text: row.get("error_text")?,
            cost: row.get("cost")?,
            cost_charged: row.get("cost_charged")?,
            cost_refunded: row.get("cost_refunded")?,
            output_path: row.get("output_path")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn from_job(job: &Job) -> Self {
        let (chapter_id, chapter_title, chapter_number) = match &job.kind {
            JobKind::Translate => (None, None, None),
            JobKind::ChapterUpload {
                chapter_id,
                title,
                chapter_number,
            } => (Some(*chapter_id), Some(title.clone()), Some(*chapter_number)),
        };

        Self {
            id: job.id.clone(),
            kind: job.kind.as_str().to_string(),
            owner_id: job.owner_id.clone(),
            original_filename: job.original_filename.clone(),
            chapter_id,
            chapter_title,
            chapter_number,
            stage: job.stage.as_str().to_string(),
            total_items: job.total_items,
            completed_items: job.completed_items,
            failed_items: job.failed_items,
            error_text: job.error_text.clone(),
            cost: job.cost,
            cost_charged: job.cost_charged,
            cost_refunded: false,
            output_path: job.output_path.clone(),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
            completed_at: job.completed_at.map(|t| t.to_rfc3339()),
        }
    }

    pub fn into_job(self) -> Result<Job, DatabaseError> {
        let kind = match self.kind.as_str() {
            "translate" => JobKind::Translate,
            "chapter_upload" => JobKind::ChapterUpload {
                chapter_id: self.chapter_id.ok_or_else(|| invalid("chapter_id", "NULL"))?,
                title: self.chapter_title.unwrap_or_default(),
                chapter_number: self.chapter_number.unwrap_or(0),
            },
            other => return Err(invalid("kind", other)),
        };
        let stage: JobStage = self
            .stage
            .parse()
            .map_err(|_| invalid("stage", &self.stage))?;

        Ok(Job {
            id: self.id,
            kind,
            owner_id: self.owner_id,
            original_filename: self.original_filename,
            stage,
            total_items: self.total_items,
            completed_items: self.completed_items,
            failed_items: self.failed_items,
            error_text: self.error_text,
            cost: self.cost,
            cost_charged: self.cost_charged,
            output_path: self.output_path,
            created_at: parse_time("created_at", &self.created_at)?,
            updated_at: parse_time("updated_at", &self.updated_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|t| parse_time("completed_at", t))
                .transpose()?,
        })
    }
}

fn invalid(column: &'static str, value: &str) -> DatabaseError {
    DatabaseError::InvalidValue {
        column,
        value: value.to_string(),
    }
}

fn parse_time(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| invalid(column, value))
}

pub fn insert(db: &Database, job: &Job) -> Result<(), DatabaseError> {
    let row = JobRow::from_job(job);
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, kind, owner_id, original_filename, chapter_id, chapter_title,
             chapter_number, stage, total_items, completed_items, failed_items, error_text,
             cost, cost_charged, output_path, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                row.id,
                row.kind,
                row.owner_id,
                row.original_filename,
                row.chapter_id,
                row.chapter_title,
                row.chapter_number,
                row.stage,
                row.total_items,
                row.completed_items,
                row.failed_items,
                row.error_text,
                row.cost,
                row.cost_charged,
                row.output_path,
                row.created_at,
                row.updated_at,
                row.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Writes stage, counters, error text, output path and timestamps.
pub fn update(db: &Database, job: &Job) -> Result<(), DatabaseError> {
    let row = JobRow::from_job(job);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET stage=?2, total_items=?3, completed_items=?4, failed_items=?5,
             error_text=?6, output_path=?7, updated_at=?8, completed_at=?9
             WHERE id=?1",
            params![
                row.id,
                row.stage,
                row.total_items,
                row.completed_items,
                row.failed_items,
                row.error_text,
                row.output_path,
                row.updated_at,
                row.completed_at,
            ],
        )?;
        if changed == 0 {
            return Err(DatabaseError::MissingRow {
                table: "jobs",
                id: row.id.clone(),
            });
        }
        Ok(())
    })
}

pub fn find_row(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
            .optional()?)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Job>, DatabaseError> {
    find_row(db, id)?.map(JobRow::into_job).transpose()
}

/// Jobs that never reached a terminal stage, oldest first.
pub fn find_unfinished(db: &Database) -> Result<Vec<Job>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE stage NOT IN ('completed', 'failed', 'cancelled')
             ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    rows.into_iter().map(JobRow::into_job).collect()
}

/// Jobs newest first, limited to one owner unless `owner_id` is `None`.
pub fn list(db: &Database, owner_id: Option<&str>) -> Result<Vec<Job>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE ?1 IS NULL OR owner_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![owner_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    rows.into_iter().map(JobRow::into_job).collect()
}

/// Deletes a terminal job. Ledger entries and chapter pages keep their rows
/// but lose the link to the job. Returns `false` if no terminal job with
/// that id exists.
pub fn delete_finished(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_transaction(|tx| {
        let terminal: bool = tx
            .query_row(
                "SELECT stage IN ('completed', 'failed', 'cancelled') FROM jobs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(false);
        if !terminal {
            return Ok(false);
        }

        tx.execute("UPDATE ledger_entries SET job_id = NULL WHERE job_id = ?1", params![id])?;
        tx.execute("UPDATE chapter_pages SET job_id = NULL WHERE job_id = ?1", params![id])?;
        tx.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(true)
    })
}

/// Flips `cost_charged` from 0 to 1. Returns `false` if it was already set.
pub fn mark_charged(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET cost_charged = 1 WHERE id = ?1 AND cost_charged = 0",
        params![id],
    )?;
    Ok(changed == 1)
}

/// Flips `cost_refunded` from 0 to 1, but only for a charged job. Returns
/// `false` if the job was never charged or is already refunded.
pub fn mark_refunded(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET cost_refunded = 1
         WHERE id = ?1 AND cost_charged = 1 AND cost_refunded = 0",
        params![id],
    )?;
    Ok(changed == 1)
}
