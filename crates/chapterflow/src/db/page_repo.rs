//! Persisted chapter pages produced by chapter-upload jobs.

use chrono::Utc;
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterPageRow {
    pub chapter_id: i64,
    pub page_number: u32,
    pub image_url: String,
    pub width: u32,
    pub height: u32,
    pub original_filename: Option<String>,
    pub job_id: Option<String>,
}

impl ChapterPageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            chapter_id: row.get("chapter_id")?,
            page_number: row.get("page_number")?,
            image_url: row.get("image_url")?,
            width: row.get("width")?,
            height: row.get("height")?,
            original_filename: row.get("original_filename")?,
            job_id: row.get("job_id")?,
        })
    }
}

/// Replaces every page of `chapter_id` with `pages` in one transaction.
pub fn replace_for_chapter(
    db: &Database,
    chapter_id: i64,
    pages: &[ChapterPageRow],
) -> Result<usize, DatabaseError> {
    let created_at = Utc::now().to_rfc3339();
    db.with_transaction(|tx| {
        let removed = tx.execute(
            "DELETE FROM chapter_pages WHERE chapter_id = ?1",
            params![chapter_id],
        )?;
        if removed > 0 {
            log::info!("Replacing {} existing pages of chapter {}", removed, chapter_id);
        }

        let mut stmt = tx.prepare(
            "INSERT INTO chapter_pages (chapter_id, page_number, image_url, width, height,
             original_filename, job_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for page in pages {
            stmt.execute(params![
                chapter_id,
                page.page_number,
                page.image_url,
                page.width,
                page.height,
                page.original_filename,
                page.job_id,
                created_at,
            ])?;
        }
        Ok(pages.len())
    })
}

pub fn list_for_chapter(
    db: &Database,
    chapter_id: i64,
) -> Result<Vec<ChapterPageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM chapter_pages WHERE chapter_id = ?1 ORDER BY page_number ASC",
        )?;
        let pages = stmt
            .query_map(params![chapter_id], ChapterPageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pages)
    })
}
