use std::io::{Cursor, Read, Seek};
use std::path::Path;

use serde::Serialize;

use crate::error::{ExtractionError, ValidationError};
use crate::worker::page::PageTask;

/// Upload names we accept. Both are plain zip containers.
const UPLOAD_EXTENSIONS: &[&str] = &["zip", "cbz"];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp"];

/// Resource-fork directory written by macOS archivers.
const METADATA_DIR: &str = "__MACOSX";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub image_count: usize,
    pub file_size: u64,
}

/// Cheap checks on an upload before anything is persisted.
pub fn validate_upload(filename: &str, bytes: &[u8], limit: u64) -> Result<(), ValidationError> {
    let accepted = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            UPLOAD_EXTENSIONS
                .iter()
                .any(|allowed| e.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false);
    if !accepted {
        return Err(ValidationError::UnsupportedExtension {
            filename: filename.to_string(),
        });
    }

    if bytes.is_empty() {
        return Err(ValidationError::EmptyUpload);
    }

    let size = bytes.len() as u64;
    if size > limit {
        return Err(ValidationError::TooLarge { size, limit });
    }

    Ok(())
}

/// Whether an archive entry name is a page image.
pub fn is_page_entry(name: &str) -> bool {
    if name.ends_with('/') {
        return false;
    }
    if name.split('/').any(|component| component == METADATA_DIR) {
        return false;
    }

    let file_name = name.rsplit('/').next().unwrap_or(name);
    if file_name.is_empty() || file_name.starts_with('.') {
        return false;
    }

    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|img| e.eq_ignore_ascii_case(img)))
        .unwrap_or(false)
}

/// Decompressed pages may total this many times the archive limit unless
/// configured otherwise.
pub const DEFAULT_EXPANSION_FACTOR: u64 = 4;

/// Turns archive bytes into page tasks.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveExtractor {
    max_archive_bytes: u64,
    max_extracted_bytes: u64,
}

impl ArchiveExtractor {
    pub fn new(max_archive_bytes: u64) -> Self {
        Self {
            max_archive_bytes,
            max_extracted_bytes: max_archive_bytes.saturating_mul(DEFAULT_EXPANSION_FACTOR),
        }
    }

    /// Caps the total decompressed size of all pages.
    pub fn with_extracted_limit(mut self, max_extracted_bytes: u64) -> Self {
        self.max_extracted_bytes = max_extracted_bytes;
        self
    }

    /// Page tasks in lexicographic entry-name order, numbered from 1.
    pub fn extract(&self, bytes: &[u8]) -> Result<Vec<PageTask>, ExtractionError> {
        let mut archive = self.open(bytes)?;
        let entries = page_entries(&mut archive)?;
        if entries.is_empty() {
            return Err(ExtractionError::NoImages);
        }

        let mut tasks = Vec::with_capacity(entries.len());
        let mut extracted: u64 = 0;
        for (position, (name, index)) in entries.into_iter().enumerate() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| ExtractionError::ReadEntry {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;

            // Declared sizes come from the archive header and are not trusted;
            // reading stops one byte past what the budget allows.
            let remaining = self.max_extracted_bytes.saturating_sub(extracted);
            let mut data = Vec::with_capacity(entry.size().min(remaining) as usize);
            (&mut entry)
                .take(remaining.saturating_add(1))
                .read_to_end(&mut data)
                .map_err(|e| ExtractionError::ReadEntry {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;

            extracted += data.len() as u64;
            if extracted > self.max_extracted_bytes {
                return Err(ExtractionError::ExpandedTooLarge {
                    limit: self.max_extracted_bytes,
                });
            }

            tasks.push(PageTask::new(position as u32 + 1, name, data));
        }

        log::debug!("Extracted {} pages", tasks.len());
        Ok(tasks)
    }

    /// Counts page images without decompressing them.
    pub fn analyze(&self, bytes: &[u8]) -> Result<ArchiveSummary, ExtractionError> {
        let mut archive = self.open(bytes)?;
        let image_count = page_entries(&mut archive)?.len();
        Ok(ArchiveSummary {
            image_count,
            file_size: bytes.len() as u64,
        })
    }

    fn open<'a>(&self, bytes: &'a [u8]) -> Result<zip::ZipArchive<Cursor<&'a [u8]>>, ExtractionError> {
        let size = bytes.len() as u64;
        if size > self.max_archive_bytes {
            return Err(ExtractionError::TooLarge {
                size,
                limit: self.max_archive_bytes,
            });
        }

        zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ExtractionError::CorruptArchive(e.to_string()))
    }
}

/// `(name, index)` of every page entry, sorted by name.
fn page_entries<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<Vec<(String, usize)>, ExtractionError> {
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| ExtractionError::CorruptArchive(e.to_string()))?;
        if entry.is_dir() || !is_page_entry(entry.name()) {
            continue;
        }
        entries.push((entry.name().to_string(), index));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}
