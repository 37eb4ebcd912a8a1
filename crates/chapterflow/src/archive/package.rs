//! Reassembles finished pages into the output archive.
//!
//! Pages arrive in completion order. They are put back in `page_number`
//! order, failed pages are dropped, and the survivors are renumbered
//! contiguously from 1. Original entry names do not survive packaging.

use std::fs::File;
use std::io::{Cursor, Seek, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PackagingError;
use crate::worker::page::{OutputReference, PageStatus, PageTask};

/// A succeeded page and its position in the final output.
#[derive(Debug, Clone, Copy)]
pub struct RenumberedPage<'a> {
    pub position: u32,
    pub task: &'a PageTask,
}

#[derive(Debug, Clone)]
pub struct PackagedArchive {
    pub bytes: Vec<u8>,
    pub entries: Vec<String>,
}

/// Succeeded pages in `page_number` order, numbered from 1.
pub fn renumber(tasks: &[PageTask]) -> Vec<RenumberedPage<'_>> {
    let mut succeeded: Vec<&PageTask> = tasks
        .iter()
        .filter(|t| t.status == PageStatus::Succeeded)
        .collect();
    succeeded.sort_by_key(|t| t.page_number);

    succeeded
        .into_iter()
        .enumerate()
        .map(|(i, task)| RenumberedPage {
            position: i as u32 + 1,
            task,
        })
        .collect()
}

pub fn entry_name(position: u32, extension: &str) -> String {
    format!("page_{:03}{}", position, extension)
}

/// Packages into memory.
pub fn package(tasks: &[PageTask]) -> Result<PackagedArchive, PackagingError> {
    let (cursor, entries) = write_archive(Cursor::new(Vec::new()), tasks)?;
    Ok(PackagedArchive {
        bytes: cursor.into_inner(),
        entries,
    })
}

/// Packages straight to a file. The file is removed again if packaging
/// fails part way.
pub fn package_to_path(tasks: &[PageTask], path: &Path) -> Result<Vec<String>, PackagingError> {
    let file = File::create(path)?;
    match write_archive(file, tasks) {
        Ok((_, entries)) => Ok(entries),
        Err(e) => {
            let _ = std::fs::remove_file(path);
            Err(e)
        }
    }
}

fn write_archive<W: Write + Seek>(
    sink: W,
    tasks: &[PageTask],
) -> Result<(W, Vec<String>), PackagingError> {
    let pages = renumber(tasks);
    if pages.is_empty() {
        return Err(PackagingError::NothingToPackage);
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(sink);
    let mut entries = Vec::with_capacity(pages.len());

    for page in pages {
        let (bytes, extension) = match &page.task.output {
            Some(OutputReference::Inline { bytes, extension }) => (bytes, extension.as_str()),
            _ => {
                return Err(PackagingError::NotLocal {
                    page_number: page.task.page_number,
                })
            }
        };

        let name = entry_name(page.position, extension);
        writer.start_file(name.as_str(), options)?;
        writer.write_all(bytes)?;
        entries.push(name);
    }

    let sink = writer.finish()?;
    Ok((sink, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn done(page_number: u32, data: &[u8]) -> PageTask {
        let mut task = PageTask::new(page_number, format!("{:03}.png", page_number), vec![]);
        task.succeed(OutputReference::Inline {
            bytes: data.to_vec(),
            extension: ".png".to_string(),
        });
        task
    }

    fn failed(page_number: u32) -> PageTask {
        let mut task = PageTask::new(page_number, format!("{:03}.png", page_number), vec![]);
        task.fail("boom");
        task
    }

    fn read_entry(bytes: &[u8], name: &str) -> Vec<u8> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        data
    }

    #[test]
    fn test_renumber_restores_order_and_skips_failures() {
        let tasks = vec![done(3, b"c"), failed(2), done(1, b"a"), done(4, b"d")];
        let pages = renumber(&tasks);

        let mapping: Vec<(u32, u32)> = pages
            .iter()
            .map(|p| (p.position, p.task.page_number))
            .collect();
        assert_eq!(mapping, vec![(1, 1), (2, 3), (3, 4)]);
    }

    #[test]
    fn test_package_names_entries_contiguously() {
        let tasks = vec![done(4, b"four"), done(1, b"one"), failed(2), done(3, b"three")];
        let packaged = package(&tasks).unwrap();

        assert_eq!(
            packaged.entries,
            vec!["page_001.png", "page_002.png", "page_003.png"]
        );
        assert_eq!(read_entry(&packaged.bytes, "page_002.png"), b"three");
        assert_eq!(read_entry(&packaged.bytes, "page_003.png"), b"four");
    }

    #[test]
    fn test_package_nothing_succeeded() {
        let tasks = vec![failed(1), failed(2)];
        assert!(matches!(
            package(&tasks),
            Err(PackagingError::NothingToPackage)
        ));
    }

    #[test]
    fn test_package_rejects_hosted_output() {
        let mut task = PageTask::new(1, "001.png", vec![]);
        task.succeed(OutputReference::Hosted {
            url: "https://i.example.com/1.png".to_string(),
            width: 10,
            height: 10,
        });
        assert!(matches!(
            package(&[task]),
            Err(PackagingError::NotLocal { page_number: 1 })
        ));
    }

    #[test]
    fn test_package_to_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.cbz");

        let entries = package_to_path(&[done(1, b"x")], &path).unwrap();
        assert_eq!(entries, vec!["page_001.png"]);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(read_entry(&bytes, "page_001.png"), b"x");
    }

    #[test]
    fn test_package_to_path_removes_partial_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.cbz");

        assert!(package_to_path(&[failed(1)], &path).is_err());
        assert!(!path.exists());
    }
}
