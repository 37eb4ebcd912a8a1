//! Builders for upload archives.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Builds a zip archive in memory.
pub struct ArchiveBuilder {
    entries: Vec<(String, Vec<u8>)>,
    directories: Vec<String>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            directories: Vec::new(),
        }
    }

    /// Adds `n` PNG pages named `001.png`, `002.png`, ...
    pub fn pages(mut self, n: u32) -> Self {
        for i in 1..=n {
            self.entries
                .push((format!("{:03}.png", i), page_bytes(i)));
        }
        self
    }

    pub fn file(mut self, name: &str, bytes: &[u8]) -> Self {
        self.entries.push((name.to_string(), bytes.to_vec()));
        self
    }

    pub fn directory(mut self, name: &str) -> Self {
        self.directories.push(name.to_string());
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for dir in &self.directories {
            writer.add_directory(dir.as_str(), options).unwrap();
        }
        for (name, bytes) in &self.entries {
            writer.start_file(name.as_str(), options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Distinct fake image bytes for page `n`.
pub fn page_bytes(n: u32) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G'];
    bytes.extend_from_slice(format!("page-{}", n).as_bytes());
    bytes
}

/// Entry names of a packaged archive, in archive order.
pub fn entry_names(archive: &[u8]) -> Vec<String> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
    (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Contents of one entry in a packaged archive.
pub fn entry_bytes(archive: &[u8], name: &str) -> Vec<u8> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
    let mut entry = zip.by_name(name).unwrap();
    let mut bytes = Vec::new();
    std::io::Read::read_to_end(&mut entry, &mut bytes).unwrap();
    bytes
}
