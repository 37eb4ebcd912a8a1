use std::path::Path;

use serde::Serialize;

/// Per-page status inside a job.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Where a finished page ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputReference {
    /// Page bytes kept in memory until packaging.
    Inline { bytes: Vec<u8>, extension: String },
    /// Page stored on a hosting endpoint.
    Hosted { url: String, width: u32, height: u32 },
}

/// One unit of fan-out work.
///
/// `page_number` is assigned once at extraction (1-based, in sorted entry
/// order) and never changes afterwards.
#[derive(Debug, Clone)]
pub struct PageTask {
    pub page_number: u32,
    /// Entry name inside the uploaded archive.
    pub source_name: String,
    pub input: Vec<u8>,
    pub output: Option<OutputReference>,
    pub status: PageStatus,
    pub error: Option<String>,
}

impl PageTask {
    pub fn new(page_number: u32, source_name: impl Into<String>, input: Vec<u8>) -> Self {
        Self {
            page_number,
            source_name: source_name.into(),
            input,
            output: None,
            status: PageStatus::Pending,
            error: None,
        }
    }

    /// Lower-cased extension of the source entry including the dot, e.g. `.png`.
    pub fn extension(&self) -> String {
        Path::new(&self.source_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default()
    }

    /// Final path component of the source entry.
    pub fn file_name(&self) -> &str {
        self.source_name
            .rsplit('/')
            .next()
            .unwrap_or(&self.source_name)
    }

    /// Marks the task succeeded. The input buffer is released since the
    /// output now carries everything packaging needs.
    pub fn succeed(&mut self, output: OutputReference) {
        self.output = Some(output);
        self.status = PageStatus::Succeeded;
        self.error = None;
        self.input = Vec::new();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.output = None;
        self.status = PageStatus::Failed;
        self.error = Some(error.into());
        self.input = Vec::new();
    }

    pub fn is_finished(&self) -> bool {
        self.status != PageStatus::Pending
    }
}
