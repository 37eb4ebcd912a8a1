pub mod extract;
pub mod package;

pub use extract::{is_page_entry, validate_upload, ArchiveExtractor, ArchiveSummary};
pub use package::{package, package_to_path, renumber, PackagedArchive, RenumberedPage};
