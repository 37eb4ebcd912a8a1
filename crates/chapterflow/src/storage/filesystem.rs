use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

const UPLOADS_DIR: &str = "uploads";
const OUTPUTS_DIR: &str = "outputs";

/// Layout under the data directory:
///
/// ```text
/// uploads/{job_id}/original.{ext}     removed once the job is terminal
/// outputs/translated_{job_id}.cbz     kept for download
/// ```
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn upload_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(UPLOADS_DIR).join(job_id)
    }

    /// Writes the uploaded archive. Fails with `FileExists` rather than
    /// overwrite an earlier upload for the same job.
    pub fn persist_upload(
        &self,
        job_id: &str,
        extension: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let dir = self.upload_dir(job_id);
        self.ensure_directory(&dir)?;

        let path = dir.join(format!("original.{}", extension.trim_start_matches('.')));

        // create_new is O_CREAT | O_EXCL: the existence check and the create are one step.
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::FileExists(path));
            }
            Err(e) => return Err(StorageError::WriteFile { path, source: e }),
        };

        file.write_all(content)
            .and_then(|_| file.sync_all())
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;

        Ok(path)
    }

    /// Where a job's packaged archive lives. Creates the outputs directory.
    pub fn output_path(&self, job_id: &str) -> Result<PathBuf, StorageError> {
        let dir = self.root.join(OUTPUTS_DIR);
        self.ensure_directory(&dir)?;
        Ok(dir.join(format!("translated_{}.cbz", job_id)))
    }

    /// Deletes a job's packaged archive, if one was written.
    pub fn remove_output(&self, job_id: &str) -> Result<(), StorageError> {
        let path = self
            .root
            .join(OUTPUTS_DIR)
            .join(format!("translated_{}.cbz", job_id));
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Remove { path, source: e }),
        }
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        std::fs::read(path).map_err(|e| StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Removes the job's upload directory. Missing directories are fine.
    pub fn cleanup_job(&self, job_id: &str) -> Result<(), StorageError> {
        let dir = self.upload_dir(job_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Remove {
                path: dir,
                source: e,
            }),
        }
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}
