use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A discovered file ready to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub path: PathBuf,
    pub discovered_at: SystemTime,
    /// Modification time observed at discovery.
    pub last_modified: SystemTime,
    /// Size observed at discovery.
    pub size: u64,
}

impl FileTask {
    pub fn new(path: impl Into<PathBuf>, last_modified: SystemTime, size: u64) -> Self {
        Self {
            path: path.into(),
            discovered_at: SystemTime::now(),
            last_modified,
            size,
        }
    }

    /// Builds a task from metadata read at discovery.
    pub fn from_metadata(path: &Path, meta: &std::fs::Metadata) -> std::io::Result<Self> {
        Ok(Self::new(path, meta.modified()?, meta.len()))
    }

    /// Final path component, if it is valid UTF-8.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn from_metadata_captures_size_and_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.pdf");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"%PDF-1.7").unwrap();
        drop(f);

        let meta = std::fs::metadata(&path).unwrap();
        let task = FileTask::from_metadata(&path, &meta).unwrap();
        assert_eq!(task.size, 8);
        assert_eq!(task.last_modified, meta.modified().unwrap());
        assert_eq!(task.file_name(), Some("report.pdf"));
    }
}
