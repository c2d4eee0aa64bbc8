//! Durable occurrence queue
//!
//! One pretty-printed JSON file per occurrence, named by its UUID, inside a
//! folder scoped to the reporting API key:
//!
//! ```text
//! ~/.SquashOccurrences/<api key>/
//! ├── 0192f0c4-5a1e-7c3b-9d2e-4b6f8a1c2d3e
//! └── 0192f0c4-5a20-7f01-8e44-0a9b7c6d5e4f
//! ```
//!
//! Records are written to a hidden temp file and renamed into place, so a
//! reader never sees a partial record. Records are never rewritten; the
//! delivery loop deletes them once their delivery attempt is finished.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::occurrence::Occurrence;

/// Local store of not-yet-delivered occurrences
#[derive(Debug, Clone)]
pub struct OccurrenceQueue {
    folder: PathBuf,
}

impl OccurrenceQueue {
    /// Queue for `api_key` under `root`. Nothing is created until the first
    /// enqueue.
    pub fn open(root: impl AsRef<Path>, api_key: &str) -> Self {
        Self {
            folder: root.as_ref().join(api_key),
        }
    }

    /// Queue rooted directly at `folder`
    pub fn at(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.folder.join(id.hyphenated().to_string())
    }

    /// Persist an occurrence as a new record named by its id
    pub fn enqueue(&self, occurrence: &Occurrence) -> Result<Uuid> {
        fs::create_dir_all(&self.folder).map_err(|e| Error::storage(&self.folder, e))?;

        let id = occurrence.id;
        let content = serde_json::to_string_pretty(&occurrence.to_payload())?;
        let path = self.record_path(id);
        let tmp_path = self.folder.join(format!(".{}.tmp", id.hyphenated()));

        tracing::debug!(path = %path.display(), "Saving occurrence");

        let written = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp_path)
            .and_then(|mut tmp| {
                tmp.write_all(content.as_bytes())?;
                tmp.sync_all()
            });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::storage(&tmp_path, e));
        }

        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::storage(&path, e));
        }

        if let Ok(dir) = fs::File::open(&self.folder) {
            let _ = dir.sync_all();
        }
        Ok(id)
    }

    /// Ids of every stored record, oldest first
    pub fn list_pending(&self) -> Result<Vec<Uuid>> {
        let entries = match fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(&self.folder, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::storage(&self.folder, e))?;
            let name = entry.file_name();
            // Temp files and strays are not records.
            if let Some(id) = name.to_str().and_then(|n| Uuid::parse_str(n).ok()) {
                ids.push(id);
            }
        }
        // v7 ids sort by creation time.
        ids.sort();
        Ok(ids)
    }

    /// Read one record back as JSON
    pub fn read(&self, id: Uuid) -> Result<serde_json::Value> {
        let path = self.record_path(id);
        let content = fs::read_to_string(&path).map_err(|e| Error::storage(&path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Delete one record; deleting an absent record is not an error
    pub fn remove(&self, id: Uuid) -> Result<()> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occurrence::{ExceptionInfo, OccurrenceBuilder};
    use tempfile::TempDir;

    fn occurrence(message: &str) -> Occurrence {
        OccurrenceBuilder::default().from_exception(&ExceptionInfo::new("E", message, vec![]))
    }

    #[test]
    fn test_enqueue_creates_scoped_folder() {
        let dir = TempDir::new().unwrap();
        let queue = OccurrenceQueue::open(dir.path(), "key-1");
        assert!(!queue.folder().exists());

        let id = queue.enqueue(&occurrence("boom")).unwrap();

        assert_eq!(queue.folder(), dir.path().join("key-1"));
        assert!(queue.folder().join(id.to_string()).is_file());
        assert_eq!(queue.list_pending().unwrap(), vec![id]);
        assert_eq!(queue.read(id).unwrap()["message"], "boom");
    }

    #[test]
    fn test_queues_for_different_keys_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let a = OccurrenceQueue::open(dir.path(), "key-a");
        let b = OccurrenceQueue::open(dir.path(), "key-b");

        a.enqueue(&occurrence("a")).unwrap();

        assert_eq!(a.list_pending().unwrap().len(), 1);
        assert!(b.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_missing_folder_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let queue = OccurrenceQueue::open(dir.path(), "never-written");
        assert!(queue.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_list_skips_temp_files_and_strays() {
        let dir = TempDir::new().unwrap();
        let queue = OccurrenceQueue::at(dir.path());
        let id = queue.enqueue(&occurrence("kept")).unwrap();
        fs::write(dir.path().join(format!(".{}.tmp", Uuid::now_v7())), "{").unwrap();
        fs::write(dir.path().join("README"), "not a record").unwrap();

        assert_eq!(queue.list_pending().unwrap(), vec![id]);
    }

    #[test]
    fn test_remove_twice_is_fine() {
        let dir = TempDir::new().unwrap();
        let queue = OccurrenceQueue::at(dir.path());
        let id = queue.enqueue(&occurrence("gone")).unwrap();

        queue.remove(id).unwrap();
        assert!(queue.list_pending().unwrap().is_empty());
        queue.remove(id).unwrap();
        assert!(queue.list_pending().unwrap().is_empty());
    }

    #[test]
    fn test_enqueue_fails_when_folder_cannot_be_created() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a folder").unwrap();

        let queue = OccurrenceQueue::open(&blocker, "key");
        let err = queue.enqueue(&occurrence("x")).unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
    }

    #[test]
    fn test_records_are_human_readable() {
        let dir = TempDir::new().unwrap();
        let queue = OccurrenceQueue::at(dir.path());
        let id = queue.enqueue(&occurrence("pretty")).unwrap();

        let raw = fs::read_to_string(dir.path().join(id.to_string())).unwrap();
        assert!(raw.contains('\n'));
    }
}
