//! A [`JournalStorage`] backed by a plain file on the host's persistent
//! file system (spec.md §1 "Persistent file system" collaborator).

use std::fs;
use std::io;
use std::path::PathBuf;
use ward_tree::JournalStorage;

/// Persists the lock journal as a single file at a fixed path.
pub struct FileJournal {
    path: PathBuf,
}

impl FileJournal {
    /// Creates a journal rooted at `path`. The file is created on first
    /// [`save`][JournalStorage::save]; [`load`][JournalStorage::load]
    /// treats a missing file as "never written", not an error.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl JournalStorage for FileJournal {
    fn save(&self, contents: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)
    }

    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}
