use std::fs;
use std::path::{Path, PathBuf};

use crate::data::Person;
use crate::Result;

/// The durability boundary between the in-memory collection and storage.
///
/// Contract: once `save` returns Ok the data survives a process crash.
/// The store calls `save` synchronously after every successful mutation
/// (write-through) and rolls the mutation back if it fails, so memory and
/// durable state never diverge. The trait seam exists so the concrete
/// storage technology stays swappable and so tests can inject a failing
/// gateway.
pub trait Snapshotter: Send + Sync {
    /// Loads the full collection. A missing snapshot is an empty
    /// collection, not an error.
    fn load(&self) -> Result<Vec<Person>>;
    /// Durably writes the full collection.
    fn save(&self, people: &[Person]) -> Result<()>;
}

/// File-backed [`Snapshotter`]: one JSON snapshot file.
///
/// Saves use an atomic "write-then-rename" strategy, so a crash mid-write
/// leaves the previous snapshot intact rather than a corrupt file.
pub struct FileSnapshotter {
    path: PathBuf,
}

impl FileSnapshotter {
    /// Initializes a snapshotter for the given file path, creating the
    /// parent directory if it does not exist.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }
}

impl Snapshotter for FileSnapshotter {
    fn load(&self) -> Result<Vec<Person>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    fn save(&self, people: &[Person]) -> Result<()> {
        let temp_path = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(people)?;

        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}
