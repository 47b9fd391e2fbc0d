//! Root pointer persistence
//!
//! The host keeps exactly one durable value outside the block store: the
//! content hash of the currently published root manifest.

use crate::graph::{ContentHash, StorageError, StorageResult};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Durable "current root" reference
pub trait RootPointer: Send + Sync {
    /// The last stored root, or `None` for a fresh database
    fn load(&self) -> StorageResult<Option<ContentHash>>;

    /// Replace the stored root
    fn store(&self, root: &ContentHash) -> StorageResult<()>;
}

/// Root pointer kept in memory
///
/// Clones share the same slot, which lets tests reopen an engine over the
/// same in-memory state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRootPointer {
    root: Arc<Mutex<Option<ContentHash>>>,
}

impl MemoryRootPointer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RootPointer for MemoryRootPointer {
    fn load(&self) -> StorageResult<Option<ContentHash>> {
        Ok(*self.root.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn store(&self, root: &ContentHash) -> StorageResult<()> {
        *self.root.lock().unwrap_or_else(|e| e.into_inner()) = Some(*root);
        Ok(())
    }
}

/// Root pointer stored as a single hex line in a file
///
/// Updates write a temporary file and rename it over the old one, so a crash
/// leaves either the old or the new root, never a torn value.
#[derive(Debug, Clone)]
pub struct FileRootPointer {
    path: PathBuf,
}

impl FileRootPointer {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RootPointer for FileRootPointer {
    fn load(&self) -> StorageResult<Option<ContentHash>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(None),
            Ok(contents) => Ok(Some(ContentHash::from_hex(contents.trim())?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn store(&self, root: &ContentHash) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            writeln!(file, "{}", root.to_hex())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!("Root pointer {:?} -> {}", self.path, root.short());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_pointer_shared_between_clones() {
        let pointer = MemoryRootPointer::new();
        assert_eq!(pointer.load().unwrap(), None);

        let clone = pointer.clone();
        let root = ContentHash::of(b"root");
        pointer.store(&root).unwrap();
        assert_eq!(clone.load().unwrap(), Some(root));
    }

    #[test]
    fn test_file_pointer_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let pointer = FileRootPointer::new(temp_dir.path().join("ROOT"));
        assert_eq!(pointer.load().unwrap(), None);

        let root = ContentHash::of(b"root");
        pointer.store(&root).unwrap();
        assert_eq!(pointer.load().unwrap(), Some(root));

        let reopened = FileRootPointer::new(temp_dir.path().join("ROOT"));
        assert_eq!(reopened.load().unwrap(), Some(root));
    }

    #[test]
    fn test_file_pointer_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ROOT");
        fs::write(&path, "not-a-hash\n").unwrap();
        assert!(FileRootPointer::new(&path).load().is_err());
    }
}
