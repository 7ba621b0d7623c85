//! Local database fixtures
//!
//! Every test gets its own store: in memory for speed, or in a temporary
//! directory when a test needs to close and reopen the file.

use kioku::client::local_db::LocalDatabase;
use std::path::PathBuf;
use tempfile::TempDir;

/// Fresh in-memory store with the schema applied
pub async fn memory_db() -> LocalDatabase {
    LocalDatabase::open_in_memory()
        .await
        .expect("Failed to open in-memory database")
}

/// On-disk store that lives as long as the fixture
pub struct FileDatabase {
    dir: TempDir,
}

impl FileDatabase {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("local.db")
    }

    /// Open (or reopen) the store at the fixture path
    pub async fn open(&self) -> LocalDatabase {
        LocalDatabase::open(self.path())
            .await
            .expect("Failed to open database file")
    }
}

impl Default for FileDatabase {
    fn default() -> Self {
        Self::new()
    }
}
