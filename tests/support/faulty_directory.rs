//! Filesystem-backed `Directory` wrapper with targeted fault injection.
//!
//! Important: this file lives under `tests/support/` so it is **not** compiled as a standalone
//! integration test target.

use std::io;
use std::sync::{Arc, Mutex};
use topicstore::storage::{Directory, FsDirectory};
use topicstore::PersistenceResult;

/// Fault-injection configuration for store file operations.
#[derive(Default)]
pub struct FaultConfig {
    /// Fail when opening an append handle on a segment file.
    pub fail_segment_append: bool,
    /// Fail any whole-file replace (write or rename) that targets a segment file.
    pub fail_segment_replace: bool,
    /// Fail any whole-file replace that targets the index.
    pub fail_index_write: bool,
    /// Fail when deleting segment files.
    pub fail_segment_delete: bool,
    /// Fail when creating a topic directory.
    pub fail_create_dir: bool,
    /// Fail listing any directory.
    pub fail_list_dir: bool,
    /// Report an OS path under a missing directory for this key, so syncing the
    /// directory that holds its name fails.
    pub fail_dir_sync_for: Option<String>,
    /// Count of delete calls attempted against segment files.
    pub segment_delete_calls: usize,
}

/// A filesystem-backed `Directory` wrapper with targeted fault injection.
pub struct FaultyDirectory {
    inner: FsDirectory,
    cfg: Arc<Mutex<FaultConfig>>,
}

impl FaultyDirectory {
    /// Wrap an existing `FsDirectory`.
    pub fn new(inner: FsDirectory) -> Self {
        Self {
            inner,
            cfg: Arc::new(Mutex::new(FaultConfig::default())),
        }
    }

    /// Access the shared fault config (for toggling failpoints and reading counters).
    pub fn cfg(&self) -> Arc<Mutex<FaultConfig>> {
        self.cfg.clone()
    }

    fn is_segment_path(path: &str) -> bool {
        let path = path.strip_suffix(".tmp").unwrap_or(path);
        path.ends_with(".log")
    }

    fn is_index_path(path: &str) -> bool {
        let path = path.strip_suffix(".tmp").unwrap_or(path);
        path == "index" || path.ends_with("/index")
    }

    fn injected(what: &str) -> topicstore::PersistenceError {
        io::Error::other(format!("injected {what} failure")).into()
    }

    fn check_replace(&self, path: &str) -> PersistenceResult<()> {
        let cfg = self.cfg.lock().unwrap();
        if cfg.fail_index_write && Self::is_index_path(path) {
            return Err(Self::injected("index write"));
        }
        if cfg.fail_segment_replace && Self::is_segment_path(path) {
            return Err(Self::injected("segment replace"));
        }
        Ok(())
    }
}

impl Directory for FaultyDirectory {
    fn create_file(&self, path: &str) -> PersistenceResult<Box<dyn io::Write>> {
        self.inner.create_file(path)
    }

    fn open_file(&self, path: &str) -> PersistenceResult<Box<dyn io::Read>> {
        self.inner.open_file(path)
    }

    fn exists(&self, path: &str) -> bool {
        self.inner.exists(path)
    }

    fn delete(&self, path: &str) -> PersistenceResult<()> {
        let mut cfg = self.cfg.lock().unwrap();
        if Self::is_segment_path(path) {
            cfg.segment_delete_calls += 1;
            if cfg.fail_segment_delete {
                return Err(Self::injected("delete"));
            }
        }
        drop(cfg);
        self.inner.delete(path)
    }

    fn atomic_rename(&self, from: &str, to: &str) -> PersistenceResult<()> {
        self.check_replace(to)?;
        self.inner.atomic_rename(from, to)
    }

    fn create_dir(&self, path: &str) -> PersistenceResult<()> {
        if self.cfg.lock().unwrap().fail_create_dir {
            return Err(Self::injected("create_dir"));
        }
        self.inner.create_dir(path)
    }

    fn create_dir_all(&self, path: &str) -> PersistenceResult<()> {
        self.inner.create_dir_all(path)
    }

    fn list_dir(&self, path: &str) -> PersistenceResult<Vec<String>> {
        if self.cfg.lock().unwrap().fail_list_dir {
            return Err(Self::injected("list_dir"));
        }
        self.inner.list_dir(path)
    }

    fn append_file(&self, path: &str) -> PersistenceResult<Box<dyn io::Write>> {
        let cfg = self.cfg.lock().unwrap();
        if cfg.fail_segment_append && Self::is_segment_path(path) {
            return Err(Self::injected("append"));
        }
        drop(cfg);
        self.inner.append_file(path)
    }

    fn atomic_write(&self, path: &str, data: &[u8]) -> PersistenceResult<()> {
        self.check_replace(path)?;
        self.inner.atomic_write(path, data)
    }

    fn file_len(&self, path: &str) -> PersistenceResult<u64> {
        self.inner.file_len(path)
    }

    fn file_path(&self, path: &str) -> Option<std::path::PathBuf> {
        let cfg = self.cfg.lock().unwrap();
        if cfg.fail_dir_sync_for.as_deref() == Some(path) {
            return Some(self.inner.root().join("no-such-dir").join(path));
        }
        drop(cfg);
        self.inner.file_path(path)
    }
}
