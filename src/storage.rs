//! Storage medium abstraction.
//!
//! The store never touches `std::fs` directly: every open/create/append/read/stat/remove goes
//! through a [`Directory`], addressed by `/`-separated relative keys. Two backends ship:
//! - [`FsDirectory`]: a real directory tree on the local filesystem.
//! - [`MemoryDirectory`]: a shared in-memory map, used for tests and benchmarks.
//!
//! Vocabulary note:
//! - `flush()` is a visibility boundary, not a stable-storage guarantee.
//! - Stable-storage durability needs explicit `sync_all` barriers and, for creates/renames,
//!   a sync of the parent directory. Those live in [`DurableDirectory`] and only work on
//!   backends that expose [`Directory::file_path`].

use crate::error::{PersistenceError, PersistenceResult};
use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// `fsync` the file at `path`.
///
/// Returns `NotSupported` for backends without an OS path.
pub fn sync_file<D: Directory + ?Sized>(dir: &D, path: &str) -> PersistenceResult<()> {
    let Some(p) = dir.file_path(path) else {
        return Err(PersistenceError::NotSupported(
            "sync_file requires Directory::file_path()".into(),
        ));
    };
    let f = std::fs::OpenOptions::new().read(true).open(&p)?;
    f.sync_all()?;
    Ok(())
}

/// `fsync` the parent directory of `path`, making creates and renames of `path` durable.
pub fn sync_parent_dir<D: Directory + ?Sized>(dir: &D, path: &str) -> PersistenceResult<()> {
    let Some(p) = dir.file_path(path) else {
        return Err(PersistenceError::NotSupported(
            "sync_parent_dir requires Directory::file_path()".into(),
        ));
    };
    let Some(parent) = p.parent() else {
        return Err(PersistenceError::InvalidConfig(format!(
            "path has no parent directory: {p:?}"
        )));
    };
    let f = std::fs::File::open(parent)?;
    f.sync_all()?;
    Ok(())
}

/// Join relative keys with `/`, treating an empty base as the directory root.
pub fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

/// Trait for directory-like storage backends.
pub trait Directory: Send + Sync {
    /// Create a new file for writing (truncating it if it exists).
    fn create_file(&self, path: &str) -> PersistenceResult<Box<dyn Write>>;
    /// Open an existing file for reading.
    fn open_file(&self, path: &str) -> PersistenceResult<Box<dyn Read>>;
    /// Return whether a file or directory exists at `path`.
    fn exists(&self, path: &str) -> bool;
    /// Delete a file or directory (directories recursively). Missing paths are not an error.
    fn delete(&self, path: &str) -> PersistenceResult<()>;
    /// Atomically rename/move a file.
    fn atomic_rename(&self, from: &str, to: &str) -> PersistenceResult<()>;
    /// Create a single directory. An existing directory is not an error.
    fn create_dir(&self, path: &str) -> PersistenceResult<()>;
    /// Create a directory and any missing parents.
    fn create_dir_all(&self, path: &str) -> PersistenceResult<()>;
    /// List the immediate children of a directory, sorted. Missing directories list as empty.
    fn list_dir(&self, path: &str) -> PersistenceResult<Vec<String>>;
    /// Open an existing file for appending.
    fn append_file(&self, path: &str) -> PersistenceResult<Box<dyn Write>>;
    /// Replace the contents of `path` as a single atomic step (write temp, then rename).
    fn atomic_write(&self, path: &str, data: &[u8]) -> PersistenceResult<()>;
    /// Current size of the file at `path`, in bytes.
    fn file_len(&self, path: &str) -> PersistenceResult<u64>;
    /// Optional filesystem path for backends that map onto the OS filesystem.
    fn file_path(&self, path: &str) -> Option<PathBuf>;

    /// Read a whole file into memory.
    fn read_all(&self, path: &str) -> PersistenceResult<Vec<u8>> {
        let mut f = self.open_file(path)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Opt-in stable-storage durability operations for a `Directory`.
///
/// Default implementations use [`sync_file`] / [`sync_parent_dir`], which require
/// `Directory::file_path()`. For non-filesystem backends they return `NotSupported`.
pub trait DurableDirectory: Directory {
    /// Make the file at `path` durable on stable storage.
    fn sync_file(&self, path: &str) -> PersistenceResult<()> {
        sync_file(self, path)
    }

    /// Make the *name* of `path` durable (sync the parent directory).
    fn sync_parent_dir(&self, path: &str) -> PersistenceResult<()> {
        sync_parent_dir(self, path)
    }

    /// Atomically replace `path` with explicit barriers:
    /// write temp, `sync_file(temp)`, rename temp over `path`, `sync_parent_dir(path)`.
    fn atomic_write_durable(&self, path: &str, data: &[u8]) -> PersistenceResult<()> {
        if self.file_path(path).is_none() {
            return Err(PersistenceError::NotSupported(
                "atomic_write_durable requires Directory::file_path()".into(),
            ));
        }

        let tmp = format!("{path}.tmp");
        if let Err(e) = (|| -> PersistenceResult<()> {
            let mut w = self.create_file(&tmp)?;
            w.write_all(data)?;
            w.flush()?;
            Ok(())
        })() {
            let _ = self.delete(&tmp);
            return Err(e);
        }

        if let Err(e) = self.sync_file(&tmp) {
            let _ = self.delete(&tmp);
            return Err(e);
        }

        if let Err(e) = self.atomic_rename(&tmp, path) {
            let _ = self.delete(&tmp);
            return Err(e);
        }
        self.sync_parent_dir(path)
    }
}

impl<T: Directory + ?Sized> DurableDirectory for T {}

/// Filesystem-backed `Directory` rooted at a local path.
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Open a filesystem backend rooted at `root`, creating the root if needed.
    pub fn new(root: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The root this backend resolves keys against.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

impl Directory for FsDirectory {
    fn create_file(&self, path: &str) -> PersistenceResult<Box<dyn Write>> {
        Ok(Box::new(std::fs::File::create(self.resolve_path(path))?))
    }

    fn open_file(&self, path: &str) -> PersistenceResult<Box<dyn Read>> {
        let full_path = self.resolve_path(path);
        match std::fs::File::open(&full_path) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PersistenceError::MissingPath(full_path))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve_path(path).exists()
    }

    fn delete(&self, path: &str) -> PersistenceResult<()> {
        let full_path = self.resolve_path(path);
        if full_path.is_dir() {
            std::fs::remove_dir_all(full_path)?;
        } else if full_path.exists() {
            std::fs::remove_file(full_path)?;
        }
        Ok(())
    }

    fn atomic_rename(&self, from: &str, to: &str) -> PersistenceResult<()> {
        std::fs::rename(self.resolve_path(from), self.resolve_path(to))?;
        Ok(())
    }

    fn create_dir(&self, path: &str) -> PersistenceResult<()> {
        match std::fs::create_dir(self.resolve_path(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn create_dir_all(&self, path: &str) -> PersistenceResult<()> {
        std::fs::create_dir_all(self.resolve_path(path))?;
        Ok(())
    }

    fn list_dir(&self, path: &str) -> PersistenceResult<Vec<String>> {
        let full_path = self.resolve_path(path);
        if !full_path.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(full_path)? {
            let entry = entry?;
            out.push(entry.file_name().to_string_lossy().to_string());
        }
        out.sort();
        Ok(out)
    }

    fn append_file(&self, path: &str) -> PersistenceResult<Box<dyn Write>> {
        let full_path = self.resolve_path(path);
        match std::fs::OpenOptions::new().append(true).open(&full_path) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PersistenceError::MissingPath(full_path))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn atomic_write(&self, path: &str, data: &[u8]) -> PersistenceResult<()> {
        let full_temp_path = self.resolve_path(&format!("{path}.tmp"));
        let full_path = self.resolve_path(path);

        let mut temp_file = std::fs::File::create(&full_temp_path)?;
        temp_file.write_all(data)?;
        temp_file.flush()?;
        drop(temp_file);

        if let Err(e) = std::fs::rename(&full_temp_path, &full_path) {
            let _ = std::fs::remove_file(&full_temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn file_len(&self, path: &str) -> PersistenceResult<u64> {
        let full_path = self.resolve_path(path);
        match std::fs::metadata(&full_path) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PersistenceError::MissingPath(full_path))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn file_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.resolve_path(path))
    }
}

#[derive(Default)]
struct MemoryState {
    files: HashMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

type SharedState = Arc<RwLock<MemoryState>>;

fn poisoned() -> PersistenceError {
    PersistenceError::LockFailed {
        resource: "memory directory".to_string(),
        reason: "lock poisoned".to_string(),
    }
}

fn under(prefix: &str, key: &str) -> bool {
    prefix.is_empty() || key == prefix || key.starts_with(&format!("{prefix}/"))
}

/// In-memory `Directory`. Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    state: SharedState,
}

impl MemoryDirectory {
    /// Create an empty in-memory directory.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Directory for MemoryDirectory {
    fn create_file(&self, path: &str) -> PersistenceResult<Box<dyn Write>> {
        self.state
            .write()
            .map_err(|_| poisoned())?
            .files
            .insert(path.to_string(), Vec::new());
        Ok(Box::new(MemoryInPlaceWriter {
            state: self.state.clone(),
            path: path.to_string(),
        }))
    }

    fn open_file(&self, path: &str) -> PersistenceResult<Box<dyn Read>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let data = state
            .files
            .get(path)
            .ok_or_else(|| PersistenceError::NotFound(path.to_string()))?
            .clone();
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    fn exists(&self, path: &str) -> bool {
        self.state
            .read()
            .map(|s| s.files.contains_key(path) || s.dirs.contains(path))
            .unwrap_or(false)
    }

    fn delete(&self, path: &str) -> PersistenceResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.files.retain(|k, _| !under(path, k));
        state.dirs.retain(|k| !under(path, k));
        Ok(())
    }

    fn atomic_rename(&self, from: &str, to: &str) -> PersistenceResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let data = state
            .files
            .remove(from)
            .ok_or_else(|| PersistenceError::NotFound(from.to_string()))?;
        state.files.insert(to.to_string(), data);
        Ok(())
    }

    fn create_dir(&self, path: &str) -> PersistenceResult<()> {
        self.state
            .write()
            .map_err(|_| poisoned())?
            .dirs
            .insert(path.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &str) -> PersistenceResult<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let mut acc = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            acc = join(&acc, part);
            state.dirs.insert(acc.clone());
        }
        Ok(())
    }

    fn list_dir(&self, path: &str) -> PersistenceResult<Vec<String>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}/")
        };
        let children: BTreeSet<String> = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|child| !child.is_empty())
            .map(str::to_string)
            .collect();
        Ok(children.into_iter().collect())
    }

    fn append_file(&self, path: &str) -> PersistenceResult<Box<dyn Write>> {
        if !self.state.read().map_err(|_| poisoned())?.files.contains_key(path) {
            return Err(PersistenceError::NotFound(path.to_string()));
        }
        Ok(Box::new(MemoryInPlaceWriter {
            state: self.state.clone(),
            path: path.to_string(),
        }))
    }

    fn atomic_write(&self, path: &str, data: &[u8]) -> PersistenceResult<()> {
        self.state
            .write()
            .map_err(|_| poisoned())?
            .files
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn file_len(&self, path: &str) -> PersistenceResult<u64> {
        let state = self.state.read().map_err(|_| poisoned())?;
        state
            .files
            .get(path)
            .map(|b| b.len() as u64)
            .ok_or_else(|| PersistenceError::NotFound(path.to_string()))
    }

    fn file_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}

struct MemoryInPlaceWriter {
    state: SharedState,
    path: String,
}

impl Write for MemoryInPlaceWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self
            .state
            .write()
            .map_err(|_| std::io::Error::other("lock poisoned"))?;
        state
            .files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
