use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use sieve_logging::{sieve_debug, sieve_info};

use crate::persist::{ensure_writable_dir, PersistError};

/// Membership and insert-if-absent over the identifiers kept across runs.
pub trait SeenStore: Send + Sync {
    fn namespace(&self) -> &str;
    fn contains(&self, id: &str) -> bool;
    /// `Ok(true)` when `id` was new and is now durably stored.
    fn insert(&self, id: &str) -> Result<bool, PersistError>;
}

/// Durable set of previously seen identifiers for one namespace.
///
/// Backed by `{dir}/{namespace}.txt`, one identifier per line, append-only.
/// Reads and appends share one lock, so concurrent writers inside a process
/// never lose an update. Sharing a file between processes is unsupported.
#[derive(Debug)]
pub struct DedupStore {
    namespace: String,
    path: PathBuf,
    inner: Mutex<DedupInner>,
}

#[derive(Debug)]
struct DedupInner {
    seen: HashSet<String>,
    file: File,
}

impl DedupStore {
    pub fn open(dir: &Path, namespace: &str) -> Result<Self, PersistError> {
        if namespace.is_empty()
            || namespace.starts_with('.')
            || namespace.contains(['/', '\\', '\0'])
        {
            return Err(PersistError::OutputDir(format!(
                "invalid dedup namespace {namespace:?}"
            )));
        }
        ensure_writable_dir(dir)?;

        let path = dir.join(format!("{namespace}.txt"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut seen = HashSet::new();
        for line in BufReader::new(&file).lines() {
            let line = line?;
            let id = line.trim();
            if !id.is_empty() {
                seen.insert(id.to_string());
            }
        }
        sieve_info!(
            "Opened dedup store {:?} for namespace {} ({} entries)",
            path,
            namespace,
            seen.len()
        );

        Ok(Self {
            namespace: namespace.to_string(),
            path,
            inner: Mutex::new(DedupInner { seen, file }),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().seen.contains(id.trim())
    }

    /// Adds `id` unless already present. Returns `Ok(true)` when a line was
    /// appended and flushed.
    pub fn insert(&self, id: &str) -> Result<bool, PersistError> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(false);
        }

        let mut inner = self.lock();
        if inner.seen.contains(id) {
            return Ok(false);
        }
        writeln!(inner.file, "{id}")?;
        inner.file.flush()?;
        inner.seen.insert(id.to_string());
        sieve_debug!("Dedup {}: stored {}", self.namespace, id);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry of this namespace, on disk and in memory.
    pub fn clear(&self) -> Result<(), PersistError> {
        let mut inner = self.lock();
        inner.file.set_len(0)?;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.seen.clear();
        sieve_info!("Cleared dedup namespace {}", self.namespace);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, DedupInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SeenStore for DedupStore {
    fn namespace(&self) -> &str {
        DedupStore::namespace(self)
    }

    fn contains(&self, id: &str) -> bool {
        DedupStore::contains(self, id)
    }

    fn insert(&self, id: &str) -> Result<bool, PersistError> {
        DedupStore::insert(self, id)
    }
}
