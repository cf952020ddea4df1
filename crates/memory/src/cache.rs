//! Local cache: bounded per-type item lists mirrored to a JSON file.
//!
//! One file per user (`agent_memory_<user>.json`), shared by every session
//! of that user. Each mutation re-reads the file under a per-file lock,
//! merges it with the in-memory lists and writes the result back, so two
//! sessions writing concurrently keep each other's items. The file is
//! replayed when the durable store is unreachable.

use mentor_core::error::MemoryError;
use mentor_core::memory::{MemoryItem, MemoryType};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};
use tracing::{debug, warn};

type ItemLists = HashMap<MemoryType, Vec<MemoryItem>>;

/// One lock per cache file, shared by every `LocalCache` in the process.
static FILE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(Default::default);

fn file_lock(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = FILE_LOCKS.lock().unwrap_or_else(|e| e.into_inner());
    locks.entry(path.to_path_buf()).or_default().clone()
}

/// Items are identified by origin and creation time; cached items have no id.
fn same_item(a: &MemoryItem, b: &MemoryItem) -> bool {
    a.session_id == b.session_id
        && a.created_at == b.created_at
        && a.category == b.category
        && a.content == b.content
}

fn read_file(path: &Path) -> Result<ItemLists, MemoryError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ItemLists::new()),
        Err(e) => return Err(MemoryError::CacheIo(format!("read {}: {e}", path.display()))),
    };
    serde_json::from_str(&content)
        .map_err(|e| MemoryError::CacheIo(format!("corrupt cache {}: {e}", path.display())))
}

/// Per-type item lists, oldest first.
#[derive(Debug, Default)]
pub struct LocalCache {
    path: Option<PathBuf>,
    items: HashMap<MemoryType, Vec<MemoryItem>>,
}

impl LocalCache {
    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A cache mirrored to `path`. Nothing is read until [`load`](Self::load).
    pub fn at(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            items: HashMap::new(),
        }
    }

    /// Cache file for `user_id` under `dir`.
    pub fn path_for(dir: &Path, user_id: &str) -> PathBuf {
        let safe: String = user_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        dir.join(format!("agent_memory_{safe}.json"))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the in-memory lists with the file's contents.
    ///
    /// A missing file is an empty cache. Returns the number of items loaded.
    pub fn load(&mut self) -> Result<usize, MemoryError> {
        let Some(path) = self.path.clone() else {
            return Ok(0);
        };

        let lock = file_lock(&path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        self.items = read_file(&path)?;

        let count = self.len();
        debug!(path = %path.display(), count, "Local memory cache loaded");
        Ok(count)
    }

    /// Merge in items other sessions wrote to the file since the last read.
    pub fn refresh(&mut self) -> Result<(), MemoryError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        let lock = file_lock(&path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let on_disk = read_file(&path)?;
        self.merge(on_disk);
        Ok(())
    }

    /// Append an item, evicting the oldest of its type beyond `max`.
    ///
    /// With a file, the file is merged in first and rewritten afterwards,
    /// both under the file's lock.
    pub fn push(&mut self, item: MemoryItem, max: usize) {
        let Some(path) = self.path.clone() else {
            self.append(item, max);
            return;
        };

        let lock = file_lock(&path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        match read_file(&path) {
            Ok(on_disk) => self.merge(on_disk),
            Err(e) => warn!(error = %e, "Overwriting unreadable local memory cache"),
        }
        self.append(item, max);
        if let Err(e) = self.write(&path) {
            warn!(error = %e, "Failed to persist local memory cache");
        }
    }

    fn append(&mut self, item: MemoryItem, max: usize) {
        let list = self.items.entry(item.memory_type).or_default();
        list.push(item);
        if list.len() > max {
            let excess = list.len() - max;
            list.drain(..excess);
        }
    }

    fn merge(&mut self, other: ItemLists) {
        for (memory_type, items) in other {
            let list = self.items.entry(memory_type).or_default();
            let before = list.len();
            for item in items {
                if !list.iter().any(|known| same_item(known, &item)) {
                    list.push(item);
                }
            }
            if list.len() != before {
                list.sort_by_key(|i| i.created_at);
            }
        }
    }

    /// Items of one type, oldest first.
    pub fn items(&self, memory_type: MemoryType) -> &[MemoryItem] {
        self.items.get(&memory_type).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self, path: &Path) -> Result<(), MemoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MemoryError::CacheIo(format!("create {}: {e}", parent.display())))?;
        }

        let content = serde_json::to_string(&self.items)
            .map_err(|e| MemoryError::CacheIo(format!("serialize cache: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| MemoryError::CacheIo(format!("write {}: {e}", path.display())))
    }
}
