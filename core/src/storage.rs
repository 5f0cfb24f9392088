use crate::hashing::sha256_hex;
use crate::stream::{Close, ObjectReader};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Local,
    Memory,
}

/// Byte-addressable object store the repository writes physical objects to.
///
/// Paths are `/`-separated and relative to the store root.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn put_object(&self, path: &str, source: Box<dyn Read + Send>) -> Result<()>;

    /// Fails with [`Error::NotFound`] when nothing is stored under `path`.
    async fn read_object(&self, path: &str) -> Result<Box<dyn ObjectReader>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn sha256(&self, path: &str) -> Result<String>;

    /// Every object below `prefix`, recursively, sorted.
    async fn list_all(&self, prefix: &str) -> Result<Vec<String>>;

    /// Directories directly below `prefix`, relative to the store root.
    async fn list_top_level_dirs(&self, prefix: &str) -> Result<BTreeSet<String>>;

    fn storage_type(&self) -> StorageType;
}

/// Process-local store, used for tests and dry runs.
#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<BTreeMap<String, Bytes>>,
    open_handles: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.objects.read().ok()?.get(path).cloned()
    }

    pub fn insert(&self, path: &str, data: impl Into<Bytes>) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(path.to_string(), data.into());
        }
    }

    /// Readers handed out by `read_object` that have not been closed yet.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    fn snapshot_keys(&self) -> Result<Vec<String>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| Error::Other("memory storage lock poisoned".to_string()))?;
        Ok(objects.keys().cloned().collect())
    }
}

fn under_prefix<'k>(key: &'k str, prefix: &str) -> Option<&'k str> {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return Some(key);
    }
    key.strip_prefix(prefix)?.strip_prefix('/')
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put_object(&self, path: &str, mut source: Box<dyn Read + Send>) -> Result<()> {
        let owned = path.to_string();
        let data = tokio::task::spawn_blocking(move || {
            let mut data = Vec::new();
            source
                .read_to_end(&mut data)
                .map(|_| data)
                .map_err(|e| Error::storage("put", owned, e))
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))??;

        self.insert(path, data);
        Ok(())
    }

    async fn read_object(&self, path: &str) -> Result<Box<dyn ObjectReader>> {
        let data = self.get(path).ok_or_else(|| Error::NotFound {
            path: path.to_string(),
        })?;
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryObject {
            data: Cursor::new(data),
            open_handles: self.open_handles.clone(),
            closed: false,
        }))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.get(path).is_some())
    }

    async fn sha256(&self, path: &str) -> Result<String> {
        let data = self.get(path).ok_or_else(|| Error::NotFound {
            path: path.to_string(),
        })?;
        Ok(sha256_hex(&data))
    }

    async fn list_all(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .snapshot_keys()?
            .into_iter()
            .filter(|key| under_prefix(key, prefix).is_some())
            .collect())
    }

    async fn list_top_level_dirs(&self, prefix: &str) -> Result<BTreeSet<String>> {
        let base = prefix.trim_matches('/');
        let mut dirs = BTreeSet::new();
        for key in self.snapshot_keys()? {
            let Some(rest) = under_prefix(&key, prefix) else {
                continue;
            };
            if let Some((dir, _)) = rest.split_once('/') {
                if base.is_empty() {
                    dirs.insert(dir.to_string());
                } else {
                    dirs.insert(format!("{base}/{dir}"));
                }
            }
        }
        Ok(dirs)
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Memory
    }
}

struct MemoryObject {
    data: Cursor<Bytes>,
    open_handles: Arc<AtomicUsize>,
    closed: bool,
}

impl Read for MemoryObject {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::other("read from closed object"));
        }
        self.data.read(buf)
    }
}

impl Close for MemoryObject {
    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemoryObject {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
