use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use stowage_core::hashing::sha256_reader;
use stowage_core::storage::{Storage, StorageType};
use stowage_core::stream::{Close, ObjectReader};
use stowage_core::{Error, Result};
use tracing::debug;
use walkdir::WalkDir;

/// Stores objects as plain files below a base directory.
pub struct LocalStorage {
    base_dir: PathBuf,
    fsync_on_write: bool,
}

impl LocalStorage {
    /// Opens the store, creating `base_dir` if it does not exist yet.
    pub fn new<P: AsRef<Path>>(base_dir: P, fsync_on_write: bool) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)
            .map_err(|e| Error::storage("init", base_dir.display().to_string(), e))?;

        Ok(Self {
            base_dir,
            fsync_on_write,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(Error::storage(
                "resolve",
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path escapes the storage root"),
            ));
        }
        Ok(self.base_dir.join(relative))
    }
}

/// `/`-separated path of `full` below `base`.
fn relative_to(base: &Path, full: &Path) -> Option<String> {
    let rel = full.strip_prefix(base).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}

fn open(full: &Path, path: &str) -> Result<File> {
    File::open(full).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::NotFound {
                path: path.to_string(),
            }
        } else {
            Error::storage("open", path, e)
        }
    })
}

fn write_file(full: &Path, source: &mut dyn Read, fsync: bool) -> io::Result<u64> {
    let parent = full.parent();
    if let Some(parent) = parent {
        fs::create_dir_all(parent)?;
    }

    let mut file = File::create(full)?;
    let written = io::copy(source, &mut file)?;

    if fsync {
        file.sync_all()?;
        if let Some(parent) = parent {
            sync_dir(parent)?;
        }
    }
    Ok(written)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put_object(&self, path: &str, mut source: Box<dyn Read + Send>) -> Result<()> {
        let full = self.full_path(path)?;
        let fsync = self.fsync_on_write;
        let owned = path.to_string();

        let written = blocking(move || {
            write_file(&full, &mut source, fsync).map_err(|e| Error::storage("put", owned, e))
        })
        .await?;

        debug!(path, written, fsync, "Wrote object");
        Ok(())
    }

    async fn read_object(&self, path: &str) -> Result<Box<dyn ObjectReader>> {
        let full = self.full_path(path)?;
        let owned = path.to_string();

        let file = blocking(move || open(&full, &owned)).await?;
        Ok(Box::new(LocalObject {
            file: Some(BufReader::new(file)),
        }))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.full_path(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage("stat", path, e)),
        }
    }

    async fn sha256(&self, path: &str) -> Result<String> {
        let full = self.full_path(path)?;
        let owned = path.to_string();

        blocking(move || {
            let mut reader = BufReader::new(open(&full, &owned)?);
            sha256_reader(&mut reader).map_err(|e| Error::storage("hash", owned, e))
        })
        .await
    }

    async fn list_all(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.full_path(prefix)?;
        if !root.exists() {
            return Ok(Vec::new());
        }
        let base = self.base_dir.clone();
        let owned = prefix.to_string();

        let mut objects = blocking(move || {
            let mut objects = Vec::new();
            for entry in WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    let err = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("filesystem loop"));
                    Error::storage("list", owned.as_str(), err)
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(rel) = relative_to(&base, entry.path()) {
                    objects.push(rel);
                }
            }
            Ok(objects)
        })
        .await?;

        objects.sort();
        Ok(objects)
    }

    async fn list_top_level_dirs(&self, prefix: &str) -> Result<BTreeSet<String>> {
        let root = self.full_path(prefix)?;
        let mut dirs = BTreeSet::new();

        let mut entries = match tokio::fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(Error::storage("list", prefix, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage("list", prefix, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| Error::storage("list", prefix, e))?
                .is_dir();
            if is_dir {
                if let Some(rel) = relative_to(&self.base_dir, &entry.path()) {
                    dirs.insert(rel);
                }
            }
        }
        Ok(dirs)
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Local
    }
}

struct LocalObject {
    file: Option<BufReader<File>>,
}

impl Read for LocalObject {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.file {
            Some(file) => file.read(buf),
            None => Err(io::Error::other("read from closed object")),
        }
    }
}

impl Close for LocalObject {
    fn close(&mut self) -> io::Result<()> {
        self.file.take();
        Ok(())
    }
}
