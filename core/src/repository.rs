use crate::closer::MultiCloser;
use crate::codec::{Compressor, decompressor_for};
use crate::crypto::Crypter;
use crate::pipeline::{compress_and_encrypt, decrypt_and_decompress};
use crate::storage::Storage;
use crate::stream::{Close, SharedReader};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

/// A repository of backup objects on top of a [`Storage`] backend.
///
/// Callers address objects by their logical name. On the way in, objects are optionally
/// compressed and then encrypted, and stored under a physical name that records both
/// transforms as suffixes, compressor first:
///
/// ```text
/// logical name          physical name
/// pg_data/PG_VERSION -> pg_data/PG_VERSION.gz.aes
/// ```
///
/// The binding of storage, compressor and crypter is fixed for the repository's lifetime,
/// so a `Repository` can be shared freely between tasks.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use stowage_core::codec::GzipCompressor;
/// use stowage_core::crypto::ChunkedGcmCrypter;
/// use stowage_core::storage::MemoryStorage;
/// use stowage_core::Repository;
///
/// #[tokio::main]
/// async fn main() -> stowage_core::Result<()> {
///     let repo = Repository::new(
///         Arc::new(MemoryStorage::new()),
///         Some(Arc::new(GzipCompressor)),
///         Some(Arc::new(ChunkedGcmCrypter::new("my-password"))),
///     );
///
///     let stored = repo.put_object("base/manifest", Box::new(&b"payload"[..])).await?;
///     assert_eq!(stored, "base/manifest.gz.aes");
///     Ok(())
/// }
/// ```
pub struct Repository {
    storage: Arc<dyn Storage>,
    compressor: Option<Arc<dyn Compressor>>,
    crypter: Option<Arc<dyn Crypter>>,
}

impl Repository {
    pub fn new(
        storage: Arc<dyn Storage>,
        compressor: Option<Arc<dyn Compressor>>,
        crypter: Option<Arc<dyn Crypter>>,
    ) -> Self {
        Self {
            storage,
            compressor,
            crypter,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Stores `source` under `path`, compressed and encrypted as configured.
    ///
    /// Returns the physical name the object was stored under. An error means the object
    /// must be treated as not written; whether a partial object is visible in the backend
    /// depends on the backend.
    ///
    /// # Errors
    ///
    /// * Any compressor or crypter failure raised while streaming.
    /// * `Error::Storage` - the backend rejected the write.
    pub async fn put_object(&self, path: &str, source: Box<dyn Read + Send>) -> Result<String> {
        let full_path = self.encode_path(path);

        let encoded = compress_and_encrypt(source, self.compressor.clone(), self.crypter.clone())?;
        self.storage.put_object(&full_path, Box::new(encoded)).await?;

        debug!(path, stored = %full_path, "Stored object");
        Ok(full_path)
    }

    /// Stores `source` as-is, without compression or encryption.
    pub async fn put_object_plain(&self, path: &str, source: Box<dyn Read + Send>) -> Result<String> {
        let full_path = to_slash(path);
        self.storage.put_object(&full_path, source).await?;

        debug!(stored = %full_path, "Stored plain object");
        Ok(full_path)
    }

    /// Opens the object stored under the logical `path` and undoes its transforms.
    ///
    /// The returned reader owns the raw storage handle as well as the decoding layers;
    /// closing it releases all of them.
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - no object under the encoded path.
    /// * `Error::UnknownDecompressor` - the configured compressor has no matching decoder.
    /// * `Error::Header` - the stored object is not an encrypted stream.
    pub async fn read_object(&self, path: &str) -> Result<MultiCloser> {
        let full_path = self.encode_path(path);
        let mut raw = SharedReader::new(self.storage.read_object(&full_path).await?);

        let decompressor = match &self.compressor {
            Some(compressor) => match decompressor_for(compressor.as_ref()) {
                Some(decompressor) => Some(decompressor),
                None => {
                    release(&mut raw, &full_path);
                    return Err(Error::UnknownDecompressor {
                        extension: compressor.file_extension().to_string(),
                    });
                }
            },
            None => None,
        };

        // Reading the header and deriving the key block, so keep them off the runtime.
        let crypter = self.crypter.clone();
        let source = raw.clone();
        let decoded = tokio::task::spawn_blocking(move || {
            decrypt_and_decompress(source, crypter.as_deref(), decompressor.as_deref())
        })
        .await
        .map_err(|e| Error::Task(e.to_string()));

        let decoded = match decoded {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(e)) | Err(e) => {
                release(&mut raw, &full_path);
                return Err(e);
            }
        };

        debug!(path, stored = %full_path, "Opened object");
        Ok(MultiCloser::new(
            decoded.clone(),
            vec![raw.handle(), decoded.handle()],
        ))
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.storage.exists(&self.encode_path(path)).await
    }

    /// Digest of the stored (encoded) bytes of the object.
    pub async fn sha256(&self, path: &str) -> Result<String> {
        self.storage.sha256(&self.encode_path(path)).await
    }

    /// Lists objects below `prefix` by their logical names.
    ///
    /// Only the suffix this repository would generate is stripped; a name that does not
    /// end with it (a plain object, or one written with other transforms) is returned
    /// unchanged. Dots inside logical names are preserved.
    pub async fn list_all(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.storage.list_all(prefix).await?;
        if self.compressor.is_none() && self.crypter.is_none() {
            return Ok(objects);
        }
        Ok(objects.iter().map(|name| self.decode_path(name)).collect())
    }

    pub async fn list_top_level_dirs(&self, prefix: &str) -> Result<BTreeSet<String>> {
        self.storage.list_top_level_dirs(prefix).await
    }

    pub fn compressor_name(&self) -> Option<&str> {
        self.compressor.as_ref().map(|c| c.name())
    }

    pub fn encryptor_name(&self) -> Option<&str> {
        self.crypter.as_ref().map(|c| c.name())
    }

    fn suffix(&self) -> String {
        let mut suffix = String::new();
        if let Some(compressor) = &self.compressor {
            suffix.push_str(compressor.file_extension());
        }
        if let Some(crypter) = &self.crypter {
            suffix.push_str(crypter.file_extension());
        }
        suffix
    }

    pub fn encode_path(&self, logical: &str) -> String {
        to_slash(&format!("{logical}{}", self.suffix()))
    }

    pub fn decode_path(&self, physical: &str) -> String {
        let physical = to_slash(physical);
        let suffix = self.suffix();
        match physical.strip_suffix(suffix.as_str()) {
            Some(logical) if !suffix.is_empty() && !logical.is_empty() => logical.to_string(),
            _ => physical,
        }
    }
}

fn to_slash(path: &str) -> String {
    path.replace('\\', "/")
}

fn release(raw: &mut SharedReader, path: &str) {
    if let Err(e) = raw.close() {
        warn!(path, error = %e, "Failed to close storage object");
    }
}
