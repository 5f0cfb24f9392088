use anyhow::{Result, bail};
use clap::Args;
use std::io::{self, Read};
use std::sync::Arc;
use stowage_core::concur::process_concurrently;
use stowage_core::hashing::sha256_reader;
use stowage_core::{Error, Repository};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Args)]
pub struct VerifyCommand {
    #[arg(required = true, help = "Logical object names to read back")]
    names: Vec<String>,

    #[arg(short, long, default_value_t = 4, help = "Objects verified in parallel")]
    jobs: usize,
}

pub struct Verified {
    pub name: String,
    pub size: u64,
    pub sha256: String,
}

impl VerifyCommand {
    pub async fn run(&self, repo: Arc<Repository>) -> Result<()> {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing objects in flight");
                on_signal.cancel();
            }
        });

        let (verified, errors) = process_concurrently(
            &cancel,
            self.jobs,
            self.names.clone(),
            move |_, name| verify_object(repo.clone(), name),
            None,
        )
        .await;

        for object in &verified {
            println!("{}  {}  {}", object.sha256, object.size, object.name);
        }
        for error in &errors {
            eprintln!("error: {error}");
        }

        if cancel.is_cancelled() {
            bail!("verification interrupted");
        }
        if !errors.is_empty() {
            bail!("{} of {} objects failed verification", errors.len(), self.names.len());
        }
        info!(objects = verified.len(), "All objects verified");
        Ok(())
    }
}

/// Reads `name` to the end, checking every authentication tag along the way.
pub async fn verify_object(repo: Arc<Repository>, name: String) -> stowage_core::Result<Verified> {
    let mut reader = repo.read_object(&name).await?;

    tokio::task::spawn_blocking(move || {
        let mut counting = CountingReader {
            inner: &mut reader,
            count: 0,
        };
        let digest = sha256_reader(&mut counting);
        let size = counting.count;
        let closed = reader.close_all();

        let sha256 = digest.map_err(|e| match Error::from(e) {
            Error::Io(e) => Error::Other(format!("{name}: {e}")),
            other => other,
        })?;
        closed?;
        Ok(Verified { name, size, sha256 })
    })
    .await
    .map_err(|e| Error::Task(e.to_string()))?
}

struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use stowage_core::codec::GzipCompressor;
    use stowage_core::storage::MemoryStorage;

    #[tokio::test]
    async fn test_verify_reports_decoded_size() {
        let storage = Arc::new(MemoryStorage::new());
        let repo = Arc::new(Repository::new(
            storage.clone(),
            Some(Arc::new(GzipCompressor)),
            None,
        ));
        repo.put_object("obj", Box::new(Cursor::new(b"abc".to_vec())))
            .await
            .unwrap();

        let verified = verify_object(repo.clone(), "obj".to_string()).await.unwrap();
        assert_eq!(verified.size, 3);
        assert_eq!(
            verified.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(storage.open_handles(), 0);

        let missing = verify_object(repo, "nope".to_string()).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_verify_rejects_corrupt_gzip() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("bad.gz", b"definitely not gzip".to_vec());
        let repo = Arc::new(Repository::new(storage.clone(), Some(Arc::new(GzipCompressor)), None));

        assert!(verify_object(repo, "bad".to_string()).await.is_err());
        assert_eq!(storage.open_handles(), 0);
    }
}
