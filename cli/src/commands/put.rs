use super::byte_spinner;
use anyhow::{Context, Result};
use clap::Args;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use stowage_core::Repository;
use tracing::info;

#[derive(Args)]
pub struct PutCommand {
    #[arg(help = "Logical object name, e.g. base/20240101/pg_data.tar")]
    name: String,

    #[arg(help = "File to store (reads stdin when omitted)")]
    file: Option<PathBuf>,
}

impl PutCommand {
    pub async fn run(&self, repo: &Repository, quiet: bool) -> Result<()> {
        self.store(repo, quiet, false).await
    }

    /// Stores the input verbatim, skipping compression and encryption.
    pub async fn run_plain(&self, repo: &Repository, quiet: bool) -> Result<()> {
        self.store(repo, quiet, true).await
    }

    async fn store(&self, repo: &Repository, quiet: bool, plain: bool) -> Result<()> {
        let source: Box<dyn Read + Send> = match &self.file {
            Some(path) => Box::new(
                File::open(path).with_context(|| format!("opening {}", path.display()))?,
            ),
            None => Box::new(io::stdin()),
        };

        let pb = byte_spinner(quiet, format!("Storing {}", self.name))?;
        let source = Box::new(pb.wrap_read(source));

        let stored = if plain {
            repo.put_object_plain(&self.name, source).await
        } else {
            repo.put_object(&self.name, source).await
        };
        pb.finish_and_clear();
        let stored = stored.with_context(|| format!("storing {}", self.name))?;

        info!(name = %self.name, stored = %stored, bytes = pb.position(), "Stored object");
        println!("{stored}");
        Ok(())
    }
}
