use super::byte_spinner;
use anyhow::{Context, Result, anyhow};
use clap::Args;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use stowage_core::Repository;
use tracing::info;

#[derive(Args)]
pub struct GetCommand {
    #[arg(help = "Logical object name")]
    name: String,

    #[arg(help = "Destination file (writes stdout when omitted)")]
    file: Option<PathBuf>,
}

impl GetCommand {
    pub async fn run(&self, repo: &Repository, quiet: bool) -> Result<()> {
        let mut reader = repo
            .read_object(&self.name)
            .await
            .with_context(|| format!("opening {}", self.name))?;

        let sink: Box<dyn Write + Send> = match &self.file {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Box::new(
                    File::create(path).with_context(|| format!("creating {}", path.display()))?,
                )
            }
            None => Box::new(io::stdout()),
        };
        let pb = byte_spinner(quiet || self.file.is_none(), format!("Restoring {}", self.name))?;

        let progress = pb.clone();
        let copied = tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut sink = BufWriter::new(progress.wrap_write(sink));
            let copied = io::copy(&mut reader, &mut sink);
            let closed = reader.close_all();
            let copied = copied?;
            sink.flush()?;
            closed?;
            Ok(copied)
        })
        .await
        .map_err(|e| anyhow!("restore task failed: {e}"))?;
        pb.finish_and_clear();

        let copied = copied.with_context(|| format!("restoring {}", self.name))?;
        info!(name = %self.name, bytes = copied, "Restored object");
        Ok(())
    }
}
