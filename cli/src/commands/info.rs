use crate::config::Config;
use anyhow::Result;
use clap::Args;
use stowage_core::Repository;

#[derive(Args)]
pub struct InfoCommand {
    #[arg(long, help = "Also count stored objects")]
    count: bool,
}

impl InfoCommand {
    pub async fn run(&self, repo: &Repository, config: &Config) -> Result<()> {
        println!("Repository:  {}", config.repo_path.display());
        println!("Storage:     {:?}", repo.storage().storage_type());
        println!("Compressor:  {}", repo.compressor_name().unwrap_or("none"));
        println!("Encryptor:   {}", repo.encryptor_name().unwrap_or("none"));
        println!("Suffix:      {}", repo.encode_path(""));
        println!("Fsync:       {}", config.fsync_on_write);

        if self.count {
            let objects = repo.list_all("").await?;
            let dirs = repo.list_top_level_dirs("").await?;
            println!("Objects:     {}", objects.len());
            println!("Top dirs:    {}", dirs.len());
        }
        Ok(())
    }
}
