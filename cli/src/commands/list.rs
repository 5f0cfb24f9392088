use anyhow::{Result, bail};
use clap::Args;
use stowage_core::Repository;

#[derive(Args)]
pub struct LsCommand {
    #[arg(help = "Prefix to list below", default_value = "")]
    prefix: String,
}

impl LsCommand {
    pub async fn run(&self, repo: &Repository) -> Result<()> {
        for name in repo.list_all(&self.prefix).await? {
            println!("{name}");
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct DirsCommand {
    #[arg(help = "Prefix whose direct subdirectories are listed", default_value = "")]
    prefix: String,
}

impl DirsCommand {
    pub async fn run(&self, repo: &Repository) -> Result<()> {
        for dir in repo.list_top_level_dirs(&self.prefix).await? {
            println!("{dir}");
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct ExistsCommand {
    #[arg(help = "Logical object name")]
    name: String,
}

impl ExistsCommand {
    pub async fn run(&self, repo: &Repository) -> Result<()> {
        if !repo.exists(&self.name).await? {
            bail!("{} does not exist (looked for {})", self.name, repo.encode_path(&self.name));
        }
        println!("{}", repo.encode_path(&self.name));
        Ok(())
    }
}
