use anyhow::{Context, Result, anyhow, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowage_backends::LocalStorage;
use stowage_core::storage::MemoryStorage;
use stowage_core::{Compressor, Crypter, Repository, Storage, compressor_by_name, crypter_by_name};

pub const CONFIG_FILE_NAME: &str = "stowage.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    #[default]
    Local,
    Sftp,
    S3,
}

/// Repository configuration (loaded from stowage.toml)
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the repository, e.g. /mnt/backups
    pub repo_path: PathBuf,
    pub repo_type: RepoType,
    /// "gzip", "zstd", or empty for none
    pub compressor: Option<String>,
    /// "aes-256-gcm", or empty for none
    pub encryptor: Option<String>,
    pub encryption_pass: Option<String>,
    pub fsync_on_write: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("repo_path", &self.repo_path)
            .field("repo_type", &self.repo_type)
            .field("compressor", &self.compressor)
            .field("encryptor", &self.encryptor)
            .field("encryption_pass", &self.encryption_pass.as_ref().map(|_| "<redacted>"))
            .field("fsync_on_write", &self.fsync_on_write)
            .finish()
    }
}

impl Config {
    /// Default config location, e.g. ~/.config/stowage/stowage.toml on Linux.
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("", "", "stowage")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("loading config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content, |name| std::env::var(name).ok());
        let config: Config = toml::from_str(&expanded).context("parsing config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.repo_path.as_os_str().is_empty() {
            bail!("repo_path is required");
        }
        if self.repo_type != RepoType::Local {
            bail!("repo_type {:?} is not supported, only local repositories are", self.repo_type);
        }
        if let Some(name) = self.compressor_name() {
            compressor_by_name(name)?;
        }
        if let Some(name) = self.encryptor_name() {
            if self.encryption_pass.as_deref().unwrap_or_default().is_empty() {
                bail!("encryption_pass is required when encryptor is {name}");
            }
            crypter_by_name(name, "")?;
        }
        Ok(())
    }

    pub fn compressor_name(&self) -> Option<&str> {
        configured(&self.compressor)
    }

    pub fn encryptor_name(&self) -> Option<&str> {
        configured(&self.encryptor)
    }

    /// Opens the configured repository. With `dry_run`, objects go to memory and are discarded.
    pub fn open_repository(&self, dry_run: bool) -> Result<Repository> {
        let storage: Arc<dyn Storage> = if dry_run {
            Arc::new(MemoryStorage::new())
        } else {
            Arc::new(LocalStorage::new(&self.repo_path, self.fsync_on_write)?)
        };

        let compressor: Option<Arc<dyn Compressor>> = match self.compressor_name() {
            Some(name) => Some(Arc::from(compressor_by_name(name)?)),
            None => None,
        };

        let crypter: Option<Arc<dyn Crypter>> = match self.encryptor_name() {
            Some(name) => {
                let password = self
                    .encryption_pass
                    .as_deref()
                    .ok_or_else(|| anyhow!("encryption_pass is required"))?;
                Some(Arc::from(crypter_by_name(name, password)?))
            }
            None => None,
        };

        Ok(Repository::new(storage, compressor, crypter))
    }
}

fn configured(value: &Option<String>) -> Option<&str> {
    match value.as_deref().map(str::trim) {
        None | Some("") | Some("none") => None,
        Some(name) => Some(name),
    }
}

/// Replaces every `${NAME}` with the value `lookup` returns for it, or nothing when unset.
fn expand_env_vars(content: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&lookup(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
