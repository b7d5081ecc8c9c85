// src/config.rs

//! Client configuration
//!
//! Loaded from a TOML file (default `/etc/entropy/client.toml`):
//!
//! ```toml
//! installed = "/var/lib/entropy/client/database/installed.db"
//! system_mask = ["sys-apps/baselayout", "sys-libs/glibc"]
//! elf_needed_scanning = true
//!
//! [[repositories]]
//! name = "sabayonlinux.org"
//! database = "/var/lib/entropy/client/database/sabayonlinux.org.db"
//! ```

use crate::atom::Atom;
use crate::error::Result;
use crate::repository::{INSTALLED_REPOSITORY_ID, RepositorySet, SqliteRepository};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/entropy/client.toml";

/// Default Installed Packages Repository location
pub const DEFAULT_INSTALLED_DB: &str = "/var/lib/entropy/client/database/installed.db";

/// An available repository
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositoryConfig {
    /// Repository identifier
    pub name: String,
    /// Path of the repository's SQLite database
    pub database: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    /// Path of the Installed Packages Repository database
    pub installed: PathBuf,
    /// Atoms protected from removal
    pub system_mask: Vec<String>,
    /// Default for library based reverse dependency scanning
    pub elf_needed_scanning: bool,
    /// Available repositories, in priority order
    pub repositories: Vec<RepositoryConfig>,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            installed: PathBuf::from(DEFAULT_INSTALLED_DB),
            system_mask: Vec::new(),
            elf_needed_scanning: true,
            repositories: Vec::new(),
        }
    }
}

impl EntropyConfig {
    /// Load configuration from `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Parsed system mask atoms
    pub fn system_mask_atoms(&self) -> Result<Vec<Atom>> {
        self.system_mask.iter().map(|atom| Atom::parse(atom)).collect()
    }

    /// Open every configured repository
    pub fn open_repositories(&self) -> Result<RepositorySet> {
        let installed = SqliteRepository::open(INSTALLED_REPOSITORY_ID, &path_str(&self.installed))?;
        let mut set = RepositorySet::new(Box::new(installed));

        for repository in &self.repositories {
            info!("Opening repository {}", repository.name);
            let repo = SqliteRepository::open(&repository.name, &path_str(&repository.database))?;
            set.add_repository(Box::new(repo));
        }
        Ok(set)
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EntropyConfig::parse("").unwrap();
        assert_eq!(config, EntropyConfig::default());
        assert!(config.elf_needed_scanning);
        assert_eq!(config.installed, PathBuf::from(DEFAULT_INSTALLED_DB));
    }

    #[test]
    fn test_parse_full() {
        let config = EntropyConfig::parse(
            r#"
            installed = "/tmp/installed.db"
            system_mask = ["sys-apps/baselayout", ">=sys-libs/glibc-2.38"]
            elf_needed_scanning = false

            [[repositories]]
            name = "main"
            database = "/tmp/main.db"

            [[repositories]]
            name = "limbo"
            database = "/tmp/limbo.db"
            "#,
        )
        .unwrap();

        assert!(!config.elf_needed_scanning);
        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.repositories[1].name, "limbo");
        assert_eq!(config.system_mask_atoms().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_toml() {
        let err = EntropyConfig::parse("installed = [").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = EntropyConfig::load_or_default(dir.path().join("client.toml")).unwrap();
        assert_eq!(config, EntropyConfig::default());
    }

    #[test]
    fn test_open_repositories() {
        let dir = TempDir::new().unwrap();
        let installed = dir.path().join("installed.db");
        let main = dir.path().join("main.db");
        crate::db::init(&path_str(&installed)).unwrap();
        crate::db::init(&path_str(&main)).unwrap();

        let config_path = dir.path().join("client.toml");
        std::fs::write(
            &config_path,
            format!(
                "installed = {:?}\n[[repositories]]\nname = \"main\"\ndatabase = {:?}\n",
                installed.display().to_string(),
                main.display().to_string()
            ),
        )
        .unwrap();

        let set = EntropyConfig::load(&config_path).unwrap().open_repositories().unwrap();
        assert!(set.get("main").is_some());
        assert_eq!(set.installed().repository_id(), INSTALLED_REPOSITORY_ID);
    }
}
