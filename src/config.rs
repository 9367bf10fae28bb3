use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Pre-flight configuration errors. These are fatal: a run never starts with
/// an invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("github.account is required")]
    MissingAccount,
    #[error("storage.targets is empty; configure at least one replication target")]
    NoTargets,
    #[error("storage.namespace must not be empty or contain path separators: {0:?}")]
    InvalidNamespace(String),
}

/// Main configuration structure for RepoVault
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// GitHub account and discovery settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Master store, scratch space, and replication targets
    #[serde(default)]
    pub storage: StorageConfig,

    /// Backup run behavior settings
    #[serde(default)]
    pub run: RunConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Account whose repositories are backed up
    #[serde(default)]
    pub account: String,

    /// API token; falls back to the GITHUB_TOKEN environment variable.
    /// Unauthenticated requests work but have a lower rate ceiling.
    pub token: Option<String>,

    /// Hosting API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Repository exclusion patterns (simple globs)
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Include forked repositories
    #[serde(default)]
    pub include_forks: bool,
}

/// Storage layout configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Master store of bare mirrors; persists across runs and is never
    /// removed by the tool
    #[serde(default = "default_master_root")]
    pub master_root: String,

    /// Scratch space for working-tree checkouts; fully removed at the end
    /// of every run
    #[serde(default = "default_scratch_root")]
    pub scratch_root: String,

    /// Mount paths of replication targets (removable drives)
    #[serde(default)]
    pub targets: Vec<String>,

    /// Also replicate a checked-out working tree alongside each mirror
    #[serde(default)]
    pub working_copies: bool,

    /// Subdirectory created under each target root
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// Run behavior configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RunConfig {
    /// Timeout for network-bound git operations in seconds
    #[serde(default = "default_network_timeout")]
    pub network_timeout: u64,

    /// Run-lock marker path
    #[serde(default = "default_lock_file")]
    pub lock_file: String,
}

// Default value functions
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_master_root() -> String {
    "${HOME}/.local/share/repovault/mirrors".to_string()
}
fn default_scratch_root() -> String {
    "${HOME}/.cache/repovault/scratch".to_string()
}
fn default_namespace() -> String {
    "repovault".to_string()
}
fn default_network_timeout() -> u64 {
    300
}
fn default_lock_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/repovault.lock", runtime_dir)
    } else {
        "/tmp/repovault.lock".to_string()
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            token: None,
            api_url: default_api_url(),
            exclude_patterns: Vec::new(),
            include_forks: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            master_root: default_master_root(),
            scratch_root: default_scratch_root(),
            targets: Vec::new(),
            working_copies: false,
            namespace: default_namespace(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            network_timeout: default_network_timeout(),
            lock_file: default_lock_file(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github: GitHubConfig::default(),
            storage: StorageConfig::default(),
            run: RunConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("repovault").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.storage.master_root = shellexpand::full(&self.storage.master_root)
            .context("Failed to expand master_root path")?
            .into_owned();

        self.storage.scratch_root = shellexpand::full(&self.storage.scratch_root)
            .context("Failed to expand scratch_root path")?
            .into_owned();

        self.run.lock_file = shellexpand::full(&self.run.lock_file)
            .context("Failed to expand lock_file path")?
            .into_owned();

        for target in &mut self.storage.targets {
            *target = shellexpand::full(target)
                .context("Failed to expand target path")?
                .into_owned();
        }

        Ok(())
    }

    /// Pre-flight validation of the loaded configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.github.account.trim().is_empty() {
            return Err(ConfigError::MissingAccount);
        }
        if self.storage.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if self.storage.namespace.is_empty() || self.storage.namespace.contains('/') {
            return Err(ConfigError::InvalidNamespace(self.storage.namespace.clone()));
        }
        Ok(())
    }

    /// Resolve the API credential: config value first, then GITHUB_TOKEN
    pub fn resolve_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }

    pub fn master_root(&self) -> PathBuf {
        PathBuf::from(&self.storage.master_root)
    }

    pub fn scratch_root(&self) -> PathBuf {
        PathBuf::from(&self.storage.scratch_root)
    }

    pub fn target_paths(&self) -> Vec<PathBuf> {
        self.storage.targets.iter().map(PathBuf::from).collect()
    }
}
