//! TOML configuration.
//!
//! One [`Config`] is loaded at startup and passed by reference (or `Arc`)
//! to everything that needs it. There is no global configuration object.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub labeling: LabelingConfig,
    #[serde(default)]
    pub vectors: VectorConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelingConfig {
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

impl LabelingConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

/// Upper bound on the lease window: one year.
pub const MAX_LOCK_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

fn default_lock_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_dims")]
    pub dims: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dims: default_dims(),
        }
    }
}

fn default_dims() -> usize {
    1280
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Permanent home of uploaded images.
    pub images_dir: PathBuf,
    /// Parent of the per-upload extraction directories.
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImagesConfig {
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
        }
    }
}

fn default_extension() -> String {
    "stp.png".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

fn default_max_upload_mb() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_user")]
    pub default_user: String,
    #[serde(default = "default_groups")]
    pub default_groups: Vec<String>,
    #[serde(default = "default_user_header")]
    pub user_header: String,
    #[serde(default = "default_groups_header")]
    pub groups_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            default_user: default_user(),
            default_groups: default_groups(),
            user_header: default_user_header(),
            groups_header: default_groups_header(),
        }
    }
}

fn default_user() -> String {
    "default-user".to_string()
}
fn default_groups() -> Vec<String> {
    vec!["admin".to_string()]
}
fn default_user_header() -> String {
    "x-forwarded-user".to_string()
}
fn default_groups_header() -> String {
    "x-forwarded-groups".to_string()
}

impl Config {
    /// A complete configuration rooted at `root`, with defaults everywhere
    /// else. Used by tests and embedded setups.
    pub fn minimal(root: &Path) -> Self {
        Self {
            db: DbConfig {
                path: root.join("data").join("labelizer.sqlite"),
            },
            labeling: LabelingConfig::default(),
            vectors: VectorConfig::default(),
            storage: StorageConfig {
                images_dir: root.join("data").join("images"),
                scratch_dir: root.join("scratch"),
            },
            images: ImagesConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:8000".to_string(),
                max_upload_mb: default_max_upload_mb(),
            },
            auth: AuthConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.labeling.lock_timeout_secs == 0 {
            anyhow::bail!("labeling.lock_timeout_secs must be > 0");
        }
        if self.labeling.lock_timeout_secs > MAX_LOCK_TIMEOUT_SECS {
            anyhow::bail!(
                "labeling.lock_timeout_secs must be <= {} (got {})",
                MAX_LOCK_TIMEOUT_SECS,
                self.labeling.lock_timeout_secs
            );
        }
        if self.vectors.dims == 0 {
            anyhow::bail!("vectors.dims must be > 0");
        }
        let ext = self.images.extension.as_str();
        if ext.is_empty() || ext.starts_with('.') || ext.contains('/') {
            anyhow::bail!(
                "images.extension must be non-empty, without a leading dot or slash (got '{}')",
                ext
            );
        }
        if self.server.max_upload_mb == 0 {
            anyhow::bail!("server.max_upload_mb must be > 0");
        }
        if self.auth.user_header.trim().is_empty() || self.auth.groups_header.trim().is_empty() {
            anyhow::bail!("auth.user_header and auth.groups_header must not be empty");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
