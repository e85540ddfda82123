use crate::baseline::validate_document_id;
use crate::classify::ForceMode;
use crate::error::{Result, SyncError};
use crate::local::DEFAULT_MAX_FILE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "pagesync.toml";
const DEFAULT_MAX_NODES: usize = 1000;

/// Top-level configuration, usually read from `pagesync.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_baseline_dir")]
    pub baseline_dir: PathBuf,

    /// Staging area for batch writes. Defaults to a hidden directory inside each tree's root.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// JSON snapshot used as the remote store by the CLI.
    #[serde(default)]
    pub remote_snapshot: Option<PathBuf>,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default, rename = "tree")]
    pub trees: Vec<TreeConfig>,
}

/// One anchored subtree mapped onto one local directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeConfig {
    pub anchor_id: String,
    pub space_key: String,
    pub local_root: PathBuf,

    /// Remote ids whose subtrees are never synced.
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,

    #[serde(default)]
    pub force_pull: bool,

    #[serde(default)]
    pub force_push: bool,
}

fn default_baseline_dir() -> PathBuf {
    PathBuf::from(".pagesync/baseline")
}

fn default_state_file() -> PathBuf {
    PathBuf::from(".pagesync/state.json")
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_max_nodes() -> usize {
    DEFAULT_MAX_NODES
}

impl TreeConfig {
    pub fn force_mode(&self) -> ForceMode {
        ForceMode::from_flags(self.force_pull, self.force_push)
    }

    pub fn staging_dir(&self, config: &Config) -> PathBuf {
        match &config.staging_dir {
            Some(dir) => dir.join(&self.anchor_id),
            None => self.local_root.join(".pagesync-staging"),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let mut config: Self = toml::from_str(&text)
            .map_err(|e| SyncError::Config(format!("Invalid config {}: {}", path.display(), e)))?;

        // Relative paths are relative to the config file.
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.baseline_dir);
        resolve(&mut self.state_file);
        if let Some(dir) = self.staging_dir.as_mut() {
            resolve(dir);
        }
        if let Some(snapshot) = self.remote_snapshot.as_mut() {
            resolve(snapshot);
        }
        for tree in &mut self.trees {
            resolve(&mut tree.local_root);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(SyncError::Config("No [[tree]] entries configured".to_string()));
        }
        if self.max_file_size == 0 {
            return Err(SyncError::Config("max_file_size must be greater than 0".to_string()));
        }

        for tree in &self.trees {
            validate_document_id(&tree.anchor_id)
                .map_err(|_| SyncError::Config(format!("Invalid anchor_id {:?}", tree.anchor_id)))?;
            if tree.force_pull && tree.force_push {
                return Err(SyncError::Config(format!(
                    "force_pull and force_push are mutually exclusive (tree {})",
                    tree.anchor_id
                )));
            }
            if tree.max_nodes == 0 {
                return Err(SyncError::Config(format!(
                    "max_nodes must be greater than 0 (tree {})",
                    tree.anchor_id
                )));
            }
            for id in &tree.exclude {
                validate_document_id(id)
                    .map_err(|_| SyncError::Config(format!("Invalid exclude id {:?}", id)))?;
            }
        }
        Ok(())
    }

    /// Apply a command-line force flag to every tree.
    pub fn override_force(&mut self, force: ForceMode) {
        if force == ForceMode::None {
            return;
        }
        for tree in &mut self.trees {
            tree.force_pull = force == ForceMode::Pull;
            tree.force_push = force == ForceMode::Push;
        }
    }
}
