//! Global context for Kiln operations.
//!
//! Provides centralized access to configuration, paths, and environment.
//! The search paths that feed a [`BuildContext`](crate::builder::BuildContext)
//! are derived here from the merged [`Config`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::BaseDirs;

use crate::util::config::{load_config, Config};
use crate::util::hash::build_dir_digest;

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Home directory for global Kiln data (~/.kiln/)
    home: PathBuf,

    /// Merged global + project configuration
    config: Config,
}

impl GlobalContext {
    /// Create a new GlobalContext, loading global and project configuration.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;

        let home = match std::env::var_os("KILN_HOME") {
            Some(home) => PathBuf::from(home),
            None => BaseDirs::new()
                .map(|b| b.home_dir().join(".kiln"))
                .unwrap_or_else(|| PathBuf::from(".kiln")),
        };

        Ok(Self::with_paths(cwd, home))
    }

    /// Create a GlobalContext rooted at explicit directories.
    pub fn with_paths(cwd: PathBuf, home: PathBuf) -> Self {
        let config = load_config(
            &home.join("config.toml"),
            &cwd.join(".kiln").join("config.toml"),
        );
        GlobalContext { cwd, home, config }
    }

    /// Get the current working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Get the Kiln home directory (~/.kiln/).
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Get the merged configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a mutable reference to the configuration.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Get the global configuration file path.
    pub fn config_path(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    /// Directory holding installed packages, tools and indexes.
    pub fn data_dir(&self) -> PathBuf {
        self.config
            .directories
            .data
            .clone()
            .unwrap_or_else(|| self.home.join("data"))
    }

    /// User (sketchbook) directory.
    pub fn user_dir(&self) -> PathBuf {
        self.config
            .directories
            .user
            .clone()
            .unwrap_or_else(|| self.home.join("user"))
    }

    /// Get the global cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Hardware search path, in priority order.
    pub fn hardware_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.data_dir().join("packages"), self.user_dir().join("hardware")];
        dirs.extend(self.config.directories.hardware.iter().cloned());
        dirs
    }

    /// Built-in tools search path.
    pub fn builtin_tools_dirs(&self) -> Vec<PathBuf> {
        self.config.directories.builtin_tools.clone()
    }

    /// Built-in libraries directory, if configured.
    pub fn builtin_libraries_dir(&self) -> Option<PathBuf> {
        self.config.directories.builtin_libraries.clone()
    }

    /// User library roots: the sketchbook's `libraries` first, then configured extras.
    pub fn other_libraries_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.user_dir().join("libraries")];
        dirs.extend(self.config.directories.libraries.iter().cloned());
        dirs
    }

    /// Default build directory for a sketch: `<cache>/sketches/<digest of sketch path>`.
    pub fn default_build_path(&self, sketch_path: &Path) -> PathBuf {
        let key = sketch_path.to_string_lossy();
        self.cache_dir()
            .join("sketches")
            .join(build_dir_digest(&key))
    }
}
