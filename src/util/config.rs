//! Configuration file support for Kiln.
//!
//! Kiln reads two configuration files:
//! - Global: `~/.kiln/config.toml` - user-wide defaults
//! - Project: `.kiln/config.toml` - sketch-specific overrides
//!
//! Project config takes precedence over global config.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Kiln configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Search paths for platforms, tools and libraries
    pub directories: DirectoriesConfig,

    /// Build settings
    pub build: BuildConfig,
}

/// Search path configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DirectoriesConfig {
    /// Data directory holding installed packages (`<data>/packages`)
    pub data: Option<PathBuf>,

    /// User (sketchbook) directory; `<user>/libraries` and `<user>/hardware` are searched
    pub user: Option<PathBuf>,

    /// Extra hardware directories, searched after the data and user ones
    pub hardware: Vec<PathBuf>,

    /// Built-in tool directories
    pub builtin_tools: Vec<PathBuf>,

    /// Built-in libraries directory (lowest library priority)
    pub builtin_libraries: Option<PathBuf>,

    /// Extra user library directories
    pub libraries: Vec<PathBuf>,
}

/// Build-related configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    /// Number of parallel compile jobs (unset or <= 0 = available parallelism)
    pub jobs: Option<i32>,

    /// Compiler warning level: none, default, more, all
    pub warnings: Option<String>,

    /// Upper bound on library detection probes
    pub max_resolution_iterations: Option<usize>,

    /// Extra `key=value` build properties applied to every build
    pub build_properties: Vec<String>,

    /// Fixed build directory; defaults to a per-sketch cache directory
    pub build_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }

    /// Load configuration, falling back to defaults if the file is missing or broken.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        let dirs = other.directories;
        if dirs.data.is_some() {
            self.directories.data = dirs.data;
        }
        if dirs.user.is_some() {
            self.directories.user = dirs.user;
        }
        if !dirs.hardware.is_empty() {
            self.directories.hardware = dirs.hardware;
        }
        if !dirs.builtin_tools.is_empty() {
            self.directories.builtin_tools = dirs.builtin_tools;
        }
        if dirs.builtin_libraries.is_some() {
            self.directories.builtin_libraries = dirs.builtin_libraries;
        }
        if !dirs.libraries.is_empty() {
            self.directories.libraries = dirs.libraries;
        }

        let build = other.build;
        if build.jobs.is_some() {
            self.build.jobs = build.jobs;
        }
        if build.warnings.is_some() {
            self.build.warnings = build.warnings;
        }
        if build.max_resolution_iterations.is_some() {
            self.build.max_resolution_iterations = build.max_resolution_iterations;
        }
        if !build.build_properties.is_empty() {
            self.build.build_properties = build.build_properties;
        }
        if build.build_path.is_some() {
            self.build.build_path = build.build_path;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (.kiln/config.toml)
/// 2. Global config (~/.kiln/config.toml)
/// 3. Defaults
pub fn load_config(global_path: &Path, project_path: &Path) -> Config {
    let mut config = Config::load_or_default(global_path);
    if project_path.exists() {
        config.merge(Config::load_or_default(project_path));
    }
    config
}
