//! `compile_commands.json` emission.
//!
//! Workers append entries concurrently while compiling (or, in a dry run,
//! while building the commands they would run). [`CompilationDatabase::save`]
//! merges them into any database already on disk, keyed by source path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::builder::toolchain::CommandSpec;
use crate::util::fs::write_atomic;

pub const COMPILE_COMMANDS_FILE: &str = "compile_commands.json";

/// compile_commands.json entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub directory: String,
    pub file: String,
    pub arguments: Vec<String>,
}

impl Command {
    pub fn new(directory: &Path, spec: &CommandSpec, source: &Path) -> Self {
        Command {
            directory: directory.display().to_string(),
            file: source.display().to_string(),
            arguments: spec.argv(),
        }
    }
}

/// Entries recorded during one build.
#[derive(Debug)]
pub struct CompilationDatabase {
    path: PathBuf,
    entries: Mutex<Vec<Command>>,
}

impl CompilationDatabase {
    pub fn new(path: PathBuf) -> Self {
        CompilationDatabase {
            path,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(&self, command: Command) {
        self.lock().push(command);
    }

    /// Snapshot of this build's entries, in the order they were added.
    pub fn entries(&self) -> Vec<Command> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Command>> {
        // A poisoned lock only means a worker panicked mid-push; the vector is still valid.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Merge with the existing file and write it.
    ///
    /// Entries from the existing file survive unless this build produced an
    /// entry for the same source; for duplicate sources the last entry wins.
    pub fn save(&self) -> Result<()> {
        let existing = load_existing(&self.path);
        let current = self.entries();

        let produced: HashSet<&str> = current.iter().map(|c| c.file.as_str()).collect();
        let mut merged: IndexMap<String, Command> = IndexMap::new();
        for command in existing.into_iter().filter(|c| !produced.contains(c.file.as_str())) {
            merged.insert(command.file.clone(), command);
        }
        for command in current {
            merged.insert(command.file.clone(), command);
        }

        let commands: Vec<Command> = merged.into_values().collect();
        let json = serde_json::to_string_pretty(&commands)?;
        write_atomic(&self.path, json.as_bytes())
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        tracing::debug!(
            "wrote {} entries to {}",
            commands.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn load_existing(path: &Path) -> Vec<Command> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_json::from_str(&text) {
        Ok(commands) => commands,
        Err(e) => {
            tracing::warn!("ignoring unreadable {}: {}", path.display(), e);
            Vec::new()
        }
    }
}
