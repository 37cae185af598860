//! Sketch discovery and preparation.
//!
//! All `.ino`/`.pde` files are merged into a single `<Main>.ino.cpp` in the
//! build directory; other sources and headers are copied alongside it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::library::{HEADER_EXTENSIONS, SOURCE_EXTENSIONS};
use crate::errors::{BuildError, BuildResult};
use crate::util::fs::{find_files, has_extension, relative_path, write_if_changed};

const SKETCH_EXTENSIONS: &[&str] = &["ino", "pde"];

/// Header prepended to the merged sketch.
const MERGED_PRELUDE: &str = "#include <Arduino.h>\n";

/// Source text replacing on-disk content, keyed by path relative to the sketch root.
pub type SourceOverrides = HashMap<PathBuf, String>;

#[derive(Debug, Clone)]
pub struct Sketch {
    pub name: String,
    pub root: PathBuf,
    pub main_file: PathBuf,
    /// Other `.ino`/`.pde` files, sorted.
    pub other_sketch_files: Vec<PathBuf>,
    /// Sources and headers at the root and under `src/`, sorted.
    pub additional_files: Vec<PathBuf>,
}

impl Sketch {
    /// Load a sketch from its folder or its main file.
    pub fn load(path: &Path) -> BuildResult<Self> {
        let not_found = |reason: &str| BuildError::SketchNotFound {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let root = if path.is_file() {
            path.parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| not_found("file has no parent directory"))?
        } else if path.is_dir() {
            path.to_path_buf()
        } else {
            return Err(not_found("path does not exist"));
        };

        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| not_found("cannot determine sketch name"))?;

        let main_file = SKETCH_EXTENSIONS
            .iter()
            .map(|ext| root.join(format!("{}.{}", name, ext)))
            .find(|p| p.is_file())
            .ok_or_else(|| not_found(&format!("missing main file {}.ino", name)))?;

        let other_sketch_files = find_files(&root, SKETCH_EXTENSIONS, false)
            .into_iter()
            .filter(|p| *p != main_file)
            .collect();

        let extensions: Vec<&str> = SOURCE_EXTENSIONS
            .iter()
            .chain(HEADER_EXTENSIONS)
            .copied()
            .collect();
        let mut additional_files = find_files(&root, &extensions, false);
        additional_files.extend(find_files(&root.join("src"), &extensions, true));
        additional_files.sort();

        Ok(Sketch {
            name,
            root,
            main_file,
            other_sketch_files,
            additional_files,
        })
    }

    /// Sketch-local library folder.
    pub fn libraries_dir(&self) -> PathBuf {
        self.root.join("libraries")
    }

    /// Name of the merged translation unit, e.g. `Blink.ino.cpp`.
    pub fn merged_file_name(&self) -> String {
        let main = self
            .main_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.ino", self.name));
        format!("{}.cpp", main)
    }

    /// Additional files relative to the sketch root, as recorded in build options.
    pub fn additional_files_relative(&self) -> Vec<String> {
        self.additional_files
            .iter()
            .map(|p| relative_path(&self.root, p).to_string_lossy().replace('\\', "/"))
            .collect()
    }

    fn read_source(&self, path: &Path, overrides: &SourceOverrides) -> BuildResult<String> {
        let rel = relative_path(&self.root, path);
        if let Some(content) = overrides.get(&rel) {
            return Ok(content.clone());
        }
        Ok(crate::util::fs::read_to_string(path)?)
    }

    /// Concatenate all sketch files with `#line` markers.
    pub fn merged_source(&self, overrides: &SourceOverrides) -> BuildResult<String> {
        let mut merged = String::from(MERGED_PRELUDE);
        for file in std::iter::once(&self.main_file).chain(&self.other_sketch_files) {
            let content = self.read_source(file, overrides)?;
            merged.push_str(&line_directive(file));
            merged.push_str(&content);
            if !content.ends_with('\n') {
                merged.push('\n');
            }
        }
        Ok(merged)
    }

    /// Write the merged sketch and copy additional files into `sketch_build_path`.
    ///
    /// Files are only rewritten when their content changed, so timestamps of
    /// untouched sources survive for incremental builds. Returns the
    /// translation units: the merged file first, then the rest sorted.
    pub fn prepare(
        &self,
        sketch_build_path: &Path,
        overrides: &SourceOverrides,
    ) -> BuildResult<Vec<PathBuf>> {
        let merged_path = sketch_build_path.join(self.merged_file_name());
        if write_if_changed(&merged_path, self.merged_source(overrides)?.as_bytes())? {
            tracing::debug!("wrote {}", merged_path.display());
        }

        let mut sources = Vec::new();
        for file in &self.additional_files {
            let rel = relative_path(&self.root, file);
            let dest = sketch_build_path.join(&rel);
            let content = self.read_source(file, overrides)?;
            write_if_changed(&dest, content.as_bytes())?;
            if has_extension(&dest, SOURCE_EXTENSIONS) {
                sources.push(dest);
            }
        }
        sources.sort();

        let mut units = vec![merged_path];
        units.extend(sources);
        Ok(units)
    }
}

fn line_directive(path: &Path) -> String {
    let escaped = path
        .to_string_lossy()
        .replace('\\', "\\\\")
        .replace('"', "\\\"");
    format!("#line 1 \"{}\"\n", escaped)
}
