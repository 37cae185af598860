//! Installed libraries.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::core::properties::PropertyMap;
use crate::util::fs::{find_files, list_dirs};

/// Extensions compiled as translation units.
pub const SOURCE_EXTENSIONS: &[&str] = &["c", "cpp", "S"];

/// Extensions treated as headers.
pub const HEADER_EXTENSIONS: &[&str] = &["h", "hpp", "hh"];

/// Where a library was installed.
///
/// Variants are declared from highest to lowest priority, so the derived
/// `Ord` sorts the preferred location first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryLocation {
    /// `libraries/` inside the sketch folder
    Sketch,
    /// User library directories
    User,
    /// The target platform's `libraries/`
    Platform,
    /// The referenced (core-providing) platform's `libraries/`
    ReferencedPlatform,
    /// Libraries bundled with the toolchain
    BuiltIn,
}

impl fmt::Display for LibraryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LibraryLocation::Sketch => "sketch",
            LibraryLocation::User => "user",
            LibraryLocation::Platform => "platform",
            LibraryLocation::ReferencedPlatform => "referenced platform",
            LibraryLocation::BuiltIn => "built-in",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryLayout {
    /// Sources at the root, plus an optional `utility/` folder.
    Flat,
    /// Sources under `src/`, compiled recursively.
    Recursive,
}

#[derive(Debug, Clone)]
pub struct Library {
    pub name: String,
    pub install_dir: PathBuf,
    pub location: LibraryLocation,
    pub layout: LibraryLayout,
    pub architectures: Vec<String>,
    pub version: Option<String>,
    /// Header file names found at the top of the source dir.
    pub headers: Vec<String>,
    pub properties: PropertyMap,
}

impl Library {
    pub fn load(dir: &Path, location: LibraryLocation) -> Result<Self> {
        let properties = PropertyMap::load_if_exists(&dir.join("library.properties"))?;

        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = properties
            .get("name")
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or(dir_name);

        let layout = if dir.join("src").is_dir() {
            LibraryLayout::Recursive
        } else {
            LibraryLayout::Flat
        };

        let architectures = match properties.get("architectures") {
            Some(list) if !list.trim().is_empty() => list
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            _ => vec!["*".to_string()],
        };

        let mut library = Library {
            name,
            install_dir: dir.to_path_buf(),
            location,
            layout,
            architectures,
            version: properties.get("version").map(str::to_string),
            headers: Vec::new(),
            properties,
        };
        library.headers = find_files(&library.source_dir(), HEADER_EXTENSIONS, false)
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();

        Ok(library)
    }

    pub fn source_dir(&self) -> PathBuf {
        match self.layout {
            LibraryLayout::Recursive => self.install_dir.join("src"),
            LibraryLayout::Flat => self.install_dir.clone(),
        }
    }

    /// `utility/` of a flat library, when present.
    pub fn utility_dir(&self) -> Option<PathBuf> {
        let dir = self.install_dir.join("utility");
        (self.layout == LibraryLayout::Flat && dir.is_dir()).then_some(dir)
    }

    /// Whether `header` can be included directly from this library.
    pub fn provides(&self, header: &str) -> bool {
        self.headers.iter().any(|h| h == header) || self.source_dir().join(header).is_file()
    }

    pub fn supports_architecture(&self, arch: &str) -> bool {
        self.architectures
            .iter()
            .any(|a| a == "*" || a.eq_ignore_ascii_case(arch))
    }

    /// Translation units belonging to this library, sorted.
    pub fn source_files(&self) -> Vec<PathBuf> {
        match self.layout {
            LibraryLayout::Recursive => find_files(&self.source_dir(), SOURCE_EXTENSIONS, true),
            LibraryLayout::Flat => {
                let mut files = find_files(&self.install_dir, SOURCE_EXTENSIONS, false);
                if let Some(utility) = self.utility_dir() {
                    files.extend(find_files(&utility, SOURCE_EXTENSIONS, true));
                }
                files
            }
        }
    }
}

fn looks_like_library(dir: &Path) -> bool {
    dir.join("library.properties").is_file()
        || dir.join("src").is_dir()
        || !find_files(dir, HEADER_EXTENSIONS, false).is_empty()
}

/// Load every library directly under `root`.
pub fn scan_libraries(root: &Path, location: LibraryLocation) -> Result<Vec<Library>> {
    let mut libraries = Vec::new();
    for dir in list_dirs(root)? {
        if looks_like_library(&dir) {
            libraries.push(Library::load(&dir, location)?);
        } else {
            tracing::trace!("ignoring {}: not a library", dir.display());
        }
    }
    Ok(libraries)
}
