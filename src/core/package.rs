//! Installed hardware packages, platforms, boards and tools.
//!
//! A [`PackageIndex`] is built by scanning hardware directories. Two
//! layouts are recognised:
//!
//! - packaged: `<dir>/<packager>/hardware/<arch>/<version>/` with tools in
//!   `<dir>/<packager>/tools/<tool>/<version>/`
//! - legacy: `<dir>/<packager>/<arch>/`, indexed as version `0.0.0`
//!
//! Built-in tool directories hold `<dir>/<tool>/<version>/` and are indexed
//! under the [`BUILTIN_PACKAGER`] name.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use semver::Version;
use serde::Deserialize;

use crate::core::properties::PropertyMap;
use crate::util::fs::list_dirs;

/// Packager name used for tools found in built-in tool directories.
pub const BUILTIN_PACKAGER: &str = "builtin";

/// A board declared in `boards.txt`.
#[derive(Debug, Clone)]
pub struct Board {
    pub id: String,
    /// All properties under `<id>.`, prefix stripped.
    pub properties: PropertyMap,
}

impl Board {
    pub fn name(&self) -> &str {
        self.properties.get("name").unwrap_or(&self.id)
    }

    /// Properties that do not belong to a menu.
    pub fn base_properties(&self) -> PropertyMap {
        self.properties
            .iter()
            .filter(|(k, _)| !k.starts_with("menu."))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Menu ids this board defines options for, in declaration order.
    pub fn menu_ids(&self) -> Vec<String> {
        self.properties.sub_tree("menu").first_level_keys()
    }

    /// Option values for `menu`, in declaration order.
    pub fn menu_values(&self, menu: &str) -> Vec<String> {
        self.properties
            .sub_tree(&format!("menu.{}", menu))
            .first_level_keys()
    }

    /// Properties contributed by selecting `value` in `menu`.
    pub fn menu_value_properties(&self, menu: &str, value: &str) -> PropertyMap {
        self.properties.sub_tree(&format!("menu.{}.{}", menu, value))
    }
}

/// A programmer declared in `programmers.txt`.
#[derive(Debug, Clone)]
pub struct Programmer {
    pub id: String,
    pub properties: PropertyMap,
}

impl Programmer {
    pub fn name(&self) -> &str {
        self.properties.get("name").unwrap_or(&self.id)
    }
}

/// A tool a platform release depends on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolDependency {
    pub packager: String,
    pub name: String,
    pub version: String,
}

/// One installed version of a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRelease {
    pub packager: String,
    pub name: String,
    pub version: String,
    pub install_dir: PathBuf,
}

/// One installed version of a platform.
#[derive(Debug, Clone)]
pub struct PlatformRelease {
    pub packager: String,
    pub architecture: String,
    pub version: Version,
    pub install_dir: PathBuf,
    /// `platform.txt` overlaid with `platform.local.txt`.
    pub properties: PropertyMap,
    pub boards: IndexMap<String, Board>,
    pub programmers: IndexMap<String, Programmer>,
    /// Menu labels from `boards.txt` (`menu.<id>=<label>`).
    pub menus: PropertyMap,
    /// Tool dependencies from `installed.json`, if present.
    pub tool_dependencies: Option<Vec<ToolDependency>>,
}

impl PlatformRelease {
    /// Load a platform release from its install directory.
    pub fn load(packager: &str, architecture: &str, version: Version, dir: &Path) -> Result<Self> {
        let mut properties = PropertyMap::load_if_exists(&dir.join("platform.txt"))?;
        properties.merge(&PropertyMap::load_if_exists(&dir.join("platform.local.txt"))?);

        let mut boards_txt = PropertyMap::load_if_exists(&dir.join("boards.txt"))?;
        boards_txt.merge(&PropertyMap::load_if_exists(&dir.join("boards.local.txt"))?);

        let menus = boards_txt.sub_tree("menu");
        let mut boards = IndexMap::new();
        for id in boards_txt.first_level_keys() {
            if id == "menu" {
                continue;
            }
            let board = Board {
                properties: boards_txt.sub_tree(&id),
                id: id.clone(),
            };
            boards.insert(id, board);
        }

        let programmers_txt = PropertyMap::load_if_exists(&dir.join("programmers.txt"))?;
        let programmers = programmers_txt
            .first_level_keys()
            .into_iter()
            .map(|id| {
                let programmer = Programmer {
                    properties: programmers_txt.sub_tree(&id),
                    id: id.clone(),
                };
                (id, programmer)
            })
            .collect();

        let tool_dependencies = load_installed_json(&dir.join("installed.json"), packager, architecture)?;

        Ok(PlatformRelease {
            packager: packager.to_string(),
            architecture: architecture.to_string(),
            version,
            install_dir: dir.to_path_buf(),
            properties,
            boards,
            programmers,
            menus,
            tool_dependencies,
        })
    }

    /// `packager:arch@version`
    pub fn id(&self) -> String {
        format!("{}:{}@{}", self.packager, self.architecture, self.version)
    }

    /// The `hardware` directory this release lives in (the arch dir's parent).
    pub fn hardware_dir(&self) -> PathBuf {
        self.install_dir
            .ancestors()
            .find(|p| p.file_name().is_some_and(|n| n == self.architecture.as_str()))
            .and_then(Path::parent)
            .unwrap_or(self.install_dir.as_path())
            .to_path_buf()
    }
}

#[derive(Debug, Deserialize)]
struct InstalledJson {
    #[serde(default)]
    packages: Vec<InstalledPackage>,
}

#[derive(Debug, Deserialize)]
struct InstalledPackage {
    name: String,
    #[serde(default)]
    platforms: Vec<InstalledPlatform>,
}

#[derive(Debug, Deserialize)]
struct InstalledPlatform {
    architecture: String,
    #[serde(default, rename = "toolsDependencies")]
    tools_dependencies: Vec<ToolDependency>,
}

fn load_installed_json(
    path: &Path,
    packager: &str,
    architecture: &str,
) -> Result<Option<Vec<ToolDependency>>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let installed: InstalledJson = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    Ok(installed
        .packages
        .into_iter()
        .filter(|p| p.name == packager)
        .flat_map(|p| p.platforms)
        .find(|p| p.architecture == architecture)
        .map(|p| p.tools_dependencies))
}

/// All installed releases of one architecture.
#[derive(Debug, Clone, Default)]
pub struct Platform {
    pub architecture: String,
    pub releases: BTreeMap<Version, PlatformRelease>,
}

impl Platform {
    /// The greatest installed release.
    pub fn installed_release(&self) -> Option<&PlatformRelease> {
        self.releases.values().next_back()
    }
}

/// A packager and everything it ships.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub name: String,
    pub platforms: IndexMap<String, Platform>,
    /// Tool releases by tool name, in discovery order.
    pub tools: IndexMap<String, Vec<ToolRelease>>,
}

impl Package {
    fn new(name: &str) -> Self {
        Package {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// The platform for `arch`, if any release is installed.
    pub fn platform(&self, arch: &str) -> Option<&Platform> {
        self.platforms.get(arch).filter(|p| !p.releases.is_empty())
    }

    /// A specific tool release.
    pub fn tool(&self, name: &str, version: &str) -> Option<&ToolRelease> {
        self.tools
            .get(name)
            .and_then(|releases| releases.iter().find(|t| t.version == version))
    }

    /// The latest installed release of every tool, by tool name.
    pub fn latest_tools(&self) -> Vec<&ToolRelease> {
        self.tools
            .values()
            .filter_map(|releases| releases.iter().max_by(|a, b| compare_versions(&a.version, &b.version)))
            .collect()
    }

    fn add_release(&mut self, release: PlatformRelease) {
        let platform = self
            .platforms
            .entry(release.architecture.clone())
            .or_insert_with(|| Platform {
                architecture: release.architecture.clone(),
                releases: BTreeMap::new(),
            });
        // Earlier hardware directories take precedence.
        platform.releases.entry(release.version.clone()).or_insert(release);
    }

    fn add_tool(&mut self, tool: ToolRelease) {
        let releases = self.tools.entry(tool.name.clone()).or_default();
        if !releases.iter().any(|t| t.version == tool.version) {
            releases.push(tool);
        }
    }
}

/// Compare tool versions, semver-aware when both parse.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (Version::parse(a), Version::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

/// Every installed package found in the search path.
#[derive(Debug, Clone, Default)]
pub struct PackageIndex {
    packages: IndexMap<String, Package>,
}

impl PackageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan hardware and built-in tool directories.
    pub fn load(hardware_dirs: &[PathBuf], builtin_tools_dirs: &[PathBuf]) -> Result<Self> {
        let mut index = PackageIndex::new();
        for dir in hardware_dirs {
            index.scan_hardware_dir(dir)?;
        }
        for dir in builtin_tools_dirs {
            index.scan_tools_dir(BUILTIN_PACKAGER, dir)?;
        }
        tracing::debug!(
            "indexed {} packages from {} hardware dirs",
            index.packages.len(),
            hardware_dirs.len()
        );
        Ok(index)
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    fn package_mut(&mut self, name: &str) -> &mut Package {
        self.packages
            .entry(name.to_string())
            .or_insert_with(|| Package::new(name))
    }

    fn scan_hardware_dir(&mut self, dir: &Path) -> Result<()> {
        for packager_dir in list_dirs(dir)? {
            let Some(packager) = dir_name(&packager_dir) else {
                continue;
            };
            if packager == "tools" {
                continue;
            }

            let hardware = packager_dir.join("hardware");
            if hardware.is_dir() {
                for arch_dir in list_dirs(&hardware)? {
                    let Some(arch) = dir_name(&arch_dir) else {
                        continue;
                    };
                    for version_dir in list_dirs(&arch_dir)? {
                        let Some(raw) = dir_name(&version_dir) else {
                            continue;
                        };
                        let Ok(version) = Version::parse(&raw) else {
                            tracing::warn!(
                                "skipping {}: `{}` is not a valid version",
                                version_dir.display(),
                                raw
                            );
                            continue;
                        };
                        if !is_platform_dir(&version_dir) {
                            continue;
                        }
                        let release = PlatformRelease::load(&packager, &arch, version, &version_dir)?;
                        self.package_mut(&packager).add_release(release);
                    }
                }
                self.scan_tools_dir(&packager, &packager_dir.join("tools"))?;
            } else {
                for arch_dir in list_dirs(&packager_dir)? {
                    let Some(arch) = dir_name(&arch_dir) else {
                        continue;
                    };
                    if !is_platform_dir(&arch_dir) {
                        continue;
                    }
                    let release =
                        PlatformRelease::load(&packager, &arch, Version::new(0, 0, 0), &arch_dir)?;
                    self.package_mut(&packager).add_release(release);
                }
            }
        }
        Ok(())
    }

    fn scan_tools_dir(&mut self, packager: &str, dir: &Path) -> Result<()> {
        for tool_dir in list_dirs(dir)? {
            let Some(name) = dir_name(&tool_dir) else {
                continue;
            };
            for version_dir in list_dirs(&tool_dir)? {
                let Some(version) = dir_name(&version_dir) else {
                    continue;
                };
                self.package_mut(packager).add_tool(ToolRelease {
                    packager: packager.to_string(),
                    name: name.clone(),
                    version,
                    install_dir: version_dir,
                });
            }
        }
        Ok(())
    }
}

fn dir_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(str::to_string)
}

fn is_platform_dir(dir: &Path) -> bool {
    dir.join("boards.txt").exists() || dir.join("platform.txt").exists()
}
