//! FQBN resolution.
//!
//! Turns a board identifier into the concrete platform releases, the tool
//! set and the layered build properties a build needs. Resolution is pure
//! lookup over an already loaded [`PackageIndex`].

use std::path::PathBuf;

use crate::core::fqbn::Fqbn;
use crate::core::package::{
    compare_versions, Board, PackageIndex, PlatformRelease, Programmer, ToolRelease,
    BUILTIN_PACKAGER,
};
use crate::core::properties::{host_os_suffix, PropertyMap};
use crate::errors::{BuildError, BuildResult};

/// Value reported as `runtime.ide.version`.
pub const RUNTIME_IDE_VERSION: &str = "10607";

/// Everything resolved from an FQBN.
#[derive(Debug, Clone)]
pub struct ResolvedPlatform {
    pub fqbn: Fqbn,
    pub board: Board,
    pub target_package: String,
    pub target_platform: PlatformRelease,
    /// Platform providing the core; differs from the target when
    /// `build.core` references another vendor.
    pub actual_platform: PlatformRelease,
    pub required_tools: Vec<ToolRelease>,
    pub build_properties: PropertyMap,
}

impl ResolvedPlatform {
    /// Look up a programmer in the target, then the actual platform.
    pub fn programmer(&self, id: &str) -> BuildResult<&Programmer> {
        self.target_platform
            .programmers
            .get(id)
            .or_else(|| self.actual_platform.programmers.get(id))
            .ok_or_else(|| BuildError::ProgrammerNotFound {
                programmer: id.to_string(),
                fqbn: self.fqbn.to_string(),
            })
    }

    /// Files whose modification should invalidate previous builds.
    pub fn platform_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.actual_platform.install_dir.join("platform.txt")];
        if self.target_platform.install_dir != self.actual_platform.install_dir {
            files.push(self.target_platform.install_dir.join("platform.txt"));
        }
        files
    }
}

pub struct PlatformResolver<'a> {
    index: &'a PackageIndex,
}

impl<'a> PlatformResolver<'a> {
    pub fn new(index: &'a PackageIndex) -> Self {
        PlatformResolver { index }
    }

    pub fn resolve(&self, fqbn: &Fqbn) -> BuildResult<ResolvedPlatform> {
        let not_found = |reason: String| BuildError::BoardNotFound {
            fqbn: fqbn.to_string(),
            reason,
        };

        let package = self
            .index
            .package(fqbn.package())
            .ok_or_else(|| not_found(format!("unknown package `{}`", fqbn.package())))?;

        let target = package
            .platform(fqbn.architecture())
            .and_then(|p| p.installed_release())
            .ok_or_else(|| {
                not_found(format!(
                    "platform `{}:{}` is not installed",
                    fqbn.package(),
                    fqbn.architecture()
                ))
            })?;

        let board = target.boards.get(fqbn.board_id()).ok_or_else(|| {
            not_found(format!(
                "unknown board `{}` in platform {}",
                fqbn.board_id(),
                target.id()
            ))
        })?;

        let board_properties = self.board_properties(fqbn, board)?;

        let core_ref = split_reference(board_properties.get_or_empty("build.core"));
        let actual = match core_ref.vendor {
            Some(vendor) => self.referenced_platform(fqbn, vendor)?,
            None => target,
        };
        let variant_ref = split_reference(board_properties.get_or_empty("build.variant"));
        let variant_platform = match variant_ref.vendor {
            Some(vendor) => self.referenced_platform(fqbn, vendor)?,
            None => target,
        };

        tracing::debug!(
            "board {} resolved to {} (core from {})",
            fqbn,
            target.id(),
            actual.id()
        );

        let required_tools = self.required_tools(target, actual)?;

        let mut properties = actual.properties.clone();
        if actual.install_dir != target.install_dir {
            properties.merge(&target.properties);
        }
        properties.merge(&board_properties);
        if core_ref.vendor.is_some() {
            properties.set("build.core", core_ref.name);
        }
        if variant_ref.vendor.is_some() {
            properties.set("build.variant", variant_ref.name);
        }

        add_runtime_properties(
            &mut properties,
            fqbn,
            target,
            actual,
            variant_platform,
            &required_tools,
        );

        Ok(ResolvedPlatform {
            fqbn: fqbn.clone(),
            board: board.clone(),
            target_package: package.name.clone(),
            target_platform: target.clone(),
            actual_platform: actual.clone(),
            required_tools,
            build_properties: properties,
        })
    }

    /// Board properties with every menu resolved to a value.
    fn board_properties(&self, fqbn: &Fqbn, board: &Board) -> BuildResult<PropertyMap> {
        let menus = board.menu_ids();
        for (key, value) in fqbn.config() {
            let invalid = |reason: &str| BuildError::InvalidFqbnOption {
                fqbn: fqbn.to_string(),
                key: key.clone(),
                value: value.clone(),
                reason: reason.to_string(),
            };
            if !menus.contains(key) {
                return Err(invalid("the board has no such menu"));
            }
            if !board.menu_values(key).contains(value) {
                return Err(invalid("the menu has no such value"));
            }
        }

        let mut properties = board.base_properties();
        for menu in &menus {
            let value = match fqbn.config().get(menu) {
                Some(value) => value.clone(),
                None => match board.menu_values(menu).into_iter().next() {
                    Some(first) => first,
                    None => continue,
                },
            };
            properties.merge(&board.menu_value_properties(menu, &value));
        }
        Ok(properties)
    }

    fn referenced_platform(&self, fqbn: &Fqbn, vendor: &str) -> BuildResult<&'a PlatformRelease> {
        self.index
            .package(vendor)
            .and_then(|p| p.platform(fqbn.architecture()))
            .and_then(|p| p.installed_release())
            .ok_or_else(|| BuildError::BoardNotFound {
                fqbn: fqbn.to_string(),
                reason: format!(
                    "referenced platform `{}:{}` is not installed",
                    vendor,
                    fqbn.architecture()
                ),
            })
    }

    fn required_tools(
        &self,
        target: &PlatformRelease,
        actual: &PlatformRelease,
    ) -> BuildResult<Vec<ToolRelease>> {
        let mut tools: Vec<ToolRelease> = Vec::new();
        let mut push = |tool: &ToolRelease| {
            if !tools
                .iter()
                .any(|t| t.name == tool.name && t.version == tool.version && t.packager == tool.packager)
            {
                tools.push(tool.clone());
            }
        };

        let declared: Vec<_> = [target, actual]
            .iter()
            .filter_map(|p| p.tool_dependencies.as_ref())
            .flatten()
            .collect();

        if !declared.is_empty() {
            for dep in declared {
                let tool = self
                    .index
                    .package(&dep.packager)
                    .and_then(|p| p.tool(&dep.name, &dep.version))
                    .ok_or_else(|| BuildError::ToolNotInstalled {
                        packager: dep.packager.clone(),
                        name: dep.name.clone(),
                        version: dep.version.clone(),
                    })?;
                push(tool);
            }
        } else {
            for packager in [target.packager.as_str(), actual.packager.as_str(), BUILTIN_PACKAGER] {
                if let Some(package) = self.index.package(packager) {
                    for tool in package.latest_tools() {
                        push(tool);
                    }
                }
            }
        }

        Ok(tools)
    }
}

struct Reference<'s> {
    vendor: Option<&'s str>,
    name: &'s str,
}

/// Split `vendor:name` references used by `build.core` and `build.variant`.
fn split_reference(value: &str) -> Reference<'_> {
    match value.split_once(':') {
        Some((vendor, name)) => Reference {
            vendor: Some(vendor),
            name,
        },
        None => Reference { vendor: None, name: value },
    }
}

fn add_runtime_properties(
    properties: &mut PropertyMap,
    fqbn: &Fqbn,
    target: &PlatformRelease,
    actual: &PlatformRelease,
    variant_platform: &PlatformRelease,
    tools: &[ToolRelease],
) {
    let path = |p: PathBuf| p.to_string_lossy().into_owned();

    properties.set("runtime.platform.path", path(target.install_dir.clone()));
    properties.set("runtime.hardware.path", path(target.hardware_dir()));
    properties.set("runtime.os", host_os_suffix());
    properties.set("runtime.ide.version", RUNTIME_IDE_VERSION);
    properties.set("build.arch", fqbn.architecture().to_uppercase());
    properties.set("build.fqbn", fqbn.to_string());
    if !properties.contains_key("build.board") {
        properties.set(
            "build.board",
            format!(
                "{}_{}",
                fqbn.architecture().to_uppercase(),
                fqbn.board_id().to_uppercase()
            ),
        );
    }

    let core = properties.get_or_empty("build.core").to_string();
    properties.set(
        "build.core.path",
        path(actual.install_dir.join("cores").join(core)),
    );
    let variant = properties.get_or_empty("build.variant").to_string();
    let variant_path = if variant.is_empty() {
        String::new()
    } else {
        path(variant_platform.install_dir.join("variants").join(variant))
    };
    properties.set("build.variant.path", variant_path);
    properties.set("build.system.path", path(actual.install_dir.join("system")));

    let mut sorted: Vec<&ToolRelease> = tools.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name).then(compare_versions(&a.version, &b.version)));
    for tool in sorted {
        let dir = path(tool.install_dir.clone());
        properties.set(format!("runtime.tools.{}.path", tool.name), dir.clone());
        properties.set(
            format!("runtime.tools.{}-{}.path", tool.name, tool.version),
            dir,
        );
    }

    properties.set("software", "ARDUINO");
}
