//! Build options fingerprinting for incremental builds.
//!
//! The fingerprint captures the build *configuration* (search paths, board,
//! custom properties, sketch file list, optimization flags), never source
//! content. If it changed since the previous build of the same directory,
//! every previous artifact is discarded. Per-object staleness within an
//! unchanged configuration is handled by
//! [`object_is_stale`](crate::builder::toolchain::object_is_stale).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::builder::context::BuildContext;
use crate::errors::{BuildError, BuildResult};
use crate::util::fs::{
    modified, remove_dir_all_if_exists, remove_file_if_exists, remove_files_with_extensions,
    write_atomic,
};

pub const BUILD_OPTIONS_FILE: &str = "build.options.json";

/// Serialized build configuration. Field order is part of the format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    #[serde(rename = "hardwareFolders")]
    pub hardware_folders: String,
    #[serde(rename = "builtInToolsFolders")]
    pub built_in_tools_folders: String,
    #[serde(rename = "builtInLibrariesFolders")]
    pub built_in_libraries_folders: String,
    #[serde(rename = "otherLibrariesFolders")]
    pub other_libraries_folders: String,
    #[serde(rename = "sketchLocation")]
    pub sketch_location: String,
    pub fqbn: String,
    #[serde(rename = "customBuildProperties")]
    pub custom_build_properties: String,
    #[serde(rename = "additionalFiles")]
    pub additional_files: String,
    #[serde(rename = "compiler.optimization_flags")]
    pub compiler_optimization_flags: String,
}

impl BuildOptions {
    pub fn to_json(&self) -> BuildResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BuildError::Internal(anyhow::anyhow!("failed to serialize build options: {}", e)))
    }
}

/// Whether previous artifacts may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Clean,
    Incremental,
}

pub struct BuildCache;

impl BuildCache {
    pub fn options_path(build_path: &Path) -> PathBuf {
        build_path.join(BUILD_OPTIONS_FILE)
    }

    /// Read the previous fingerprint, validating that it parses.
    pub fn load_previous(build_path: &Path) -> BuildResult<Option<String>> {
        let path = Self::options_path(build_path);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BuildError::CacheCorrupt {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        serde_json::from_str::<BuildOptions>(&text).map_err(|e| BuildError::CacheCorrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(text))
    }

    /// Compare the current fingerprint with the previous one and pick the build mode.
    ///
    /// In clean mode previous core, library and sketch artifacts are removed,
    /// except during a compilation database dry run which must not touch outputs.
    pub fn check(ctx: &mut BuildContext) -> BuildResult<BuildMode> {
        ctx.build_options_json = ctx.extract_build_options().to_json()?;

        let previous = match Self::load_previous(&ctx.build_path) {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!("{}", e);
                ctx.warn(&format!("warning: {}", e))?;
                None
            }
        };
        ctx.build_options_json_previous = previous.clone();

        let reason = match previous {
            _ if ctx.clean => Some("clean build requested"),
            None => Some("no previous build options"),
            Some(ref prev) if *prev != ctx.build_options_json => Some("build options changed"),
            Some(_) if Self::platform_changed(ctx) => Some("platform definition changed"),
            Some(_) => None,
        };

        match reason {
            Some(reason) => {
                tracing::debug!("clean build: {}", reason);
                if !ctx.only_update_compilation_database {
                    Self::wipe(ctx)?;
                }
                Ok(BuildMode::Clean)
            }
            None => {
                tracing::debug!("build options unchanged, building incrementally");
                Ok(BuildMode::Incremental)
            }
        }
    }

    /// A platform.txt newer than the recorded options invalidates the build.
    fn platform_changed(ctx: &BuildContext) -> bool {
        let Some(recorded) = modified(&Self::options_path(&ctx.build_path)) else {
            return true;
        };
        let Some(platform) = ctx.platform.as_ref() else {
            return false;
        };
        platform
            .platform_files()
            .iter()
            .filter_map(|f| modified(f))
            .any(|t| t > recorded)
    }

    /// Remove previous core, library and sketch artifacts.
    pub fn wipe(ctx: &BuildContext) -> BuildResult<()> {
        remove_dir_all_if_exists(&ctx.core_build_path)?;
        remove_dir_all_if_exists(&ctx.libraries_build_path)?;
        remove_file_if_exists(&ctx.core_archive_file_path)?;
        let removed = remove_files_with_extensions(&ctx.sketch_build_path, &["o", "d"])?;
        tracing::debug!("removed {} stale sketch objects", removed);
        Ok(())
    }

    /// Record the current fingerprint. Only called after a successful build.
    pub fn persist(ctx: &BuildContext) -> BuildResult<()> {
        write_atomic(
            &Self::options_path(&ctx.build_path),
            ctx.build_options_json.as_bytes(),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fqbn::Fqbn;
    use crate::core::sketch::Sketch;
    use crate::resolver::platform::PlatformResolver;
    use crate::test_support::fixtures::Fixture;
    use std::fs;

    fn context(fx: &Fixture, fqbn: &str) -> BuildContext {
        let index = fx.index();
        let fqbn = Fqbn::parse(fqbn).unwrap();
        let resolved = PlatformResolver::new(&index).resolve(&fqbn).unwrap();
        let sketch = Sketch::load(&fx.root().join("Blink")).unwrap();
        let mut ctx = BuildContext::new(sketch, fqbn, fx.build_dir());
        ctx.hardware_dirs = vec![fx.hardware_dir()];
        ctx.set_platform(resolved).unwrap();
        ctx
    }

    fn setup() -> Fixture {
        let fx = Fixture::new();
        fx.install_avr();
        fx.add_sketch("Blink", "void setup() {}\nvoid loop() {}\n");
        fx
    }

    #[test]
    fn test_first_build_is_clean() {
        let fx = setup();
        let mut ctx = context(&fx, "arduino:avr:uno");
        assert_eq!(BuildCache::check(&mut ctx).unwrap(), BuildMode::Clean);
        assert!(ctx.build_options_json.contains("\"fqbn\": \"arduino:avr:uno\""));
        assert!(ctx.build_options_json_previous.is_none());
    }

    #[test]
    fn test_unchanged_options_are_incremental() {
        let fx = setup();
        let mut ctx = context(&fx, "arduino:avr:uno");
        BuildCache::check(&mut ctx).unwrap();
        BuildCache::persist(&ctx).unwrap();

        // Source edits do not touch the fingerprint.
        fs::write(fx.root().join("Blink/Blink.ino"), "void setup() { changed(); }\n").unwrap();

        let mut again = context(&fx, "arduino:avr:uno");
        assert_eq!(BuildCache::check(&mut again).unwrap(), BuildMode::Incremental);
        assert_eq!(again.build_options_json, ctx.build_options_json);
    }

    #[test]
    fn test_fqbn_change_forces_clean_and_wipes() {
        let fx = setup();
        let mut ctx = context(&fx, "arduino:avr:uno");
        BuildCache::check(&mut ctx).unwrap();
        BuildCache::persist(&ctx).unwrap();

        fs::create_dir_all(&ctx.core_build_path).unwrap();
        fs::write(&ctx.core_archive_file_path, "archive").unwrap();
        fs::create_dir_all(&ctx.sketch_build_path).unwrap();
        fs::write(ctx.sketch_build_path.join("Blink.ino.cpp.o"), "").unwrap();
        fs::write(ctx.sketch_build_path.join("Blink.ino.cpp"), "").unwrap();

        let mut other = context(&fx, "arduino:avr:nano:cpu=atmega168");
        assert_eq!(BuildCache::check(&mut other).unwrap(), BuildMode::Clean);
        assert!(!other.core_archive_file_path.exists());
        assert!(!other.sketch_build_path.join("Blink.ino.cpp.o").exists());
        assert!(other.sketch_build_path.join("Blink.ino.cpp").exists());
    }

    #[test]
    fn test_corrupt_options_treated_as_missing() {
        let fx = setup();
        fs::create_dir_all(fx.build_dir()).unwrap();
        fs::write(fx.build_dir().join(BUILD_OPTIONS_FILE), "{ not json").unwrap();

        assert!(matches!(
            BuildCache::load_previous(&fx.build_dir()),
            Err(BuildError::CacheCorrupt { .. })
        ));
        let mut ctx = context(&fx, "arduino:avr:uno");
        assert_eq!(BuildCache::check(&mut ctx).unwrap(), BuildMode::Clean);
    }

    #[test]
    fn test_clean_flag_forces_clean() {
        let fx = setup();
        let mut ctx = context(&fx, "arduino:avr:uno");
        BuildCache::check(&mut ctx).unwrap();
        BuildCache::persist(&ctx).unwrap();

        let mut again = context(&fx, "arduino:avr:uno");
        again.clean = true;
        assert_eq!(BuildCache::check(&mut again).unwrap(), BuildMode::Clean);
    }

    #[test]
    fn test_dry_run_does_not_wipe() {
        let fx = setup();
        let mut ctx = context(&fx, "arduino:avr:uno");
        fs::create_dir_all(&ctx.core_build_path).unwrap();
        fs::write(&ctx.core_archive_file_path, "archive").unwrap();

        ctx.only_update_compilation_database = true;
        assert_eq!(BuildCache::check(&mut ctx).unwrap(), BuildMode::Clean);
        assert!(ctx.core_archive_file_path.exists());
    }
}
