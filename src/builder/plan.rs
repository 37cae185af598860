//! Build plan generation.
//!
//! A [`BuildPlan`] lists every translation unit of one sketch build, grouped
//! by origin. Object paths mirror the source layout under the build
//! directory: `<out>/<relative source path>.o`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::builder::context::BuildContext;
use crate::core::library::SOURCE_EXTENSIONS;
use crate::util::fs::{find_files, relative_path};

/// Where a translation unit comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Sketch,
    Library,
    Core,
    Variant,
}

/// One source to compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileUnit {
    pub source: PathBuf,
    pub object: PathBuf,
    pub include_dirs: Vec<PathBuf>,
    pub kind: UnitKind,
}

/// All compile units of a build.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildPlan {
    pub sketch: Vec<CompileUnit>,
    pub libraries: Vec<CompileUnit>,
    pub core: Vec<CompileUnit>,
    pub variant: Vec<CompileUnit>,
}

impl BuildPlan {
    /// Plan a build from a context whose platform and libraries are resolved.
    pub fn new(ctx: &BuildContext) -> Self {
        let include_dirs = ctx.all_include_dirs();
        let base_dirs = ctx.base_include_dirs();

        let sketch = ctx
            .sketch_sources
            .iter()
            .map(|source| CompileUnit {
                object: object_path(&ctx.sketch_build_path, &ctx.sketch_build_path, source),
                source: source.clone(),
                include_dirs: include_dirs.clone(),
                kind: UnitKind::Sketch,
            })
            .collect();

        let mut libraries = Vec::new();
        for resolved in &ctx.imported_libraries {
            let library = &resolved.library;
            let out = ctx.libraries_build_path.join(&library.name);
            let mut dirs = include_dirs.clone();
            if let Some(utility) = library.utility_dir() {
                dirs.push(utility);
            }
            for source in library.source_files() {
                libraries.push(CompileUnit {
                    object: object_path(&out, &library.install_dir, &source),
                    source,
                    include_dirs: dirs.clone(),
                    kind: UnitKind::Library,
                });
            }
        }

        let core = sources_under(ctx.build_properties.get_or_empty("build.core.path"))
            .into_iter()
            .map(|(root, source)| CompileUnit {
                object: object_path(&ctx.core_build_path, &root, &source),
                source,
                include_dirs: base_dirs.clone(),
                kind: UnitKind::Core,
            })
            .collect();

        let variant_out = ctx.core_build_path.join("variant");
        let variant = sources_under(ctx.build_properties.get_or_empty("build.variant.path"))
            .into_iter()
            .map(|(root, source)| CompileUnit {
                object: object_path(&variant_out, &root, &source),
                source,
                include_dirs: base_dirs.clone(),
                kind: UnitKind::Variant,
            })
            .collect();

        BuildPlan {
            sketch,
            libraries,
            core,
            variant,
        }
    }

    /// Units in compile order: sketch, libraries, core, variant.
    pub fn units(&self) -> impl Iterator<Item = &CompileUnit> {
        self.sketch
            .iter()
            .chain(&self.libraries)
            .chain(&self.core)
            .chain(&self.variant)
    }

    pub fn compile_count(&self) -> usize {
        self.sketch.len() + self.libraries.len() + self.core.len() + self.variant.len()
    }
}

fn sources_under(dir: &str) -> Vec<(PathBuf, PathBuf)> {
    if dir.is_empty() {
        return Vec::new();
    }
    let root = PathBuf::from(dir);
    find_files(&root, SOURCE_EXTENSIONS, true)
        .into_iter()
        .map(|source| (root.clone(), source))
        .collect()
}

/// `<out>/<source relative to root>.o`
pub fn object_path(out: &Path, root: &Path, source: &Path) -> PathBuf {
    let rel = if source.starts_with(root) {
        relative_path(root, source)
    } else {
        source
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| source.to_path_buf())
    };
    let mut object: OsString = out.join(rel).into_os_string();
    object.push(".o");
    PathBuf::from(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fqbn::Fqbn;
    use crate::core::library::{Library, LibraryLocation};
    use crate::core::sketch::Sketch;
    use crate::resolver::libraries::ResolvedLibrary;
    use crate::resolver::platform::PlatformResolver;
    use crate::test_support::fixtures::Fixture;

    #[test]
    fn test_object_path_mirrors_layout() {
        assert_eq!(
            object_path(Path::new("/b/core"), Path::new("/p/cores/arduino"), Path::new("/p/cores/arduino/sub/wiring.c")),
            PathBuf::from("/b/core/sub/wiring.c.o")
        );
        assert_eq!(
            object_path(Path::new("/b/sketch"), Path::new("/elsewhere"), Path::new("/s/a.cpp")),
            PathBuf::from("/b/sketch/a.cpp.o")
        );
    }

    #[test]
    fn test_plan_groups_units() {
        let fx = Fixture::new();
        fx.install_avr();
        let sketch_dir = fx.add_sketch("Blink", "void setup() {}\nvoid loop() {}\n");
        let lib_dir = fx.add_library(&fx.root().join("libraries"), "Servo", None);

        let index = fx.index();
        let fqbn = Fqbn::parse("arduino:avr:uno").unwrap();
        let resolved = PlatformResolver::new(&index).resolve(&fqbn).unwrap();
        let sketch = Sketch::load(&sketch_dir).unwrap();
        let mut ctx = BuildContext::new(sketch, fqbn, fx.build_dir());
        ctx.set_platform(resolved).unwrap();
        ctx.sketch_sources = ctx
            .sketch
            .prepare(&ctx.sketch_build_path, &ctx.source_overrides)
            .unwrap();
        ctx.add_library(ResolvedLibrary {
            library: Library::load(&lib_dir, LibraryLocation::User).unwrap(),
            header: "Servo.h".to_string(),
            included_from: ctx.sketch_sources[0].clone(),
            alternates: vec![],
        });

        let plan = BuildPlan::new(&ctx);
        assert_eq!(plan.sketch.len(), 1);
        assert_eq!(
            plan.sketch[0].object,
            ctx.sketch_build_path.join("Blink.ino.cpp.o")
        );
        assert_eq!(plan.libraries.len(), 1);
        assert_eq!(
            plan.libraries[0].object,
            ctx.libraries_build_path.join("Servo/Servo.cpp.o")
        );
        assert_eq!(plan.core.len(), 2);
        assert!(plan.core.iter().all(|u| u.object.starts_with(&ctx.core_build_path)));
        assert!(plan.variant.is_empty());
        assert_eq!(plan.compile_count(), 4);
        assert_eq!(plan.units().next().unwrap().kind, UnitKind::Sketch);
        assert!(plan.sketch[0].include_dirs.contains(&lib_dir));
    }
}
