//! Implementation of `kiln compile`.
//!
//! The pipeline: resolve the board, prepare the sketch, detect libraries,
//! check the build fingerprint, compile sketch, libraries, core and variant,
//! archive the core, link, measure, then write the compilation database and
//! the fingerprint.

use std::path::PathBuf;
use std::time::Instant;

use crate::builder::compile_commands::COMPILE_COMMANDS_FILE;
use crate::builder::events::BuildEvent;
use crate::builder::executor::{BuildExecutor, SizeReport};
use crate::builder::fingerprint::{BuildCache, BuildMode};
use crate::builder::plan::BuildPlan;
use crate::builder::BuildContext;
use crate::core::fqbn::Fqbn;
use crate::core::library::LibraryLocation;
use crate::core::package::PackageIndex;
use crate::core::sketch::{Sketch, SourceOverrides};
use crate::errors::{BuildError, BuildResult};
use crate::resolver::detector::LibraryDetector;
use crate::resolver::libraries::{LibraryResolver, ResolvedLibrary};
use crate::resolver::platform::PlatformResolver;
use crate::util::GlobalContext;

/// Options for the compile command.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Sketch directory or main sketch file
    pub sketch_path: PathBuf,

    /// Fully qualified board name
    pub fqbn: String,

    /// Build directory (defaults to config, then a per-sketch cache dir)
    pub build_path: Option<PathBuf>,

    /// Extra `key=value` build properties, applied after the configured ones
    pub build_properties: Vec<String>,

    /// Warning level override
    pub warnings: Option<String>,

    /// Parallel jobs override
    pub jobs: Option<i32>,

    /// Discard previous build artifacts
    pub clean: bool,

    /// Only write compile_commands.json; nothing is compiled
    pub only_update_compilation_database: bool,

    /// Print every command
    pub verbose: bool,

    /// Extra user library directories
    pub libraries: Vec<PathBuf>,

    /// Replacement content for sketch files, keyed by path relative to the sketch
    pub source_overrides: SourceOverrides,
}

/// Outcome of a successful compile.
#[derive(Debug)]
pub struct CompileResult {
    pub build_path: PathBuf,
    pub mode: BuildMode,
    pub libraries: Vec<ResolvedLibrary>,
    /// Compile units in the plan, whether compiled or up to date
    pub units: usize,
    pub executable: Option<PathBuf>,
    pub size: Option<SizeReport>,
    pub compilation_database: PathBuf,
}

/// Create a build context from configuration and command-line options.
pub fn prepare_context(gctx: &GlobalContext, opts: &CompileOptions) -> BuildResult<BuildContext> {
    let fqbn = Fqbn::parse(&opts.fqbn)?;
    let sketch_path = if opts.sketch_path.is_absolute() {
        opts.sketch_path.clone()
    } else {
        gctx.cwd().join(&opts.sketch_path)
    };
    let sketch = Sketch::load(&sketch_path)?;

    let config = &gctx.config().build;
    let build_path = match opts.build_path.as_ref().or(config.build_path.as_ref()) {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => gctx.cwd().join(path),
        None => gctx.default_build_path(&sketch.root),
    };

    let mut ctx = BuildContext::new(sketch, fqbn, build_path);
    ctx.hardware_dirs = gctx.hardware_dirs();
    ctx.builtin_tools_dirs = gctx.builtin_tools_dirs();
    ctx.builtin_libraries_dir = gctx.builtin_libraries_dir();
    ctx.other_libraries_dirs = gctx.other_libraries_dirs();
    ctx.other_libraries_dirs.extend(opts.libraries.iter().cloned());
    ctx.sketch_libraries_dirs = vec![ctx.sketch.libraries_dir()];

    ctx.clean = opts.clean;
    ctx.only_update_compilation_database = opts.only_update_compilation_database;
    ctx.verbose = opts.verbose;
    ctx.jobs = opts.jobs.or(config.jobs).unwrap_or(0);
    ctx.warnings_level = opts
        .warnings
        .clone()
        .or_else(|| config.warnings.clone())
        .unwrap_or_else(|| "none".to_string());
    if let Some(max) = config.max_resolution_iterations {
        ctx.max_resolution_iterations = max;
    }
    ctx.custom_build_properties = config
        .build_properties
        .iter()
        .chain(&opts.build_properties)
        .cloned()
        .collect();
    ctx.source_overrides = opts.source_overrides.clone();

    tracing::debug!("{:?}", ctx);
    Ok(ctx)
}

/// Run a full build, reporting start, resolved libraries and the outcome.
pub fn compile(
    ctx: &mut BuildContext,
    on_event: &mut dyn FnMut(&BuildEvent),
) -> BuildResult<CompileResult> {
    let start = Instant::now();
    on_event(&BuildEvent::started(ctx.fqbn.to_string(), ctx.build_path.clone()));

    let result = run(ctx, on_event);
    match &result {
        Ok(_) => ctx.finish_progress(),
        Err(e) => tracing::debug!("build failed: {}", e),
    }
    ctx.close_progress();

    on_event(&BuildEvent::BuildFinished {
        success: result.is_ok(),
        duration_ms: start.elapsed().as_millis() as u64,
        units: result.as_ref().ok().map(|r| r.units as u64),
    });
    result
}

fn run(ctx: &mut BuildContext, on_event: &mut dyn FnMut(&BuildEvent)) -> BuildResult<CompileResult> {
    let index = PackageIndex::load(&ctx.hardware_dirs, &ctx.builtin_tools_dirs)?;
    let resolved = PlatformResolver::new(&index).resolve(&ctx.fqbn)?;
    ctx.set_platform(resolved)?;

    ctx.sketch_sources = ctx
        .sketch
        .prepare(&ctx.sketch_build_path, &ctx.source_overrides)?;

    detect_libraries(ctx)?;
    for resolved in &ctx.imported_libraries {
        on_event(&BuildEvent::LibraryResolved {
            name: resolved.library.name.clone(),
            header: resolved.header.clone(),
            location: resolved.library.location.to_string(),
            version: resolved.library.version.clone(),
        });
    }

    let mode = BuildCache::check(ctx)?;
    let plan = BuildPlan::new(ctx);
    // Every unit, plus archive and link.
    ctx.add_progress_steps(plan.compile_count() + 2);

    let executor = BuildExecutor::new(ctx, mode);
    let sketch_objects = executor.compile_units(&plan.sketch)?;
    let library_objects = executor.compile_units(&plan.libraries)?;
    let core_objects = executor.compile_units(&plan.core)?;
    let variant_objects = executor.compile_units(&plan.variant)?;

    executor.archive_core(&core_objects)?;
    let mut link_objects = sketch_objects.clone();
    link_objects.extend(library_objects.iter().cloned());
    link_objects.extend(variant_objects.iter().cloned());
    executor.link(&link_objects)?;
    let size = executor.check_size()?;

    ctx.sketch_object_files = sketch_objects;
    ctx.libraries_object_files = library_objects;
    ctx.core_object_files = core_objects;
    ctx.variant_object_files = variant_objects;

    ctx.compilation_database.save()?;
    if ctx.cancel.is_cancelled() {
        return Err(BuildError::Cancelled);
    }

    let executable = if ctx.only_update_compilation_database {
        None
    } else {
        BuildCache::persist(ctx)?;
        let name = ctx.build_properties.get_or_empty("build.project_name");
        Some(ctx.build_path.join(format!("{}.elf", name)))
    };

    Ok(CompileResult {
        build_path: ctx.build_path.clone(),
        mode,
        libraries: ctx.imported_libraries.clone(),
        units: plan.compile_count(),
        executable,
        size,
        compilation_database: ctx.build_path.join(COMPILE_COMMANDS_FILE),
    })
}

/// Library roots in priority order, each tagged with its location.
pub fn library_roots(ctx: &BuildContext) -> BuildResult<Vec<(PathBuf, LibraryLocation)>> {
    let platform = ctx.platform()?;
    let mut roots: Vec<(PathBuf, LibraryLocation)> = Vec::new();
    roots.extend(
        ctx.sketch_libraries_dirs
            .iter()
            .map(|d| (d.clone(), LibraryLocation::Sketch)),
    );
    roots.extend(
        ctx.other_libraries_dirs
            .iter()
            .map(|d| (d.clone(), LibraryLocation::User)),
    );
    roots.push((
        platform.target_platform.install_dir.join("libraries"),
        LibraryLocation::Platform,
    ));
    if platform.actual_platform.install_dir != platform.target_platform.install_dir {
        roots.push((
            platform.actual_platform.install_dir.join("libraries"),
            LibraryLocation::ReferencedPlatform,
        ));
    }
    if let Some(builtin) = &ctx.builtin_libraries_dir {
        roots.push((builtin.clone(), LibraryLocation::BuiltIn));
    }
    Ok(roots)
}

/// Run the library detector and fold its findings into the context.
fn detect_libraries(ctx: &mut BuildContext) -> BuildResult<()> {
    let resolver = LibraryResolver::scan(&library_roots(ctx)?)?;
    let toolchain = ctx.toolchain();
    let architecture = ctx.fqbn.architecture().to_string();

    let detection = LibraryDetector::new(
        &toolchain,
        ctx.runner.as_ref(),
        &resolver,
        &architecture,
        ctx.base_include_dirs(),
        &ctx.build_path,
    )
    .with_max_iterations(ctx.max_resolution_iterations)
    .with_cancel(ctx.cancel.clone())
    .run(&ctx.sketch_sources)?;

    tracing::info!(
        "detected {} libraries in {} probes",
        detection.libraries.len(),
        detection.iterations
    );
    for library in detection.libraries {
        ctx.add_library(library);
    }
    Ok(())
}
