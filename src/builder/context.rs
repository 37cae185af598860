//! Build context - one sketch build against one resolved board.
//!
//! A [`BuildContext`] is created per build and never reused. It is passed
//! by reference through every stage; the only state mutated concurrently
//! by compile workers lives behind the mutexes in [`OutputSinks`],
//! [`Progress`] and the [`CompilationDatabase`].

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};

use crate::builder::compile_commands::{CompilationDatabase, COMPILE_COMMANDS_FILE};
use crate::builder::events::ProgressEvent;
use crate::builder::fingerprint::BuildOptions;
use crate::builder::toolchain::PlatformToolchain;
use crate::core::fqbn::Fqbn;
use crate::core::properties::PropertyMap;
use crate::core::sketch::{Sketch, SourceOverrides};
use crate::errors::{BuildError, BuildResult};
use crate::resolver::detector::DEFAULT_MAX_ITERATIONS;
use crate::resolver::libraries::ResolvedLibrary;
use crate::resolver::platform::ResolvedPlatform;
use crate::util::process::{CancelToken, CommandRunner, ProcessRunner};

/// Capacity of the progress event channel.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 64;

struct Sinks {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
}

/// Standard output and error, serialized through one lock.
///
/// Both sinks share the lock so that writes never interleave even when
/// they end up on the same terminal.
pub struct OutputSinks {
    inner: Mutex<Sinks>,
}

impl OutputSinks {
    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        OutputSinks {
            inner: Mutex::new(Sinks { out, err }),
        }
    }

    pub fn stdio() -> Self {
        Self::new(Box::new(std::io::stdout()), Box::new(std::io::stderr()))
    }

    /// Discard everything.
    pub fn null() -> Self {
        Self::new(Box::new(std::io::sink()), Box::new(std::io::sink()))
    }

    fn lock(&self) -> MutexGuard<'_, Sinks> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write_out(&self, bytes: &[u8]) -> Result<()> {
        let mut sinks = self.lock();
        sinks.out.write_all(bytes).context("failed to write output")?;
        sinks.out.flush().context("failed to write output")
    }

    pub fn write_err(&self, bytes: &[u8]) -> Result<()> {
        let mut sinks = self.lock();
        sinks.err.write_all(bytes).context("failed to write output")?;
        sinks.err.flush().context("failed to write output")
    }

    pub fn info(&self, line: &str) -> Result<()> {
        self.write_out(format!("{}\n", line).as_bytes())
    }

    pub fn warn(&self, line: &str) -> Result<()> {
        self.write_err(format!("{}\n", line).as_bytes())
    }
}

impl fmt::Debug for OutputSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSinks").finish_non_exhaustive()
    }
}

/// Step accounting behind the progress percentage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    total_steps: usize,
    completed_steps: usize,
    /// A `completed` event has already been delivered.
    completion_reported: bool,
}

impl Progress {
    pub fn add_steps(&mut self, n: usize) {
        self.total_steps += n;
    }

    pub fn complete_step(&mut self) {
        self.completed_steps = (self.completed_steps + 1).min(self.total_steps);
    }

    /// Mark every step done.
    pub fn finish(&mut self) {
        self.total_steps = self.total_steps.max(1);
        self.completed_steps = self.total_steps;
    }

    pub fn percent(&self) -> f32 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.completed_steps as f32 * 100.0 / self.total_steps as f32
    }
}

/// Single consumer of progress events.
///
/// Events are delivered to the callback in the order they were sent, on the
/// reporter's own thread.
pub struct ProgressReporter {
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    pub fn spawn<F>(callback: F) -> (SyncSender<ProgressEvent>, Self)
    where
        F: FnMut(ProgressEvent) + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(PROGRESS_CHANNEL_CAPACITY);
        let handle = std::thread::spawn(move || drain(rx, callback));
        (tx, ProgressReporter { handle })
    }

    /// Wait for the reporter to drain. Every sender must be dropped first.
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::warn!("progress callback panicked");
        }
    }
}

fn drain<F: FnMut(ProgressEvent)>(rx: Receiver<ProgressEvent>, mut callback: F) {
    for event in rx {
        callback(event);
    }
}

/// Per-build state.
pub struct BuildContext {
    // Search paths
    pub hardware_dirs: Vec<PathBuf>,
    pub builtin_tools_dirs: Vec<PathBuf>,
    pub builtin_libraries_dir: Option<PathBuf>,
    pub other_libraries_dirs: Vec<PathBuf>,
    pub sketch_libraries_dirs: Vec<PathBuf>,

    pub fqbn: Fqbn,
    pub clean: bool,
    pub build_options_json: String,
    pub build_options_json_previous: Option<String>,

    /// Board, platforms and tools, once resolved.
    pub platform: Option<ResolvedPlatform>,
    pub build_properties: PropertyMap,

    pub build_path: PathBuf,
    pub sketch_build_path: PathBuf,
    pub core_build_path: PathBuf,
    pub core_archive_file_path: PathBuf,
    pub libraries_build_path: PathBuf,

    pub sketch_object_files: Vec<PathBuf>,
    pub core_object_files: Vec<PathBuf>,
    pub variant_object_files: Vec<PathBuf>,
    pub libraries_object_files: Vec<PathBuf>,

    pub sketch: Sketch,
    /// Translation units of the prepared sketch, merged file first.
    pub sketch_sources: Vec<PathBuf>,
    pub source_overrides: SourceOverrides,

    pub warnings_level: String,
    /// Parallel compile jobs; `<= 0` means available parallelism.
    pub jobs: i32,
    pub verbose: bool,
    pub custom_build_properties: Vec<String>,
    pub max_resolution_iterations: usize,

    pub imported_libraries: Vec<ResolvedLibrary>,
    pub include_folders: Vec<PathBuf>,

    pub only_update_compilation_database: bool,
    pub compilation_database: CompilationDatabase,

    pub progress: Mutex<Progress>,
    progress_tx: Option<SyncSender<ProgressEvent>>,

    pub sinks: Arc<OutputSinks>,
    pub runner: Arc<dyn CommandRunner>,
    pub cancel: CancelToken,
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("fqbn", &self.fqbn.to_string())
            .field("sketch", &self.sketch.root)
            .field("build_path", &self.build_path)
            .field("jobs", &self.jobs)
            .field("clean", &self.clean)
            .field(
                "only_update_compilation_database",
                &self.only_update_compilation_database,
            )
            .field("imported_libraries", &self.imported_libraries.len())
            .finish_non_exhaustive()
    }
}

impl BuildContext {
    pub fn new(sketch: Sketch, fqbn: Fqbn, build_path: PathBuf) -> Self {
        let core_build_path = build_path.join("core");
        BuildContext {
            hardware_dirs: Vec::new(),
            builtin_tools_dirs: Vec::new(),
            builtin_libraries_dir: None,
            other_libraries_dirs: Vec::new(),
            sketch_libraries_dirs: Vec::new(),
            fqbn,
            clean: false,
            build_options_json: String::new(),
            build_options_json_previous: None,
            platform: None,
            build_properties: PropertyMap::new(),
            sketch_build_path: build_path.join("sketch"),
            core_archive_file_path: core_build_path.join("core.a"),
            core_build_path,
            libraries_build_path: build_path.join("libraries"),
            sketch_object_files: Vec::new(),
            core_object_files: Vec::new(),
            variant_object_files: Vec::new(),
            libraries_object_files: Vec::new(),
            sketch,
            sketch_sources: Vec::new(),
            source_overrides: SourceOverrides::new(),
            warnings_level: "none".to_string(),
            jobs: 0,
            verbose: false,
            custom_build_properties: Vec::new(),
            max_resolution_iterations: DEFAULT_MAX_ITERATIONS,
            imported_libraries: Vec::new(),
            include_folders: Vec::new(),
            only_update_compilation_database: false,
            compilation_database: CompilationDatabase::new(build_path.join(COMPILE_COMMANDS_FILE)),
            build_path,
            progress: Mutex::new(Progress::default()),
            progress_tx: None,
            sinks: Arc::new(OutputSinks::null()),
            runner: Arc::new(ProcessRunner),
            cancel: CancelToken::new(),
        }
    }

    /// The resolved platform; fails if resolution has not run yet.
    pub fn platform(&self) -> BuildResult<&ResolvedPlatform> {
        self.platform
            .as_ref()
            .ok_or_else(|| BuildError::Internal(anyhow!("board `{}` has not been resolved", self.fqbn)))
    }

    /// Install the resolved platform and derive the build properties.
    pub fn set_platform(&mut self, resolved: ResolvedPlatform) -> BuildResult<()> {
        let mut props = resolved.build_properties.clone();

        let path = |p: &Path| p.to_string_lossy().into_owned();
        props.set("build.path", path(&self.build_path));
        props.set(
            "build.project_name",
            self.sketch.merged_file_name().trim_end_matches(".cpp").to_string(),
        );
        props.set("build.source.path", path(&self.sketch.root));
        props.set("archive_file", "core.a");
        props.set("archive_file_path", path(&self.core_archive_file_path));
        props.set("extra.time.utc", "0");

        let warning_key = format!("compiler.warning_flags.{}", self.warnings_level);
        if let Some(flags) = props.get(&warning_key).map(str::to_string) {
            props.set("compiler.warning_flags", flags);
        }

        for entry in &self.custom_build_properties {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                BuildError::Internal(anyhow!("invalid build property `{}`: expected key=value", entry))
            })?;
            props.set(key.trim(), value.trim());
        }

        self.build_properties = props;
        self.platform = Some(resolved);
        Ok(())
    }

    pub fn toolchain(&self) -> PlatformToolchain {
        PlatformToolchain::new(self.build_properties.clone())
    }

    /// Core and variant include folders.
    pub fn base_include_dirs(&self) -> Vec<PathBuf> {
        ["build.core.path", "build.variant.path"]
            .iter()
            .filter_map(|k| self.build_properties.get(k))
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    /// Include folders for sketch and library compilation.
    pub fn all_include_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.base_include_dirs();
        dirs.extend(self.include_folders.iter().cloned());
        dirs
    }

    /// Fold a resolved library into the context.
    pub fn add_library(&mut self, library: ResolvedLibrary) {
        let dir = library.library.source_dir();
        if !self.include_folders.contains(&dir) {
            self.include_folders.push(dir);
        }
        self.imported_libraries.push(library);
    }

    /// The configuration fingerprint of this build.
    pub fn extract_build_options(&self) -> BuildOptions {
        let join = |paths: &[PathBuf]| {
            paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(",")
        };

        BuildOptions {
            hardware_folders: join(&self.hardware_dirs),
            built_in_tools_folders: join(&self.builtin_tools_dirs),
            built_in_libraries_folders: self
                .builtin_libraries_dir
                .as_deref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            other_libraries_folders: join(&self.other_libraries_dirs),
            sketch_location: self.sketch.root.to_string_lossy().into_owned(),
            fqbn: self.fqbn.to_string(),
            custom_build_properties: self.custom_build_properties.join(","),
            additional_files: self.sketch.additional_files_relative().join(","),
            compiler_optimization_flags: self
                .build_properties
                .get_or_empty("compiler.optimization_flags")
                .to_string(),
        }
    }

    // Output

    pub fn write_out(&self, bytes: &[u8]) -> Result<()> {
        self.sinks.write_out(bytes)
    }

    pub fn write_err(&self, bytes: &[u8]) -> Result<()> {
        self.sinks.write_err(bytes)
    }

    pub fn info(&self, line: &str) -> Result<()> {
        self.sinks.info(line)
    }

    pub fn warn(&self, line: &str) -> Result<()> {
        self.sinks.warn(line)
    }

    // Progress

    pub fn set_progress_sender(&mut self, tx: SyncSender<ProgressEvent>) {
        self.progress_tx = Some(tx);
    }

    /// Drop the progress sender so the reporter can finish.
    pub fn close_progress(&mut self) {
        self.progress_tx = None;
    }

    pub fn add_progress_steps(&self, n: usize) {
        self.lock_progress().add_steps(n);
    }

    /// Complete one step and notify.
    pub fn complete_progress_step(&self) {
        self.lock_progress().complete_step();
        self.push_progress();
    }

    pub fn finish_progress(&self) {
        self.lock_progress().finish();
        self.push_progress();
    }

    fn lock_progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver the current percentage to the progress channel, if any.
    ///
    /// Intermediate updates are dropped when the channel is full; the final
    /// completed event always gets through unless the reporter is gone, and
    /// is sent at most once.
    pub fn push_progress(&self) {
        let Some(tx) = &self.progress_tx else {
            return;
        };
        let event = {
            let mut progress = self.lock_progress();
            let event = ProgressEvent::new(progress.percent());
            if event.completed {
                if progress.completion_reported {
                    return;
                }
                progress.completion_reported = true;
            }
            event
        };
        if event.completed {
            let _ = tx.send(event);
        } else if let Err(TrySendError::Disconnected(_)) = tx.try_send(event) {
            tracing::trace!("progress receiver disconnected");
        }
    }
}
