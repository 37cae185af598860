//! Library detection by repeated preprocessing.
//!
//! Each translation unit is run through the preprocessor with the include
//! folders known so far. A "missing header" diagnostic names the next
//! library to pull in; its sources join the queue and the failing file is
//! probed again. Detection ends when the queue drains (converged) or the
//! probe budget runs out.
//!
//! ```text
//! Probing --(missing header)--> ResolvingMissingHeader --(library added)--> Probing
//!    |                                   |
//!    +--(queue empty)--> Converged       +--(not found / ambiguous / incompatible)--> Failed
//! ```

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::builder::toolchain::Toolchain;
use crate::errors::{BuildError, BuildResult};
use crate::resolver::libraries::{LibraryResolver, ResolvedLibrary};
use crate::util::fs::ensure_dir;
use crate::util::process::{CancelToken, CommandRunner};

/// Probe budget used unless configured otherwise.
pub const DEFAULT_MAX_ITERATIONS: usize = 512;

static GCC_MISSING_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"fatal error: (\S+?): No such file or directory").expect("valid regex")
});

static CLANG_MISSING_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fatal error: '([^']+)' file not found").expect("valid regex"));

/// Extract the missing header from compiler diagnostics.
pub fn missing_header(diagnostics: &str) -> Option<String> {
    GCC_MISSING_HEADER
        .captures(diagnostics)
        .or_else(|| CLANG_MISSING_HEADER.captures(diagnostics))
        .map(|c| c[1].to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorState {
    Probing,
    ResolvingMissingHeader { header: String, file: PathBuf },
    Converged,
    Failed,
}

/// Libraries found and the include folders they contribute, in discovery order.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub libraries: Vec<ResolvedLibrary>,
    pub include_folders: Vec<PathBuf>,
    pub iterations: usize,
}

pub struct LibraryDetector<'a> {
    toolchain: &'a dyn Toolchain,
    runner: &'a dyn CommandRunner,
    resolver: &'a LibraryResolver,
    architecture: String,
    base_include_dirs: Vec<PathBuf>,
    build_path: PathBuf,
    cancel: CancelToken,
    max_iterations: usize,

    state: DetectorState,
    queue: VecDeque<PathBuf>,
    done: HashSet<PathBuf>,
    libraries: Vec<ResolvedLibrary>,
    include_folders: Vec<PathBuf>,
    iterations: usize,
}

impl<'a> LibraryDetector<'a> {
    pub fn new(
        toolchain: &'a dyn Toolchain,
        runner: &'a dyn CommandRunner,
        resolver: &'a LibraryResolver,
        architecture: &str,
        base_include_dirs: Vec<PathBuf>,
        build_path: &Path,
    ) -> Self {
        LibraryDetector {
            toolchain,
            runner,
            resolver,
            architecture: architecture.to_string(),
            base_include_dirs,
            build_path: build_path.to_path_buf(),
            cancel: CancelToken::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            state: DetectorState::Probing,
            queue: VecDeque::new(),
            done: HashSet::new(),
            libraries: Vec::new(),
            include_folders: Vec::new(),
            iterations: 0,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    fn probe_output(&self) -> PathBuf {
        self.build_path.join("preproc").join("probe.i")
    }

    /// Run to a fixed point starting from the sketch's translation units.
    pub fn run(mut self, sources: &[PathBuf]) -> BuildResult<DetectionResult> {
        ensure_dir(&self.build_path.join("preproc"))?;
        self.queue.extend(sources.iter().cloned());

        loop {
            if self.step()? == DetectorState::Converged {
                tracing::debug!(
                    "library detection converged after {} probes with {} libraries",
                    self.iterations,
                    self.libraries.len()
                );
                return Ok(DetectionResult {
                    libraries: self.libraries,
                    include_folders: self.include_folders,
                    iterations: self.iterations,
                });
            }
        }
    }

    /// Perform one transition.
    pub fn step(&mut self) -> BuildResult<DetectorState> {
        let current = std::mem::replace(&mut self.state, DetectorState::Failed);
        let next = match current {
            DetectorState::Probing => self.probe(),
            DetectorState::ResolvingMissingHeader { header, file } => {
                self.resolve_missing(&header, file)
            }
            done @ (DetectorState::Converged | DetectorState::Failed) => Ok(done),
        };

        match next {
            Ok(state) => {
                self.state = state.clone();
                Ok(state)
            }
            Err(e) => {
                self.state = DetectorState::Failed;
                Err(e)
            }
        }
    }

    fn include_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.base_include_dirs.clone();
        dirs.extend(self.include_folders.iter().cloned());
        dirs
    }

    fn probe(&mut self) -> BuildResult<DetectorState> {
        if self.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let Some(file) = self.queue.pop_front() else {
            return Ok(DetectorState::Converged);
        };
        if self.done.contains(&file) {
            return Ok(DetectorState::Probing);
        }

        if self.iterations >= self.max_iterations {
            return Err(BuildError::DependencyResolutionDidNotConverge {
                iterations: self.iterations,
                last_file: file,
            });
        }
        self.iterations += 1;

        let command =
            self.toolchain
                .preprocess_command(&file, &self.include_dirs(), &self.probe_output())?;
        tracing::trace!("probe {}: {}", self.iterations, file.display());
        let output = self
            .runner
            .run(&command.to_process(&self.build_path), &self.cancel)?;

        if output.code.is_none() && self.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        if output.success() {
            self.done.insert(file);
            return Ok(DetectorState::Probing);
        }

        let mut diagnostics = output.stderr_lossy();
        diagnostics.push_str(&output.stdout_lossy());
        match missing_header(&diagnostics) {
            Some(header) => Ok(DetectorState::ResolvingMissingHeader { header, file }),
            None => Err(BuildError::CompileFailed {
                file,
                status: output.code,
                diagnostics,
            }),
        }
    }

    fn resolve_missing(&mut self, header: &str, file: PathBuf) -> BuildResult<DetectorState> {
        // Already imported but still missing: probe again, bounded by the budget.
        if self.libraries.iter().any(|l| l.library.provides(header)) {
            tracing::debug!("`{}` still missing from {}", header, file.display());
            self.queue.push_front(file);
            return Ok(DetectorState::Probing);
        }

        let resolved = self.resolver.resolve(header, &file)?;
        let library = &resolved.library;
        if !library.supports_architecture(&self.architecture) {
            return Err(BuildError::IncompatibleLibrary {
                library: library.name.clone(),
                arch: self.architecture.clone(),
                architectures: library.architectures.clone(),
            });
        }

        tracing::info!(
            "using library {} ({}) for {}",
            library.name,
            library.location,
            header
        );

        let dir = library.source_dir();
        if !self.include_folders.contains(&dir) {
            self.include_folders.push(dir);
        }
        self.queue.extend(library.source_files());
        self.queue.push_front(file);
        self.libraries.push(resolved);
        Ok(DetectorState::Probing)
    }
}
