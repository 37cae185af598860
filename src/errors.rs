//! Build error types and diagnostics.

use std::path::PathBuf;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::util::diagnostic::{suggestions, Diagnostic};

/// Result alias used throughout the build engine.
pub type BuildResult<T> = Result<T, BuildError>;

/// Everything that can stop a build.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum BuildError {
    #[error("board `{fqbn}` not found: {reason}")]
    #[diagnostic(code(kiln::resolve::board_not_found))]
    BoardNotFound { fqbn: String, reason: String },

    #[error("invalid FQBN `{fqbn}`: {reason}")]
    #[diagnostic(code(kiln::resolve::invalid_fqbn))]
    InvalidFqbn { fqbn: String, reason: String },

    #[error("invalid option `{key}={value}` for FQBN `{fqbn}`: {reason}")]
    #[diagnostic(code(kiln::resolve::invalid_fqbn_option))]
    InvalidFqbnOption {
        fqbn: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("tool `{packager}:{name}@{version}` is not installed")]
    #[diagnostic(
        code(kiln::resolve::tool_not_installed),
        help("reinstall the platform that depends on this tool")
    )]
    ToolNotInstalled {
        packager: String,
        name: String,
        version: String,
    },

    #[error("programmer `{programmer}` not found for board `{fqbn}`")]
    #[diagnostic(code(kiln::resolve::programmer_not_found))]
    ProgrammerNotFound { programmer: String, fqbn: String },

    #[error("no library found for header `{header}` (included from {})", .file.display())]
    #[diagnostic(
        code(kiln::libraries::not_found),
        help("install a library that provides the header")
    )]
    LibraryNotFound { header: String, file: PathBuf },

    #[error("multiple libraries with the same priority provide `{header}`")]
    #[diagnostic(code(kiln::libraries::ambiguous))]
    AmbiguousLibrary {
        header: String,
        candidates: Vec<PathBuf>,
    },

    #[error("library `{library}` does not support architecture `{arch}` (supports: {})", .architectures.join(", "))]
    #[diagnostic(code(kiln::libraries::incompatible))]
    IncompatibleLibrary {
        library: String,
        arch: String,
        architectures: Vec<String>,
    },

    #[error("library dependency resolution did not converge after {iterations} probes (last file: {})", .last_file.display())]
    #[diagnostic(code(kiln::libraries::did_not_converge))]
    DependencyResolutionDidNotConverge { iterations: usize, last_file: PathBuf },

    #[error("compilation of {} failed{}", .file.display(), exit_suffix(.status))]
    #[diagnostic(code(kiln::build::compile_failed))]
    CompileFailed {
        file: PathBuf,
        status: Option<i32>,
        diagnostics: String,
    },

    #[error("build options cache at {} is unreadable: {reason}", .path.display())]
    #[diagnostic(code(kiln::cache::corrupt), severity(Warning))]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("build cancelled")]
    #[diagnostic(code(kiln::build::cancelled))]
    Cancelled,

    #[error("no sketch found at {}: {reason}", .path.display())]
    #[diagnostic(code(kiln::sketch::not_found))]
    SketchNotFound { path: PathBuf, reason: String },

    #[error("sketch uses {size} bytes of {section}, the maximum is {max} bytes")]
    #[diagnostic(code(kiln::build::too_big))]
    SketchTooBig { section: String, size: u64, max: u64 },

    #[error("debugging is not supported for board `{fqbn}`")]
    #[diagnostic(code(kiln::debug::not_supported))]
    DebugNotSupported { fqbn: String },

    #[error("platform does not define the `{recipe}` recipe")]
    #[diagnostic(code(kiln::build::missing_recipe))]
    MissingRecipe { recipe: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn exit_suffix(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!(" (exit status {})", code),
        None => String::new(),
    }
}

impl BuildError {
    /// Errors raised while resolving the board, tools or libraries.
    ///
    /// These abort the build before any compilation starts.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            BuildError::BoardNotFound { .. }
                | BuildError::InvalidFqbn { .. }
                | BuildError::InvalidFqbnOption { .. }
                | BuildError::ToolNotInstalled { .. }
                | BuildError::ProgrammerNotFound { .. }
                | BuildError::LibraryNotFound { .. }
                | BuildError::AmbiguousLibrary { .. }
                | BuildError::IncompatibleLibrary { .. }
                | BuildError::DependencyResolutionDidNotConverge { .. }
        )
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            BuildError::BoardNotFound { .. } | BuildError::InvalidFqbn { .. } => {
                Diagnostic::error(self.to_string()).with_suggestion(suggestions::BOARD_NOT_FOUND)
            }

            BuildError::ToolNotInstalled { .. } => {
                Diagnostic::error(self.to_string()).with_suggestion(suggestions::TOOL_NOT_INSTALLED)
            }

            BuildError::LibraryNotFound { header, file } => {
                Diagnostic::error(format!("no library found for header `{}`", header))
                    .with_location(file)
                    .with_suggestion(suggestions::LIBRARY_NOT_FOUND)
            }

            BuildError::AmbiguousLibrary { header, candidates } => {
                let mut diag = Diagnostic::error(format!(
                    "multiple libraries with the same priority provide `{}`",
                    header
                ));
                for candidate in candidates {
                    diag = diag.with_context(format!("candidate: {}", candidate.display()));
                }
                diag.with_suggestion(suggestions::AMBIGUOUS_LIBRARY)
            }

            BuildError::CompileFailed {
                file, diagnostics, ..
            } => {
                let mut diag = Diagnostic::error(self.to_string()).with_location(file);
                for line in diagnostics.lines().filter(|l| !l.trim().is_empty()) {
                    diag = diag.with_context(line.to_string());
                }
                diag.with_suggestion(suggestions::BUILD_FAILED)
            }

            BuildError::CacheCorrupt { .. } => Diagnostic::warning(self.to_string()),

            _ => Diagnostic::error(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_not_found_diagnostic() {
        let err = BuildError::LibraryNotFound {
            header: "Servo.h".to_string(),
            file: PathBuf::from("/tmp/build/sketch/Sweep.ino.cpp"),
        };

        let output = err.to_diagnostic().format(false);
        assert!(output.contains("Servo.h"));
        assert!(output.contains("Sweep.ino.cpp"));
        assert!(output.contains("kiln lib install"));
        assert!(err.is_resolution_error());
    }

    #[test]
    fn test_compile_failed_message() {
        let err = BuildError::CompileFailed {
            file: PathBuf::from("main.cpp"),
            status: Some(1),
            diagnostics: "main.cpp:3:1: error: expected ';'\n".to_string(),
        };

        assert_eq!(err.to_string(), "compilation of main.cpp failed (exit status 1)");
        assert!(err.to_diagnostic().format(false).contains("expected ';'"));
        assert!(!err.is_resolution_error());
    }

    #[test]
    fn test_ambiguous_lists_candidates() {
        let err = BuildError::AmbiguousLibrary {
            header: "Wire.h".to_string(),
            candidates: vec![PathBuf::from("/a/Wire"), PathBuf::from("/b/Wire2")],
        };
        let output = err.to_diagnostic().format(false);
        assert!(output.contains("candidate: /a/Wire"));
        assert!(output.contains("candidate: /b/Wire2"));
    }
}
