//! Sketch build system.
//!
//! This module turns a resolved board and library set into compiler,
//! archiver and linker invocations, and keeps the incremental state
//! (fingerprint, dependency files, compilation database) in the build
//! directory.

pub mod compile_commands;
pub mod context;
pub mod events;
pub mod executor;
pub mod fingerprint;
pub mod plan;
pub mod toolchain;

pub use compile_commands::CompilationDatabase;
pub use context::{BuildContext, ProgressReporter};
pub use events::{BuildEvent, ProgressEvent};
pub use executor::{BuildExecutor, SizeReport};
pub use fingerprint::{BuildCache, BuildMode, BuildOptions};
pub use plan::{BuildPlan, CompileUnit, UnitKind};
pub use toolchain::{CommandSpec, Language, PlatformToolchain, Toolchain};
