//! Kiln - an incremental build engine for embedded sketches
//!
//! This crate provides the core library functionality for Kiln: board
//! resolution, library detection, incremental build caching, parallel
//! compilation and compilation database output.

pub mod builder;
pub mod core;
pub mod errors;
pub mod ops;
pub mod resolver;
pub mod util;

/// Test utilities and fakes for Kiln unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides an in-process compiler and fixture builders
/// for installed platforms, libraries and sketches.
#[cfg(test)]
pub mod test_support;

pub use builder::{BuildContext, BuildEvent};
pub use core::{fqbn::Fqbn, library::Library, sketch::Sketch};
pub use errors::{BuildError, BuildResult};
pub use util::context::GlobalContext;
