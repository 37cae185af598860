//! Core data structures for Kiln.
//!
//! - Board identity (FQBN)
//! - Property maps read from platform files
//! - Installed packages, platforms, boards and tools
//! - Libraries and sketches

pub mod fqbn;
pub mod library;
pub mod package;
pub mod properties;
pub mod sketch;

pub use fqbn::Fqbn;
pub use library::{Library, LibraryLayout, LibraryLocation};
pub use package::{Board, PackageIndex, PlatformRelease, Programmer, ToolRelease};
pub use properties::PropertyMap;
pub use sketch::{Sketch, SourceOverrides};
