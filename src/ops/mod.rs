//! High-level operations.
//!
//! This module contains the implementation of Kiln commands.

pub mod compile;
pub mod debug_config;
pub mod lib_install;

pub use compile::{compile, prepare_context, CompileOptions, CompileResult};
pub use debug_config::{debug_config, DebugConfig, DebugConfigOptions, OpenOcdConfig};
pub use lib_install::{
    install_libraries, LibraryInstaller, LibraryReference, LibraryRelease,
};
