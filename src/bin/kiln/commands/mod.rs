//! Command implementations

pub mod compile;
pub mod completions;
pub mod debug_config;

/// Flags shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct GlobalArgs {
    pub verbose: bool,
    pub no_color: bool,
    pub json: bool,
}
