//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Kiln - incremental builds for embedded sketches
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a sketch for a board
    Compile(CompileArgs),

    /// Print the debugger configuration for a sketch and board
    DebugConfig(DebugConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub struct CompileArgs {
    /// Sketch directory or main sketch file
    #[arg(default_value = ".")]
    pub sketch: PathBuf,

    /// Fully qualified board name, e.g. arduino:avr:uno
    #[arg(short = 'b', long, env = "KILN_FQBN")]
    pub fqbn: String,

    /// Directory for intermediate files and build artifacts
    #[arg(long)]
    pub build_path: Option<PathBuf>,

    /// Override a build property (key=value); may be repeated
    #[arg(long = "build-property", value_name = "KEY=VALUE")]
    pub build_property: Vec<String>,

    /// Compiler warning level: none, default, more or all
    #[arg(long)]
    pub warnings: Option<String>,

    /// Number of parallel jobs (0 = one per CPU)
    #[arg(short, long)]
    pub jobs: Option<i32>,

    /// Discard cached artifacts and rebuild everything
    #[arg(long)]
    pub clean: bool,

    /// Only write compile_commands.json, without compiling
    #[arg(long = "only-compilation-database")]
    pub only_compilation_database: bool,

    /// Extra library directory; may be repeated
    #[arg(long = "library", value_name = "DIR")]
    pub libraries: Vec<PathBuf>,
}

#[derive(Args)]
pub struct DebugConfigArgs {
    /// Sketch directory or main sketch file
    #[arg(default_value = ".")]
    pub sketch: PathBuf,

    /// Fully qualified board name, e.g. arduino:samd:arduino_zero_edbg
    #[arg(short = 'b', long, env = "KILN_FQBN")]
    pub fqbn: String,

    /// Programmer to debug with
    #[arg(short = 'P', long)]
    pub programmer: Option<String>,

    /// Directory holding the compiled sketch
    #[arg(long)]
    pub input_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
