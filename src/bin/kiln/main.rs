//! Kiln CLI - incremental builds for embedded sketches

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kiln::BuildError;

mod cli;
mod commands;

use cli::{Cli, Commands, OutputFormat};

fn main() {
    let cli = Cli::parse();
    let json = cli.format == OutputFormat::Json;
    let color = !cli.no_color;

    if let Err(e) = run(cli) {
        match e.downcast_ref::<BuildError>() {
            Some(build_error) if !json => {
                eprint!("{}", build_error.to_diagnostic().format(color && use_color()));
            }
            _ => eprintln!("error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn use_color() -> bool {
    use std::io::IsTerminal;
    std::io::stderr().is_terminal()
}

fn run(cli: Cli) -> Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("kiln=debug")
    } else {
        EnvFilter::new("kiln=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let global = commands::GlobalArgs {
        verbose: cli.verbose,
        no_color: cli.no_color,
        json: cli.format == OutputFormat::Json,
    };

    match cli.command {
        Commands::Compile(args) => commands::compile::execute(args, global),
        Commands::DebugConfig(args) => commands::debug_config::execute(args, global),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
