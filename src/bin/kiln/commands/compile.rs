//! `kiln compile` command

use std::io;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::cli::CompileArgs;
use crate::commands::GlobalArgs;
use kiln::builder::context::OutputSinks;
use kiln::builder::{BuildEvent, BuildMode, ProgressReporter};
use kiln::ops::{compile, prepare_context, CompileOptions};
use kiln::util::shell::format_duration;
use kiln::util::{GlobalContext, Shell, Status};

pub fn execute(args: CompileArgs, global: GlobalArgs) -> Result<()> {
    let gctx = GlobalContext::new()?;
    let shell = Arc::new(Shell::from_flags(global.verbose, global.no_color, global.json));

    let opts = CompileOptions {
        sketch_path: args.sketch,
        fqbn: args.fqbn,
        build_path: args.build_path,
        build_properties: args.build_property,
        warnings: args.warnings,
        jobs: args.jobs,
        clean: args.clean,
        only_update_compilation_database: args.only_compilation_database,
        verbose: global.verbose,
        libraries: args.libraries,
        ..Default::default()
    };

    let mut ctx = prepare_context(&gctx, &opts)?;
    // Keep stdout clean for JSON lines.
    ctx.sinks = if shell.is_json() {
        Arc::new(OutputSinks::new(Box::new(io::stderr()), Box::new(io::stderr())))
    } else {
        Arc::new(OutputSinks::stdio())
    };

    let reporter_shell = Arc::clone(&shell);
    let (tx, reporter) = ProgressReporter::spawn(move |event| reporter_shell.progress(&event));
    ctx.set_progress_sender(tx);

    let start = Instant::now();
    shell.start_progress(format!("Compiling {}", ctx.sketch.name));
    let result = compile(&mut ctx, &mut |event| {
        shell.event(event);
        if let BuildEvent::LibraryResolved {
            name,
            location,
            version,
            ..
        } = event
        {
            let version = version.as_deref().map(|v| format!(" {}", v)).unwrap_or_default();
            shell.status(
                Status::Using,
                format!("library {}{} ({})", name, version, location),
            );
        }
    });
    ctx.close_progress();
    reporter.join();
    shell.finish_progress();

    let result = result?;
    let summary = match result.mode {
        BuildMode::Clean => "clean build",
        BuildMode::Incremental => "incremental build",
    };
    if opts.only_update_compilation_database {
        shell.status(
            Status::Finished,
            format!("compilation database at {}", result.compilation_database.display()),
        );
    } else if let Some(executable) = &result.executable {
        shell.status(
            Status::Finished,
            format!(
                "{} of {} units in {} -> {}",
                summary,
                result.units,
                format_duration(start.elapsed()),
                executable.display()
            ),
        );
    }

    Ok(())
}
