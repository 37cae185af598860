//! Build executor.
//!
//! Compile units run on a dedicated rayon pool bounded by the context's job
//! count. Archive, link and size steps run sequentially afterwards.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::anyhow;
use rayon::prelude::*;
use regex::Regex;

use crate::builder::compile_commands::Command;
use crate::builder::context::BuildContext;
use crate::builder::fingerprint::BuildMode;
use crate::builder::plan::CompileUnit;
use crate::builder::toolchain::{
    object_is_stale, ArchiveInput, CommandSpec, CompileInput, LinkInput, PlatformToolchain,
    Toolchain,
};
use crate::errors::{BuildError, BuildResult};
use crate::util::fs::{ensure_dir, modified, remove_file_if_exists};
use crate::util::process::ProcessOutput;

/// Number of worker threads for a configured job count.
pub fn effective_jobs(jobs: i32) -> usize {
    if jobs > 0 {
        return jobs as usize;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Memory use reported by the size recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeReport {
    pub program: u64,
    pub max_program: Option<u64>,
    pub data: Option<u64>,
    pub max_data: Option<u64>,
}

/// Runs the commands of one build against a context.
pub struct BuildExecutor<'a> {
    ctx: &'a BuildContext,
    toolchain: PlatformToolchain,
    mode: BuildMode,
}

impl<'a> BuildExecutor<'a> {
    pub fn new(ctx: &'a BuildContext, mode: BuildMode) -> Self {
        BuildExecutor {
            ctx,
            toolchain: ctx.toolchain(),
            mode,
        }
    }

    fn dry_run(&self) -> bool {
        self.ctx.only_update_compilation_database
    }

    /// Compile `units` in parallel, returning their objects sorted by source path.
    ///
    /// Once a unit fails no new unit starts; units already running finish.
    /// The first failure in unit order is returned.
    pub fn compile_units(&self, units: &[CompileUnit]) -> BuildResult<Vec<PathBuf>> {
        if units.is_empty() {
            return Ok(Vec::new());
        }

        let jobs = effective_jobs(self.ctx.jobs);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .thread_name(|i| format!("kiln-compile-{}", i))
            .build()
            .map_err(|e| anyhow!("failed to start compile pool: {}", e))?;
        tracing::debug!("compiling {} units with {} jobs", units.len(), jobs);

        let failed = AtomicBool::new(false);
        let results: Vec<BuildResult<()>> = pool.install(|| {
            units
                .par_iter()
                .map(|unit| {
                    if failed.load(Ordering::SeqCst) || self.ctx.cancel.is_cancelled() {
                        return Ok(());
                    }
                    let result = self.compile_unit(unit);
                    if result.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    result
                })
                .collect()
        });

        if let Some(err) = results.into_iter().find_map(Result::err) {
            return Err(err);
        }
        if self.ctx.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let mut sorted: Vec<&CompileUnit> = units.iter().collect();
        sorted.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(sorted.into_iter().map(|u| u.object.clone()).collect())
    }

    fn compile_unit(&self, unit: &CompileUnit) -> BuildResult<()> {
        let command = self.toolchain.compile_command(&CompileInput {
            source: unit.source.clone(),
            output: unit.object.clone(),
            include_dirs: unit.include_dirs.clone(),
        })?;
        self.ctx
            .compilation_database
            .add(Command::new(&self.ctx.build_path, &command, &unit.source));

        if self.dry_run() {
            self.ctx.complete_progress_step();
            return Ok(());
        }

        if self.mode == BuildMode::Incremental && !object_is_stale(&unit.source, &unit.object) {
            tracing::debug!("{} is up to date", unit.object.display());
            if self.ctx.verbose {
                self.ctx
                    .info(&format!("Using previously compiled file: {}", unit.object.display()))?;
            }
            self.ctx.complete_progress_step();
            return Ok(());
        }

        if let Some(parent) = unit.object.parent() {
            ensure_dir(parent)?;
        }
        let output = self.run(&command, &unit.source)?;
        if !output.stderr.is_empty() {
            self.ctx.write_err(&output.stderr)?;
        }
        self.ctx.complete_progress_step();
        Ok(())
    }

    /// Run `command`, mapping a non-zero exit to [`BuildError::CompileFailed`] for `file`.
    fn run(&self, command: &CommandSpec, file: &Path) -> BuildResult<ProcessOutput> {
        if self.ctx.verbose {
            self.ctx.info(&command.argv().join(" "))?;
        }
        let output = self
            .ctx
            .runner
            .run(&command.to_process(&self.ctx.build_path), &self.ctx.cancel)?;

        if output.code.is_none() && self.ctx.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        if !output.success() {
            return Err(BuildError::CompileFailed {
                file: file.to_path_buf(),
                status: output.code,
                diagnostics: output.stderr_lossy(),
            });
        }
        Ok(output)
    }

    /// Archive core objects into the core archive, one call per object.
    ///
    /// Skipped when the archive is newer than every object.
    pub fn archive_core(&self, objects: &[PathBuf]) -> BuildResult<()> {
        if self.dry_run() {
            return Ok(());
        }
        if self.ctx.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let archive = &self.ctx.core_archive_file_path;
        if let Some(archived) = modified(archive) {
            let newest = objects.iter().filter_map(|o| modified(o)).max();
            if newest.is_some_and(|t| t <= archived) {
                tracing::debug!("{} is up to date", archive.display());
                self.ctx.complete_progress_step();
                return Ok(());
            }
        }

        remove_file_if_exists(archive)?;
        if let Some(parent) = archive.parent() {
            ensure_dir(parent)?;
        }
        for object in objects {
            if self.ctx.cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            let command = self.toolchain.archive_command(&ArchiveInput {
                object: object.clone(),
                archive: archive.clone(),
            })?;
            self.run(&command, object)?;
        }
        tracing::debug!("archived {} core objects", objects.len());
        self.ctx.complete_progress_step();
        Ok(())
    }

    /// Link the executable and run every objcopy recipe.
    pub fn link(&self, objects: &[PathBuf]) -> BuildResult<()> {
        if self.dry_run() {
            return Ok(());
        }
        if self.ctx.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let elf = self.elf_path();
        let command = self.toolchain.link_command(&LinkInput {
            objects: objects.to_vec(),
            archive: self.ctx.core_archive_file_path.clone(),
        })?;
        self.run(&command, &elf)?;

        for command in self.toolchain.objcopy_commands()? {
            if self.ctx.cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            self.run(&command, &elf)?;
        }
        self.ctx.complete_progress_step();
        Ok(())
    }

    fn elf_path(&self) -> PathBuf {
        let name = self
            .ctx
            .build_properties
            .get_or_empty("build.project_name")
            .to_string();
        self.ctx.build_path.join(format!("{}.elf", name))
    }

    /// Measure the executable and check it fits the board.
    pub fn check_size(&self) -> BuildResult<Option<SizeReport>> {
        if self.dry_run() {
            return Ok(None);
        }
        let Some(command) = self.toolchain.size_command() else {
            tracing::debug!("platform has no size recipe");
            return Ok(None);
        };
        let output = self.run(&command?, &self.elf_path())?;
        let stdout = output.stdout_lossy();
        let props = &self.ctx.build_properties;

        let program = match props.get("recipe.size.regex") {
            Some(pattern) => sum_matches(pattern, &stdout)?,
            None => return Ok(None),
        };
        let data = match props.get("recipe.size.regex.data") {
            Some(pattern) => Some(sum_matches(pattern, &stdout)?),
            None => None,
        };
        let limit = |key: &str| props.get(key).and_then(|v| v.trim().parse::<u64>().ok());
        let report = SizeReport {
            program,
            max_program: limit("upload.maximum_size"),
            data,
            max_data: limit("upload.maximum_data_size"),
        };

        self.ctx.info(&usage_line(
            "Sketch uses",
            report.program,
            report.max_program,
            "program storage space",
        ))?;
        if let Some(data) = report.data {
            self.ctx.info(&usage_line(
                "Global variables use",
                data,
                report.max_data,
                "dynamic memory",
            ))?;
        }

        if let Some(max) = report.max_program.filter(|m| *m > 0 && report.program > *m) {
            return Err(BuildError::SketchTooBig {
                section: "program storage space".to_string(),
                size: report.program,
                max,
            });
        }
        if let (Some(data), Some(max)) = (report.data, report.max_data.filter(|m| *m > 0)) {
            if data > max {
                return Err(BuildError::SketchTooBig {
                    section: "dynamic memory".to_string(),
                    size: data,
                    max,
                });
            }
        }
        Ok(Some(report))
    }
}

/// Sum the first capture group of `pattern` over every line of `text`.
fn sum_matches(pattern: &str, text: &str) -> BuildResult<u64> {
    let re = Regex::new(pattern).map_err(|e| anyhow!("invalid size pattern `{}`: {}", pattern, e))?;
    Ok(text
        .lines()
        .filter_map(|line| re.captures(line))
        .filter_map(|c| c.get(1)?.as_str().parse::<u64>().ok())
        .sum())
}

fn usage_line(prefix: &str, used: u64, max: Option<u64>, what: &str) -> String {
    match max.filter(|m| *m > 0) {
        Some(max) => format!(
            "{} {} bytes ({}%) of {}. Maximum is {} bytes.",
            prefix,
            used,
            used * 100 / max,
            what,
            max
        ),
        None => format!("{} {} bytes of {}.", prefix, used, what),
    }
}
