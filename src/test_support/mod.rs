//! Test utilities for Kiln unit tests.
//!
//! [`FakeCompiler`] stands in for a GCC-style toolchain: it resolves
//! `#include` directives against `-I` folders, reports missing headers the
//! way GCC does, and writes objects, dependency files and archives so the
//! incremental logic sees real timestamps.
//!
//! ```rust,ignore
//! let fake = Arc::new(FakeCompiler::new().with_delay_ms(10));
//! ctx.runner = fake.clone();
//! // ... run a build ...
//! assert!(fake.max_concurrency() <= 2);
//! ```

pub mod fixtures;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use anyhow::Result;
use regex::Regex;

use crate::core::library::SOURCE_EXTENSIONS;
use crate::util::fs::has_extension;
use crate::util::process::{CancelToken, CommandRunner, ProcessBuilder, ProcessOutput};

pub use fixtures::*;

static INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*#\s*include\s*[<"]([^>"]+)[>"]"#).unwrap());

/// Output of a successful command.
pub fn ok_output(stdout: impl Into<String>) -> ProcessOutput {
    ProcessOutput {
        code: Some(0),
        stdout: stdout.into().into_bytes(),
        stderr: Vec::new(),
    }
}

/// Output of a failed command.
pub fn failed_output(code: i32, stderr: impl Into<String>) -> ProcessOutput {
    ProcessOutput {
        code: Some(code),
        stdout: Vec::new(),
        stderr: stderr.into().into_bytes(),
    }
}

/// GCC's message for an unresolvable include.
pub fn missing_header_message(file: &Path, line: usize, header: &str) -> String {
    format!(
        "{}:{}:10: fatal error: {}: No such file or directory\ncompilation terminated.\n",
        file.display(),
        line,
        header
    )
}

/// In-process compiler, archiver, objcopy and size tool.
#[derive(Debug, Default)]
pub struct FakeCompiler {
    delay: Duration,
    size: Option<(u64, u64)>,
    failing: HashSet<String>,
    hidden: HashSet<String>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    compiled: AtomicUsize,
    invocations: Mutex<Vec<String>>,
}

impl FakeCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long in every invocation.
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    /// Report `text` bytes of `.text` and `data` bytes each of `.data` and `.bss`.
    pub fn with_size(mut self, text: u64, data: u64) -> Self {
        self.size = Some((text, data));
        self
    }

    /// Fail to compile any source with this file name.
    pub fn fail_on(mut self, file_name: &str) -> Self {
        self.failing.insert(file_name.to_string());
        self
    }

    /// Report `header` as missing even when it is on the include path.
    pub fn hide_header(mut self, header: &str) -> Self {
        self.hidden.insert(header.to_string());
        self
    }

    /// Command lines run so far, in call order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }

    /// Number of `-c` compilations attempted.
    pub fn compiled_count(&self) -> usize {
        self.compiled.load(Ordering::SeqCst)
    }

    /// Highest number of commands that ran at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn dispatch(&self, program: &Path, args: &[String]) -> Result<ProcessOutput> {
        let has = |flag: &str| args.iter().any(|a| a == flag);
        let program_name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if has("-E") {
            return self.compile(args, false);
        }
        if has("-c") {
            self.compiled.fetch_add(1, Ordering::SeqCst);
            return self.compile(args, true);
        }
        if let Some(i) = args.iter().position(|a| a == "rcs") {
            let archive = PathBuf::from(&args[i + 1]);
            let mut content = std::fs::read_to_string(&archive).unwrap_or_default();
            for object in &args[i + 2..] {
                content.push_str(object);
                content.push('\n');
            }
            write_file(&archive, &content)?;
            return Ok(ok_output(""));
        }
        if program_name.ends_with("size") {
            let (text, data) = self.size.unwrap_or((0, 0));
            return Ok(ok_output(format!(
                "sketch.elf  :\nsection size addr\n.data {data} 8388864\n.text {text} 0\n.bss {data} 8388874\nTotal {}\n",
                text + 2 * data
            )));
        }

        let output = match args.iter().position(|a| a == "-o") {
            Some(i) => args.get(i + 1).map(PathBuf::from),
            None if program_name.contains("objcopy") => args.last().map(PathBuf::from),
            None => None,
        };
        if let Some(output) = output {
            write_file(&output, &format!("output of {}\n", program_name))?;
        }
        Ok(ok_output(""))
    }

    fn compile(&self, args: &[String], write_object: bool) -> Result<ProcessOutput> {
        let Some(source) = args
            .iter()
            .map(PathBuf::from)
            .find(|p| has_extension(p, SOURCE_EXTENSIONS) && p.is_file())
        else {
            return Ok(failed_output(1, "fatal error: no input files\n"));
        };
        let include_dirs: Vec<PathBuf> = args
            .iter()
            .filter_map(|a| a.strip_prefix("-I"))
            .map(PathBuf::from)
            .collect();

        let text = std::fs::read_to_string(&source)?;
        if let Some((n, line)) = text.lines().enumerate().find(|(_, l)| l.contains("#error")) {
            return Ok(failed_output(
                1,
                format!("{}:{}:2: error: {}\n", source.display(), n + 1, line.trim()),
            ));
        }
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing.contains(&name) {
            return Ok(failed_output(
                1,
                format!("{}:1:1: error: expected ';' before '}}' token\n", source.display()),
            ));
        }

        let mut deps = vec![source.clone()];
        let mut visited = HashSet::new();
        if let Err((file, line, header)) = scan_includes(&source, &include_dirs, &self.hidden, &mut visited, &mut deps) {
            return Ok(failed_output(1, missing_header_message(&file, line, &header)));
        }

        let output = args
            .iter()
            .position(|a| a == "-o")
            .and_then(|i| args.get(i + 1))
            .map(PathBuf::from);
        if let Some(output) = output {
            if write_object {
                write_file(&output, &format!("object of {}\n", source.display()))?;
                let rule: Vec<String> = deps
                    .iter()
                    .map(|d| d.to_string_lossy().replace(' ', "\\ "))
                    .collect();
                write_file(
                    &output.with_extension("d"),
                    &format!("{}: {}\n", output.display(), rule.join(" \\\n ")),
                )?;
            } else {
                write_file(&output, &text)?;
            }
        }
        Ok(ok_output(""))
    }
}

impl CommandRunner for FakeCompiler {
    fn run(&self, cmd: &ProcessBuilder, cancel: &CancelToken) -> Result<ProcessOutput> {
        if cancel.is_cancelled() {
            return Ok(ProcessOutput::default());
        }
        self.invocations.lock().unwrap().push(cmd.display_command());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let result = self.dispatch(cmd.get_program(), cmd.get_args());
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Follow includes depth-first, collecting every resolved header.
fn scan_includes(
    file: &Path,
    include_dirs: &[PathBuf],
    hidden: &HashSet<String>,
    visited: &mut HashSet<PathBuf>,
    deps: &mut Vec<PathBuf>,
) -> std::result::Result<(), (PathBuf, usize, String)> {
    let text = std::fs::read_to_string(file).unwrap_or_default();
    for (n, line) in text.lines().enumerate() {
        let Some(caps) = INCLUDE.captures(line) else {
            continue;
        };
        let header = &caps[1];
        let local = file.parent().map(|p| p.join(header));
        let found = local
            .into_iter()
            .chain(include_dirs.iter().map(|d| d.join(header)))
            .find(|p| p.is_file())
            .filter(|_| !hidden.contains(header));
        match found {
            Some(path) => {
                if visited.insert(path.clone()) {
                    deps.push(path.clone());
                    scan_includes(&path, include_dirs, hidden, visited, deps)?;
                }
            }
            None => return Err((file.to_path_buf(), n + 1, header.to_string())),
        }
    }
    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// A preprocessor that never finds one header.
#[derive(Debug)]
pub struct AlwaysMissing {
    header: String,
}

impl AlwaysMissing {
    pub fn new(header: &str) -> Self {
        AlwaysMissing {
            header: header.to_string(),
        }
    }
}

impl CommandRunner for AlwaysMissing {
    fn run(&self, cmd: &ProcessBuilder, _cancel: &CancelToken) -> Result<ProcessOutput> {
        let source = cmd
            .get_args()
            .iter()
            .map(PathBuf::from)
            .find(|p| has_extension(p, SOURCE_EXTENSIONS))
            .unwrap_or_default();
        Ok(failed_output(1, missing_header_message(&source, 1, &self.header)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::detector::missing_header;

    #[test]
    fn test_fake_reports_missing_header() {
        let fx = Fixture::new();
        let source = fx.write("s/main.cpp", "#include <Servo.h>\n");
        let out = FakeCompiler::new()
            .run(
                &ProcessBuilder::new("g++").args(["-E", source.to_str().unwrap()]),
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(out.code, Some(1));
        assert_eq!(missing_header(&out.stderr_lossy()), Some("Servo.h".to_string()));
    }

    #[test]
    fn test_fake_writes_object_and_deps() {
        let fx = Fixture::new();
        fx.write("inc/util.h", "#pragma once\n");
        let source = fx.write("s/main.cpp", "#include \"util.h\"\n");
        let object = fx.root().join("out/main.cpp.o");
        let inc = format!("-I{}", fx.root().join("inc").display());

        let fake = FakeCompiler::new();
        let out = fake
            .run(
                &ProcessBuilder::new("g++").args([
                    "-c",
                    inc.as_str(),
                    source.to_str().unwrap(),
                    "-o",
                    object.to_str().unwrap(),
                ]),
                &CancelToken::new(),
            )
            .unwrap();

        assert!(out.success());
        assert!(object.exists());
        let deps = std::fs::read_to_string(object.with_extension("d")).unwrap();
        assert!(deps.contains("util.h"));
        assert_eq!(fake.compiled_count(), 1);
    }
}
