//! Recipe-driven toolchain.
//!
//! Platforms describe their compiler, archiver and linker as `recipe.*`
//! property templates. This module expands them into [`CommandSpec`]s and
//! implements the object staleness check based on `.d` dependency files.

use std::path::{Path, PathBuf};

use crate::core::properties::{split_quoted_args, PropertyMap};
use crate::errors::{BuildError, BuildResult};
use crate::util::fs::modified;
use crate::util::process::ProcessBuilder;

/// A command to execute, with program, arguments, and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to run
    pub program: PathBuf,
    /// Command arguments
    pub args: Vec<String>,
    /// Environment variables to set
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Create a new command spec.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    /// Build from an already expanded command line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut argv = split_quoted_args(line).into_iter();
        let program = argv.next().filter(|p| !p.is_empty())?;
        Some(CommandSpec::new(program).args(argv))
    }

    /// Program followed by arguments.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.program.to_string_lossy().into_owned()];
        argv.extend(self.args.iter().cloned());
        argv
    }

    pub fn to_process(&self, cwd: &Path) -> ProcessBuilder {
        let mut process = ProcessBuilder::new(&self.program).args(&self.args).cwd(cwd);
        for (key, value) in &self.env {
            process = process.env(key, value);
        }
        process
    }
}

/// Source language, selecting the compile recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    C,
    Cxx,
    Asm,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "c" => Some(Language::C),
            "cpp" | "cc" | "cxx" => Some(Language::Cxx),
            "S" => Some(Language::Asm),
            _ => None,
        }
    }

    pub fn recipe(&self) -> &'static str {
        match self {
            Language::C => "recipe.c.o.pattern",
            Language::Cxx => "recipe.cpp.o.pattern",
            Language::Asm => "recipe.S.o.pattern",
        }
    }
}

/// Input for a compile step.
#[derive(Debug, Clone)]
pub struct CompileInput {
    pub source: PathBuf,
    pub output: PathBuf,
    pub include_dirs: Vec<PathBuf>,
}

/// Input for adding one object to an archive.
#[derive(Debug, Clone)]
pub struct ArchiveInput {
    pub object: PathBuf,
    pub archive: PathBuf,
}

/// Input for the final link.
#[derive(Debug, Clone)]
pub struct LinkInput {
    pub objects: Vec<PathBuf>,
    pub archive: PathBuf,
}

/// Command generation for a platform.
pub trait Toolchain: Send + Sync {
    /// Compile one translation unit.
    fn compile_command(&self, input: &CompileInput) -> BuildResult<CommandSpec>;

    /// Run only the preprocessor on `source`, writing to `output`.
    fn preprocess_command(
        &self,
        source: &Path,
        include_dirs: &[PathBuf],
        output: &Path,
    ) -> BuildResult<CommandSpec>;

    fn archive_command(&self, input: &ArchiveInput) -> BuildResult<CommandSpec>;

    fn link_command(&self, input: &LinkInput) -> BuildResult<CommandSpec>;

    /// Post-link conversions (hex, bin, ...), in recipe name order.
    fn objcopy_commands(&self) -> BuildResult<Vec<CommandSpec>>;

    /// Size report command, if the platform defines one.
    fn size_command(&self) -> Option<BuildResult<CommandSpec>>;
}

/// A [`Toolchain`] backed by a platform's build properties.
#[derive(Debug, Clone)]
pub struct PlatformToolchain {
    properties: PropertyMap,
}

impl PlatformToolchain {
    pub fn new(properties: PropertyMap) -> Self {
        PlatformToolchain { properties }
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    fn expand_recipe(&self, props: &PropertyMap, recipe: &str) -> BuildResult<CommandSpec> {
        let template = props.get(recipe).ok_or_else(|| BuildError::MissingRecipe {
            recipe: recipe.to_string(),
        })?;
        let line = props.expand(template);
        CommandSpec::from_command_line(&line).ok_or_else(|| BuildError::MissingRecipe {
            recipe: recipe.to_string(),
        })
    }
}

/// `"-I<dir>"` arguments in the form platforms expect for `{includes}`.
pub fn includes_arg(dirs: &[PathBuf]) -> String {
    dirs.iter()
        .map(|d| format!("\"-I{}\"", d.display()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quoted_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("\"{}\"", p.display()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl Toolchain for PlatformToolchain {
    fn compile_command(&self, input: &CompileInput) -> BuildResult<CommandSpec> {
        let language = Language::from_path(&input.source).ok_or_else(|| {
            anyhow::anyhow!("unsupported source file: {}", input.source.display())
        })?;

        let mut props = self.properties.clone();
        props.set("includes", includes_arg(&input.include_dirs));
        props.set("source_file", path_str(&input.source));
        props.set("object_file", path_str(&input.output));
        self.expand_recipe(&props, language.recipe())
    }

    fn preprocess_command(
        &self,
        source: &Path,
        include_dirs: &[PathBuf],
        output: &Path,
    ) -> BuildResult<CommandSpec> {
        let mut props = self.properties.clone();
        props.set("includes", includes_arg(include_dirs));
        props.set("source_file", path_str(source));
        props.set("preprocessed_file_path", path_str(output));

        if props.contains_key("recipe.preproc.macros") {
            return self.expand_recipe(&props, "recipe.preproc.macros");
        }

        // Fall back to the C++ compile recipe in preprocess-only mode.
        props.set("object_file", path_str(output));
        let mut command = self.expand_recipe(&props, "recipe.cpp.o.pattern")?;
        let mut replaced = false;
        for arg in command.args.iter_mut() {
            if arg == "-c" {
                *arg = "-E".to_string();
                replaced = true;
            }
        }
        if !replaced {
            command.args.push("-E".to_string());
        }
        Ok(command)
    }

    fn archive_command(&self, input: &ArchiveInput) -> BuildResult<CommandSpec> {
        let mut props = self.properties.clone();
        props.set("object_file", path_str(&input.object));
        props.set("archive_file_path", path_str(&input.archive));
        if let Some(name) = input.archive.file_name() {
            props.set("archive_file", name.to_string_lossy().into_owned());
        }
        self.expand_recipe(&props, "recipe.ar.pattern")
    }

    fn link_command(&self, input: &LinkInput) -> BuildResult<CommandSpec> {
        let mut props = self.properties.clone();
        props.set("object_files", quoted_paths(&input.objects));
        props.set("archive_file_path", path_str(&input.archive));
        if let Some(name) = input.archive.file_name() {
            props.set("archive_file", name.to_string_lossy().into_owned());
        }
        self.expand_recipe(&props, "recipe.c.combine.pattern")
    }

    fn objcopy_commands(&self) -> BuildResult<Vec<CommandSpec>> {
        let mut recipes: Vec<String> = self
            .properties
            .keys()
            .filter(|k| k.starts_with("recipe.objcopy.") && k.ends_with(".pattern"))
            .map(str::to_string)
            .collect();
        recipes.sort();

        recipes
            .iter()
            .map(|recipe| self.expand_recipe(&self.properties, recipe))
            .collect()
    }

    fn size_command(&self) -> Option<BuildResult<CommandSpec>> {
        self.properties
            .contains_key("recipe.size.pattern")
            .then(|| self.expand_recipe(&self.properties, "recipe.size.pattern"))
    }
}

/// Dependency file written next to an object by `-MMD`.
pub fn dep_file_path(object: &Path) -> PathBuf {
    object.with_extension("d")
}

/// Parse a Makefile-style dependency file, returning the prerequisites of
/// its first rule.
pub fn parse_dep_file(text: &str) -> Vec<PathBuf> {
    let joined = text.replace("\\\r\n", " ").replace("\\\n", " ");
    let Some(rule) = joined.lines().find(|l| !l.trim().is_empty()) else {
        return Vec::new();
    };

    // The target ends at the first ':' followed by whitespace, which skips
    // drive letters such as `C:\`.
    let prereqs = match rule.find(": ").or_else(|| rule.strip_suffix(':').map(|r| r.len())) {
        Some(idx) => &rule[(idx + 1).min(rule.len())..],
        None => return Vec::new(),
    };

    let mut deps = Vec::new();
    let mut current = String::new();
    let mut chars = prereqs.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&' ') => {
                current.push(' ');
                chars.next();
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    deps.push(PathBuf::from(std::mem::take(&mut current)));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        deps.push(PathBuf::from(current));
    }
    deps
}

/// Whether `object` must be rebuilt from `source`.
///
/// Stale when the object or its dependency file is missing, or when the
/// source or any listed dependency is missing or newer than the object.
pub fn object_is_stale(source: &Path, object: &Path) -> bool {
    let Some(object_time) = modified(object) else {
        return true;
    };
    match modified(source) {
        Some(t) if t <= object_time => {}
        _ => return true,
    }

    let dep_file = dep_file_path(object);
    let Ok(text) = std::fs::read_to_string(&dep_file) else {
        tracing::trace!("{} has no dependency file", object.display());
        return true;
    };

    parse_dep_file(&text).iter().any(|dep| match modified(dep) {
        Some(t) => t > object_time,
        None => true,
    })
}
