//! Ordered property maps (`platform.txt`, `boards.txt`, `programmers.txt`).
//!
//! The format is one `key=value` per line with `#` comments. Keys ending
//! in an OS suffix (`.linux`, `.windows`, `.macosx`) override the plain key
//! on the matching host and are dropped elsewhere.

use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;

/// Maximum number of `{var}` substitution passes.
const MAX_EXPANSION_PASSES: usize = 10;

const OS_SUFFIXES: &[&str] = &["linux", "windows", "macosx", "freebsd"];

/// OS suffix used by platform files for the running host.
pub fn host_os_suffix() -> &'static str {
    match std::env::consts::OS {
        "windows" => "windows",
        "macos" => "macosx",
        "freebsd" => "freebsd",
        _ => "linux",
    }
}

/// An insertion-ordered string map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMap {
    entries: IndexMap<String, String>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse property text for the current host.
    pub fn parse(text: &str) -> Self {
        Self::parse_for_os(text, host_os_suffix())
    }

    /// Parse property text, resolving OS-specific keys for `os`.
    pub fn parse_for_os(text: &str, os: &str) -> Self {
        let mut map = PropertyMap::new();
        let mut overrides = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key.rsplit_once('.') {
                Some((base, suffix)) if OS_SUFFIXES.contains(&suffix) => {
                    if suffix == os {
                        overrides.push((base.to_string(), value.to_string()));
                    }
                }
                _ => map.set(key, value),
            }
        }

        for (key, value) in overrides {
            map.set(key, value);
        }
        map
    }

    /// Load a property file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    /// Load a property file, returning an empty map when it does not exist.
    pub fn load_if_exists(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Overlay `other` on top of this map. Existing keys keep their position.
    pub fn merge(&mut self, other: &PropertyMap) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    /// Keys under `prefix.`, with the prefix stripped.
    pub fn sub_tree(&self, prefix: &str) -> PropertyMap {
        let dotted = format!("{}.", prefix);
        let mut sub = PropertyMap::new();
        for (key, value) in self.iter() {
            if let Some(rest) = key.strip_prefix(&dotted) {
                sub.set(rest, value);
            }
        }
        sub
    }

    /// Distinct first path components, in first-seen order.
    pub fn first_level_keys(&self) -> Vec<String> {
        let mut seen: IndexMap<&str, ()> = IndexMap::new();
        for key in self.keys() {
            let first = key.split('.').next().unwrap_or(key);
            seen.insert(first, ());
        }
        seen.into_keys().map(str::to_string).collect()
    }

    /// Substitute `{key}` references. Unknown references are left in place.
    pub fn expand(&self, template: &str) -> String {
        let mut current = template.to_string();
        for _ in 0..MAX_EXPANSION_PASSES {
            let next = self.expand_once(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn expand_once(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let name = &after[..close];
                    match self.get(name) {
                        Some(value) if !name.contains('{') => out.push_str(value),
                        _ => {
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Expand `key` in place of its own value.
    pub fn expand_key(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| self.expand(v))
    }
}

impl FromIterator<(String, String)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = PropertyMap::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

/// Split an expanded command line into arguments, honouring quotes.
pub fn split_quoted_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    in_arg = true;
                }
                c if c.is_whitespace() => {
                    if in_arg {
                        args.push(std::mem::take(&mut current));
                        in_arg = false;
                    }
                }
                c => {
                    current.push(c);
                    in_arg = true;
                }
            },
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}
