//! Library installation seam.
//!
//! Kiln does not download libraries itself. A [`LibraryInstaller`] knows
//! how to find a release in some index and put it on disk; this module
//! validates a whole request up front and then installs in order.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

/// `Name` or `Name@version` as given on a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryReference {
    pub name: String,
    pub version: Option<String>,
}

impl LibraryReference {
    pub fn parse(s: &str) -> Result<Self> {
        let (name, version) = match s.rsplit_once('@') {
            Some((name, version)) => (name.trim(), Some(version.trim())),
            None => (s.trim(), None),
        };
        if name.is_empty() {
            bail!("invalid library reference `{}`: missing name", s);
        }
        if version.is_some_and(str::is_empty) {
            bail!("invalid library reference `{}`: missing version after `@`", s);
        }
        Ok(LibraryReference {
            name: name.to_string(),
            version: version.map(str::to_string),
        })
    }
}

impl FromStr for LibraryReference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for LibraryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

/// A concrete release chosen for a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRelease {
    pub name: String,
    pub version: String,
}

impl fmt::Display for LibraryRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

pub trait LibraryInstaller {
    /// The release matching `reference`; the latest one when no version is given.
    fn find_release(&self, reference: &LibraryReference) -> Option<LibraryRelease>;

    /// Install `release`, returning its install directory.
    fn install(&self, release: &LibraryRelease) -> Result<PathBuf>;
}

/// Install every referenced library.
///
/// All references are looked up before anything is installed, so an unknown
/// name fails the whole request without side effects.
pub fn install_libraries(
    installer: &dyn LibraryInstaller,
    references: &[LibraryReference],
    on_installed: &mut dyn FnMut(&LibraryRelease, &PathBuf),
) -> Result<Vec<PathBuf>> {
    let mut releases = Vec::with_capacity(references.len());
    for reference in references {
        match installer.find_release(reference) {
            Some(release) => releases.push(release),
            None => bail!("library {} not found", reference),
        }
    }

    let mut installed = Vec::with_capacity(releases.len());
    for release in &releases {
        tracing::info!("installing library {}", release);
        let dir = installer
            .install(release)
            .with_context(|| format!("error installing library {}", release))?;
        on_installed(release, &dir);
        installed.push(dir);
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct MockInstaller {
        available: Vec<LibraryRelease>,
        installed: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl MockInstaller {
        fn new(available: &[(&str, &str)]) -> Self {
            MockInstaller {
                available: available
                    .iter()
                    .map(|(n, v)| LibraryRelease {
                        name: n.to_string(),
                        version: v.to_string(),
                    })
                    .collect(),
                installed: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }
    }

    impl LibraryInstaller for MockInstaller {
        fn find_release(&self, reference: &LibraryReference) -> Option<LibraryRelease> {
            self.available
                .iter()
                .filter(|r| r.name == reference.name)
                .filter(|r| reference.version.as_ref().map_or(true, |v| *v == r.version))
                .last()
                .cloned()
        }

        fn install(&self, release: &LibraryRelease) -> Result<PathBuf> {
            if self.fail_on.as_deref() == Some(release.name.as_str()) {
                bail!("disk full");
            }
            self.installed.lock().unwrap().push(release.to_string());
            Ok(PathBuf::from("/libs").join(&release.name))
        }
    }

    #[test]
    fn test_parse_reference() {
        let r = LibraryReference::parse("AudioZero@1.0.0").unwrap();
        assert_eq!(r.name, "AudioZero");
        assert_eq!(r.version.as_deref(), Some("1.0.0"));
        assert_eq!(r.to_string(), "AudioZero@1.0.0");

        let r: LibraryReference = "Adafruit GFX Library".parse().unwrap();
        assert_eq!(r.version, None);
        assert_eq!(r.to_string(), "Adafruit GFX Library");

        assert!(LibraryReference::parse("@1.0").is_err());
        assert!(LibraryReference::parse("Servo@").is_err());
    }

    #[test]
    fn test_installs_in_order() {
        let installer = MockInstaller::new(&[("Servo", "1.1.0"), ("Servo", "1.2.0"), ("Wire", "1.0")]);
        let refs = vec![
            LibraryReference::parse("Wire").unwrap(),
            LibraryReference::parse("Servo@1.1.0").unwrap(),
        ];

        let mut messages = Vec::new();
        let dirs = install_libraries(&installer, &refs, &mut |r, _| {
            messages.push(format!("Installed {}", r))
        })
        .unwrap();

        assert_eq!(dirs, vec![PathBuf::from("/libs/Wire"), PathBuf::from("/libs/Servo")]);
        assert_eq!(messages, vec!["Installed Wire@1.0", "Installed Servo@1.1.0"]);
    }

    #[test]
    fn test_unknown_reference_installs_nothing() {
        let installer = MockInstaller::new(&[("Servo", "1.1.0")]);
        let refs = vec![
            LibraryReference::parse("Servo").unwrap(),
            LibraryReference::parse("Servo@9.9.9").unwrap(),
        ];

        let err = install_libraries(&installer, &refs, &mut |_, _| {}).unwrap_err();
        assert!(err.to_string().contains("Servo@9.9.9 not found"));
        assert!(installer.installed.lock().unwrap().is_empty());
    }

    #[test]
    fn test_install_failure_names_release() {
        let mut installer = MockInstaller::new(&[("Servo", "1.1.0"), ("Wire", "1.0")]);
        installer.fail_on = Some("Wire".to_string());
        let refs = vec![
            LibraryReference::parse("Servo").unwrap(),
            LibraryReference::parse("Wire").unwrap(),
        ];

        let err = install_libraries(&installer, &refs, &mut |_, _| {}).unwrap_err();
        assert!(err.to_string().contains("Wire@1.0"));
        assert_eq!(*installer.installed.lock().unwrap(), vec!["Servo@1.1.0".to_string()]);
    }
}
