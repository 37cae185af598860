//! Header to library resolution.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::library::{scan_libraries, Library, LibraryLocation};
use crate::errors::{BuildError, BuildResult};

/// A library chosen to satisfy a missing header.
#[derive(Debug, Clone)]
pub struct ResolvedLibrary {
    pub library: Library,
    /// Header that triggered inclusion.
    pub header: String,
    /// File whose probe reported the header missing.
    pub included_from: PathBuf,
    /// Lower-priority libraries that also provide the header.
    pub alternates: Vec<PathBuf>,
}

/// Every installed library, ordered by location priority.
#[derive(Debug, Clone, Default)]
pub struct LibraryResolver {
    libraries: Vec<Library>,
}

impl LibraryResolver {
    /// Build from a list of libraries. Discovery order within a tier is kept.
    pub fn new(mut libraries: Vec<Library>) -> Self {
        libraries.sort_by_key(|l| l.location);
        LibraryResolver { libraries }
    }

    /// Scan library roots, each tagged with its location.
    pub fn scan(roots: &[(PathBuf, LibraryLocation)]) -> Result<Self> {
        let mut libraries = Vec::new();
        for (root, location) in roots {
            libraries.extend(scan_libraries(root, *location)?);
        }
        tracing::debug!("found {} installed libraries", libraries.len());
        Ok(Self::new(libraries))
    }

    pub fn libraries(&self) -> &[Library] {
        &self.libraries
    }

    /// Pick the library providing `header`.
    ///
    /// The highest-priority tier wins; two candidates in that tier are
    /// ambiguous.
    pub fn resolve(&self, header: &str, included_from: &Path) -> BuildResult<ResolvedLibrary> {
        let candidates: Vec<&Library> = self
            .libraries
            .iter()
            .filter(|l| l.provides(header))
            .collect();

        let Some(best) = candidates.first() else {
            return Err(BuildError::LibraryNotFound {
                header: header.to_string(),
                file: included_from.to_path_buf(),
            });
        };

        let tier: Vec<&&Library> = candidates
            .iter()
            .filter(|l| l.location == best.location)
            .collect();
        if tier.len() > 1 {
            return Err(BuildError::AmbiguousLibrary {
                header: header.to_string(),
                candidates: tier.iter().map(|l| l.install_dir.clone()).collect(),
            });
        }

        let alternates: Vec<PathBuf> = candidates[1..]
            .iter()
            .map(|l| l.install_dir.clone())
            .collect();
        if !alternates.is_empty() {
            tracing::debug!(
                "`{}` resolved to {} ({}), ignoring {} alternates",
                header,
                best.name,
                best.location,
                alternates.len()
            );
        }

        Ok(ResolvedLibrary {
            library: (*best).clone(),
            header: header.to_string(),
            included_from: included_from.to_path_buf(),
            alternates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixtures::Fixture;

    #[test]
    fn test_sketch_local_beats_platform() {
        let fx = Fixture::new();
        let sketch_libs = fx.root().join("sketch_libs");
        let platform_libs = fx.root().join("platform_libs");
        let local = fx.add_library(&sketch_libs, "Servo", None);
        let bundled = fx.add_library(&platform_libs, "Servo", None);

        // Scan order must not matter.
        let resolver = LibraryResolver::scan(&[
            (platform_libs, LibraryLocation::Platform),
            (sketch_libs, LibraryLocation::Sketch),
        ])
        .unwrap();

        let resolved = resolver.resolve("Servo.h", Path::new("Sweep.ino.cpp")).unwrap();
        assert_eq!(resolved.library.install_dir, local);
        assert_eq!(resolved.library.location, LibraryLocation::Sketch);
        assert_eq!(resolved.alternates, vec![bundled]);
    }

    #[test]
    fn test_not_found_names_header_and_file() {
        let resolver = LibraryResolver::default();
        let err = resolver.resolve("Nope.h", Path::new("main.cpp")).unwrap_err();
        match err {
            BuildError::LibraryNotFound { header, file } => {
                assert_eq!(header, "Nope.h");
                assert_eq!(file, PathBuf::from("main.cpp"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_same_tier_is_ambiguous() {
        let fx = Fixture::new();
        let a = fx.root().join("a");
        let b = fx.root().join("b");
        fx.add_library(&a, "Servo", None);
        fx.add_library(&b, "Servo", None);

        let resolver = LibraryResolver::scan(&[
            (a, LibraryLocation::User),
            (b, LibraryLocation::User),
        ])
        .unwrap();
        assert!(matches!(
            resolver.resolve("Servo.h", Path::new("x.cpp")),
            Err(BuildError::AmbiguousLibrary { ref candidates, .. }) if candidates.len() == 2
        ));
    }
}
