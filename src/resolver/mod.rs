//! Board and library resolution.
//!
//! Resolution is pure with respect to the filesystem at call time: the
//! package index and library roots are scanned up front, and the resolvers
//! only consult those snapshots (plus preprocessor probes for detection).

pub mod detector;
pub mod libraries;
pub mod platform;

pub use detector::{DetectionResult, DetectorState, LibraryDetector, DEFAULT_MAX_ITERATIONS};
pub use libraries::{LibraryResolver, ResolvedLibrary};
pub use platform::{PlatformResolver, ResolvedPlatform};
