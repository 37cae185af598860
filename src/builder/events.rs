//! Build event types.
//!
//! [`ProgressEvent`] is what the progress callback receives. [`BuildEvent`]
//! is the line-delimited JSON schema printed with `--format json`.
//!
//! # Event Types
//!
//! - `build-started`: board and build directory are known
//! - `library-resolved`: a header was satisfied by a library
//! - `build-progress`: percentage update
//! - `build-finished`: build completed (success or failure)

use std::path::PathBuf;

use serde::Serialize;

/// Payload delivered to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub percent: f32,
    pub completed: bool,
}

impl ProgressEvent {
    pub fn new(percent: f32) -> Self {
        ProgressEvent {
            percent,
            completed: percent >= 100.0,
        }
    }
}

/// A build event emitted during the build process.
///
/// Each event is serialized as a single JSON object per line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason")]
pub enum BuildEvent {
    #[serde(rename = "build-started")]
    BuildStarted {
        fqbn: String,
        build_path: PathBuf,
    },

    #[serde(rename = "library-resolved")]
    LibraryResolved {
        name: String,
        header: String,
        location: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },

    #[serde(rename = "build-progress")]
    Progress { percent: f32, completed: bool },

    #[serde(rename = "build-finished")]
    BuildFinished {
        success: bool,
        duration_ms: u64,
        /// Compile units that were (or, in a dry run, would have been) compiled
        #[serde(skip_serializing_if = "Option::is_none")]
        units: Option<u64>,
    },
}

impl BuildEvent {
    pub fn started(fqbn: impl Into<String>, build_path: PathBuf) -> Self {
        BuildEvent::BuildStarted {
            fqbn: fqbn.into(),
            build_path,
        }
    }

    pub fn finished(success: bool, duration_ms: u64) -> Self {
        BuildEvent::BuildFinished {
            success,
            duration_ms,
            units: None,
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<ProgressEvent> for BuildEvent {
    fn from(event: ProgressEvent) -> Self {
        BuildEvent::Progress {
            percent: event.percent,
            completed: event.completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_completed_flag() {
        assert!(!ProgressEvent::new(99.9).completed);
        assert!(ProgressEvent::new(100.0).completed);
    }

    #[test]
    fn test_progress_serialization() {
        let json = BuildEvent::from(ProgressEvent::new(50.0)).to_json();
        assert!(json.contains("\"reason\":\"build-progress\""));
        assert!(json.contains("\"percent\":50.0"));
        assert!(json.contains("\"completed\":false"));
    }

    #[test]
    fn test_finished_serialization() {
        let json = BuildEvent::finished(true, 2340).to_json();
        assert!(json.contains("\"reason\":\"build-finished\""));
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("units"));
    }
}
