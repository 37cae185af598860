//! Terminal output for the CLI.
//!
//! Human mode prints right-aligned status lines on stderr and a percentage
//! progress bar; JSON mode prints one [`BuildEvent`] per line on stdout and
//! nothing else.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::builder::events::{BuildEvent, ProgressEvent};

/// Output mode. Human and Json are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMode {
    Human { verbose: bool, color: bool },
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Compiling,
    Using,
    Finished,
    Info,
    Warning,
    Error,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Compiling => "Compiling",
            Status::Using => "Using",
            Status::Finished => "Finished",
            Status::Info => "Info",
            Status::Warning => "Warning",
            Status::Error => "error",
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Status::Finished => "\x1b[1;32m",
            Status::Compiling | Status::Using => "\x1b[1;36m",
            Status::Info => "\x1b[1;34m",
            Status::Warning => "\x1b[1;33m",
            Status::Error => "\x1b[1;31m",
        }
    }
}

const STATUS_WIDTH: usize = 12;

#[derive(Debug)]
pub struct Shell {
    mode: ShellMode,
    bar: Mutex<Option<ProgressBar>>,
}

impl Shell {
    pub fn new(mode: ShellMode) -> Self {
        Shell {
            mode,
            bar: Mutex::new(None),
        }
    }

    /// Pick the mode from CLI flags; JSON wins over verbosity.
    pub fn from_flags(verbose: bool, no_color: bool, json: bool) -> Self {
        if json {
            return Shell::new(ShellMode::Json);
        }
        Shell::new(ShellMode::Human {
            verbose,
            color: !no_color && io::stderr().is_terminal(),
        })
    }

    pub fn is_json(&self) -> bool {
        matches!(self.mode, ShellMode::Json)
    }

    pub fn is_verbose(&self) -> bool {
        matches!(self.mode, ShellMode::Human { verbose: true, .. })
    }

    /// `{status:>12} {message}` on stderr. Ignored in JSON mode.
    pub fn status(&self, status: Status, msg: impl Display) {
        if self.is_json() {
            return;
        }
        let line = format!("{} {}", self.format_status(status), msg);
        match self.bar.lock().ok().as_deref().and_then(Option::as_ref) {
            Some(bar) => bar.println(line),
            None => eprintln!("{}", line),
        }
    }

    pub fn warn(&self, msg: impl Display) {
        self.status(Status::Warning, msg);
    }

    /// Report an error; in JSON mode as an `error` event.
    pub fn error(&self, msg: impl Display) {
        if self.is_json() {
            let event = serde_json::json!({ "reason": "error", "message": msg.to_string() });
            println!("{}", event);
            let _ = io::stdout().flush();
        } else {
            self.status(Status::Error, msg);
        }
    }

    /// Print a build event as a JSON line. Ignored in human mode.
    pub fn event(&self, event: &BuildEvent) {
        if !self.is_json() {
            return;
        }
        println!("{}", event.to_json());
        let _ = io::stdout().flush();
    }

    fn format_status(&self, status: Status) -> String {
        let text = status.as_str();
        match self.mode {
            ShellMode::Human { color: true, .. } => format!(
                "{}{:>width$}\x1b[0m",
                status.color_code(),
                text,
                width = STATUS_WIDTH
            ),
            _ => format!("{:>width$}", text, width = STATUS_WIDTH),
        }
    }

    /// Start a percentage bar. Verbose and JSON modes get no bar.
    pub fn start_progress(&self, msg: impl Display) {
        if self.is_json() || self.is_verbose() || !io::stderr().is_terminal() {
            return;
        }
        let bar = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos:>3}%")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_message(msg.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    /// Feed one progress event to the bar, or print it as JSON.
    pub fn progress(&self, event: &ProgressEvent) {
        if self.is_json() {
            self.event(&BuildEvent::from(*event));
            return;
        }
        if let Ok(slot) = self.bar.lock() {
            if let Some(bar) = slot.as_ref() {
                bar.set_position(event.percent.clamp(0.0, 100.0) as u64);
            }
        }
    }

    pub fn finish_progress(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(bar) = slot.take() {
                bar.finish_and_clear();
            }
        }
    }
}

/// `0.42s` below a minute, `1.5m` above.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{:.2}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes() {
        let shell = Shell::from_flags(true, true, false);
        assert!(shell.is_verbose());
        assert!(!shell.is_json());

        let json = Shell::from_flags(true, false, true);
        assert!(json.is_json());
        assert!(!json.is_verbose());
    }

    #[test]
    fn test_status_is_right_aligned() {
        let shell = Shell::new(ShellMode::Human {
            verbose: false,
            color: false,
        });
        let formatted = shell.format_status(Status::Using);
        assert_eq!(formatted.trim(), "Using");
        assert_eq!(formatted.len(), STATUS_WIDTH);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "0.50s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5m");
    }
}
