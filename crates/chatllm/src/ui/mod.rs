//! Terminal output: notices and progress indicators.

mod progress;
mod terminal;

pub use progress::ProgressGuard;
pub use terminal::TerminalSurface;

/// Visual weight of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A titled message shown to the user as a panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            title: "Error".to_string(),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            title: "Warning".to_string(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: Severity::Info,
        }
    }
}

/// Where the chat layer reports to.
pub trait OutputSurface: Send + Sync {
    /// Show a notice panel.
    fn notify(&self, notice: Notice);

    /// Start a progress indicator. It is cleared when the guard drops.
    fn progress(&self, message: &str) -> ProgressGuard;
}
