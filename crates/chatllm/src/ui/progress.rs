use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

// Frames of a bar bouncing between the brackets.
const BOUNCING_BAR: &[&str] = &[
    "[    ]", "[=   ]", "[==  ]", "[=== ]", "[ ===]", "[  ==]", "[   =]", "[    ]", "[   =]",
    "[  ==]", "[ ===]", "[====]", "[=== ]", "[==  ]", "[=   ]", "[====]",
];

/// Spinner that is guaranteed to be closed.
///
/// `finish` leaves a final message on screen; dropping the guard without
/// finishing clears the line instead.
#[must_use = "the spinner is cleared as soon as the guard is dropped"]
pub struct ProgressGuard {
    bar: ProgressBar,
}

impl ProgressGuard {
    /// A ticking spinner on stderr.
    pub fn spinner(message: &str) -> Self {
        let style = ProgressStyle::with_template("{spinner:.green.bold} {msg:.green.bold}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(BOUNCING_BAR);
        let bar = ProgressBar::new_spinner()
            .with_style(style)
            .with_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    /// A guard that draws nothing.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Shared handle to the underlying bar.
    pub fn handle(&self) -> ProgressBar {
        self.bar.clone()
    }

    pub fn finish(self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_closes_unfinished_bar() {
        let guard = ProgressGuard::hidden();
        let handle = guard.handle();
        assert!(!handle.is_finished());
        drop(guard);
        assert!(handle.is_finished());
    }

    #[test]
    fn finish_keeps_final_message() {
        let guard = ProgressGuard::hidden();
        let handle = guard.handle();
        guard.finish("Response received!");
        assert!(handle.is_finished());
        assert_eq!(handle.message(), "Response received!");
    }
}
