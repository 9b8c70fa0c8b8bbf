use console::{Style, Term, measure_text_width};

use super::{Notice, OutputSurface, ProgressGuard, Severity};

/// Renders notices as boxed panels on stderr and answers on stdout.
pub struct TerminalSurface {
    err: Term,
    out: Term,
}

impl Default for TerminalSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalSurface {
    pub fn new() -> Self {
        Self {
            err: Term::stderr(),
            out: Term::stdout(),
        }
    }

    pub fn print_response(&self, content: &str) -> std::io::Result<()> {
        self.out.write_line(content.trim_end())?;
        self.out.write_line("")
    }

    /// One dim line summarizing what a turn cost.
    pub fn print_cost(&self, turn_cost: f64, total_cost: f64) -> std::io::Result<()> {
        let line = format!("cost ${turn_cost:.6} · total ${total_cost:.4}");
        self.err.write_line(&Style::new().dim().apply_to(line).to_string())
    }

    pub fn print_line(&self, line: &str) -> std::io::Result<()> {
        self.out.write_line(line)
    }
}

impl OutputSurface for TerminalSurface {
    fn notify(&self, notice: Notice) {
        if let Err(e) = self.err.write_line(&render_panel(&notice)) {
            tracing::warn!(error = %e, "Failed to write notice to terminal");
        }
    }

    fn progress(&self, message: &str) -> ProgressGuard {
        ProgressGuard::spinner(message)
    }
}

fn border_style(severity: Severity) -> Style {
    match severity {
        Severity::Error => Style::new().red().bold(),
        Severity::Warning => Style::new().yellow().bold(),
        Severity::Info => Style::new().cyan(),
    }
}

/// Draw `notice` inside a rounded box with the title set into the top edge.
fn render_panel(notice: &Notice) -> String {
    let border = border_style(notice.severity);
    let text = Style::new().white();

    let lines: Vec<&str> = notice.message.lines().collect();
    let title_width = measure_text_width(&notice.title);
    let content_width = lines
        .iter()
        .map(|line| measure_text_width(line))
        .max()
        .unwrap_or(0);
    let inner = (content_width + 2).max(title_width + 4);

    let mut out = String::new();
    out.push_str(&format!(
        "{}{}{}\n",
        border.apply_to("╭─ "),
        border.apply_to(&notice.title),
        border.apply_to(format!(" {}╮", "─".repeat(inner - title_width - 3)))
    ));
    for line in &lines {
        let pad = inner - 2 - measure_text_width(line);
        out.push_str(&format!(
            "{} {}{} {}\n",
            border.apply_to("│"),
            text.apply_to(line),
            " ".repeat(pad),
            border.apply_to("│")
        ));
    }
    out.push_str(&border.apply_to(format!("╰{}╯", "─".repeat(inner))).to_string());
    out
}
