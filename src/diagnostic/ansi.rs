use super::Diagnostic;
use crate::lexer::SourceMap;

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn bold(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold_red(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;31m{s}\x1b[0m") } else { s.to_string() }
    }

    fn cyan(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[36m{s}\x1b[0m") } else { s.to_string() }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[2m{s}\x1b[0m") } else { s.to_string() }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "error[NYR-C001]: message"
        let head = match d.code {
            Some(code) => format!("error[{code}]"),
            None => "error".to_string(),
        };
        out.push_str(&format!("{}: {}\n", self.bold_red(&head), self.bold(&d.message)));

        let map = d.source.as_deref().map(SourceMap::new);
        let primary = d.labels.iter().find(|l| l.is_primary);
        match (primary, &d.source, &map) {
            (Some(label), Some(source), Some(map)) => {
                let (line, col) = map.lookup(label.span.start);
                let line_text = map.line_text(source, line);

                out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), line, col));

                let gutter = line.to_string().len();
                let pipe = self.cyan("|");
                let pad = " ".repeat(gutter);

                out.push_str(&format!("{pad} {pipe}\n"));
                let line_num = self.cyan(&format!("{line:>gutter$}"));
                out.push_str(&format!("{line_num} {pipe} {line_text}\n"));

                // Carets stop at the end of the line for spans that run on.
                let start = col - 1;
                let room = line_text.len().saturating_sub(start).max(1);
                let width = label.span.end.saturating_sub(label.span.start).clamp(1, room);
                let carets = self.bold_red(&"^".repeat(width));
                let indent = " ".repeat(start);
                if label.message.is_empty() {
                    out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
                } else {
                    out.push_str(&format!(
                        "{pad} {pipe} {indent}{carets} {}\n",
                        self.bold_red(&label.message)
                    ));
                }
                out.push_str(&format!("{pad} {pipe}\n"));
            }
            _ => {
                if let Some(line) = d.line {
                    out.push_str(&format!("  {} line {}\n", self.cyan("-->"), line));
                }
            }
        }

        for label in d.labels.iter().filter(|l| !l.is_primary) {
            match &map {
                Some(map) => {
                    let (line, col) = map.lookup(label.span.start);
                    out.push_str(&format!(
                        "  {} {} at {}:{}\n",
                        self.dim("="),
                        label.message,
                        line,
                        col
                    ));
                }
                None => out.push_str(&format!("  {} {}\n", self.dim("="), label.message)),
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }

        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} help: {}\n", self.dim("="), suggestion));
        }

        out
    }
}
