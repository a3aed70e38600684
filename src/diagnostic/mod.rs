pub mod ansi;
pub mod json;
pub mod registry;

use std::ops::Range;

use crate::compiler::{CompileError, CompileErrorKind};
use crate::vm::RuntimeFailure;

/// Byte range into the source a diagnostic points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Span { start: range.start, end: range.end }
    }
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<&'static str>,
    pub message: String,
    /// Line for diagnostics without a span, such as runtime errors.
    pub line: Option<u32>,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            message: message.into(),
            line: None,
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_span(mut self, span: impl Into<Span>, label: impl Into<String>) -> Self {
        self.labels.push(Label { span: span.into(), message: label.into(), is_primary: true });
        self
    }

    pub fn with_secondary_span(mut self, span: impl Into<Span>, label: impl Into<String>) -> Self {
        self.labels.push(Label { span: span.into(), message: label.into(), is_primary: false });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for error types ----

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let mut d = Diagnostic::error(e.kind.to_string())
            .with_code(e.code())
            .with_line(e.line)
            .with_span(e.span.clone(), "here");
        if let CompileErrorKind::DuplicateLocal { previous, .. } = &e.kind {
            d = d.with_secondary_span(previous.clone(), "first declared here");
        }
        if let Some(suggestion) = e.suggestion() {
            d = d.with_suggestion(suggestion);
        }
        d
    }
}

impl From<&RuntimeFailure> for Diagnostic {
    fn from(e: &RuntimeFailure) -> Self {
        let mut d = Diagnostic::error(e.error.to_string())
            .with_code(e.error.code())
            .with_line(e.line);
        for frame in &e.trace {
            d = d.with_note(format!("in {} at line {}", frame.function, frame.line));
        }
        if let Some(suggestion) = e.error.suggestion() {
            d = d.with_suggestion(suggestion);
        }
        d
    }
}
