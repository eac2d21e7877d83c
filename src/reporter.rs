use std::fmt;

/// A compile- or runtime-time diagnostic: a message anchored to a source
/// line, with an optional caret span for the offending lexeme. Generalizes
/// the teacher's `reporter.rs`/`Token::fmt` pairing into a single type that
/// both phases share.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub line: u32,
    /// The exact source line text and the byte column the caret should
    /// start at, when available (absent for errors raised without a
    /// current token, e.g. "Can't have more than 255 parameters.").
    pub span: Option<(String, usize, usize)>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        Diagnostic {
            message: message.into(),
            line,
            span: None,
        }
    }

    pub fn with_span(mut self, source_line: &str, column: usize, length: usize) -> Self {
        self.span = Some((source_line.to_string(), column, length));
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] {}", self.line, self.message)?;
        if let Some((line_text, column, length)) = &self.span {
            write!(f, "\n    | {line_text}\n    | {}{}", " ".repeat(*column), "^".repeat((*length).max(1)))?;
        }
        Ok(())
    }
}

/// Collects diagnostics produced while compiling or running. The CLI's
/// `CliReporter` below prints them immediately; tests can swap in a
/// collecting implementation to assert on messages without touching
/// stdout/stderr.
pub trait Reporter {
    fn error(&mut self, diagnostic: Diagnostic);
}

#[derive(Default)]
pub struct CliReporter;

impl Reporter for CliReporter {
    fn error(&mut self, diagnostic: Diagnostic) {
        eprintln!("{diagnostic}");
    }
}

#[derive(Default)]
pub struct CollectingReporter {
    pub errors: Vec<Diagnostic>,
}

impl Reporter for CollectingReporter {
    fn error(&mut self, diagnostic: Diagnostic) {
        self.errors.push(diagnostic);
    }
}
