//! Structured warnings and errors collected while resolving options.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

/// A single user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    /// The configuration key the message is about, if any.
    pub key: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.summary)?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// An ordered collection of diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, summary: &str, detail: String, key: Option<&str>) {
        self.push(Severity::Error, summary, detail, key);
    }

    pub fn warning(&mut self, summary: &str, detail: String, key: Option<&str>) {
        self.push(Severity::Warning, summary, detail, key);
    }

    fn push(&mut self, severity: Severity, summary: &str, detail: String, key: Option<&str>) {
        self.items.push(Diagnostic {
            severity,
            summary: summary.to_owned(),
            detail,
            key: key.map(str::to_owned),
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    fn count(&self, severity: Severity) -> usize {
        self.items.iter().filter(|d| d.severity == severity).count()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_severity() {
        let mut diags = Diagnostics::new();
        diags.warning("a", String::new(), None);
        diags.error("b", "detail".to_owned(), Some("KEY"));
        diags.warning("c", String::new(), None);

        assert_eq!(diags.len(), 3);
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 2);
        assert!(diags.has_errors());
    }

    #[test]
    fn display_includes_detail_when_present() {
        let mut diags = Diagnostics::new();
        diags.error("Bad value", "not a boolean".to_owned(), Some("ENVBUILDER_VERBOSE"));
        diags.warning("Bare", String::new(), None);
        let rendered: Vec<String> = diags.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["error: Bad value: not a boolean", "warning: Bare"]);
    }

    #[test]
    fn extend_preserves_order() {
        let mut first = Diagnostics::new();
        first.warning("one", String::new(), None);
        let mut second = Diagnostics::new();
        second.error("two", String::new(), None);
        first.extend(second);

        let summaries: Vec<_> = first.into_iter().map(|d| d.summary).collect();
        assert_eq!(summaries, vec!["one", "two"]);
    }
}
