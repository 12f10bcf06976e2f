use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// A single position inside a configuration source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

/// A span of configuration source text a diagnostic refers to.
///
/// The evaluator never reads source files itself; ranges are supplied by the
/// configuration loader alongside each declaration and copied verbatim into
/// the diagnostics raised while evaluating it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub filename: Utf8PathBuf,
    pub start: SourcePos,
    pub end: SourcePos,
}

impl Display for SourceRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{},{}-{},{}",
            self.filename, self.start.line, self.start.column, self.end.line, self.end.column
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => f.write_str("Warning"),
            Severity::Error => f.write_str("Error"),
        }
    }
}

/// A warning or error raised while evaluating a configuration element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    /// Source range of the declaration the diagnostic is about, if known.
    pub subject: Option<SourceRange>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            subject: None,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
            subject: None,
        }
    }

    /// Attaches a source range, keeping an existing one if already set.
    pub fn with_subject(mut self, subject: Option<&SourceRange>) -> Self {
        if self.subject.is_none() {
            self.subject = subject.cloned();
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity, self.summary)?;

        if let Some(subject) = &self.subject {
            write!(f, " (at {subject})")?;
        }

        if !self.detail.is_empty() {
            write!(f, "; {}", self.detail)?;
        }

        Ok(())
    }
}

/// An accumulating collection of diagnostics.
///
/// Diagnostics flow bottom-up through the evaluation graph: every node result
/// carries its own diagnostics merged with those of every dependency it
/// awaited. Because a dependency shared by several paths (a "diamond") would
/// otherwise be reported once per path, merging skips entries that are
/// already present. Insertion order is preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Diagnostic>", into = "Vec<Diagnostic>")]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
    seen: HashSet<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a diagnostic unless an identical one is already recorded.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        if self.seen.insert(diagnostic.clone()) {
            self.items.push(diagnostic);
        }
    }

    /// Merges `other` into `self` without duplicates.
    pub fn append(&mut self, other: Diagnostics) {
        if self.items.is_empty() {
            *self = other;
            return;
        }
        for diagnostic in other.items {
            self.push(diagnostic);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.items.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|diag| diag.is_error())
    }

    /// Returns the error diagnostics as a single `Error` value, or `None` when
    /// there are only warnings.
    pub fn err(&self) -> Option<DiagnosticsError> {
        if self.has_errors() {
            Some(DiagnosticsError(self.errors().cloned().collect()))
        } else {
            None
        }
    }
}

impl PartialEq for Diagnostics {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl Eq for Diagnostics {}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        let mut diags = Diagnostics::new();
        diags.push(diagnostic);
        diags
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(items: Vec<Diagnostic>) -> Self {
        items.into_iter().collect()
    }
}

impl From<Diagnostics> for Vec<Diagnostic> {
    fn from(diags: Diagnostics) -> Self {
        diags.items
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<I: IntoIterator<Item = Diagnostic>>(&mut self, iter: I) {
        for diagnostic in iter {
            self.push(diagnostic);
        }
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        let mut diags = Diagnostics::new();
        diags.extend(iter);
        diags
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Error diagnostics collected into a value implementing [`std::error::Error`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", render(.0))]
pub struct DiagnosticsError(pub Vec<Diagnostic>);

fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_skips_duplicates() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::error("Broken", "first"));
        diags.push(Diagnostic::error("Broken", "first"));
        diags.push(Diagnostic::warning("Broken", "first"));

        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn test_append_merges_without_duplicates() {
        let shared = Diagnostic::error("Shared", "from a diamond dependency");

        let mut left = Diagnostics::from(shared.clone());
        left.push(Diagnostic::warning("Left", ""));

        let mut right = Diagnostics::from(shared);
        right.push(Diagnostic::error("Right", ""));

        left.append(right);

        let summaries: Vec<_> = left.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, ["Shared", "Left", "Right"]);
    }

    #[test]
    fn test_large_merge_keeps_first_occurrence_order() {
        let mut diags = Diagnostics::new();
        for round in 0..3 {
            let batch: Diagnostics = (0..2000)
                .map(|i| Diagnostic::error("Broken", format!("element {}", (i + round * 500) % 3000)))
                .collect();
            diags.append(batch);
        }

        assert_eq!(diags.len(), 3000);
        let details: Vec<_> = diags.iter().take(3).map(|d| d.detail.as_str()).collect();
        assert_eq!(details, ["element 0", "element 1", "element 2"]);
        assert_eq!(diags.iter().nth(2000).unwrap().detail, "element 2000");
    }

    #[test]
    fn test_deserialize_skips_duplicates() {
        let diag = Diagnostic::error("Broken", "twice");
        let json = serde_json::to_string(&vec![diag.clone(), diag.clone()]).unwrap();

        let mut diags: Diagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(diags.len(), 1);

        diags.push(diag.clone());
        assert_eq!(diags.len(), 1);
        assert_eq!(
            serde_json::to_string(&diags).unwrap(),
            serde_json::to_string(&vec![diag]).unwrap()
        );
    }

    #[test]
    fn test_err_only_for_errors() {
        let mut diags = Diagnostics::from(Diagnostic::warning("Careful", ""));
        assert!(!diags.has_errors());
        assert!(diags.err().is_none());

        diags.push(Diagnostic::error("Broken", "it broke"));
        let err = diags.err().unwrap();
        assert_eq!(err.0.len(), 1);
        assert_eq!(err.to_string(), "Error: Broken; it broke");
    }

    #[test]
    fn test_with_subject_keeps_existing() {
        let first = SourceRange {
            filename: "a.tfstack.hcl".into(),
            start: SourcePos::default(),
            end: SourcePos::default(),
        };
        let second = SourceRange {
            filename: "b.tfstack.hcl".into(),
            ..first.clone()
        };

        let diag = Diagnostic::error("x", "")
            .with_subject(Some(&first))
            .with_subject(Some(&second));

        assert_eq!(diag.subject, Some(first));
    }
}
