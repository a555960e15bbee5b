//! Validation findings.

use std::fmt;

use crate::xml::Location;

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
    /// The document could not be read at all.
    Fatal,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FindingKind {
    /// Malformed or forbidden markup.
    Syntax,
    /// Structure or value violates the schema.
    Schema,
    /// Duplicate or dangling identifiers.
    Identity,
    /// A generated link does not resolve.
    LinkIntegrity,
}

impl FindingKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FindingKind::Syntax => "syntax",
            FindingKind::Schema => "schema",
            FindingKind::Identity => "identity",
            FindingKind::LinkIntegrity => "link-integrity",
        }
    }
}

/// A single problem found during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub location: Location,
    pub severity: Severity,
    pub kind: FindingKind,
    pub message: String,
}

impl Finding {
    pub fn error(kind: FindingKind, location: Location, message: impl Into<String>) -> Self {
        Self {
            location,
            severity: Severity::Error,
            kind,
            message: message.into(),
        }
    }

    pub fn warning(kind: FindingKind, location: Location, message: impl Into<String>) -> Self {
        Self {
            location,
            severity: Severity::Warning,
            kind,
            message: message.into(),
        }
    }

    pub fn fatal(location: Location, message: impl Into<String>) -> Self {
        Self {
            location,
            severity: Severity::Fatal,
            kind: FindingKind::Syntax,
            message: message.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.severity, self.message)
    }
}

/// The complete result of one validation pass.
///
/// An outcome has failed iff any finding is an error or worse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    findings: Vec<Finding>,
}

impl ValidationOutcome {
    pub fn new(findings: Vec<Finding>) -> Self {
        Self { findings }
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn into_findings(self) -> Vec<Finding> {
        self.findings
    }

    pub fn failed(&self) -> bool {
        self.findings.iter().any(|f| f.severity >= Severity::Error)
    }

    /// Number of findings that are errors or worse.
    pub fn error_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity >= Severity::Error)
            .count()
    }

    /// Number of error-or-worse findings of the given kinds.
    pub fn error_count_of(&self, kinds: &[FindingKind]) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity >= Severity::Error && kinds.contains(&f.kind))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() -> Location {
        Location::new("file:///doc.xml", 3, 7)
    }

    #[test]
    fn test_warnings_do_not_fail() {
        let outcome = ValidationOutcome::new(vec![Finding::warning(
            FindingKind::Schema,
            here(),
            "odd",
        )]);
        assert!(!outcome.failed());
        assert_eq!(outcome.error_count(), 0);
        assert_eq!(outcome.len(), 1);
    }

    #[test]
    fn test_error_counts_by_kind() {
        let outcome = ValidationOutcome::new(vec![
            Finding::error(FindingKind::Schema, here(), "a"),
            Finding::error(FindingKind::LinkIntegrity, here(), "b"),
            Finding::fatal(here(), "c"),
        ]);
        assert!(outcome.failed());
        assert_eq!(outcome.error_count(), 3);
        assert_eq!(outcome.error_count_of(&[FindingKind::LinkIntegrity]), 1);
        assert_eq!(
            outcome.error_count_of(&[FindingKind::Schema, FindingKind::Syntax]),
            2
        );
    }

    #[test]
    fn test_finding_display() {
        let finding = Finding::error(FindingKind::Schema, here(), "bad");
        assert_eq!(finding.to_string(), "file:///doc.xml:3:7: error: bad");
    }
}
