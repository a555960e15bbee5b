//! Error types for structural pipeline operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::transform::EngineDiagnostic;
use crate::validation::{Finding, ValidationOutcome};
use crate::xml::Location;

/// Errors that can occur while validating, transforming or packaging a document.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request or unusable bundled configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A bundled schema could not be compiled.
    #[error(transparent)]
    SchemaCompile(#[from] SchemaCompileError),

    #[error(transparent)]
    AmbiguousDocument(#[from] AmbiguousDocumentError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Packaging(#[from] PackagingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The reporting category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration(_) | Error::SchemaCompile(_) => ErrorCategory::Configuration,
            Error::AmbiguousDocument(_) => ErrorCategory::AmbiguousDocument,
            Error::Validation(_) => ErrorCategory::Validation,
            Error::Resolution(_) => ErrorCategory::Resolution,
            Error::Transform(_) => ErrorCategory::Transform,
            Error::Packaging(_) => ErrorCategory::Packaging,
            Error::Io(_) => ErrorCategory::Io,
        }
    }
}

/// Coarse classification used for exit reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    AmbiguousDocument,
    Validation,
    Resolution,
    Transform,
    Packaging,
    Io,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::AmbiguousDocument => "ambiguous-document",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Resolution => "resolution",
            ErrorCategory::Transform => "transform",
            ErrorCategory::Packaging => "packaging",
            ErrorCategory::Io => "io",
        };
        f.write_str(name)
    }
}

/// A bundled schema document failed to compile.
#[derive(Error, Debug)]
#[error("Schema {schema} failed to compile:\n{}", .problems.join("\n"))]
pub struct SchemaCompileError {
    pub schema: String,
    pub problems: Vec<String>,
}

/// Zero or several recognized namespaces were declared by a source document.
#[derive(Error, Debug)]
#[error("{}", describe_ambiguity(.document, .found, .hint))]
pub struct AmbiguousDocumentError {
    pub document: PathBuf,
    /// The recognized namespaces that were found.
    pub found: Vec<String>,
    pub hint: Option<String>,
}

fn describe_ambiguity(document: &std::path::Path, found: &[String], hint: &Option<String>) -> String {
    let mut text = if found.is_empty() {
        format!(
            "Document {} declares none of the recognized structural namespaces",
            document.display()
        )
    } else {
        format!(
            "Document {} declares more than one structural namespace: {}",
            document.display(),
            found.join(", ")
        )
    };
    if let Some(hint) = hint {
        text.push_str(&format!(" ({hint})"));
    }
    text
}

/// Schema or link-integrity violations.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Document {} is not a valid structural document ({} error(s))", .document.display(), .outcome.error_count())]
    Source {
        document: PathBuf,
        outcome: ValidationOutcome,
    },

    #[error("{}", describe_output_failure(*.schema_failures, *.link_failures, .directory))]
    Output {
        directory: PathBuf,
        outcome: ValidationOutcome,
        schema_failures: usize,
        link_failures: usize,
    },
}

impl ValidationError {
    /// The complete set of findings behind this failure.
    pub fn outcome(&self) -> &ValidationOutcome {
        match self {
            ValidationError::Source { outcome, .. } | ValidationError::Output { outcome, .. } => {
                outcome
            }
        }
    }
}

fn describe_output_failure(schema: usize, links: usize, directory: &std::path::Path) -> String {
    let cause = match (schema > 0, links > 0) {
        (true, true) => format!(
            "The transformer produced invalid XHTML output ({schema} schema error(s)) and broken links ({links} link error(s))"
        ),
        (true, false) => {
            format!("The transformer produced invalid XHTML output ({schema} schema error(s))")
        }
        _ => format!("The transformer produced output with broken links ({links} link error(s))"),
    };
    format!("{cause} in {}", directory.display())
}

/// A resolution request was denied.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Resource not found: {system_id}")]
    NotFound { system_id: String },

    #[error(
        "Refusing to allow access to files above the base directory.\n  Base: {}\n  Path: {}",
        .base.display(),
        .path.display()
    )]
    SandboxViolation { base: PathBuf, path: PathBuf },

    /// The resolver is configured to refuse this kind of request outright.
    #[error("{0}")]
    Forbidden(String),

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResolutionError {
    /// Whether the request tried to escape the sandbox root.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, ResolutionError::SandboxViolation { .. })
    }
}

/// Malformed or forbidden markup found while reading XML.
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("{location}: {message}")]
    Syntax { location: Location, message: String },

    /// Entity declarations and other injection vectors.
    #[error("{location}: {message}")]
    Forbidden { location: Location, message: String },

    #[error("{location}: {message}")]
    Limit { location: Location, message: String },

    #[error("{location}: {message}")]
    Include { location: Location, message: String },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

impl XmlError {
    pub fn location(&self) -> Option<&Location> {
        match self {
            XmlError::Syntax { location, .. }
            | XmlError::Forbidden { location, .. }
            | XmlError::Limit { location, .. }
            | XmlError::Include { location, .. } => Some(location),
            XmlError::Resolution(_) => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            XmlError::Syntax { message, .. }
            | XmlError::Forbidden { message, .. }
            | XmlError::Limit { message, .. }
            | XmlError::Include { message, .. } => message.clone(),
            XmlError::Resolution(e) => e.to_string(),
        }
    }

    /// Report a source document that could not be read.
    ///
    /// Resolution failures keep their own category; anything else becomes a
    /// single fatal finding.
    pub fn into_source_error(self, document: &std::path::Path) -> Error {
        match self {
            XmlError::Resolution(e) => Error::Resolution(e),
            other => {
                let location = other
                    .location()
                    .cloned()
                    .unwrap_or_else(|| Location::document(document.display().to_string()));
                Error::Validation(ValidationError::Source {
                    document: document.to_path_buf(),
                    outcome: ValidationOutcome::new(vec![Finding::fatal(location, other.message())]),
                })
            }
        }
    }
}

/// Stylesheet selection, compilation or execution failed.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    #[error("Stylesheet {stylesheet} failed to compile:\n{}", render_diagnostics(.diagnostics))]
    Compile {
        stylesheet: String,
        diagnostics: Vec<EngineDiagnostic>,
    },

    #[error("Transform failed: {0}")]
    Execute(EngineDiagnostic),

    #[error("Transform could not write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn render_diagnostics(diagnostics: &[EngineDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| format!("  {d}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Archive assembly or conformance checking failed.
#[derive(Error, Debug)]
pub enum PackagingError {
    #[error("Packaging I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The written archive disagrees with the recorded manifest.
    #[error("Package manifest mismatch: {0}")]
    Manifest(String),

    #[error("Package {} failed conformance checking:\n{report}", .archive.display())]
    Conformance { archive: PathBuf, report: String },
}

pub type Result<T> = std::result::Result<T, Error>;
