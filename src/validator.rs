//! Validation of source documents against the bundled schemas.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, log, Level};

use crate::catalog::ResourceCatalog;
use crate::config::ParserLimits;
use crate::dispatch::{SchemaNamespace, detect_namespace};
use crate::error::{Error, ResolutionError, Result, ValidationError};
use crate::request::ProcessingRequest;
use crate::resolver::CatalogResolver;
use crate::schema::Schema;
use crate::validation::{Finding, Severity, ValidationOutcome};
use crate::xml::XmlReader;

/// Validates structural documents.
///
/// Schemas are loaded from the catalog alone; the source document may
/// include files from its own directory and nowhere else.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    catalog: Arc<ResourceCatalog>,
    limits: ParserLimits,
}

impl SchemaValidator {
    pub fn new(catalog: Arc<ResourceCatalog>) -> Self {
        Self {
            catalog,
            limits: ParserLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ParserLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Validate the request's source document.
    pub fn validate(&self, request: &ProcessingRequest) -> Result<ValidationOutcome> {
        self.validate_file(request.source_file())
    }

    /// Validate the document at `source_file`.
    ///
    /// Every violation is collected before failing. The returned error
    /// carries the complete outcome.
    pub fn validate_file(&self, source_file: &Path) -> Result<ValidationOutcome> {
        let bytes = fs::read(source_file).map_err(|source| unreadable_source(source_file, source))?;
        let directory = source_file.parent().unwrap_or_else(|| Path::new("/"));
        self.validate_bytes(&bytes, source_file, directory)
    }

    /// Validate a document held in memory as if it were read from `document`,
    /// resolving inclusions inside `directory`.
    pub fn validate_bytes(&self, bytes: &[u8], document: &Path, directory: &Path) -> Result<ValidationOutcome> {
        let namespace = detect_namespace(bytes, document)?;
        let schema = self.schema(namespace)?;

        let resolver = CatalogResolver::new(Arc::clone(&self.catalog)).with_sandbox(directory);
        let parsed = XmlReader::new(&resolver)
            .with_limits(self.limits)
            .with_xinclude(true)
            .parse(bytes, &document.display().to_string(), Some(directory))
            .map_err(|e| e.into_source_error(document))?;

        let outcome = ValidationOutcome::new(schema.validate(&parsed));
        log_findings(outcome.findings());
        if outcome.failed() {
            return Err(ValidationError::Source {
                document: document.to_path_buf(),
                outcome,
            }
            .into());
        }
        info!("validated {}", document.display());
        Ok(outcome)
    }

    /// Compile the schema for `namespace` from the catalog alone.
    pub fn schema(&self, namespace: SchemaNamespace) -> Result<Schema> {
        let resolver = CatalogResolver::new(Arc::clone(&self.catalog));
        debug!("compiling schema {}", namespace.schema_name());
        Schema::compile(namespace.schema_name(), &resolver, self.limits).map_err(Error::from)
    }
}

fn unreadable_source(path: &Path, source: io::Error) -> Error {
    let error = match source.kind() {
        io::ErrorKind::NotFound => ResolutionError::NotFound {
            system_id: path.display().to_string(),
        },
        _ => ResolutionError::Io {
            path: path.to_path_buf(),
            source,
        },
    };
    Error::Resolution(error)
}

pub(crate) fn log_findings(findings: &[Finding]) {
    for finding in findings {
        let level = match finding.severity {
            Severity::Warning => Level::Warn,
            Severity::Error | Severity::Fatal => Level::Error,
        };
        log!(level, "{finding}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::GENERATION_B_NAMESPACE;
    use crate::validation::FindingKind;

    fn validator() -> SchemaValidator {
        SchemaValidator::new(Arc::new(ResourceCatalog::builtin()))
    }

    fn check(xml: &str) -> Result<ValidationOutcome> {
        let dir = tempfile::tempdir().unwrap();
        validator().validate_bytes(xml.as_bytes(), &dir.path().join("doc.xml"), dir.path())
    }

    #[test]
    fn test_missing_source_is_a_resolution_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = validator().validate_file(&dir.path().join("absent.xml")).unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Resolution);
        assert!(err.to_string().contains("absent.xml"), "{err}");
    }

    #[test]
    fn test_malformed_document_is_one_fatal_finding() {
        let err = check(&format!("<Document xmlns='{GENERATION_B_NAMESPACE}'><Metadata>")).unwrap_err();
        let Error::Validation(failure) = err else {
            panic!("expected a validation error, got {err}");
        };
        let findings = failure.outcome().findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Fatal);
        assert_eq!(findings[0].kind, FindingKind::Syntax);
    }

    #[test]
    fn test_schemas_compile() {
        for namespace in SchemaNamespace::ALL {
            let schema = validator().schema(namespace).unwrap();
            assert_eq!(schema.target_namespace(), Some(namespace.uri()));
        }
    }
}
