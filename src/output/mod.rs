//! Validation of generated XHTML.
//!
//! Every page is checked against the bundled XHTML schema, then the whole
//! set is checked for links that lead nowhere.

mod links;

pub use links::{FOOTNOTE_LINK_CLASS, LinkGraph};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::catalog::{ResourceCatalog, XHTML_SCHEMA};
use crate::config::ParserLimits;
use crate::error::{Error, Result, ValidationError, XmlError};
use crate::resolver::CatalogResolver;
use crate::schema::Schema;
use crate::validation::{Finding, FindingKind, ValidationOutcome};
use crate::validator::log_findings;
use crate::xml::{Location, XmlReader};

/// Pages that are never validated: navigation documents.
pub const EXCLUDED_SUFFIXES: [&str; 2] = ["toc.xhtml", "nav.xhtml"];

/// Validates the XHTML in an output directory.
#[derive(Debug, Clone)]
pub struct OutputValidator {
    catalog: Arc<ResourceCatalog>,
    limits: ParserLimits,
}

impl OutputValidator {
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

    /// Validate every page in `output_directory` and the links between them.
    pub fn validate(&self, output_directory: &Path) -> Result<ValidationOutcome> {
        let resolver = CatalogResolver::new(Arc::clone(&self.catalog));
        let schema = Schema::compile(XHTML_SCHEMA, &resolver, self.limits)?;
        let reader = XmlReader::new(&resolver).with_limits(self.limits);

        let pages = output_files(output_directory)?;
        if pages.is_empty() {
            warn!("no XHTML files in {}", output_directory.display());
        }

        let mut findings = Vec::new();
        let mut graph = LinkGraph::new();
        for path in &pages {
            let system_id = path.display().to_string();
            let bytes = fs::read(path)?;
            match reader.parse(&bytes, &system_id, None) {
                Ok(document) => {
                    findings.extend(schema.validate(&document));
                    let file = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    graph.add_document(&file, &document);
                    debug!("checked {system_id}");
                }
                Err(XmlError::Resolution(e)) => return Err(Error::Resolution(e)),
                Err(e) => {
                    let location = e.location().cloned().unwrap_or_else(|| Location::document(system_id));
                    findings.push(Finding::fatal(location, e.message()));
                }
            }
        }

        findings.extend(graph.check());
        let outcome = ValidationOutcome::new(findings);
        log_findings(outcome.findings());

        let schema_failures =
            outcome.error_count_of(&[FindingKind::Syntax, FindingKind::Schema, FindingKind::Identity]);
        let link_failures = outcome.error_count_of(&[FindingKind::LinkIntegrity]);
        if schema_failures > 0 || link_failures > 0 {
            return Err(ValidationError::Output {
                directory: output_directory.to_path_buf(),
                outcome,
                schema_failures,
                link_failures,
            }
            .into());
        }
        info!("validated {} page(s) in {}", pages.len(), output_directory.display());
        Ok(outcome)
    }
}

/// The `*.xhtml` files directly inside `directory`, sorted, without the
/// excluded navigation documents.
pub fn output_files(directory: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_file()
            && name.ends_with(".xhtml")
            && !EXCLUDED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_files_are_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.xhtml", "a.xhtml", "toc.xhtml", "nav.xhtml", "style.css"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let names: Vec<_> = output_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.xhtml", "b.xhtml"]);
    }

    #[test]
    fn test_malformed_page_is_an_xhtml_failure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.xhtml"), "<html").unwrap();
        let err = OutputValidator::new(Arc::new(ResourceCatalog::builtin()))
            .validate(dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("invalid XHTML"), "{err}");
    }
}
