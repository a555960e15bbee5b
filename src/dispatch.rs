//! Namespace detection and stylesheet selection.

use std::fmt;
use std::path::Path;

use log::debug;

use crate::error::{AmbiguousDocumentError, Error, TransformError};
use crate::request::LayoutMode;
use crate::resolver::NeverResolver;
use crate::xml::XmlReader;

pub const GENERATION_A_NAMESPACE: &str = "urn:com.io7m.structural:7:0";
pub const GENERATION_B_NAMESPACE: &str = "urn:com.io7m.structural:8:0";

/// The recognized structural vocabularies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaNamespace {
    /// Structural 7.0.
    GenerationA,
    /// Structural 8.0.
    GenerationB,
}

impl SchemaNamespace {
    pub const ALL: [SchemaNamespace; 2] = [SchemaNamespace::GenerationA, SchemaNamespace::GenerationB];

    pub fn uri(self) -> &'static str {
        match self {
            SchemaNamespace::GenerationA => GENERATION_A_NAMESPACE,
            SchemaNamespace::GenerationB => GENERATION_B_NAMESPACE,
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ns| ns.uri() == uri)
    }

    /// Catalog name of the schema for this vocabulary.
    pub fn schema_name(self) -> &'static str {
        match self {
            SchemaNamespace::GenerationA => crate::catalog::GENERATION_A_SCHEMA,
            SchemaNamespace::GenerationB => crate::catalog::GENERATION_B_SCHEMA,
        }
    }

    /// The version number used in stylesheet units.
    pub fn version(self) -> u32 {
        match self {
            SchemaNamespace::GenerationA => 7,
            SchemaNamespace::GenerationB => 8,
        }
    }
}

impl fmt::Display for SchemaNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

/// What a transform is producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Web,
    Package,
}

/// The bundled stylesheets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StylesheetId {
    GenerationASingle,
    GenerationAMulti,
    GenerationBSingle,
    GenerationBMulti,
    GenerationBIndex,
    GenerationBEpub,
    /// Produces the package descriptor; selected by the package builder.
    GenerationBPackage,
}

impl StylesheetId {
    /// Catalog name of the stylesheet unit.
    pub fn resource_name(self) -> &'static str {
        match self {
            StylesheetId::GenerationASingle => "structural-7-single.xml",
            StylesheetId::GenerationAMulti => "structural-7-multi.xml",
            StylesheetId::GenerationBSingle => "structural-8-single.xml",
            StylesheetId::GenerationBMulti => "structural-8-multi.xml",
            StylesheetId::GenerationBIndex => "structural-8-index.xml",
            StylesheetId::GenerationBEpub => "structural-8-epub.xml",
            StylesheetId::GenerationBPackage => "structural-8-epub-package.xml",
        }
    }
}

/// Choose the stylesheet for a vocabulary, layout and output kind.
pub fn select_stylesheet(
    namespace: SchemaNamespace,
    layout: LayoutMode,
    output: OutputKind,
) -> Result<StylesheetId, TransformError> {
    use LayoutMode::*;
    use OutputKind::*;
    use SchemaNamespace::*;

    match (namespace, layout, output) {
        (GenerationA, SingleFile, Web) => Ok(StylesheetId::GenerationASingle),
        (GenerationA, MultiFile, Web) => Ok(StylesheetId::GenerationAMulti),
        (GenerationA, PackageIndexOnly, Web) => Err(TransformError::Unsupported(format!(
            "Producing a document index from {namespace} documents is unsupported; use generation B or newer ({GENERATION_B_NAMESPACE})."
        ))),
        (GenerationA, _, Package) => Err(TransformError::Unsupported(format!(
            "Producing EPUB files from {namespace} documents is unsupported; use generation B or newer ({GENERATION_B_NAMESPACE})."
        ))),
        (GenerationB, SingleFile, Web) => Ok(StylesheetId::GenerationBSingle),
        (GenerationB, MultiFile, Web) => Ok(StylesheetId::GenerationBMulti),
        (GenerationB, PackageIndexOnly, Web) => Ok(StylesheetId::GenerationBIndex),
        (GenerationB, SingleFile | MultiFile, Package) => Ok(StylesheetId::GenerationBEpub),
        (GenerationB, PackageIndexOnly, Package) => Err(TransformError::Unsupported(
            "An index-only layout cannot be packaged; choose the single-file or multi-file layout."
                .to_string(),
        )),
    }
}

/// Find the one recognized namespace declared in a document.
///
/// The document is scanned without a resolver and without expanding
/// inclusions, so namespaces declared only in included files are not seen.
pub fn detect_namespace(bytes: &[u8], document: &Path) -> Result<SchemaNamespace, Error> {
    let system_id = document.display().to_string();
    let survey = XmlReader::new(&NeverResolver)
        .survey_namespaces(bytes, &system_id)
        .map_err(|e| e.into_source_error(document))?;

    let found: Vec<SchemaNamespace> = survey
        .namespaces
        .iter()
        .filter_map(|uri| SchemaNamespace::from_uri(uri))
        .collect();
    debug!("namespaces in {system_id}: {:?}", survey.namespaces);

    match found.as_slice() {
        [namespace] => Ok(*namespace),
        _ => {
            let hint = (found.is_empty() && survey.has_includes).then(|| {
                "the document uses XInclude; namespaces declared only in included files are not considered"
                    .to_string()
            });
            Err(AmbiguousDocumentError {
                document: document.to_path_buf(),
                found: found.iter().map(|ns| ns.uri().to_string()).collect(),
                hint,
            }
            .into())
        }
    }
}
