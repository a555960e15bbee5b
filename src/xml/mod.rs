//! Secure, namespace-aware XML reading.
//!
//! Documents are parsed with [`quick_xml`] into a small owned tree. External
//! DTDs are never loaded, entity declarations are rejected outright, and every
//! external reference (including XInclude targets) goes through an
//! [`EntityResolver`](crate::resolver::EntityResolver).

mod escape;
mod reader;
mod tree;
mod xinclude;

pub use escape::{escape_attribute, escape_text};
pub use reader::{NamespaceSurvey, XmlReader};
pub use tree::{Attribute, Document, Element, NamespaceScope, Node, QName};

use std::fmt;
use std::sync::Arc;

pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_NS: &str = "http://www.w3.org/2000/xmlns/";
pub const XINCLUDE_NS: &str = "http://www.w3.org/2001/XInclude";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// A position in a parsed document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub system_id: Arc<str>,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column, in bytes.
    pub column: usize,
}

impl Location {
    pub fn new(system_id: impl Into<Arc<str>>, line: usize, column: usize) -> Self {
        Self {
            system_id: system_id.into(),
            line,
            column,
        }
    }

    /// A location for a whole document rather than a position inside it.
    pub fn document(system_id: impl Into<Arc<str>>) -> Self {
        Self::new(system_id, 0, 0)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.system_id, self.line, self.column)
    }
}
