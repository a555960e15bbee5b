//! # structural
//!
//! Secure validation, transformation and EPUB packaging for structural
//! documents.
//!
//! ## Features
//!
//! - Hardened XML reading: no DTD loading, no entity declarations, resource
//!   limits, XInclude confined to the document's directory
//! - Schema validation against the bundled structural 7.0 and 8.0 schemas,
//!   reporting every violation at once
//! - XHTML rendering as one page, one page per section, or a document index
//! - Validation of generated pages, including links between them
//! - Byte-for-byte reproducible EPUB 3 packages with conformance checking
//!
//! ## Quick Start
//!
//! ```no_run
//! use structural::{LayoutMode, ProcessingRequest, Processor, Task};
//!
//! let request = ProcessingRequest::builder("/tmp/out", "/docs/manual.xml")
//!     .task(Task::TransformToPackage)
//!     .layout(LayoutMode::MultiFile)
//!     .build()?;
//! let report = Processor::new().process(&request)?;
//! if let Some(package) = report.package {
//!     println!("wrote {}", package.archive.display());
//! }
//! # Ok::<(), structural::Error>(())
//! ```
//!
//! ## Stages
//!
//! Each stage is usable on its own:
//!
//! - [`validator::SchemaValidator`] checks a source document
//! - [`transform::TransformDriver`] selects and runs a stylesheet
//! - [`output::OutputValidator`] checks generated XHTML and its links
//! - [`package::PackageBuilder`] assembles and checks the EPUB
//!
//! All of them share one immutable [`catalog::ResourceCatalog`].

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod output;
pub mod package;
pub mod pipeline;
pub mod request;
pub mod resolver;
pub mod schema;
pub mod transform;
pub(crate) mod util;
pub mod validation;
pub mod validator;
pub mod xml;

pub use catalog::ResourceCatalog;
pub use config::{ConformanceCheck, ParserLimits, ProcessorConfig};
pub use dispatch::{OutputKind, SchemaNamespace, StylesheetId};
pub use error::{Error, ErrorCategory, Result};
pub use pipeline::{ProcessingReport, Processor};
pub use request::{LayoutMode, ProcessingRequest, Task};
pub use validation::{Finding, FindingKind, Severity, ValidationOutcome};
