//! The seam between the transform driver and a stylesheet engine.
//!
//! The driver owns policy (which stylesheet, where output goes, trace and
//! message files, allocator resets); an engine only compiles stylesheet
//! sources and executes them against parsed documents.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};

use crate::error::TransformError;
use crate::resolver::{EntityResolver, normalize_lexically};
use crate::xml::{Document, Location};

/// Severity of an engine diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticSeverity {
    Warning,
    Error,
}

/// A located message produced while compiling or executing a stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDiagnostic {
    pub location: Location,
    pub severity: DiagnosticSeverity,
    pub message: String,
}

impl EngineDiagnostic {
    pub fn error(location: Location, message: impl Into<String>) -> Self {
        Self {
            location,
            severity: DiagnosticSeverity::Error,
            message: message.into(),
        }
    }

    pub fn warning(location: Location, message: impl Into<String>) -> Self {
        Self {
            location,
            severity: DiagnosticSeverity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Receives compile diagnostics.
pub trait ErrorListener {
    fn report(&mut self, diagnostic: EngineDiagnostic);
}

/// An [`ErrorListener`] that logs and keeps every diagnostic.
#[derive(Debug, Default)]
pub struct CollectingErrorListener {
    diagnostics: Vec<EngineDiagnostic>,
}

impl CollectingErrorListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> &[EngineDiagnostic] {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    pub fn into_diagnostics(self) -> Vec<EngineDiagnostic> {
        self.diagnostics
    }
}

impl ErrorListener for CollectingErrorListener {
    fn report(&mut self, diagnostic: EngineDiagnostic) {
        match diagnostic.severity {
            DiagnosticSeverity::Warning => warn!("{diagnostic}"),
            DiagnosticSeverity::Error => error!("{diagnostic}"),
        }
        self.diagnostics.push(diagnostic);
    }
}

/// Observes execution, one event per source element processed.
pub trait TraceListener {
    fn enter(&mut self, name: &str, location: &Location);
    fn leave(&mut self, name: &str);
}

/// Receives user-visible messages emitted by a stylesheet.
pub trait MessageListener {
    fn message(&mut self, location: &Location, code: &str, text: &str);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullListener;

impl TraceListener for NullListener {
    fn enter(&mut self, _name: &str, _location: &Location) {}
    fn leave(&mut self, _name: &str) {}
}

impl MessageListener for NullListener {
    fn message(&mut self, _location: &Location, _code: &str, _text: &str) {}
}

/// Stylesheet text plus the identifier diagnostics refer to.
#[derive(Debug, Clone)]
pub struct StylesheetSource {
    pub system_id: String,
    pub data: Cow<'static, [u8]>,
}

/// Named string parameters passed to an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformParameters {
    values: BTreeMap<String, String>,
}

impl TransformParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The directory result documents are written to.
///
/// Names are resolved relative to the root and may not leave it.
#[derive(Debug, Clone)]
pub struct OutputDestination {
    root: PathBuf,
}

impl OutputDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: normalize_lexically(&root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, name: &str) -> Result<PathBuf, TransformError> {
        let path = normalize_lexically(&self.root.join(name));
        if path == self.root || !path.starts_with(&self.root) {
            return Err(TransformError::Execute(EngineDiagnostic::error(
                Location::document(name),
                format!(
                    "result document {name} would be written outside {}",
                    self.root.display()
                ),
            )));
        }
        Ok(path)
    }

    /// Write a result document, creating parent directories as needed.
    pub fn write(&self, name: &str, data: &[u8]) -> Result<PathBuf, TransformError> {
        let path = self.resolve(name)?;
        let io_error = |source| TransformError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(&path, data).map_err(io_error)?;
        debug!("wrote result document {}", path.display());
        Ok(path)
    }
}

/// Everything one execution needs.
pub struct ExecutionContext<'a> {
    pub source: &'a Document,
    pub destination: &'a OutputDestination,
    pub parameters: &'a TransformParameters,
    pub trace: &'a mut dyn TraceListener,
    pub messages: &'a mut dyn MessageListener,
    pub resolver: &'a dyn EntityResolver,
}

/// What an execution produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Result documents written, in the order they were produced.
    pub documents: Vec<PathBuf>,
}

/// A stylesheet ready to run.
pub trait CompiledStylesheet: fmt::Debug {
    fn name(&self) -> &str;

    fn execute(&self, context: ExecutionContext<'_>) -> Result<ExecutionReport, TransformError>;
}

/// Compiles stylesheets.
pub trait TransformEngine: Send + Sync + fmt::Debug {
    /// Compile a stylesheet, reporting every problem to `errors`.
    ///
    /// Fails if any error-severity diagnostic was reported.
    fn compile(
        &self,
        source: &StylesheetSource,
        errors: &mut dyn ErrorListener,
    ) -> Result<Box<dyn CompiledStylesheet>, TransformError>;

    /// Restart the document numbering used for generated identifiers.
    fn reset_id_allocator(&self);
}
