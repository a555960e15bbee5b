//! Running the right stylesheet for a request.
//!
//! A transform moves through `DetectNamespace → SelectStylesheet → Compile →
//! Execute → EmitSharedAssets`. Any failure aborts the run.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::catalog::ResourceCatalog;
use crate::config::ParserLimits;
use crate::dispatch::{OutputKind, SchemaNamespace, StylesheetId, detect_namespace, select_stylesheet};
use crate::error::{Error, Result, TransformError};
use crate::request::ProcessingRequest;
use crate::resolver::CatalogResolver;
use crate::xml::{Document, XmlReader};

use super::engine::{
    CollectingErrorListener, CompiledStylesheet, DiagnosticSeverity, ExecutionContext,
    ExecutionReport, MessageListener, NullListener, OutputDestination, StylesheetSource,
    TraceListener, TransformEngine, TransformParameters,
};
use super::messages::LineMessageListener;
use super::trace::XmlTraceListener;

/// Style sheets copied next to web output.
pub const SHARED_ASSETS: [&str; 2] = ["reset.css", "structural.css"];

/// What a transform run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformReport {
    pub namespace: SchemaNamespace,
    pub stylesheet: StylesheetId,
    /// Result documents, in the order the engine wrote them.
    pub documents: Vec<PathBuf>,
    /// Shared assets copied into the output directory.
    pub assets: Vec<PathBuf>,
    /// Number of user messages written to the message file.
    pub messages: usize,
}

/// Where an execution's trace and messages go.
#[derive(Debug, Clone, Copy, Default)]
pub struct Listeners<'p> {
    pub trace_file: Option<&'p Path>,
    pub message_file: Option<&'p Path>,
}

/// Drives a [`TransformEngine`] over structural documents.
#[derive(Debug, Clone)]
pub struct TransformDriver {
    catalog: Arc<ResourceCatalog>,
    engine: Arc<dyn TransformEngine>,
    limits: ParserLimits,
}

impl TransformDriver {
    pub fn new(catalog: Arc<ResourceCatalog>, engine: Arc<dyn TransformEngine>) -> Self {
        Self {
            catalog,
            engine,
            limits: ParserLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ParserLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn engine(&self) -> &dyn TransformEngine {
        self.engine.as_ref()
    }

    /// Transform the request's source document into `output` form.
    pub fn execute(&self, request: &ProcessingRequest, output: OutputKind) -> Result<TransformReport> {
        let source_file = request.source_file();
        let bytes = read_source(source_file)?;

        let namespace = detect_namespace(&bytes, source_file)?;
        debug!("{}: {namespace}", source_file.display());
        let stylesheet = select_stylesheet(namespace, request.layout(), output)?;
        info!("selected stylesheet {}", stylesheet.resource_name());

        let compiled = self.compile(stylesheet)?;
        let document = self.parse_source(&bytes, request)?;

        let mut parameters = self.base_parameters(request);
        if let Some(branding) = request.branding_file() {
            parameters.set("branding", branding.display().to_string());
        }

        let listeners = Listeners {
            trace_file: Some(request.trace_file()),
            message_file: Some(request.message_file()),
        };
        let (report, messages) = self.run(
            compiled.as_ref(),
            &document,
            request,
            request.output_directory(),
            &parameters,
            listeners,
        )?;

        let assets = if request.write_shared_assets() {
            self.emit_shared_assets(request.output_directory())?
        } else {
            Vec::new()
        };

        Ok(TransformReport {
            namespace,
            stylesheet,
            documents: report.documents,
            assets,
            messages,
        })
    }

    /// Produce the package descriptor for the request's source document in
    /// `staging`, listing `resources` alongside the content documents.
    pub fn package_descriptor(
        &self,
        request: &ProcessingRequest,
        staging: &Path,
        descriptor: &str,
        resources: &[String],
    ) -> Result<PathBuf> {
        let source_file = request.source_file();
        let bytes = read_source(source_file)?;
        let namespace = detect_namespace(&bytes, source_file)?;
        if namespace != SchemaNamespace::GenerationB {
            return Err(TransformError::Unsupported(format!(
                "Packages cannot be described for {namespace} documents; use generation B or newer."
            ))
            .into());
        }

        let compiled = self.compile(StylesheetId::GenerationBPackage)?;
        let document = self.parse_source(&bytes, request)?;
        let mut parameters = self.base_parameters(request);
        parameters.set("outputDirectory", staging.display().to_string());
        parameters.set("outputFile", descriptor);
        parameters.set("extraResources", resources.join("\n"));

        let (report, _) = self.run(
            compiled.as_ref(),
            &document,
            request,
            staging,
            &parameters,
            Listeners::default(),
        )?;
        report.documents.into_iter().next().ok_or_else(|| {
            TransformError::Unsupported(format!(
                "stylesheet {} produced no package descriptor",
                StylesheetId::GenerationBPackage.resource_name()
            ))
            .into()
        })
    }

    /// Compile a bundled stylesheet.
    ///
    /// Every diagnostic is logged; any error fails the compile with all of
    /// them attached.
    pub fn compile(&self, id: StylesheetId) -> Result<Box<dyn CompiledStylesheet>> {
        let name = id.resource_name();
        let data = self.catalog.bytes(name).ok_or_else(|| {
            Error::Configuration(format!("stylesheet {name} is missing from the resource catalog"))
        })?;
        let source = StylesheetSource {
            system_id: name.to_string(),
            data: Cow::Owned(data.to_vec()),
        };

        let mut listener = CollectingErrorListener::new();
        let result = self.engine.compile(&source, &mut listener);
        for diagnostic in listener.diagnostics() {
            match diagnostic.severity {
                DiagnosticSeverity::Error => error!("{diagnostic}"),
                DiagnosticSeverity::Warning => warn!("{diagnostic}"),
            }
        }

        let errors: Vec<_> = listener
            .into_diagnostics()
            .into_iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
            .collect();
        match result {
            Ok(compiled) if errors.is_empty() => Ok(compiled),
            Ok(_) => Err(TransformError::Compile {
                stylesheet: name.to_string(),
                diagnostics: errors,
            }
            .into()),
            Err(TransformError::Compile { stylesheet, diagnostics }) if diagnostics.is_empty() => {
                Err(TransformError::Compile {
                    stylesheet,
                    diagnostics: errors,
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Execute a compiled stylesheet with a freshly reset identifier
    /// allocator, so repeated runs over the same input produce the same
    /// identifiers and file names.
    pub fn run(
        &self,
        stylesheet: &dyn CompiledStylesheet,
        document: &Document,
        request: &ProcessingRequest,
        destination: &Path,
        parameters: &TransformParameters,
        listeners: Listeners<'_>,
    ) -> Result<(ExecutionReport, usize)> {
        fs::create_dir_all(destination).map_err(|source| TransformError::Io {
            path: destination.to_path_buf(),
            source,
        })?;
        let destination = OutputDestination::new(destination);
        let resolver = CatalogResolver::new(Arc::clone(&self.catalog)).with_sandbox(request.source_directory());

        let mut trace = match listeners.trace_file {
            Some(path) => Some(
                XmlTraceListener::create(path, stylesheet.name(), &document.system_id)
                    .map_err(|source| io_error(path, source))?,
            ),
            None => None,
        };
        let mut messages = match listeners.message_file {
            Some(path) => Some(LineMessageListener::create(path).map_err(|source| io_error(path, source))?),
            None => None,
        };

        let mut null_trace = NullListener;
        let mut null_messages = NullListener;
        let trace_listener: &mut dyn TraceListener = match trace.as_mut() {
            Some(t) => t,
            None => &mut null_trace,
        };
        let message_listener: &mut dyn MessageListener = match messages.as_mut() {
            Some(m) => m,
            None => &mut null_messages,
        };

        self.engine.reset_id_allocator();
        debug!("executing {} on {}", stylesheet.name(), document.system_id);
        let report = stylesheet.execute(ExecutionContext {
            source: document,
            destination: &destination,
            parameters,
            trace: trace_listener,
            messages: message_listener,
            resolver: &resolver,
        })?;

        if let Some(trace) = trace {
            let path = trace.path().to_path_buf();
            trace.finish().map_err(|source| io_error(&path, source))?;
            debug!("wrote trace {}", path.display());
        }
        let count = match messages {
            Some(messages) => {
                let path = messages.path().to_path_buf();
                messages.finish().map_err(|source| io_error(&path, source))?
            }
            None => 0,
        };
        Ok((report, count))
    }

    /// Copy the shared web style sheets into `directory`, overwriting.
    pub fn emit_shared_assets(&self, directory: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for name in SHARED_ASSETS {
            let data = self.catalog.bytes(name).ok_or_else(|| {
                Error::Configuration(format!("style asset {name} is missing from the resource catalog"))
            })?;
            let target = directory.join(name);
            fs::write(&target, data).map_err(|source| io_error(&target, source))?;
            info!("copied {}", target.display());
            written.push(target);
        }
        Ok(written)
    }

    /// Parse the source with inclusions expanded inside its directory.
    fn parse_source(&self, bytes: &[u8], request: &ProcessingRequest) -> Result<Document> {
        let source_file = request.source_file();
        let directory = request.source_directory();
        let resolver = CatalogResolver::new(Arc::clone(&self.catalog)).with_sandbox(directory);
        XmlReader::new(&resolver)
            .with_limits(self.limits)
            .with_xinclude(true)
            .parse(bytes, &source_file.display().to_string(), Some(directory))
            .map_err(|e| e.into_source_error(source_file))
    }

    fn base_parameters(&self, request: &ProcessingRequest) -> TransformParameters {
        TransformParameters::new()
            .with("outputDirectory", request.output_directory().display().to_string())
            .with("sourceDirectory", request.source_directory().display().to_string())
    }
}

fn read_source(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| {
        TransformError::Io {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

fn io_error(path: &Path, source: std::io::Error) -> Error {
    TransformError::Io {
        path: path.to_path_buf(),
        source,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResourceGroup;
    use crate::transform::NativeEngine;

    fn driver(catalog: ResourceCatalog) -> TransformDriver {
        TransformDriver::new(Arc::new(catalog), Arc::new(NativeEngine::new()))
    }

    #[test]
    fn test_compile_bundled_stylesheets() {
        let driver = driver(ResourceCatalog::builtin());
        for id in [
            StylesheetId::GenerationASingle,
            StylesheetId::GenerationBMulti,
            StylesheetId::GenerationBPackage,
        ] {
            let compiled = driver.compile(id).unwrap();
            assert!(!compiled.name().is_empty());
        }
    }

    #[test]
    fn test_compile_errors_keep_locators() {
        let broken = b"<unit xmlns=\"urn:com.io7m.structural.unit:1:0\" name=\"broken\" generation=\"8\" layout=\"single\">\n<parameter name=\"a\"/>\n<parameter name=\"a\"/>\n<bogus/>\n</unit>";
        let catalog = ResourceCatalog::builtin().with_resource(
            StylesheetId::GenerationBSingle.resource_name(),
            ResourceGroup::Stylesheet,
            None,
            broken.to_vec(),
        );
        let err = driver(catalog).compile(StylesheetId::GenerationBSingle).unwrap_err();
        match err {
            Error::Transform(TransformError::Compile { diagnostics, .. }) => {
                let lines: Vec<usize> = diagnostics.iter().map(|d| d.location.line).collect();
                assert_eq!(lines, [3, 4]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_stylesheet_is_configuration_error() {
        let err = driver(ResourceCatalog::empty())
            .compile(StylesheetId::GenerationBSingle)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
