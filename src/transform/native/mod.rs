//! The bundled transformation engine.
//!
//! Its stylesheets are template units (see [`unit`]) naming a layout; the
//! rendering itself is fixed. Generated identifiers take the form
//! `d{document}e{element}`, where the document number comes from an
//! [`IdAllocator`] that advances on every compile and every execution.

mod index;
mod opf;
mod outline;
pub mod unit;
mod xhtml;

pub use index::{INDEX_DOCUMENT, INDEX_NS};
pub use opf::{CONTENT_DIRECTORY, SENTINEL_MODIFIED};
pub use outline::INDEX_FILE;
pub use xhtml::NAVIGATION_FILE;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info};

use crate::error::TransformError;
use crate::resolver::{EntityResolver, NeverResolver, ResourceKind, ResourceReference};
use crate::xml::{Element, Location, XmlReader};

use super::engine::{
    CompiledStylesheet, DiagnosticSeverity, EngineDiagnostic, ErrorListener, ExecutionContext,
    ExecutionReport, MessageListener, StylesheetSource, TraceListener, TransformEngine,
    TransformParameters,
};
use outline::Outline;
use unit::{Unit, UnitLayout};
use xhtml::Renderer;

/// Image sources referenced by an EPUB rendering, one per line.
pub const EPUB_RESOURCES_FILE: &str = "epub-resources.txt";

/// Document numbers for generated identifiers.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next document number.
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The number the next allocation will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.next.store(0, Ordering::SeqCst);
    }
}

/// Compiles template units into executable stylesheets.
#[derive(Debug, Clone, Default)]
pub struct NativeEngine {
    ids: Arc<IdAllocator>,
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_allocator(&self) -> &IdAllocator {
        &self.ids
    }
}

/// Forwards diagnostics while keeping the errors for the compile result.
struct Recording<'e> {
    inner: &'e mut dyn ErrorListener,
    errors: Vec<EngineDiagnostic>,
}

impl ErrorListener for Recording<'_> {
    fn report(&mut self, diagnostic: EngineDiagnostic) {
        if diagnostic.severity == DiagnosticSeverity::Error {
            self.errors.push(diagnostic.clone());
        }
        self.inner.report(diagnostic);
    }
}

impl TransformEngine for NativeEngine {
    fn compile(
        &self,
        source: &StylesheetSource,
        errors: &mut dyn ErrorListener,
    ) -> Result<Box<dyn CompiledStylesheet>, TransformError> {
        self.ids.allocate();
        let mut recording = Recording {
            inner: errors,
            errors: Vec::new(),
        };
        match Unit::compile(source, &mut recording) {
            Some(unit) => {
                debug!("compiled unit {} ({} layout)", unit.name, unit.layout);
                Ok(Box::new(NativeStylesheet {
                    unit,
                    ids: Arc::clone(&self.ids),
                }))
            }
            None => Err(TransformError::Compile {
                stylesheet: source.system_id.clone(),
                diagnostics: recording.errors,
            }),
        }
    }

    fn reset_id_allocator(&self) {
        debug!("resetting identifier allocator");
        self.ids.reset();
    }
}

#[derive(Debug)]
struct NativeStylesheet {
    unit: Unit,
    ids: Arc<IdAllocator>,
}

impl NativeStylesheet {
    fn fail(&self, location: &Location, message: impl Into<String>) -> TransformError {
        TransformError::Execute(EngineDiagnostic::error(location.clone(), message))
    }

    fn check_parameters(&self, parameters: &TransformParameters) -> Result<(), TransformError> {
        let missing: Vec<&str> = self
            .unit
            .required_parameters()
            .filter(|name| !parameters.contains(name))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(self.fail(
                &self.unit.location,
                format!("required parameters were not supplied: {}", missing.join(", ")),
            ))
        }
    }

    fn load_branding(&self, path: &str) -> Result<Element, TransformError> {
        let data = fs::read(path).map_err(|source| TransformError::Io {
            path: path.into(),
            source,
        })?;
        XmlReader::new(&NeverResolver)
            .parse(&data, path, None)
            .map(|document| document.root)
            .map_err(|e| {
                let location = e.location().cloned().unwrap_or_else(|| Location::document(path));
                self.fail(&location, format!("unusable branding file: {}", e.message()))
            })
    }
}

impl CompiledStylesheet for NativeStylesheet {
    fn name(&self) -> &str {
        &self.unit.name
    }

    fn execute(&self, context: ExecutionContext<'_>) -> Result<ExecutionReport, TransformError> {
        let ExecutionContext {
            source,
            destination,
            parameters,
            trace,
            messages,
            resolver,
        } = context;
        self.check_parameters(parameters)?;

        let root = &source.root;
        let generation = self.unit.generation;
        if !root.name.is(generation.uri(), "Document") {
            return Err(self.fail(
                &root.location,
                format!(
                    "unit {} transforms 'Document' elements in {generation}, not '{}'",
                    self.unit.name, root.name
                ),
            ));
        }

        let document_number = self.ids.allocate();
        let outline = Outline::build(root, generation, document_number);
        debug!(
            "executing {} on {} as document {document_number}",
            self.unit.name, source.system_id
        );

        let branding = match parameters.get("branding").filter(|p| !p.is_empty()) {
            Some(path) => Some(self.load_branding(path)?),
            None => None,
        };

        let layout = self.unit.layout;
        let mut written: Vec<(String, String)> = Vec::new();
        match layout {
            UnitLayout::Single | UnitLayout::Multi | UnitLayout::Epub => {
                report_images(root, &outline, messages);
                report_unused_footnotes(&outline, messages);

                let root_name = root.display_name();
                trace.enter(&root_name, &root.location);
                let mut renderer = Renderer::new(&outline, &self.unit, branding.as_ref(), &mut *trace);
                if layout == UnitLayout::Single || !outline.is_sectioned() {
                    let file = outline.file_of(0, layout);
                    let page = renderer.whole(&file);
                    written.push((file, page));
                } else {
                    if layout == UnitLayout::Multi {
                        written.push((INDEX_FILE.to_string(), renderer.front_page()));
                    }
                    for index in 0..outline.blocks.len() {
                        written.push((outline.file_of(index, layout), renderer.part(index)));
                    }
                }
                if layout == UnitLayout::Epub {
                    written.push((NAVIGATION_FILE.to_string(), renderer.navigation_document()));
                }
                trace.leave(&root_name);
            }
            UnitLayout::Index => {
                trace_tree(trace, root);
                written.push((INDEX_DOCUMENT.to_string(), index::generate_index(&outline)));
            }
            UnitLayout::Package => {
                trace_tree(trace, root);
                let file = parameters.get("outputFile").unwrap_or("content.opf").to_string();
                let resources: Vec<String> = parameters
                    .get("extraResources")
                    .unwrap_or_default()
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                written.push((file, opf::generate_opf(&outline, &resources)));
            }
        }

        if layout == UnitLayout::Epub {
            let sources = image_sources(root, &outline);
            if let Some(directory) = parameters.get("sourceDirectory") {
                check_images(&sources, Path::new(directory), resolver, messages, root);
            }
            let mut listing = String::new();
            for source in &sources {
                listing.push_str(source);
                listing.push('\n');
            }
            written.push((EPUB_RESOURCES_FILE.to_string(), listing));
        }

        let mut report = ExecutionReport::default();
        for (name, text) in written {
            let path = destination.write(&name, text.as_bytes())?;
            info!("wrote {}", path.display());
            report.documents.push(path);
        }
        Ok(report)
    }
}

/// Trace every element of a subtree, properly nested.
fn trace_tree(trace: &mut dyn TraceListener, element: &Element) {
    let name = element.display_name();
    trace.enter(&name, &element.location);
    for child in element.child_elements() {
        trace_tree(trace, child);
    }
    trace.leave(&name);
}

fn report_images(root: &Element, outline: &Outline<'_>, messages: &mut dyn MessageListener) {
    for image in root.descendants().filter(|e| outline.is(e, "Image")) {
        if image.attribute("width").is_none() || image.attribute("height").is_none() {
            messages.message(
                &image.location,
                "image-size",
                &format!(
                    "image {} has no explicit width and height; readers may lay it out poorly",
                    image.attribute("source").unwrap_or_default()
                ),
            );
        }
    }
}

fn report_unused_footnotes(outline: &Outline<'_>, messages: &mut dyn MessageListener) {
    let referenced: BTreeSet<&str> = outline.footnote_targets(outline.root).collect();
    for footnote in &outline.footnotes {
        if !referenced.contains(footnote.id) {
            messages.message(
                &footnote.element.location,
                "footnote-unused",
                &format!("footnote {} is never referenced", footnote.id),
            );
        }
    }
}

/// Local image sources, sorted and without duplicates.
fn image_sources(root: &Element, outline: &Outline<'_>) -> Vec<String> {
    root.descendants()
        .filter(|e| outline.is(e, "Image"))
        .filter_map(|e| e.attribute("source"))
        .filter(|source| !source.contains("://"))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn check_images(
    sources: &[String],
    directory: &Path,
    resolver: &dyn EntityResolver,
    messages: &mut dyn MessageListener,
    root: &Element,
) {
    for source in sources {
        let reference = ResourceReference::new(ResourceKind::Asset, source.as_str()).with_base(Some(directory));
        if let Err(e) = resolver.resolve(&reference) {
            messages.message(&root.location, "image-missing", &format!("image {source} cannot be packaged: {e}"));
        }
    }
}
