//! Stylesheet compilation and execution.
//!
//! - [`engine`]: the traits a transformation engine implements
//! - [`native`]: the bundled engine
//! - [`driver`]: runs the right stylesheet for a request
//! - [`trace`], [`messages`]: file-backed listeners

pub mod driver;
pub mod engine;
pub mod messages;
pub mod native;
pub mod trace;

pub use driver::{TransformDriver, TransformReport};
pub use engine::{
    CollectingErrorListener, CompiledStylesheet, DiagnosticSeverity, EngineDiagnostic,
    ErrorListener, ExecutionContext, ExecutionReport, MessageListener, NullListener,
    OutputDestination, StylesheetSource, TraceListener, TransformEngine, TransformParameters,
};
pub use messages::LineMessageListener;
pub use native::{
    CONTENT_DIRECTORY, EPUB_RESOURCES_FILE, INDEX_DOCUMENT, INDEX_FILE, INDEX_NS,
    NAVIGATION_FILE, NativeEngine, SENTINEL_MODIFIED,
};
pub use trace::XmlTraceListener;
