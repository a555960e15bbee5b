//! Stylesheet selection and execution through the processor.

mod common;

use std::fs;
use std::path::Path;

use common::{MANUAL_7, MANUAL_8, Workspace, processor};
use structural::dispatch::StylesheetId;
use structural::error::ResolutionError;
use structural::resolver::NeverResolver;
use structural::transform::{
    CollectingErrorListener, ExecutionContext, INDEX_DOCUMENT, INDEX_FILE, INDEX_NS, NativeEngine,
    NullListener, OutputDestination, StylesheetSource, TransformEngine, TransformParameters,
};
use structural::xml::XmlReader;
use structural::{Error, ErrorCategory, LayoutMode, ResourceCatalog, SchemaNamespace, Task};

#[test]
fn test_single_file_output() {
    let ws = Workspace::new();
    let source = ws.source("manual.xml", MANUAL_8);
    let request = ws.request(&source, Task::TransformToWeb).build().unwrap();
    let report = processor().process(&request).unwrap();

    let output = report.output.expect("web output is validated");
    assert!(!output.failed(), "{:?}", output.findings());
    let transform = report.transform.unwrap();
    assert_eq!(transform.namespace, SchemaNamespace::GenerationB);
    assert_eq!(transform.stylesheet, StylesheetId::GenerationBSingle);
    assert_eq!(transform.documents, [ws.output(INDEX_FILE)]);
    assert_eq!(transform.assets.len(), 2);
    assert_eq!(
        ws.output_names(),
        ["index.xhtml", "messages.log", "reset.css", "structural.css", "trace.xml"]
    );

    let page = fs::read_to_string(ws.output(INDEX_FILE)).unwrap();
    assert!(page.contains("Example Manual"));
    assert!(page.contains(r#"id="usage""#));
    assert!(page.contains(r##"href="#usage""##));

    let trace = fs::read_to_string(ws.output("trace.xml")).unwrap();
    assert!(trace.trim_end().ends_with("</trace>"));
    assert!(trace.contains("Document"));
}

#[test]
fn test_multi_file_output() {
    let ws = Workspace::new();
    let source = ws.source("manual.xml", MANUAL_8);
    let request = ws
        .request(&source, Task::TransformToWeb)
        .layout(LayoutMode::MultiFile)
        .write_shared_assets(false)
        .build()
        .unwrap();
    let report = processor().process(&request).unwrap();
    let output = report.output.expect("web output is validated");
    assert!(!output.failed(), "{:?}", output.findings());
    let transform = report.transform.unwrap();

    assert_eq!(transform.stylesheet, StylesheetId::GenerationBMulti);
    assert!(transform.assets.is_empty());
    assert!(!ws.output("reset.css").exists());

    // A front page plus one page per top-level section.
    assert_eq!(transform.documents.len(), 3);
    assert_eq!(transform.documents[0], ws.output(INDEX_FILE));
    let usage = transform
        .documents
        .iter()
        .find(|p| fs::read_to_string(p).unwrap().contains(r#"id="usage""#))
        .expect("a page holds the usage section");
    let intro = fs::read_to_string(&transform.documents[1]).unwrap();
    let usage_name = usage.file_name().unwrap().to_string_lossy();
    assert!(intro.contains(&format!("{usage_name}#usage")), "{intro}");
}

#[test]
fn test_index_layout() {
    let ws = Workspace::new();
    let source = ws.source("manual.xml", MANUAL_8);
    let request = ws
        .request(&source, Task::TransformToWeb)
        .layout(LayoutMode::PackageIndexOnly)
        .build()
        .unwrap();
    let transform = processor().process(&request).unwrap().transform.unwrap();

    assert_eq!(transform.documents, [ws.output(INDEX_DOCUMENT)]);
    let index = fs::read_to_string(ws.output(INDEX_DOCUMENT)).unwrap();
    assert!(index.contains(INDEX_NS));
    assert!(index.contains("Usage"));
}

#[test]
fn test_generation_a_renders_but_does_not_package() {
    let ws = Workspace::new();
    let source = ws.source("old.xml", MANUAL_7);

    let web = ws.request(&source, Task::TransformToWeb).build().unwrap();
    let transform = processor().process(&web).unwrap().transform.unwrap();
    assert_eq!(transform.stylesheet, StylesheetId::GenerationASingle);

    for (task, layout) in [
        (Task::TransformToPackage, LayoutMode::SingleFile),
        (Task::TransformToWeb, LayoutMode::PackageIndexOnly),
    ] {
        let request = ws.request(&source, task).layout(layout).build().unwrap();
        let err = processor().process(&request).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transform);
        assert!(err.to_string().contains("use generation B or newer"), "{err}");
    }
}

#[test]
fn test_custom_trace_and_message_files() {
    let ws = Workspace::new();
    let source = ws.source(
        "lonely.xml",
        r#"<Document xmlns="urn:com.io7m.structural:8:0">
  <Metadata/>
  <Paragraph>Text</Paragraph>
  <Footnote id="unused">Never referenced.</Footnote>
</Document>"#,
    );
    let logs = ws.source_directory.parent().unwrap().join("logs");
    let request = ws
        .request(&source, Task::TransformToWeb)
        .trace_file(logs.join("t.xml"))
        .message_file(logs.join("m.log"))
        .build()
        .unwrap();
    let transform = processor().process(&request).unwrap().transform.unwrap();

    assert_eq!(transform.messages, 1);
    let messages = fs::read_to_string(logs.join("m.log")).unwrap();
    assert!(messages.contains("footnote-unused"), "{messages}");
    assert!(logs.join("t.xml").is_file());
    assert!(!ws.output("trace.xml").exists());
}

#[test]
fn test_branding_is_placed_on_pages() {
    let ws = Workspace::new();
    let source = ws.source("manual.xml", MANUAL_8);
    let branding = ws.source(
        "brand.xml",
        r#"<div xmlns="http://www.w3.org/1999/xhtml" class="brand">Example Corp</div>"#,
    );
    let request = ws
        .request(&source, Task::TransformToWeb)
        .branding_file(&branding)
        .build()
        .unwrap();
    processor().process(&request).unwrap();
    let page = fs::read_to_string(ws.output(INDEX_FILE)).unwrap();
    assert!(page.contains("Example Corp"));
}

#[test]
fn test_repeated_runs_are_identical() {
    let ws = Workspace::new();
    let source = ws.source("manual.xml", MANUAL_8);
    let request = ws
        .request(&source, Task::TransformToWeb)
        .layout(LayoutMode::MultiFile)
        .build()
        .unwrap();
    let processor = processor();

    let first = processor.process(&request).unwrap().transform.unwrap();
    let before: Vec<Vec<u8>> = first.documents.iter().map(|p| fs::read(p).unwrap()).collect();
    let second = processor.process(&request).unwrap().transform.unwrap();
    let after: Vec<Vec<u8>> = second.documents.iter().map(|p| fs::read(p).unwrap()).collect();

    assert_eq!(first.documents, second.documents);
    assert_eq!(before, after);
}

fn execute_without_reset(engine: &NativeEngine, source: &Path, out: &Path) -> String {
    let catalog = ResourceCatalog::builtin();
    let name = StylesheetId::GenerationBSingle.resource_name();
    let unit = StylesheetSource {
        system_id: name.to_string(),
        data: catalog.bytes(name).unwrap().to_vec().into(),
    };
    let mut errors = CollectingErrorListener::new();
    let stylesheet = engine.compile(&unit, &mut errors).unwrap();

    let bytes = fs::read(source).unwrap();
    let document = XmlReader::new(&NeverResolver)
        .parse(&bytes, &source.display().to_string(), None)
        .unwrap();
    let parameters = TransformParameters::new()
        .with("outputDirectory", out.display().to_string())
        .with("sourceDirectory", source.parent().unwrap().display().to_string());
    let destination = OutputDestination::new(out);
    stylesheet
        .execute(ExecutionContext {
            source: &document,
            destination: &destination,
            parameters: &parameters,
            trace: &mut NullListener,
            messages: &mut NullListener,
            resolver: &NeverResolver,
        })
        .unwrap();
    fs::read_to_string(out.join(INDEX_FILE)).unwrap()
}

#[test]
fn test_identifiers_drift_without_a_reset() {
    let ws = Workspace::new();
    let source = ws.source("manual.xml", MANUAL_8);
    let engine = NativeEngine::new();

    let first = execute_without_reset(&engine, &source, &ws.output_directory.join("a"));
    let second = execute_without_reset(&engine, &source, &ws.output_directory.join("b"));
    assert_ne!(first, second);

    engine.reset_id_allocator();
    let third = execute_without_reset(&engine, &source, &ws.output_directory.join("c"));
    engine.reset_id_allocator();
    let fourth = execute_without_reset(&engine, &source, &ws.output_directory.join("d"));
    assert_eq!(third, fourth);
}

#[test]
fn test_missing_source_is_a_resolution_error() {
    let ws = Workspace::new();
    let request = ws
        .request(&ws.source_directory.join("absent.xml"), Task::TransformToWeb)
        .build()
        .unwrap();
    let err = processor().process(&request).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Resolution, "{err}");
    assert!(matches!(err, Error::Resolution(ResolutionError::NotFound { .. })), "{err}");
}
