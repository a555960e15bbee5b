//! Source validation through the processor.

mod common;

use std::fs;
use std::sync::Arc;

use common::{MANUAL_7, MANUAL_8, Workspace, processor};
use structural::catalog::{GENERATION_B_SCHEMA, ResourceGroup};
use structural::dispatch::{GENERATION_A_NAMESPACE, GENERATION_B_NAMESPACE};
use structural::error::ValidationError;
use structural::validator::SchemaValidator;
use structural::{Error, ErrorCategory, FindingKind, ProcessingRequest, ResourceCatalog, Severity, Task};

fn findings_of(err: &Error) -> Vec<(FindingKind, String)> {
    match err {
        Error::Validation(failure) => failure
            .outcome()
            .findings()
            .iter()
            .map(|f| (f.kind, f.message.clone()))
            .collect(),
        other => panic!("expected a validation failure, got {other}"),
    }
}

#[test]
fn test_valid_documents_pass() {
    let ws = Workspace::new();
    for (name, text) in [("manual-8.xml", MANUAL_8), ("manual-7.xml", MANUAL_7)] {
        let source = ws.source(name, text);
        let request = ws.request(&source, Task::Validate).build().unwrap();
        let report = processor().process(&request).unwrap();
        let outcome = report.source.expect("validation ran");
        assert!(!outcome.failed(), "{name}: {:?}", outcome.findings());
        assert!(report.transform.is_none());
    }
}

#[test]
fn test_every_violation_is_reported() {
    let ws = Workspace::new();
    let source = ws.source(
        "broken.xml",
        r#"<Document xmlns="urn:com.io7m.structural:8:0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <Metadata><dc:title>Broken</dc:title></Metadata>
  <Section>
    <Paragraph colour="red">Text</Paragraph>
    <Paragraph><Image>no source</Image></Paragraph>
  </Section>
</Document>"#,
    );
    let request = ws.request(&source, Task::Validate).build().unwrap();
    let err = processor().process(&request).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);

    let findings = findings_of(&err);
    assert_eq!(findings.len(), 3, "{findings:?}");
    assert!(findings.iter().all(|(kind, _)| *kind == FindingKind::Schema));
    let messages: Vec<&str> = findings.iter().map(|(_, m)| m.as_str()).collect();
    assert!(messages.iter().any(|m| m.contains("'title'")));
    assert!(messages.iter().any(|m| m.contains("colour")));
    assert!(messages.iter().any(|m| m.contains("'source'")));
}

#[test]
fn test_dangling_reference_is_an_identity_finding() {
    let ws = Workspace::new();
    let source = ws.source(
        "dangling.xml",
        r#"<Document xmlns="urn:com.io7m.structural:8:0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <Metadata/>
  <Paragraph><Link target="nowhere">x</Link></Paragraph>
</Document>"#,
    );
    let request = ws.request(&source, Task::Validate).build().unwrap();
    let err = processor().process(&request).unwrap_err();
    let findings = findings_of(&err);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].0, FindingKind::Identity);
    assert!(findings[0].1.contains("nowhere"));
}

#[test]
fn test_two_namespaces_are_ambiguous() {
    let ws = Workspace::new();
    let source = ws.source(
        "mixed.xml",
        &format!(
            r#"<Document xmlns="{GENERATION_B_NAMESPACE}" xmlns:old="{GENERATION_A_NAMESPACE}"><Metadata/></Document>"#
        ),
    );
    let request = ws.request(&source, Task::Validate).build().unwrap();
    let err = processor().process(&request).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::AmbiguousDocument);
    let text = err.to_string();
    assert!(text.contains(GENERATION_A_NAMESPACE));
    assert!(text.contains(GENERATION_B_NAMESPACE));
}

#[test]
fn test_unknown_namespace_mentions_xinclude() {
    let ws = Workspace::new();
    ws.source("body.xml", MANUAL_8);
    let source = ws.source(
        "wrapper.xml",
        r#"<xi:include xmlns:xi="http://www.w3.org/2001/XInclude" href="body.xml"/>"#,
    );
    let request = ws.request(&source, Task::Validate).build().unwrap();
    match processor().process(&request).unwrap_err() {
        Error::AmbiguousDocument(e) => {
            assert!(e.found.is_empty());
            assert!(e.hint.as_deref().is_some_and(|h| h.contains("XInclude")));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_malformed_document_is_one_fatal_finding() {
    let ws = Workspace::new();
    let source = ws.source(
        "malformed.xml",
        r#"<Document xmlns="urn:com.io7m.structural:8:0"><Metadata></Document>"#,
    );
    let request = ws.request(&source, Task::Validate).build().unwrap();
    match processor().process(&request).unwrap_err() {
        Error::Validation(ValidationError::Source { outcome, .. }) => {
            assert_eq!(outcome.len(), 1);
            assert_eq!(outcome.findings()[0].severity, Severity::Fatal);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_entity_declarations_are_rejected() {
    let ws = Workspace::new();
    let source = ws.source(
        "entities.xml",
        r#"<!DOCTYPE Document [<!ENTITY name "value">]>
<Document xmlns="urn:com.io7m.structural:8:0"><Metadata/><Paragraph>&name;</Paragraph></Document>"#,
    );
    let request = ws.request(&source, Task::Validate).build().unwrap();
    let err = processor().process(&request).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert_eq!(findings_of(&err).len(), 1);
}

#[test]
fn test_broken_schema_is_a_configuration_error() {
    let catalog = ResourceCatalog::builtin().with_resource(
        GENERATION_B_SCHEMA,
        ResourceGroup::Schema,
        Some(GENERATION_B_NAMESPACE),
        b"<xs:schema xmlns:xs=\"http://www.w3.org/2001/XMLSchema\"><xs:element name=\"Document\" type=\"xs:nothing\"/></xs:schema>".to_vec(),
    );
    let ws = Workspace::new();
    let source = ws.source("manual.xml", MANUAL_8);
    let request = ws.request(&source, Task::Validate).build().unwrap();

    let err = SchemaValidator::new(Arc::new(catalog)).validate(&request).unwrap_err();
    assert!(matches!(err, Error::SchemaCompile(_)), "{err}");
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_relative_paths_are_refused() {
    let err = ProcessingRequest::builder("out", "/docs/manual.xml").build().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    let err = ProcessingRequest::builder("/out", "manual.xml").build().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    let err = ProcessingRequest::builder("/out", "/docs/manual.xml")
        .package_name("../escape.epub")
        .build()
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_schema_export_respects_replace() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = ResourceCatalog::builtin();

    let written = catalog.export_schemas(dir.path(), false).unwrap();
    assert!(!written.is_empty());
    let target = dir.path().join(GENERATION_B_SCHEMA);
    assert_eq!(fs::read(&target).unwrap(), catalog.bytes(GENERATION_B_SCHEMA).unwrap());

    fs::write(&target, "local edits").unwrap();
    assert!(catalog.export_schemas(dir.path(), false).unwrap().is_empty());
    assert_eq!(fs::read_to_string(&target).unwrap(), "local edits");

    let rewritten = catalog.export_schemas(dir.path(), true).unwrap();
    assert_eq!(rewritten.len(), written.len());
    assert_eq!(fs::read(&target).unwrap(), catalog.bytes(GENERATION_B_SCHEMA).unwrap());
}
