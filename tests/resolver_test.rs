//! Catalog resolution, sandboxing and XInclude confinement.

mod common;

use std::fs;
use std::sync::Arc;

use common::{MANUAL_8, Workspace, processor};
use proptest::prelude::*;
use structural::catalog::{GENERATION_B_SCHEMA, XHTML_SCHEMA};
use structural::dispatch::GENERATION_B_NAMESPACE;
use structural::error::{ResolutionError, XmlError};
use structural::resolver::{CatalogResolver, EntityResolver, NeverResolver, ResourceKind, ResourceReference};
use structural::xml::XmlReader;
use structural::{Error, ErrorCategory, ResourceCatalog, Task};

fn resolver() -> CatalogResolver {
    CatalogResolver::new(Arc::new(ResourceCatalog::builtin()))
}

#[test]
fn test_catalog_resources_round_trip() {
    let resolver = resolver();

    let by_namespace = ResourceReference::new(ResourceKind::Schema, "http://example.com/anything.xsd")
        .with_namespace(GENERATION_B_NAMESPACE);
    let resolved = resolver.resolve(&by_namespace).unwrap();
    assert_eq!(resolved.system_id, GENERATION_B_SCHEMA);
    assert_eq!(
        resolved.data.as_ref(),
        include_bytes!("../resources/schemas/structural-8.xsd").as_slice()
    );

    let by_name = ResourceReference::new(ResourceKind::Schema, XHTML_SCHEMA);
    assert_eq!(
        resolver.resolve(&by_name).unwrap().data.as_ref(),
        include_bytes!("../resources/schemas/xhtml.xsd").as_slice()
    );
}

#[test]
fn test_remote_resources_are_never_fetched() {
    let reference = ResourceReference::new(ResourceKind::Dtd, "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd");
    assert!(matches!(
        resolver().resolve(&reference),
        Err(ResolutionError::Forbidden(_))
    ));
    assert!(matches!(
        NeverResolver.resolve(&ResourceReference::new(ResourceKind::Include, "a.xml")),
        Err(ResolutionError::Forbidden(_))
    ));
}

#[test]
fn test_sandbox_refuses_escapes() {
    let ws = Workspace::new();
    ws.source("inside.xml", "<a/>");
    let resolver = resolver().with_sandbox(&ws.source_directory);

    let inside = resolver.sandboxed_path("inside.xml", None).unwrap();
    assert!(inside.starts_with(&ws.source_directory));

    for escape in ["../../etc/passwd", "/etc/passwd", "sub/../../out/x", "%2e%2e/%2e%2e/etc/passwd"] {
        let err = resolver.sandboxed_path(escape, None).unwrap_err();
        assert!(err.is_security_violation(), "{escape}: {err}");
        assert!(err.to_string().contains("above the base directory"));
    }

    assert!(matches!(
        resolver.sandboxed_path("absent.xml", None),
        Err(ResolutionError::NotFound { .. })
    ));
}

#[cfg(unix)]
#[test]
fn test_sandbox_refuses_symlinks_out() {
    let ws = Workspace::new();
    let outside = ws.source_directory.parent().unwrap().join("secret.txt");
    fs::write(&outside, "secret").unwrap();
    std::os::unix::fs::symlink(&outside, ws.source_directory.join("link.txt")).unwrap();

    let resolver = resolver().with_sandbox(&ws.source_directory);
    let err = resolver.sandboxed_path("link.txt", None).unwrap_err();
    assert!(err.is_security_violation(), "{err}");
}

#[test]
fn test_xinclude_inside_the_sandbox() {
    let ws = Workspace::new();
    ws.source(
        "chapters/one.xml",
        r#"<Section xmlns="urn:com.io7m.structural:8:0" title="Included"><Paragraph>Hello</Paragraph></Section>"#,
    );
    let source = ws.source(
        "book.xml",
        r#"<Document xmlns="urn:com.io7m.structural:8:0"
          xmlns:xi="http://www.w3.org/2001/XInclude">
  <Metadata/>
  <xi:include href="chapters/one.xml"/>
</Document>"#,
    );

    let request = ws.request(&source, Task::Validate).build().unwrap();
    let outcome = processor().process(&request).unwrap().source.unwrap();
    assert!(!outcome.failed(), "{:?}", outcome.findings());
}

#[test]
fn test_xinclude_outside_the_sandbox() {
    let ws = Workspace::new();
    fs::write(
        ws.source_directory.parent().unwrap().join("outside.xml"),
        r#"<Section xmlns="urn:com.io7m.structural:8:0" title="Outside"><Paragraph>x</Paragraph></Section>"#,
    )
    .unwrap();
    let source = ws.source(
        "book.xml",
        r#"<Document xmlns="urn:com.io7m.structural:8:0"
          xmlns:xi="http://www.w3.org/2001/XInclude">
  <Metadata/>
  <xi:include href="../outside.xml"/>
</Document>"#,
    );

    let request = ws.request(&source, Task::Validate).build().unwrap();
    let err = processor().process(&request).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Resolution);
    match err {
        Error::Resolution(e) => assert!(e.is_security_violation()),
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_xinclude_text_and_fallback() {
    let ws = Workspace::new();
    ws.source("snippet.txt", "line one\r\nline two\n");
    let resolver = resolver().with_sandbox(&ws.source_directory);
    let reader = XmlReader::new(&resolver).with_xinclude(true);

    let text = r#"<a xmlns:xi="http://www.w3.org/2001/XInclude"><b><xi:include href="snippet.txt" parse="text"/></b><c><xi:include href="missing.xml"><xi:fallback>none</xi:fallback></xi:include></c></a>"#;
    let document = reader
        .parse(text.as_bytes(), "a.xml", Some(&ws.source_directory))
        .unwrap();
    let children: Vec<String> = document.root.child_elements().map(|e| e.text()).collect();
    assert_eq!(children, ["line one\nline two\n", "none"]);
}

#[test]
fn test_entity_declarations_never_parse() {
    let reader = XmlReader::new(&NeverResolver);
    let text = br#"<!DOCTYPE a [<!ENTITY x SYSTEM "file:///etc/passwd">]><a>&x;</a>"#;
    assert!(matches!(
        reader.parse(text, "a.xml", None),
        Err(XmlError::Forbidden { .. })
    ));
}

#[test]
fn test_include_loops_are_reported() {
    let ws = Workspace::new();
    let a = ws.source(
        "a.xml",
        r#"<a xmlns:xi="http://www.w3.org/2001/XInclude"><xi:include href="b.xml"/></a>"#,
    );
    ws.source(
        "b.xml",
        r#"<b xmlns:xi="http://www.w3.org/2001/XInclude"><xi:include href="a.xml"/></b>"#,
    );
    let resolver = resolver().with_sandbox(&ws.source_directory);
    let reader = XmlReader::new(&resolver).with_xinclude(true);
    let bytes = fs::read(&a).unwrap();
    let err = reader
        .parse(&bytes, &a.display().to_string(), Some(&ws.source_directory))
        .unwrap_err();
    assert!(matches!(err, XmlError::Include { .. }), "{err}");
}

#[test]
fn test_source_documents_resolve_only_inside_their_directory() {
    let ws = Workspace::new();
    let source = ws.source("nested/manual.xml", MANUAL_8);
    let request = ws.request(&source, Task::Validate).build().unwrap();
    assert_eq!(request.source_directory(), ws.source_directory.join("nested"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_sandboxed_paths_never_escape(
        parts in prop::collection::vec(prop::sample::select(vec!["a", "b", "..", "."]), 1..8)
    ) {
        let root = tempfile::tempdir().unwrap();
        let sandbox = root.path().join("sandbox");
        fs::create_dir_all(sandbox.join("a/b")).unwrap();
        fs::write(sandbox.join("a/b/a"), "x").unwrap();

        let mut depth: i64 = 0;
        let mut escapes = false;
        for part in &parts {
            match *part {
                ".." => depth -= 1,
                "." => {}
                _ => depth += 1,
            }
            escapes |= depth < 0;
        }

        let resolver = resolver().with_sandbox(&sandbox);
        match resolver.sandboxed_path(&parts.join("/"), None) {
            Ok(path) => {
                prop_assert!(!escapes);
                prop_assert!(path.starts_with(&sandbox));
            }
            Err(e) => prop_assert_eq!(e.is_security_violation(), escapes, "{}", e),
        }
    }
}
