//! EPUB packaging: staging, reproducible archives and conformance checks.

mod common;

use std::fs;
use std::io::{Cursor, Read};
use std::path::PathBuf;

use common::{ILLUSTRATED_8, MANUAL_7, MANUAL_8, Workspace, processor};
use structural::package::inspect::{METHOD_STORED, local_entries};
use structural::package::{BuiltinChecker, ConformanceChecker, sentinel_dos_time};
use structural::{ConformanceCheck, Error, ErrorCategory, LayoutMode, Processor, ProcessorConfig, Task};
use zip::ZipArchive;

fn read_entry(zip: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
    let mut text = String::new();
    zip.by_name(name).unwrap().read_to_string(&mut text).unwrap();
    text
}

fn entry_names(archive: &PathBuf) -> Vec<String> {
    let bytes = fs::read(archive).unwrap();
    local_entries(&bytes).unwrap().into_iter().map(|e| e.name).collect()
}

#[test]
fn test_package_layout() {
    let ws = Workspace::new();
    let source = ws.source("manual.xml", MANUAL_8);
    let request = ws
        .request(&source, Task::TransformToPackage)
        .layout(LayoutMode::MultiFile)
        .build()
        .unwrap();
    let report = processor().process(&request).unwrap();

    assert!(!report.source.unwrap().failed());
    assert!(!report.output.unwrap().failed());
    let package = report.package.unwrap();
    assert_eq!(package.archive, ws.output("output.epub"));
    assert!(package.conformance.unwrap().passed);

    let names = entry_names(&package.archive);
    assert_eq!(names[0], "mimetype");
    assert_eq!(names[1], "content.opf");
    for expected in [
        "META-INF/container.xml",
        "OEBPS/toc.xhtml",
        "OEBPS/reset-epub.css",
        "OEBPS/structural-epub.css",
        "OEBPS/document.css",
    ] {
        assert!(names.iter().any(|n| n == expected), "{expected} missing from {names:?}");
    }
    // One page per top-level section.
    let pages = names
        .iter()
        .filter(|n| n.starts_with("OEBPS/") && n.ends_with(".xhtml") && *n != "OEBPS/toc.xhtml")
        .count();
    assert_eq!(pages, 2);
    assert_eq!(package.manifest.len(), names.len());

    let bytes = fs::read(&package.archive).unwrap();
    let entries = local_entries(&bytes).unwrap();
    assert_eq!(entries[0].method, METHOD_STORED);
    assert_eq!(entries[0].extra_len, 0);

    let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(read_entry(&mut zip, "mimetype"), "application/epub+zip");
    let opf = read_entry(&mut zip, "content.opf");
    assert!(opf.contains("urn:uuid:4b1c6c0e-5f0a-4d5e-9a52-1f4bd0f2e9a1"));
}

#[test]
fn test_packages_are_reproducible() {
    let ws = Workspace::new();
    let source = ws.source("manual.xml", MANUAL_8);
    let request = ws.request(&source, Task::TransformToPackage).build().unwrap();

    let first = processor().process(&request).unwrap().package.unwrap();
    let first_bytes = fs::read(&first.archive).unwrap();
    let second = processor().process(&request).unwrap().package.unwrap();
    let second_bytes = fs::read(&second.archive).unwrap();

    assert_eq!(first.manifest, second.manifest);
    assert_eq!(first_bytes, second_bytes);

    let (time, date) = sentinel_dos_time();
    for entry in local_entries(&second_bytes).unwrap() {
        assert_eq!((entry.dos_time, entry.dos_date), (time, date), "{}", entry.name);
        assert!(!entry.has_data_descriptor());
        let manifest = second.manifest.get(&entry.name).unwrap();
        assert_eq!(manifest.crc32, entry.crc32);
        assert_eq!(manifest.size, u64::from(entry.size));
    }
}

#[test]
fn test_generation_a_produces_no_archive() {
    let ws = Workspace::new();
    let source = ws.source("old.xml", MANUAL_7);
    let request = ws.request(&source, Task::TransformToPackage).build().unwrap();
    let err = processor().process(&request).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transform);
    assert!(!ws.output("output.epub").exists());
}

#[test]
fn test_images_and_extras_are_packaged() {
    let ws = Workspace::new();
    let source = ws.source("pictures.xml", ILLUSTRATED_8);
    ws.source("images/figure.png", "not really a png");
    ws.source("fonts/serif.otf", "font");
    ws.source("notes.txt", "notes");
    ws.source("extra-resources.txt", "fonts/serif.otf\n");
    let request = ws
        .request(&source, Task::TransformToPackage)
        .package_name("pictures.epub")
        .build()
        .unwrap();

    let report = processor()
        .process_with_extras(&request, &["notes.txt".to_string()])
        .unwrap();
    let package = report.package.unwrap();
    assert_eq!(package.archive, ws.output("pictures.epub"));

    let names = entry_names(&package.archive);
    for expected in ["OEBPS/images/figure.png", "OEBPS/fonts/serif.otf", "OEBPS/notes.txt"] {
        assert!(names.iter().any(|n| n == expected), "{expected} missing from {names:?}");
    }
}

#[test]
fn test_missing_image_fails_packaging() {
    let ws = Workspace::new();
    let source = ws.source("pictures.xml", ILLUSTRATED_8);
    let request = ws.request(&source, Task::TransformToPackage).build().unwrap();

    let err = processor().process(&request).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Resolution, "{err}");
    let messages = fs::read_to_string(ws.output("messages.log")).unwrap();
    assert!(messages.contains("image-missing"));
    assert!(!ws.output("output.epub").exists());
}

#[test]
fn test_extras_may_not_leave_the_source_directory() {
    let ws = Workspace::new();
    let source = ws.source("manual.xml", MANUAL_8);
    let request = ws.request(&source, Task::TransformToPackage).build().unwrap();
    let err = processor()
        .process_with_extras(&request, &["../../etc/passwd".to_string()])
        .unwrap_err();
    match err {
        Error::Resolution(e) => assert!(e.is_security_violation()),
        other => panic!("unexpected error {other}"),
    }
}

#[cfg(unix)]
#[test]
fn test_failed_conformance_keeps_the_archive() {
    let ws = Workspace::new();
    let source = ws.source("manual.xml", MANUAL_8);
    let request = ws.request(&source, Task::TransformToPackage).build().unwrap();
    let config = ProcessorConfig::new().with_conformance(ConformanceCheck::External {
        program: PathBuf::from("false"),
        args: Vec::new(),
    });

    let err = Processor::with_config(config).process(&request).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Packaging);
    assert!(err.to_string().contains("conformance"), "{err}");
    assert!(ws.output("output.epub").is_file());
}

#[test]
fn test_disabled_conformance() {
    let ws = Workspace::new();
    let source = ws.source("manual.xml", MANUAL_8);
    let request = ws.request(&source, Task::TransformToPackage).build().unwrap();
    let config = ProcessorConfig::new()
        .with_conformance(ConformanceCheck::Disabled)
        .with_compression_level(9);

    let package = Processor::with_config(config).process(&request).unwrap().package.unwrap();
    assert!(package.conformance.is_none());
    assert!(BuiltinChecker.check(&package.archive).unwrap().passed);
}
