//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use structural::request::ProcessingRequestBuilder;
use structural::{ConformanceCheck, ProcessingRequest, Processor, ProcessorConfig, Task};
use tempfile::TempDir;

/// A sectioned generation B document exercising links, footnotes and tables.
pub const MANUAL_8: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:com.io7m.structural:8:0"
          xmlns:dc="http://purl.org/dc/elements/1.1/">
  <Metadata>
    <dc:title>Example Manual</dc:title>
    <dc:identifier>urn:uuid:4b1c6c0e-5f0a-4d5e-9a52-1f4bd0f2e9a1</dc:identifier>
    <dc:language>en</dc:language>
  </Metadata>
  <Section title="Introduction" id="intro">
    <Paragraph>See <Link target="usage">usage</Link> for details.<LinkFootnote target="fn1"/></Paragraph>
    <Footnote id="fn1">A footnote.</Footnote>
  </Section>
  <Section title="Usage" id="usage">
    <Subsection title="Options">
      <Paragraph>
        <Table>
          <Columns><Column>Name</Column><Column>Meaning</Column></Columns>
          <Row><Cell>-v</Cell><Cell>Verbose</Cell></Row>
        </Table>
      </Paragraph>
      <FormalItem title="Example"><Verbatim>structural xhtml manual.xml</Verbatim></FormalItem>
    </Subsection>
  </Section>
</Document>
"#;

/// An unsectioned generation A document.
pub const MANUAL_7: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:com.io7m.structural:7:0"
          xmlns:dc="http://purl.org/dc/elements/1.1/">
  <Metadata>
    <dc:title>Old Manual</dc:title>
  </Metadata>
  <Paragraph>Some <Term>text</Term>.</Paragraph>
</Document>
"#;

/// A generation B document with a single image.
pub const ILLUSTRATED_8: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:com.io7m.structural:8:0"
          xmlns:dc="http://purl.org/dc/elements/1.1/">
  <Metadata><dc:title>Pictures</dc:title></Metadata>
  <Paragraph><Image source="images/figure.png" width="10" height="10">A figure</Image></Paragraph>
</Document>
"#;

/// Source and output directories inside one temporary directory.
pub struct Workspace {
    _root: TempDir,
    pub source_directory: PathBuf,
    pub output_directory: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let source_directory = root.path().join("src");
        let output_directory = root.path().join("out");
        fs::create_dir_all(&source_directory).unwrap();
        Self {
            _root: root,
            source_directory,
            output_directory,
        }
    }

    /// Write a file below the source directory and return its path.
    pub fn source(&self, name: &str, text: &str) -> PathBuf {
        let path = self.source_directory.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, text).unwrap();
        path
    }

    pub fn request(&self, source: &Path, task: Task) -> ProcessingRequestBuilder {
        ProcessingRequest::builder(&self.output_directory, source).task(task)
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.output_directory.join(name)
    }

    /// Names of the files directly inside the output directory.
    pub fn output_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.output_directory)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// A processor that performs only the built-in conformance checks.
pub fn processor() -> Processor {
    Processor::with_config(ProcessorConfig::new().with_conformance(ConformanceCheck::Builtin))
}
