//! Execution tracing to an XML file.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::engine::TraceListener;
use crate::xml::{Location, escape_attribute};

/// Writes one `<element>` per source element entered during execution.
///
/// Write failures are remembered and reported by [`finish`](Self::finish)
/// so that tracing never interrupts a transform midway.
pub struct XmlTraceListener {
    path: PathBuf,
    out: BufWriter<File>,
    depth: usize,
    failure: Option<io::Error>,
}

impl XmlTraceListener {
    pub fn create(path: &Path, stylesheet: &str, source: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
        writeln!(
            out,
            "<trace stylesheet=\"{}\" source=\"{}\">",
            escape_attribute(stylesheet),
            escape_attribute(source)
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
            depth: 1,
            failure: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(&mut self, result: io::Result<()>) {
        if let Err(e) = result
            && self.failure.is_none()
        {
            self.failure = Some(e);
        }
    }

    /// Close the trace document and flush it to disk.
    pub fn finish(mut self) -> io::Result<()> {
        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        while self.depth > 1 {
            self.depth -= 1;
            writeln!(self.out, "{}</element>", "  ".repeat(self.depth))?;
        }
        writeln!(self.out, "</trace>")?;
        self.out.flush()
    }
}

impl TraceListener for XmlTraceListener {
    fn enter(&mut self, name: &str, location: &Location) {
        let result = writeln!(
            self.out,
            "{}<element name=\"{}\" line=\"{}\" column=\"{}\">",
            "  ".repeat(self.depth),
            escape_attribute(name),
            location.line,
            location.column
        );
        self.depth += 1;
        self.record(result);
    }

    fn leave(&mut self, _name: &str) {
        if self.depth <= 1 {
            return;
        }
        self.depth -= 1;
        let result = writeln!(self.out, "{}</element>", "  ".repeat(self.depth));
        self.record(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_is_well_formed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.xml");
        let mut trace = XmlTraceListener::create(&path, "unit", "doc.xml").unwrap();
        trace.enter("Document", &Location::new("doc.xml", 1, 1));
        trace.enter("Section", &Location::new("doc.xml", 2, 3));
        trace.leave("Section");
        // Left open on purpose; finish closes it.
        trace.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("<?xml"));
        assert_eq!(text.matches("<element").count(), 2);
        assert_eq!(text.matches("</element>").count(), 2);
        assert!(text.trim_end().ends_with("</trace>"));
    }

    #[test]
    fn test_trace_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/run/trace.xml");
        XmlTraceListener::create(&path, "unit", "doc.xml").unwrap().finish().unwrap();
        assert!(path.is_file());
    }
}
