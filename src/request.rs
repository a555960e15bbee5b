//! Processing requests.
//!
//! A [`ProcessingRequest`] is built once per invocation and never mutated.
//! Every path it carries is absolute; relative paths are rejected when the
//! request is built.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default file name of the generated package.
pub const DEFAULT_PACKAGE_NAME: &str = "output.epub";
/// Default execution trace file name inside the output directory.
pub const DEFAULT_TRACE_FILE: &str = "trace.xml";
/// Default diagnostic message file name inside the output directory.
pub const DEFAULT_MESSAGE_FILE: &str = "messages.log";

/// The work a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Task {
    /// Validate the source document and stop.
    Validate,
    /// Validate, then render XHTML pages.
    #[default]
    TransformToWeb,
    /// Validate, render the EPUB layout, check it and build the package.
    TransformToPackage,
    /// Validate previously generated XHTML in the output directory.
    ValidateGeneratedOutput,
}

/// How generated output is split into files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutMode {
    /// A single `index.xhtml` containing the entire document.
    #[default]
    SingleFile,
    /// One file per top-level section plus an `index.xhtml` front page.
    MultiFile,
    /// Only the machine-readable document index.
    PackageIndexOnly,
}

/// An immutable, validated description of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingRequest {
    output_directory: PathBuf,
    source_file: PathBuf,
    task: Task,
    layout: LayoutMode,
    write_shared_assets: bool,
    trace_file: PathBuf,
    message_file: PathBuf,
    branding_file: Option<PathBuf>,
    package_name: String,
}

impl ProcessingRequest {
    /// Start building a request.
    ///
    /// # Example
    ///
    /// ```
    /// use structural::{ProcessingRequest, Task};
    ///
    /// let request = ProcessingRequest::builder("/tmp/out", "/tmp/doc/document.xml")
    ///     .task(Task::Validate)
    ///     .build()?;
    /// assert!(request.trace_file().ends_with("trace.xml"));
    /// # Ok::<(), structural::Error>(())
    /// ```
    pub fn builder(
        output_directory: impl Into<PathBuf>,
        source_file: impl Into<PathBuf>,
    ) -> ProcessingRequestBuilder {
        ProcessingRequestBuilder {
            output_directory: output_directory.into(),
            source_file: source_file.into(),
            task: Task::default(),
            layout: LayoutMode::default(),
            write_shared_assets: true,
            trace_file: None,
            message_file: None,
            branding_file: None,
            package_name: None,
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// Directory containing the source file; the sandbox root for resolution.
    pub fn source_directory(&self) -> &Path {
        self.source_file.parent().unwrap_or(Path::new("/"))
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    pub fn write_shared_assets(&self) -> bool {
        self.write_shared_assets
    }

    pub fn trace_file(&self) -> &Path {
        &self.trace_file
    }

    pub fn message_file(&self) -> &Path {
        &self.message_file
    }

    pub fn branding_file(&self) -> Option<&Path> {
        self.branding_file.as_deref()
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Full path of the package archive.
    pub fn package_file(&self) -> PathBuf {
        self.output_directory.join(&self.package_name)
    }

    /// A copy of this request that performs a different task.
    pub fn with_task(&self, task: Task) -> Self {
        Self {
            task,
            ..self.clone()
        }
    }
}

/// Builder for [`ProcessingRequest`].
#[derive(Debug, Clone)]
pub struct ProcessingRequestBuilder {
    output_directory: PathBuf,
    source_file: PathBuf,
    task: Task,
    layout: LayoutMode,
    write_shared_assets: bool,
    trace_file: Option<PathBuf>,
    message_file: Option<PathBuf>,
    branding_file: Option<PathBuf>,
    package_name: Option<String>,
}

impl ProcessingRequestBuilder {
    pub fn task(mut self, task: Task) -> Self {
        self.task = task;
        self
    }

    pub fn layout(mut self, layout: LayoutMode) -> Self {
        self.layout = layout;
        self
    }

    pub fn write_shared_assets(mut self, write: bool) -> Self {
        self.write_shared_assets = write;
        self
    }

    pub fn trace_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_file = Some(path.into());
        self
    }

    pub fn message_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.message_file = Some(path.into());
        self
    }

    pub fn branding_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.branding_file = Some(path.into());
        self
    }

    pub fn package_name(mut self, name: impl Into<String>) -> Self {
        self.package_name = Some(name.into());
        self
    }

    /// Validate and freeze the request.
    pub fn build(self) -> Result<ProcessingRequest> {
        require_absolute("output directory", &self.output_directory)?;
        require_absolute("source file", &self.source_file)?;
        if self.source_file.file_name().is_none() {
            return Err(Error::Configuration(format!(
                "source file {} does not name a file",
                self.source_file.display()
            )));
        }

        let trace_file = match self.trace_file {
            Some(path) => {
                require_absolute("trace file", &path)?;
                path
            }
            None => self.output_directory.join(DEFAULT_TRACE_FILE),
        };
        let message_file = match self.message_file {
            Some(path) => {
                require_absolute("message file", &path)?;
                path
            }
            None => self.output_directory.join(DEFAULT_MESSAGE_FILE),
        };
        if let Some(path) = &self.branding_file {
            require_absolute("branding file", path)?;
        }

        let package_name = match self.package_name {
            Some(name) => {
                check_package_name(&name)?;
                name
            }
            None => DEFAULT_PACKAGE_NAME.to_string(),
        };

        Ok(ProcessingRequest {
            output_directory: self.output_directory,
            source_file: self.source_file,
            task: self.task,
            layout: self.layout,
            write_shared_assets: self.write_shared_assets,
            trace_file,
            message_file,
            branding_file: self.branding_file,
            package_name,
        })
    }
}

fn require_absolute(what: &str, path: &Path) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "{what} must be an absolute path: {}",
            path.display()
        )))
    }
}

fn check_package_name(name: &str) -> Result<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0');
    if plain {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "package name must be a plain file name: {name:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_relative_to_output_directory() {
        let request = ProcessingRequest::builder("/out", "/src/doc.xml")
            .build()
            .unwrap();
        assert_eq!(request.trace_file(), Path::new("/out/trace.xml"));
        assert_eq!(request.message_file(), Path::new("/out/messages.log"));
        assert_eq!(request.package_file(), PathBuf::from("/out/output.epub"));
        assert_eq!(request.source_directory(), Path::new("/src"));
        assert_eq!(request.task(), Task::TransformToWeb);
        assert_eq!(request.layout(), LayoutMode::SingleFile);
        assert!(request.write_shared_assets());
    }

    #[test]
    fn test_package_name_must_be_plain() {
        for bad in ["", "..", "a/b.epub", "..\\x.epub"] {
            let result = ProcessingRequest::builder("/out", "/src/doc.xml")
                .package_name(bad)
                .build();
            assert!(matches!(result, Err(Error::Configuration(_))), "{bad:?}");
        }
        let request = ProcessingRequest::builder("/out", "/src/doc.xml")
            .package_name("book.epub")
            .build()
            .unwrap();
        assert_eq!(request.package_file(), PathBuf::from("/out/book.epub"));
    }

    #[test]
    fn test_relative_trace_file_rejected() {
        let result = ProcessingRequest::builder("/out", "/src/doc.xml")
            .trace_file("trace.xml")
            .build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
