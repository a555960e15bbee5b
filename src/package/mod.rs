//! EPUB package assembly.
//!
//! Building a package happens in three stages:
//!
//! 1. Staging: the EPUB rendering, style sheets, images and a freshly
//!    generated package descriptor are copied into `output/epub/`.
//! 2. Archiving: the staging directory is written to a zip file with fixed
//!    timestamps and a fixed entry order, then the written local headers are
//!    compared against the recorded [`PackageManifest`].
//! 3. Conformance: the archive is handed to a [`ConformanceChecker`].
//!
//! Building twice from the same input produces byte-identical archives.

mod archive;
mod conformance;
pub mod inspect;

pub use archive::{
    EntryMethod, ManifestEntry, PackageManifest, SENTINEL_TIMESTAMP, archive_order, sentinel_dos_time,
    verify_archive, write_archive,
};
pub use conformance::{BuiltinChecker, ConformanceChecker, ConformanceReport, ExternalChecker, checker_for};

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info};

use crate::catalog::{CONTAINER_TEMPLATE, ResourceCatalog};
use crate::config::ProcessorConfig;
use crate::error::{Error, PackagingError, Result};
use crate::request::ProcessingRequest;
use crate::resolver::CatalogResolver;
use crate::transform::{CONTENT_DIRECTORY, EPUB_RESOURCES_FILE, TransformDriver};

pub const MIMETYPE: &str = "application/epub+zip";
pub const MIMETYPE_FILE: &str = "mimetype";
/// Package descriptor name, at the archive root.
pub const DESCRIPTOR_FILE: &str = "content.opf";
/// Staging directory inside the output directory.
pub const STAGING_DIRECTORY: &str = "epub";
/// Optional list of extra resources next to the source document.
pub const EXTRA_RESOURCES_FILE: &str = "extra-resources.txt";
/// Optional per-document style sheet next to the source document.
pub const DOCUMENT_CSS: &str = "document.css";
/// Style sheets every EPUB page links.
pub const EPUB_STYLE_ASSETS: [&str; 2] = ["reset-epub.css", "structural-epub.css"];

const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// The result of a successful build.
#[derive(Debug, Clone)]
pub struct PackageReport {
    pub archive: PathBuf,
    pub manifest: PackageManifest,
    /// `None` when conformance checking is disabled.
    pub conformance: Option<ConformanceReport>,
}

/// Builds EPUB packages from the EPUB rendering in an output directory.
#[derive(Debug, Clone)]
pub struct PackageBuilder {
    catalog: Arc<ResourceCatalog>,
    driver: TransformDriver,
    config: ProcessorConfig,
}

impl PackageBuilder {
    pub fn new(catalog: Arc<ResourceCatalog>, driver: TransformDriver, config: ProcessorConfig) -> Self {
        Self {
            catalog,
            driver,
            config,
        }
    }

    /// Stage, archive and check the package for `request`.
    ///
    /// `extras` name additional resources in the source directory. A failed
    /// conformance check leaves the archive in place.
    pub fn build(&self, request: &ProcessingRequest, extras: &[String]) -> Result<PackageReport> {
        let staging = self.stage(request, extras)?;

        let archive = request.package_file();
        let level = self.config.compression_level.unwrap_or(DEFAULT_COMPRESSION_LEVEL);
        let manifest = write_archive(&staging, &archive, level)?;
        verify_archive(&archive, &manifest)?;
        info!("wrote {} ({} entries)", archive.display(), manifest.len());

        let conformance = match checker_for(&self.config.conformance) {
            Some(checker) => Some(self.check(checker.as_ref(), &archive)?),
            None => {
                debug!("conformance checking is disabled");
                None
            }
        };
        Ok(PackageReport {
            archive,
            manifest,
            conformance,
        })
    }

    fn check(&self, checker: &dyn ConformanceChecker, archive: &Path) -> Result<ConformanceReport> {
        let report = checker.check(archive)?;
        for line in &report.lines {
            if report.passed {
                info!("{}: {line}", report.checker);
            } else {
                error!("{}: {line}", report.checker);
            }
        }
        if !report.passed {
            return Err(PackagingError::Conformance {
                archive: archive.to_path_buf(),
                report: report.lines.join("\n"),
            }
            .into());
        }
        Ok(report)
    }

    /// Populate a cleared staging directory and return its path.
    pub fn stage(&self, request: &ProcessingRequest, extras: &[String]) -> Result<PathBuf> {
        let output = request.output_directory();
        let staging = output.join(STAGING_DIRECTORY);
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|source| io_error(&staging, source))?;
        }
        let content = staging.join(CONTENT_DIRECTORY);
        let meta_inf = staging.join("META-INF");
        for directory in [&content, &meta_inf] {
            fs::create_dir_all(directory).map_err(|source| io_error(directory, source))?;
        }
        debug!("staging package in {}", staging.display());

        write(&staging.join(MIMETYPE_FILE), MIMETYPE.as_bytes())?;
        let container = self.catalog_bytes(CONTAINER_TEMPLATE)?;
        write(&meta_inf.join("container.xml"), container)?;

        for page in pages(output)? {
            if let Some(name) = page.file_name() {
                copy(&page, &content.join(name))?;
            }
        }

        let mut resources: Vec<String> = Vec::new();
        for name in EPUB_STYLE_ASSETS {
            write(&content.join(name), self.catalog_bytes(name)?)?;
            resources.push(name.to_string());
        }

        let source_directory = request.source_directory();
        let document_css = source_directory.join(DOCUMENT_CSS);
        if document_css.is_file() {
            copy(&document_css, &content.join(DOCUMENT_CSS))?;
        } else {
            write(&content.join(DOCUMENT_CSS), b"")?;
        }
        resources.push(DOCUMENT_CSS.to_string());

        let mut wanted: BTreeSet<String> = BTreeSet::new();
        wanted.extend(read_list(&output.join(EPUB_RESOURCES_FILE))?);
        wanted.extend(read_list(&source_directory.join(EXTRA_RESOURCES_FILE))?);
        wanted.extend(extras.iter().map(|e| e.trim().to_string()).filter(|e| !e.is_empty()));

        let resolver = CatalogResolver::new(Arc::clone(&self.catalog)).with_sandbox(source_directory);
        for name in wanted {
            let path = resolver.sandboxed_path(&name, Some(source_directory))?;
            let relative = resolver
                .sandbox_root()
                .and_then(|root| path.strip_prefix(root).ok())
                .ok_or_else(|| Error::Configuration(format!("resource {name} is outside the source directory")))?;
            let relative_name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            copy(&path, &content.join(relative))?;
            if !resources.contains(&relative_name) {
                resources.push(relative_name);
            }
        }

        self.driver
            .package_descriptor(request, &staging, DESCRIPTOR_FILE, &resources)?;
        Ok(staging)
    }

    fn catalog_bytes(&self, name: &str) -> Result<&[u8]> {
        self.catalog
            .bytes(name)
            .ok_or_else(|| Error::Configuration(format!("{name} is missing from the resource catalog")))
    }
}

/// Every `*.xhtml` file directly inside `directory`, navigation included.
fn pages(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut pages = Vec::new();
    for entry in fs::read_dir(directory).map_err(|source| io_error(directory, source))? {
        let path = entry.map_err(|source| io_error(directory, source))?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "xhtml") {
            pages.push(path);
        }
    }
    pages.sort();
    Ok(pages)
}

/// Names listed one per line; a missing file is an empty list.
fn read_list(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn write(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data).map_err(|source| io_error(path, source))
}

fn copy(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
    }
    fs::copy(from, to).map_err(|source| io_error(to, source))?;
    debug!("staged {}", to.display());
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> Error {
    PackagingError::Io {
        path: path.to_path_buf(),
        source,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_list_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");
        fs::write(&path, "a.png\n\n  b/c.jpg  \n").unwrap();
        assert_eq!(read_list(&path).unwrap(), ["a.png", "b/c.jpg"]);
        assert!(read_list(&dir.path().join("absent.txt")).unwrap().is_empty());
    }

    #[test]
    fn test_pages_include_navigation() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["toc.xhtml", "d0e4.xhtml", "trace.xml"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let names: Vec<_> = pages(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["d0e4.xhtml", "toc.xhtml"]);
    }
}
