//! Conformance checking of written packages.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::config::ConformanceCheck;
use crate::error::PackagingError;
use crate::resolver::NeverResolver;
use crate::xml::{Element, XmlReader};

use super::inspect::{LocalEntry, METHOD_STORED, local_entries};
use super::{MIMETYPE, MIMETYPE_FILE};

const CONTAINER_NS: &str = "urn:oasis:names:tc:opendocument:xmlns:container";
const OPF_NS: &str = "http://www.idpf.org/2007/opf";
const CONTAINER_PATH: &str = "META-INF/container.xml";

/// What a checker said about a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformanceReport {
    pub checker: String,
    pub passed: bool,
    /// Output of the checker, one line per entry.
    pub lines: Vec<String>,
}

/// Checks a written package archive.
pub trait ConformanceChecker: fmt::Debug {
    fn check(&self, archive: &Path) -> Result<ConformanceReport, PackagingError>;
}

/// The checker selected by `setting`, if any.
pub fn checker_for(setting: &ConformanceCheck) -> Option<Box<dyn ConformanceChecker>> {
    match setting {
        ConformanceCheck::Builtin => Some(Box::new(BuiltinChecker)),
        ConformanceCheck::External { program, args } => Some(Box::new(ExternalChecker {
            program: program.clone(),
            args: args.clone(),
        })),
        ConformanceCheck::Disabled => None,
    }
}

/// Runs an external program with the archive path as its final argument.
///
/// A zero exit status passes.
#[derive(Debug, Clone)]
pub struct ExternalChecker {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ConformanceChecker for ExternalChecker {
    fn check(&self, archive: &Path) -> Result<ConformanceReport, PackagingError> {
        debug!("running {} on {}", self.program.display(), archive.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(archive)
            .output()
            .map_err(|source| PackagingError::Io {
                path: self.program.clone(),
                source,
            })?;
        let lines = String::from_utf8_lossy(&output.stdout)
            .lines()
            .chain(String::from_utf8_lossy(&output.stderr).lines())
            .map(str::to_string)
            .collect();
        Ok(ConformanceReport {
            checker: self.program.display().to_string(),
            passed: output.status.success(),
            lines,
        })
    }
}

/// Structural checks of the container, descriptor and entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinChecker;

impl ConformanceChecker for BuiltinChecker {
    fn check(&self, archive: &Path) -> Result<ConformanceReport, PackagingError> {
        let bytes = fs::read(archive).map_err(|source| PackagingError::Io {
            path: archive.to_path_buf(),
            source,
        })?;
        let mut problems = Problems::default();
        check_local_headers(&local_entries(&bytes)?, &mut problems);

        match ZipArchive::new(Cursor::new(bytes.as_slice())) {
            Ok(mut zip) => check_archive(&mut zip, &mut problems)?,
            Err(e) => problems.push(format!("the archive cannot be read: {e}")),
        }

        let passed = problems.0.is_empty();
        if passed {
            info!("{} passed built-in conformance checks", archive.display());
        }
        Ok(ConformanceReport {
            checker: "builtin".to_string(),
            passed,
            lines: problems.0,
        })
    }
}

#[derive(Default)]
struct Problems(Vec<String>);

impl Problems {
    fn push(&mut self, problem: String) {
        self.0.push(format!("ERROR: {problem}"));
    }
}

/// OCF rules only the local headers show: entry order, the mimetype's
/// storage and extra field, and duplicated names.
fn check_local_headers(entries: &[LocalEntry], problems: &mut Problems) {
    match entries.first() {
        None => problems.push("the archive has no entries".to_string()),
        Some(first) if first.name != MIMETYPE_FILE => {
            problems.push(format!("the first entry is {}, not mimetype", first.name));
        }
        Some(first) => {
            if first.method != METHOD_STORED {
                problems.push("the mimetype entry is compressed".to_string());
            }
            if first.extra_len != 0 {
                problems.push("the mimetype entry has an extra field".to_string());
            }
        }
    }

    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.name.as_str()) {
            problems.push(format!("duplicate entry {}", entry.name));
        }
    }
}

fn check_archive<R: Read + Seek>(zip: &mut ZipArchive<R>, problems: &mut Problems) -> Result<(), PackagingError> {
    for index in 0..zip.len() {
        let mut file = zip.by_index(index)?;
        let mut data = Vec::with_capacity(file.size() as usize);
        match file.read_to_end(&mut data) {
            Ok(_) if crc32fast::hash(&data) == file.crc32() => {}
            Ok(_) => problems.push(format!("entry {} fails its checksum", file.name())),
            Err(e) => problems.push(format!("entry {} cannot be read: {e}", file.name())),
        }
    }

    if let Some(mimetype) = read_entry(zip, MIMETYPE_FILE)?
        && mimetype != MIMETYPE.as_bytes()
    {
        problems.push(format!("the mimetype entry does not contain {MIMETYPE}"));
    }

    let names: HashSet<String> = zip.file_names().map(str::to_string).collect();
    match read_entry(zip, CONTAINER_PATH)? {
        None => problems.push(format!("{CONTAINER_PATH} is missing")),
        Some(container) => {
            for rootfile in rootfiles(&container, problems) {
                match read_entry(zip, &rootfile)? {
                    Some(descriptor) => check_descriptor(&rootfile, &descriptor, &names, problems),
                    None => problems.push(format!("rootfile {rootfile} is not in the archive")),
                }
            }
        }
    }
    Ok(())
}

/// The decompressed content of `name`, or `None` when there is no such entry.
fn read_entry<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>, PackagingError> {
    let mut file = match zip.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut data = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut data)
        .map_err(|e| PackagingError::Manifest(format!("entry {name} cannot be read: {e}")))?;
    Ok(Some(data))
}

fn parse(name: &str, data: &[u8], problems: &mut Problems) -> Option<Element> {
    match XmlReader::new(&NeverResolver).parse(data, name, None) {
        Ok(document) => Some(document.root),
        Err(e) => {
            problems.push(format!("{name} is not well-formed: {e}"));
            None
        }
    }
}

fn rootfiles(container: &[u8], problems: &mut Problems) -> Vec<String> {
    let Some(root) = parse(CONTAINER_PATH, container, problems) else {
        return Vec::new();
    };
    let paths: Vec<String> = root
        .descendants()
        .filter(|e| e.name.is(CONTAINER_NS, "rootfile"))
        .filter_map(|e| e.attribute("full-path"))
        .map(str::to_string)
        .collect();
    if paths.is_empty() {
        problems.push(format!("{CONTAINER_PATH} names no rootfile"));
    }
    paths
}

fn check_descriptor(name: &str, data: &[u8], archive: &HashSet<String>, problems: &mut Problems) {
    let Some(package) = parse(name, data, problems) else {
        return;
    };
    if !package.name.is(OPF_NS, "package") {
        problems.push(format!("{name} is not a package document"));
        return;
    }
    let directory = name.rsplit_once('/').map_or("", |(dir, _)| dir);
    let child = |local: &str| package.child_elements().find(|e| e.name.is(OPF_NS, local));

    let unique = package.attribute("unique-identifier").unwrap_or_default();
    let identified = child("metadata").is_some_and(|metadata| {
        metadata
            .child_elements()
            .any(|e| e.name.local == "identifier" && e.attribute("id") == Some(unique))
    });
    if !identified {
        problems.push(format!("{name}: no dc:identifier carries the unique identifier '{unique}'"));
    }
    let modified = child("metadata").is_some_and(|metadata| {
        metadata
            .child_elements()
            .any(|e| e.name.is(OPF_NS, "meta") && e.attribute("property") == Some("dcterms:modified"))
    });
    if !modified {
        problems.push(format!("{name}: dcterms:modified is missing"));
    }

    let mut ids = HashSet::new();
    let mut navigation = 0;
    for item in child("manifest")
        .into_iter()
        .flat_map(|m| m.child_elements())
        .filter(|e| e.name.is(OPF_NS, "item"))
    {
        let id = item.attribute("id").unwrap_or_default();
        if !ids.insert(id) {
            problems.push(format!("{name}: duplicate manifest id '{id}'"));
        }
        let href = item.attribute("href").unwrap_or_default();
        let path = if directory.is_empty() {
            href.to_string()
        } else {
            format!("{directory}/{href}")
        };
        if !archive.contains(&path) {
            problems.push(format!("{name}: manifest item {href} is not in the archive"));
        }
        if item
            .attribute("properties")
            .is_some_and(|p| p.split_whitespace().any(|p| p == "nav"))
        {
            navigation += 1;
        }
    }
    if navigation != 1 {
        problems.push(format!("{name}: expected one navigation document, found {navigation}"));
    }

    let spine: Vec<&Element> = child("spine")
        .into_iter()
        .flat_map(|s| s.child_elements())
        .filter(|e| e.name.is(OPF_NS, "itemref"))
        .collect();
    if spine.is_empty() {
        problems.push(format!("{name}: the spine is empty"));
    }
    for itemref in spine {
        let idref = itemref.attribute("idref").unwrap_or_default();
        if !ids.contains(idref) {
            problems.push(format!("{name}: spine refers to unknown item '{idref}'"));
        }
    }
}
