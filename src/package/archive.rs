//! Deterministic archive writing.

use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::PackagingError;

use super::inspect::local_entries;
use super::{DESCRIPTOR_FILE, MIMETYPE_FILE};

/// Every entry's modification time: 2000-01-01T00:00:00.
pub const SENTINEL_TIMESTAMP: (u16, u8, u8, u8, u8, u8) = (2000, 1, 1, 0, 0, 0);

/// How an entry's bytes are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMethod {
    Stored,
    Deflated,
}

impl EntryMethod {
    fn zip_method(self) -> CompressionMethod {
        match self {
            EntryMethod::Stored => CompressionMethod::Stored,
            EntryMethod::Deflated => CompressionMethod::Deflated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path inside the archive, `/`-separated.
    pub path: String,
    pub size: u64,
    pub crc32: u32,
    pub method: EntryMethod,
}

/// The entries of a written archive, in archive order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageManifest {
    pub entries: Vec<ManifestEntry>,
}

impl PackageManifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

fn sentinel_time() -> Result<DateTime, PackagingError> {
    let (year, month, day, hour, minute, second) = SENTINEL_TIMESTAMP;
    DateTime::from_date_and_time(year, month, day, hour, minute, second)
        .map_err(|e| PackagingError::Manifest(format!("unusable sentinel timestamp: {e}")))
}

/// The DOS `(time, date)` pair local headers carry for the sentinel.
pub fn sentinel_dos_time() -> (u16, u16) {
    let (year, month, day, hour, minute, second) = SENTINEL_TIMESTAMP;
    let time = (u16::from(hour) << 11) | (u16::from(minute) << 5) | (u16::from(second) / 2);
    let date = ((year - 1980) << 9) | (u16::from(month) << 5) | u16::from(day);
    (time, date)
}

/// Archive paths of every file under `staging`, in archive order: the
/// mimetype, then the package descriptor, then everything else by name.
pub fn archive_order(staging: &Path) -> Result<Vec<(String, PathBuf)>, PackagingError> {
    let mut files = Vec::new();
    collect_files(staging, staging, &mut files)?;
    files.sort_by(|(a, _), (b, _)| rank(a).cmp(&rank(b)).then_with(|| a.cmp(b)));
    Ok(files)
}

fn rank(path: &str) -> u8 {
    match path {
        MIMETYPE_FILE => 0,
        DESCRIPTOR_FILE => 1,
        _ => 2,
    }
}

fn collect_files(root: &Path, directory: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<(), PackagingError> {
    let io_error = |source| PackagingError::Io {
        path: directory.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(directory).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((name, path));
        }
    }
    Ok(())
}

/// Write every file under `staging` into a new archive at `target`.
///
/// Sizes and checksums are computed before each entry is started and
/// recorded in the returned manifest.
pub fn write_archive(
    staging: &Path,
    target: &Path,
    compression_level: u32,
) -> Result<PackageManifest, PackagingError> {
    let files = archive_order(staging)?;
    let modified = sentinel_time()?;
    let file = File::create(target).map_err(|source| PackagingError::Io {
        path: target.to_path_buf(),
        source,
    })?;
    let mut zip = ZipWriter::new(file);
    let mut manifest = PackageManifest::default();

    for (name, path) in files {
        let data = fs::read(&path).map_err(|source| PackagingError::Io {
            path: path.clone(),
            source,
        })?;
        let method = if name == MIMETYPE_FILE {
            EntryMethod::Stored
        } else {
            EntryMethod::Deflated
        };
        let entry = ManifestEntry {
            crc32: crc32fast::hash(&data),
            size: data.len() as u64,
            path: name,
            method,
        };

        let mut options = SimpleFileOptions::default()
            .compression_method(method.zip_method())
            .last_modified_time(modified)
            .unix_permissions(0o644);
        if method == EntryMethod::Deflated {
            options = options.compression_level(Some(i64::from(compression_level)));
        }
        zip.start_file(entry.path.as_str(), options)?;
        zip.write_all(&data).map_err(|source| PackagingError::Io {
            path: target.to_path_buf(),
            source,
        })?;
        info!("added {} ({} bytes, crc {:08x})", entry.path, entry.size, entry.crc32);
        manifest.entries.push(entry);
    }

    zip.finish()?;
    debug!("wrote {} entries to {}", manifest.len(), target.display());
    Ok(manifest)
}

/// Re-read `archive` and compare it with `manifest`.
///
/// Entries are looked up through the central directory; the local headers
/// must agree with it and appear in manifest order without data descriptors.
pub fn verify_archive(archive: &Path, manifest: &PackageManifest) -> Result<(), PackagingError> {
    let bytes = fs::read(archive).map_err(|source| PackagingError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    let headers = local_entries(&bytes)?;
    let found: Vec<&str> = headers.iter().map(|h| h.name.as_str()).collect();
    let expected: Vec<&str> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
    if found != expected {
        return Err(PackagingError::Manifest(format!(
            "{} holds {found:?}, expected {expected:?}",
            archive.display()
        )));
    }

    let sentinel = sentinel_dos_time();
    let mut zip = ZipArchive::new(Cursor::new(bytes.as_slice()))?;
    for (header, expected) in headers.iter().zip(&manifest.entries) {
        let mismatch = |what: &str| {
            PackagingError::Manifest(format!("entry {}: {what} differs from the manifest", expected.path))
        };
        let file = zip.by_name(&expected.path)?;
        if file.crc32() != expected.crc32 || header.crc32 != expected.crc32 {
            return Err(mismatch("checksum"));
        }
        if file.size() != expected.size || u64::from(header.size) != expected.size {
            return Err(mismatch("size"));
        }
        if file.compression() != expected.method.zip_method() {
            return Err(mismatch("compression method"));
        }
        let stamp = file.last_modified().map(|t| (t.timepart(), t.datepart()));
        if stamp != Some(sentinel) || (header.dos_time, header.dos_date) != sentinel {
            return Err(mismatch("timestamp"));
        }
    }
    debug!("verified {} entries of {}", headers.len(), archive.display());
    Ok(())
}
