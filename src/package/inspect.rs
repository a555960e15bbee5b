//! Reading local file headers straight from archive bytes.
//!
//! Entry contents are read through [`zip::ZipArchive`], which works from the
//! central directory. These helpers look at what was actually written in
//! front of each entry: the order, the extra field and whether sizes were
//! deferred to a data descriptor.

use crate::error::PackagingError;

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const LOCAL_HEADER_LEN: usize = 30;
/// General purpose flag bit announcing a trailing data descriptor.
pub const DATA_DESCRIPTOR_FLAG: u16 = 1 << 3;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATED: u16 = 8;

/// One local file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub name: String,
    pub flags: u16,
    pub method: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub size: u32,
    pub extra_len: u16,
}

impl LocalEntry {
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & DATA_DESCRIPTOR_FLAG != 0
    }
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Walk the local headers from the start of the archive until the central
/// directory begins.
pub fn local_entries(archive: &[u8]) -> Result<Vec<LocalEntry>, PackagingError> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset + 4 <= archive.len() && u32_at(archive, offset) == LOCAL_HEADER_SIGNATURE {
        if offset + LOCAL_HEADER_LEN > archive.len() {
            return Err(PackagingError::Manifest(format!("truncated local header at offset {offset}")));
        }
        let name_len = u16_at(archive, offset + 26) as usize;
        let extra_len = u16_at(archive, offset + 28);
        let name_start = offset + LOCAL_HEADER_LEN;
        let data_offset = name_start + name_len + extra_len as usize;
        if data_offset > archive.len() {
            return Err(PackagingError::Manifest(format!("truncated entry name at offset {offset}")));
        }

        let entry = LocalEntry {
            name: String::from_utf8_lossy(&archive[name_start..name_start + name_len]).into_owned(),
            flags: u16_at(archive, offset + 6),
            method: u16_at(archive, offset + 8),
            dos_time: u16_at(archive, offset + 10),
            dos_date: u16_at(archive, offset + 12),
            crc32: u32_at(archive, offset + 14),
            compressed_size: u32_at(archive, offset + 18),
            size: u32_at(archive, offset + 22),
            extra_len,
        };
        if entry.has_data_descriptor() {
            return Err(PackagingError::Manifest(format!(
                "entry {} defers its sizes to a data descriptor",
                entry.name
            )));
        }
        offset = data_offset + entry.compressed_size as usize;
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    use super::*;

    #[test]
    fn test_reads_back_written_headers() {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        let page = "<p>text</p>".repeat(50);
        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        zip.start_file("OEBPS/a.xhtml", deflated).unwrap();
        zip.write_all(page.as_bytes()).unwrap();
        let bytes = zip.finish().unwrap().into_inner();

        let entries = local_entries(&bytes).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "mimetype");
        assert_eq!(entries[0].method, METHOD_STORED);
        assert_eq!(entries[0].size, 20);
        assert_eq!(entries[1].method, METHOD_DEFLATED);
        assert_eq!(entries[1].crc32, crc32fast::hash(page.as_bytes()));
        assert_eq!(entries[1].size as usize, page.len());
        assert!(entries[1].compressed_size < entries[1].size);
    }

    #[test]
    fn test_garbage_has_no_entries() {
        assert!(local_entries(b"not a zip file").unwrap().is_empty());
    }
}
