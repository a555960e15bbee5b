//! Small shared helpers: text decoding, media types and name handling.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

/// Decode document bytes.
///
/// UTF-8 (with or without a byte order mark) is tried first, then the
/// declared encoding, then Windows-1252. Valid UTF-8 is borrowed.
pub fn decode_text<'a>(bytes: &'a [u8], declared: Option<&str>) -> Cow<'a, str> {
    let (text, _, malformed) = UTF_8.decode(bytes);
    if !malformed {
        return text;
    }
    let fallback = declared
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(WINDOWS_1252);
    fallback.decode(bytes).0
}

/// The `encoding` pseudo-attribute of a leading XML declaration.
pub fn extract_xml_encoding(bytes: &[u8]) -> Option<&str> {
    let head = &bytes[..bytes.len().min(128)];
    let start = memchr::memmem::find(head, b"<?xml")?;
    let declaration = &head[start..];
    let declaration = match memchr::memmem::find(declaration, b"?>") {
        Some(end) => &declaration[..end],
        None => declaration,
    };

    let at = memchr::memmem::find(declaration, b"encoding")?;
    let rest = declaration[at + "encoding".len()..].trim_ascii_start();
    let rest = rest.strip_prefix(b"=")?.trim_ascii_start();
    let (&quote, value) = rest.split_first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let end = memchr::memchr(quote, value)?;
    std::str::from_utf8(&value[..end]).ok()
}

/// MIME type for a file name, as used in package manifests.
pub fn mime_of(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "xhtml" | "html" | "htm" => "application/xhtml+xml",
        "css" => "text/css",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

/// Upper-case the first character and lower-case the rest.
pub fn title_case(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Turn a resource path into a valid manifest identifier.
pub fn name_to_id(name: &str) -> String {
    let mut id: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if !id.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        id.insert(0, '_');
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_with_declared_latin1() {
        let bytes = b"<?xml version='1.0' encoding='ISO-8859-1'?><a>caf\xe9</a>";
        let text = decode_text(bytes, extract_xml_encoding(bytes));
        assert!(text.contains("café"));
    }

    #[test]
    fn test_decode_text_borrows_utf8() {
        assert!(matches!(decode_text("<a>é</a>".as_bytes(), None), Cow::Borrowed(_)));
    }

    #[test]
    fn test_extract_xml_encoding() {
        assert_eq!(
            extract_xml_encoding(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?><a/>"),
            Some("UTF-8")
        );
        assert_eq!(extract_xml_encoding(b"<?xml version='1.0' encoding = 'latin1' ?>"), Some("latin1"));
        assert_eq!(extract_xml_encoding(b"<?xml version='1.0'?><a encoding='x'/>"), None);
        assert_eq!(extract_xml_encoding(b"<a/>"), None);
    }

    #[test]
    fn test_mime_of() {
        assert_eq!(mime_of("cover.PNG"), "image/png");
        assert_eq!(mime_of("photo.jpg"), "image/jpeg");
        assert_eq!(mime_of("diagram.svg"), "image/svg+xml");
        assert_eq!(mime_of("d0e12.xhtml"), "application/xhtml+xml");
        assert_eq!(mime_of("README"), "application/octet-stream");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("eXAMPLE"), "Example");
        assert_eq!(title_case(""), "");
        assert_eq!(title_case("é"), "É");
    }

    #[test]
    fn test_name_to_id() {
        assert_eq!(name_to_id("images/a b.png"), "images_a_b_png");
        assert_eq!(name_to_id("1.png"), "_1_png");
    }
}
