//! The EPUB package descriptor.

use std::collections::HashSet;

use crate::catalog::DUBLIN_CORE_NS;
use crate::util::{mime_of, name_to_id};
use crate::xml::escape_text;

use super::outline::Outline;
use super::unit::UnitLayout;
use super::xhtml::NAVIGATION_FILE;

/// Directory of the package holding content documents and resources.
pub const CONTENT_DIRECTORY: &str = "OEBPS";

/// Used for `dcterms:modified` when the document has no usable date.
pub const SENTINEL_MODIFIED: &str = "2000-01-01T00:00:00Z";

/// Build `content.opf` for the EPUB rendering of `outline`.
///
/// `resources` are the non-XHTML files staged beside the content documents
/// (style sheets, images), relative to [`CONTENT_DIRECTORY`].
pub fn generate_opf(outline: &Outline<'_>, resources: &[String]) -> String {
    let mut opf = String::new();
    opf.push_str(&format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="pub-id">
  <metadata xmlns:dc="{DUBLIN_CORE_NS}">
"#
    ));

    let identifier = outline
        .metadata_value("identifier")
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| derived_identifier(outline));
    opf.push_str(&format!(
        "    <dc:identifier id=\"pub-id\">{}</dc:identifier>\n",
        escape_text(&identifier)
    ));
    opf.push_str(&format!("    <dc:title>{}</dc:title>\n", escape_text(&outline.title())));
    let language = outline.language().filter(|l| !l.is_empty()).unwrap_or("en");
    opf.push_str(&format!("    <dc:language>{}</dc:language>\n", escape_text(language)));

    for entry in &outline.metadata {
        if matches!(entry.name, "identifier" | "title" | "language") || entry.value.is_empty() {
            continue;
        }
        opf.push_str(&format!(
            "    <dc:{name}>{}</dc:{name}>\n",
            escape_text(&entry.value),
            name = entry.name
        ));
    }

    let modified = outline
        .metadata_value("date")
        .and_then(modified_timestamp)
        .unwrap_or_else(|| SENTINEL_MODIFIED.to_string());
    opf.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{modified}</meta>\n"
    ));
    opf.push_str("  </metadata>\n");

    let mut ids = HashSet::new();
    let mut unique_id = |name: &str| {
        let base = name_to_id(name);
        let mut id = base.clone();
        let mut n = 2;
        while !ids.insert(id.clone()) {
            id = format!("{base}_{n}");
            n += 1;
        }
        id
    };

    opf.push_str("  <manifest>\n");
    opf.push_str(&format!(
        "    <item id=\"{}\" href=\"{CONTENT_DIRECTORY}/{NAVIGATION_FILE}\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n",
        unique_id(NAVIGATION_FILE)
    ));
    let mut spine = Vec::new();
    for file in outline.content_files(UnitLayout::Epub) {
        let id = unique_id(&file);
        opf.push_str(&format!(
            "    <item id=\"{id}\" href=\"{CONTENT_DIRECTORY}/{}\" media-type=\"application/xhtml+xml\"/>\n",
            escape_text(&file)
        ));
        spine.push(id);
    }
    for resource in resources {
        opf.push_str(&format!(
            "    <item id=\"{}\" href=\"{CONTENT_DIRECTORY}/{}\" media-type=\"{}\"/>\n",
            unique_id(resource),
            escape_text(resource),
            mime_of(resource)
        ));
    }
    opf.push_str("  </manifest>\n");

    opf.push_str("  <spine>\n");
    for id in spine {
        opf.push_str(&format!("    <itemref idref=\"{id}\"/>\n"));
    }
    opf.push_str("  </spine>\n");
    opf.push_str("</package>\n");
    opf
}

/// A stable identifier for documents that declare none.
fn derived_identifier(outline: &Outline<'_>) -> String {
    let mut hasher = sha1_smol::Sha1::new();
    hasher.update(outline.root.text().as_bytes());
    format!("urn:sha1:{}", hasher.digest())
}

/// Turn a `dc:date` value into an EPUB `dcterms:modified` timestamp.
fn modified_timestamp(date: &str) -> Option<String> {
    let date = date.trim();
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let is_date = |s: &str| {
        let parts: Vec<&str> = s.split('-').collect();
        parts.len() == 3
            && parts[0].len() == 4
            && parts[1].len() == 2
            && parts[2].len() == 2
            && parts.iter().all(|p| digits(p))
    };
    let is_time = |s: &str| {
        let parts: Vec<&str> = s.split(':').collect();
        parts.len() == 3 && parts.iter().all(|p| p.len() == 2 && digits(p))
    };

    match date.split_once('T') {
        None if is_date(date) => Some(format!("{date}T00:00:00Z")),
        Some((day, time)) => {
            let time = time.strip_suffix('Z')?;
            let time = time.split_once('.').map_or(time, |(whole, _)| whole);
            (is_date(day) && is_time(time)).then(|| format!("{day}T{time}Z"))
        }
        None => None,
    }
}
