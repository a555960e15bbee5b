//! Link integrity across a set of generated pages.

use std::collections::{BTreeMap, BTreeSet};

use percent_encoding::percent_decode_str;

use crate::validation::{Finding, FindingKind};
use crate::xml::{Document, Element, Location};

/// Class token marking footnote references.
pub const FOOTNOTE_LINK_CLASS: &str = "stFootnoteLink";

#[derive(Debug, Clone)]
struct Link {
    file: String,
    href: String,
    footnote: bool,
    location: Location,
}

/// Identifiers per file plus every `href` found in the set.
#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    anchors: BTreeMap<String, BTreeSet<String>>,
    links: Vec<Link>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Harvest the identifiers and links of the page named `file`.
    pub fn add_document(&mut self, file: &str, document: &Document) {
        let ids = self.anchors.entry(file.to_string()).or_default();
        let mut links = Vec::new();
        for element in document.root.descendants() {
            if let Some(id) = element.attribute("id") {
                ids.insert(id.to_string());
            }
            if let Some(href) = element.attribute("href") {
                links.push(Link {
                    file: file.to_string(),
                    href: href.to_string(),
                    footnote: has_class(element, FOOTNOTE_LINK_CLASS),
                    location: element.location.clone(),
                });
            }
        }
        self.links.extend(links);
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.anchors.keys().map(String::as_str)
    }

    /// Whether `id` is defined in `file`.
    pub fn contains(&self, file: &str, id: &str) -> bool {
        self.anchors.get(file).is_some_and(|ids| ids.contains(id))
    }

    fn defined_anywhere(&self, id: &str) -> bool {
        self.anchors.values().any(|ids| ids.contains(id))
    }

    /// Every broken link, in the order the links were added.
    pub fn check(&self) -> Vec<Finding> {
        let mut findings = Vec::new();
        for link in &self.links {
            let (target_file, fragment) = match link.href.split_once('#') {
                Some((file, fragment)) => (file, Some(decode(fragment))),
                None => (link.href.as_str(), None),
            };
            let target_file = target_file.trim_start_matches("./");

            if target_file.is_empty() {
                let id = fragment.unwrap_or_default();
                if !self.defined_anywhere(&id) {
                    findings.push(broken(link, format!("no element has the identifier '{id}'")));
                }
                continue;
            }

            let target_file = decode(target_file);
            if link.footnote && target_file != link.file {
                findings.push(broken(
                    link,
                    format!(
                        "footnote link leaves {} for {target_file}; footnotes must be rendered on the page that references them",
                        link.file
                    ),
                ));
                continue;
            }
            if let Some(id) = fragment
                && self.anchors.contains_key(target_file.as_str())
                && !self.contains(&target_file, &id)
            {
                findings.push(broken(link, format!("{target_file} has no element with the identifier '{id}'")));
            }
        }
        findings
    }
}

fn has_class(element: &Element, class: &str) -> bool {
    element
        .attribute("class")
        .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
}

fn decode(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

fn broken(link: &Link, message: String) -> Finding {
    Finding::error(
        FindingKind::LinkIntegrity,
        link.location.clone(),
        format!("broken link {}: {message}", link.href),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::NeverResolver;
    use crate::xml::XmlReader;

    fn page(body: &str) -> Document {
        let xml = format!("<html xmlns='http://www.w3.org/1999/xhtml'><body>{body}</body></html>");
        XmlReader::new(&NeverResolver).parse(xml.as_bytes(), "page.xhtml", None).unwrap()
    }

    #[test]
    fn test_local_fragments() {
        let mut graph = LinkGraph::new();
        graph.add_document("a.xhtml", &page("<p id='x'/><a href='#x'/><a href='#missing'/>"));
        graph.add_document("b.xhtml", &page("<a href='#x'/>"));
        let findings = graph.check();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("missing"));
    }

    #[test]
    fn test_cross_file_anchors() {
        let mut graph = LinkGraph::new();
        graph.add_document("a.xhtml", &page("<p id='x'/>"));
        graph.add_document(
            "b.xhtml",
            &page("<a href='a.xhtml#x'/><a href='a.xhtml#y'/><a href='http://example.com/#z'/><a href='other.xhtml#q'/>"),
        );
        let findings = graph.check();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("a.xhtml#y"));
    }

    #[test]
    fn test_footnote_locality() {
        let mut graph = LinkGraph::new();
        graph.add_document("a.xhtml", &page("<p id='f1'/><a class='stFootnoteLink' href='#f1'/>"));
        graph.add_document("b.xhtml", &page("<a class='stLink stFootnoteLink' href='a.xhtml#f1'/>"));
        let findings = graph.check();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::LinkIntegrity);
        assert!(findings[0].message.contains("footnote"));
    }

    #[test]
    fn test_dot_relative_links_stay_in_their_file() {
        let mut graph = LinkGraph::new();
        graph.add_document(
            "a.xhtml",
            &page("<p id='f1'/><a class='stFootnoteLink' href='./a.xhtml#f1'/><a href='./a.xhtml#gone'/>"),
        );
        let findings = graph.check();
        assert_eq!(findings.len(), 1, "{findings:?}");
        assert!(findings[0].message.contains("gone"));
    }

    #[test]
    fn test_percent_encoded_fragment() {
        let mut graph = LinkGraph::new();
        graph.add_document("a.xhtml", &page("<p id='a b'/><a href='#a%20b'/>"));
        assert!(graph.check().is_empty());
    }
}
