//! XHTML synthesis for structural documents.
//!
//! Pages are written with [`XhtmlWriter`], which indents block-level
//! markup and leaves inline content exactly as it appears in the source.

use std::collections::BTreeSet;

use log::warn;

use crate::transform::engine::TraceListener;
use crate::util::title_case;
use crate::xml::{Element, Node, XHTML_NS, XML_NS, escape_attribute, escape_text};

use super::outline::{Block, BlockKind, INDEX_FILE, Outline, normalize_space};
use super::unit::{Unit, UnitLayout};

pub const EPUB_OPS_NS: &str = "http://www.idpf.org/2007/ops";
pub const NAVIGATION_FILE: &str = "toc.xhtml";

/// Accumulates XHTML text.
#[derive(Debug, Default)]
pub struct XhtmlWriter {
    out: String,
    depth: usize,
}

impl XhtmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn tag(&mut self, name: &str, attributes: &[(&str, &str)], empty: bool) {
        self.out.push('<');
        self.out.push_str(name);
        for (key, value) in attributes {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            self.out.push_str(&escape_attribute(value));
            self.out.push('"');
        }
        self.out.push_str(if empty { "/>" } else { ">" });
    }

    /// Start an element whose children go on their own lines.
    pub fn open_block(&mut self, name: &str, attributes: &[(&str, &str)]) {
        self.indent();
        self.tag(name, attributes, false);
        self.out.push('\n');
        self.depth += 1;
    }

    pub fn close_block(&mut self, name: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        self.close(name);
        self.out.push('\n');
    }

    /// Start an element whose content stays on one line.
    pub fn open_line(&mut self, name: &str, attributes: &[(&str, &str)]) {
        self.indent();
        self.tag(name, attributes, false);
    }

    pub fn close_line(&mut self, name: &str) {
        self.close(name);
        self.out.push('\n');
    }

    pub fn empty_line(&mut self, name: &str, attributes: &[(&str, &str)]) {
        self.indent();
        self.tag(name, attributes, true);
        self.out.push('\n');
    }

    pub fn open(&mut self, name: &str, attributes: &[(&str, &str)]) {
        self.tag(name, attributes, false);
    }

    pub fn close(&mut self, name: &str) {
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    pub fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) {
        self.tag(name, attributes, true);
    }

    pub fn text(&mut self, text: &str) {
        self.out.push_str(&escape_text(text));
    }

    /// A whole element on one line containing only text.
    pub fn text_line(&mut self, name: &str, attributes: &[(&str, &str)], text: &str) {
        self.open_line(name, attributes);
        self.text(text);
        self.close_line(name);
    }

    pub fn into_string(self) -> String {
        self.out
    }
}

/// One output file being rendered.
struct Page {
    file: String,
    w: XhtmlWriter,
    /// Numbers of the footnotes to place at the bottom of this page.
    footnotes: BTreeSet<usize>,
}

/// Renders the pages of one execution.
pub struct Renderer<'a, 'd> {
    outline: &'a Outline<'d>,
    unit: &'a Unit,
    branding: Option<&'a Element>,
    trace: &'a mut dyn TraceListener,
}

impl<'a, 'd> Renderer<'a, 'd> {
    pub fn new(
        outline: &'a Outline<'d>,
        unit: &'a Unit,
        branding: Option<&'a Element>,
        trace: &'a mut dyn TraceListener,
    ) -> Self {
        Self {
            outline,
            unit,
            branding,
            trace,
        }
    }

    fn layout(&self) -> UnitLayout {
        self.unit.layout
    }

    /// A page holding the document header and every block.
    pub fn whole(&mut self, file: &str) -> String {
        let mut page = self.begin(file);
        self.header(&mut page);
        page.w.open_block("div", &[("class", "stMain")]);
        let outline = self.outline;
        for block in &outline.blocks {
            self.block(&mut page, block, 0);
        }
        page.w.close_block("div");
        for index in 0..outline.blocks.len() {
            self.collect_footnotes(&mut page, index);
        }
        self.finish(page)
    }

    /// The front page of a multi-file layout: header and table of contents.
    pub fn front_page(&mut self) -> String {
        let mut page = self.begin(INDEX_FILE);
        self.header(&mut page);
        let outline = self.outline;
        let layout = self.layout();

        page.w.open_block("div", &[("class", "stContents")]);
        page.w.open_block("ul", &[("class", "stContentsList")]);
        for (index, block) in outline.blocks.iter().enumerate() {
            let file = outline.file_of(index, layout);
            page.w.open_block("li", &[("class", "stContentsItem")]);
            contents_link(&mut page.w, &file, block);
            let divisions: Vec<&Block<'_>> = block
                .children
                .iter()
                .filter(|c| matches!(c.kind, BlockKind::Section | BlockKind::Subsection))
                .collect();
            if !divisions.is_empty() {
                page.w.open_block("ul", &[("class", "stContentsList")]);
                for child in divisions {
                    let href = format!("{file}#{}", child.anchor());
                    page.w.open_line("li", &[("class", "stContentsItem")]);
                    page.w.open("a", &[("href", href.as_str())]);
                    page.w.text(&heading_text(child));
                    page.w.close("a");
                    page.w.close_line("li");
                }
                page.w.close_block("ul");
            }
            page.w.close_block("li");
        }
        page.w.close_block("ul");
        page.w.close_block("div");
        self.finish(page)
    }

    /// The file holding top-level block `index` in a split layout.
    pub fn part(&mut self, index: usize) -> String {
        let outline = self.outline;
        let layout = self.layout();
        let file = outline.file_of(index, layout);
        let mut page = self.begin(&file);

        if layout == UnitLayout::Multi {
            self.navigation_bar(&mut page, index);
        }
        page.w.open_block("div", &[("class", "stMain")]);
        if let Some(block) = outline.blocks.get(index) {
            self.block(&mut page, block, 0);
        }
        page.w.close_block("div");
        self.collect_footnotes(&mut page, index);
        self.finish(page)
    }

    /// The EPUB navigation document.
    pub fn navigation_document(&mut self) -> String {
        let outline = self.outline;
        let title = outline.title();
        let mut w = XhtmlWriter::new();
        w.out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        w.open_block("html", &[("xmlns", XHTML_NS), ("xmlns:epub", EPUB_OPS_NS)]);
        w.open_block("head", &[]);
        w.empty_line(
            "meta",
            &[("http-equiv", "Content-Type"), ("content", "application/xhtml+xml; charset=UTF-8")],
        );
        w.text_line("title", &[], &title);
        w.close_block("head");
        w.open_block("body", &[]);
        w.open_block("nav", &[("epub:type", "toc"), ("id", "toc")]);
        w.text_line("h1", &[], &title);
        w.open_block("ol", &[]);
        if outline.is_sectioned() {
            for (index, block) in outline.blocks.iter().enumerate() {
                let file = outline.file_of(index, UnitLayout::Epub);
                navigation_entry(&mut w, &file, block, true);
            }
        } else {
            let file = outline.file_of(0, UnitLayout::Epub);
            w.open_line("li", &[]);
            w.open("a", &[("href", file.as_str())]);
            w.text(&title);
            w.close("a");
            w.close_line("li");
        }
        w.close_block("ol");
        w.close_block("nav");
        w.close_block("body");
        w.close_block("html");
        w.into_string()
    }

    fn begin(&mut self, file: &str) -> Page {
        let mut w = XhtmlWriter::new();
        w.out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        w.open_block("html", &[("xmlns", XHTML_NS)]);
        w.open_block("head", &[]);
        w.empty_line(
            "meta",
            &[("http-equiv", "Content-Type"), ("content", "application/xhtml+xml; charset=UTF-8")],
        );
        for href in &self.unit.stylesheets {
            w.empty_line(
                "link",
                &[("rel", "stylesheet"), ("type", "text/css"), ("href", href.as_str())],
            );
        }
        w.text_line("title", &[], &self.outline.title());
        w.close_block("head");
        w.open_block("body", &[]);

        if let Some(branding) = self.branding {
            w.open_block("div", &[("class", "stBranding")]);
            w.indent();
            copy_xhtml(&mut w, branding);
            w.out.push('\n');
            w.close_block("div");
        }

        Page {
            file: file.to_string(),
            w,
            footnotes: BTreeSet::new(),
        }
    }

    fn finish(&mut self, mut page: Page) -> String {
        let outline = self.outline;
        if !page.footnotes.is_empty() {
            page.w.open_block("div", &[("class", "stFootnotes")]);
            let numbers: Vec<usize> = page.footnotes.iter().copied().collect();
            for number in numbers {
                let Some(footnote) = outline.footnotes.get(number - 1) else {
                    continue;
                };
                self.trace.enter(&footnote.element.display_name(), &footnote.element.location);
                page.w.open_line("div", &[("class", "stFootnote"), ("id", footnote.id)]);
                page.w.open("span", &[("class", "stFootnoteNumber")]);
                page.w.text(&format!("[{}]", footnote.number));
                page.w.close("span");
                page.w.text(" ");
                self.inline_children(&mut page, footnote.element);
                page.w.close_line("div");
                self.trace.leave(&footnote.element.display_name());
            }
            page.w.close_block("div");
        }
        page.w.close_block("body");
        page.w.close_block("html");
        page.w.into_string()
    }

    /// Add the footnotes defined in top-level block `index`, and every
    /// footnote reachable from the page's footnotes, to the page.
    fn collect_footnotes(&self, page: &mut Page, index: usize) {
        let outline = self.outline;
        let mut pending: Vec<usize> = outline
            .footnotes
            .iter()
            .filter(|f| f.owner == index)
            .map(|f| f.number)
            .chain(page.footnotes.iter().copied())
            .collect();
        let mut expanded = BTreeSet::new();
        while let Some(number) = pending.pop() {
            if !expanded.insert(number) {
                continue;
            }
            page.footnotes.insert(number);
            let Some(footnote) = outline.footnotes.get(number - 1) else {
                continue;
            };
            pending.extend(
                outline
                    .footnote_targets(footnote.element)
                    .filter_map(|target| outline.footnote(target))
                    .map(|f| f.number),
            );
        }
    }

    fn header(&mut self, page: &mut Page) {
        let outline = self.outline;
        page.w.open_block("div", &[("class", "stHeader")]);
        page.w.text_line("h1", &[("class", "stDocumentTitle")], &outline.title());
        if !outline.metadata.is_empty() {
            page.w.open_block("table", &[("class", "stMetadata")]);
            for entry in &outline.metadata {
                page.w.open_line("tr", &[("class", "stMetadataRow")]);
                page.w.open("th", &[("class", "stMetadataName")]);
                page.w.text(&title_case(entry.name));
                page.w.close("th");
                page.w.open("td", &[("class", "stMetadataValue")]);
                page.w.text(&entry.value);
                page.w.close("td");
                page.w.close_line("tr");
            }
            page.w.close_block("table");
        }
        page.w.close_block("div");
    }

    fn navigation_bar(&mut self, page: &mut Page, index: usize) {
        let outline = self.outline;
        let layout = self.layout();
        page.w.open_block("div", &[("class", "stNavigation")]);
        if index > 0 {
            let previous = outline.file_of(index - 1, layout);
            page.w.text_line("a", &[("class", "stNavigationPrevious"), ("href", previous.as_str())], "Previous");
        }
        page.w.text_line("a", &[("class", "stNavigationUp"), ("href", INDEX_FILE)], &outline.title());
        if index + 1 < outline.blocks.len() {
            let next = outline.file_of(index + 1, layout);
            page.w.text_line("a", &[("class", "stNavigationNext"), ("href", next.as_str())], "Next");
        }
        page.w.close_block("div");
    }

    fn block(&mut self, page: &mut Page, block: &Block<'d>, depth: usize) {
        let element = block.element;
        if block.kind == BlockKind::Footnote {
            // Rendered at the bottom of the page.
            return;
        }
        let name = element.display_name();
        self.trace.enter(&name, &element.location);

        let anchor = block.anchor().to_string();
        let lang = element.attribute_ns(XML_NS, "lang");
        match block.kind {
            BlockKind::Section | BlockKind::Subsection => {
                let base = if block.kind == BlockKind::Section { "stSection" } else { "stSubsection" };
                let class = classes(base, element);
                page.w.open_block("div", &with_lang(vec![("class", class.as_str()), ("id", anchor.as_str())], lang));
                let heading = format!("h{}", (depth + 2).min(6));
                let title_class = format!("{base}Title");
                let number_class = format!("{base}Number");
                page.w.open_line(&heading, &[("class", title_class.as_str())]);
                page.w.open("span", &[("class", number_class.as_str())]);
                page.w.text(&block.number);
                page.w.close("span");
                page.w.text(" ");
                page.w.text(block.title().unwrap_or_default());
                page.w.close_line(&heading);
                for child in &block.children {
                    self.block(page, child, depth + 1);
                }
                page.w.close_block("div");
            }
            BlockKind::Paragraph => {
                let class = classes("stParagraph", element);
                page.w.open_block("div", &with_lang(vec![("class", class.as_str()), ("id", anchor.as_str())], lang));
                page.w.text_line("div", &[("class", "stParagraphNumber")], &block.number);
                page.w.open_line("div", &[("class", "stParagraphContent")]);
                self.inline_children(page, element);
                page.w.close_line("div");
                page.w.close_block("div");
            }
            BlockKind::FormalItem => {
                let class = classes("stFormalItem", element);
                page.w.open_block("div", &with_lang(vec![("class", class.as_str()), ("id", anchor.as_str())], lang));
                page.w.open_line("div", &[("class", "stFormalItemTitle")]);
                page.w.open("span", &[("class", "stFormalItemNumber")]);
                page.w.text(&block.number);
                page.w.close("span");
                page.w.text(" ");
                if let Some(kind) = element.attribute("type") {
                    page.w.open("span", &[("class", "stFormalItemType")]);
                    page.w.text(&title_case(kind));
                    page.w.close("span");
                    page.w.text(": ");
                }
                page.w.text(block.title().unwrap_or_default());
                page.w.close_line("div");
                page.w.open_line("div", &[("class", "stFormalItemContent")]);
                self.inline_children(page, element);
                page.w.close_line("div");
                page.w.close_block("div");
            }
            BlockKind::Aside => {
                let class = classes("stAside", element);
                page.w.open_block("aside", &with_lang(vec![("class", class.as_str()), ("id", anchor.as_str())], lang));
                if let Some(title) = block.title() {
                    page.w.text_line("div", &[("class", "stAsideTitle")], title);
                }
                for child in &block.children {
                    self.block(page, child, depth);
                }
                page.w.close_block("aside");
            }
            BlockKind::Footnote => {}
        }

        self.trace.leave(&name);
    }

    fn inline_children(&mut self, page: &mut Page, element: &'d Element) {
        for node in &element.children {
            match node {
                Node::Text(text) => page.w.text(text),
                Node::Element(child) => self.inline(page, child),
            }
        }
    }

    fn inline(&mut self, page: &mut Page, element: &'d Element) {
        let outline = self.outline;
        let name = element.display_name();
        self.trace.enter(&name, &element.location);

        let id = element.attribute("id");
        let lang = element.attribute_ns(XML_NS, "lang");
        let common = |class: &'static str| -> (String, Option<&'d str>, Option<&'d str>) {
            (classes(class, element), id, lang)
        };

        let local = element.name.local.as_str();
        if element.name.namespace.as_deref() != Some(outline.generation.uri()) {
            warn!("{}: ignoring foreign element {}", element.location, element.name);
            self.trace.leave(&name);
            return;
        }

        match local {
            "Term" => {
                let (class, id, lang) = common("stTerm");
                page.w.open("span", &attributes(&class, id, lang));
                page.w.text(&element.text());
                page.w.close("span");
            }
            "Verbatim" => {
                let (class, id, lang) = common("stVerbatim");
                page.w.open("pre", &attributes(&class, id, lang));
                page.w.text(&element.text());
                page.w.close("pre");
            }
            "Image" => {
                let (class, id, lang) = common("stImage");
                let source = element.attribute("source").unwrap_or_default();
                let alt = normalize_space(&element.text());
                let mut attrs = attributes(&class, id, lang);
                attrs.push(("src", source));
                attrs.push(("alt", alt.as_str()));
                if let Some(width) = element.attribute("width") {
                    attrs.push(("width", width));
                }
                if let Some(height) = element.attribute("height") {
                    attrs.push(("height", height));
                }
                page.w.empty("img", &attrs);
            }
            "Link" => {
                let (class, id, lang) = common("stLink");
                let target = element.attribute("target").unwrap_or_default();
                let href = match outline.file_of_id(target, self.layout()) {
                    Some(file) if file != page.file => format!("{file}#{target}"),
                    _ => format!("#{target}"),
                };
                let mut attrs = attributes(&class, id, lang);
                attrs.push(("href", href.as_str()));
                page.w.open("a", &attrs);
                self.inline_children(page, element);
                page.w.close("a");
            }
            "LinkExternal" => {
                let (class, id, lang) = common("stLinkExternal");
                let mut attrs = attributes(&class, id, lang);
                attrs.push(("href", element.attribute("target").unwrap_or_default()));
                page.w.open("a", &attrs);
                self.inline_children(page, element);
                page.w.close("a");
            }
            "LinkFootnote" => {
                let (class, id, lang) = common("stFootnoteLink");
                let target = element.attribute("target").unwrap_or_default();
                let href = format!("#{target}");
                let label = match outline.footnote(target) {
                    Some(footnote) => {
                        page.footnotes.insert(footnote.number);
                        format!("[{}]", footnote.number)
                    }
                    None => "[?]".to_string(),
                };
                let mut attrs = attributes(&class, id, lang);
                attrs.push(("href", href.as_str()));
                page.w.open("a", &attrs);
                page.w.text(&label);
                page.w.close("a");
            }
            "ListOrdered" | "ListUnordered" => {
                let (tag, base) = if local == "ListOrdered" {
                    ("ol", "stListOrdered")
                } else {
                    ("ul", "stListUnordered")
                };
                let (class, id, lang) = common(base);
                page.w.open(tag, &attributes(&class, id, lang));
                for item in element.child_elements() {
                    self.trace.enter(&item.display_name(), &item.location);
                    let class = classes("stListItem", item);
                    page.w.open("li", &attributes(&class, item.attribute("id"), None));
                    self.inline_children(page, item);
                    page.w.close("li");
                    self.trace.leave(&item.display_name());
                }
                page.w.close(tag);
            }
            "Table" => {
                let (class, id, lang) = common("stTable");
                page.w.open("table", &attributes(&class, id, lang));
                let mut body_open = false;
                for part in element.child_elements() {
                    self.trace.enter(&part.display_name(), &part.location);
                    if outline.is(part, "Columns") {
                        page.w.open("thead", &[]);
                        let class = classes("stTableColumns", part);
                        page.w.open("tr", &attributes(&class, part.attribute("id"), None));
                        for column in part.child_elements() {
                            let class = classes("stTableColumn", column);
                            page.w.open("th", &attributes(&class, column.attribute("id"), None));
                            page.w.text(&column.text());
                            page.w.close("th");
                        }
                        page.w.close("tr");
                        page.w.close("thead");
                    } else if outline.is(part, "Row") {
                        if !body_open {
                            page.w.open("tbody", &[]);
                            body_open = true;
                        }
                        let class = classes("stTableRow", part);
                        page.w.open("tr", &attributes(&class, part.attribute("id"), None));
                        for cell in part.child_elements() {
                            let class = classes("stTableCell", cell);
                            page.w.open("td", &attributes(&class, cell.attribute("id"), None));
                            self.inline_children(page, cell);
                            page.w.close("td");
                        }
                        page.w.close("tr");
                    }
                    self.trace.leave(&part.display_name());
                }
                if body_open {
                    page.w.close("tbody");
                }
                page.w.close("table");
            }
            _ => self.inline_children(page, element),
        }

        self.trace.leave(&name);
    }
}

fn classes(base: &str, element: &Element) -> String {
    match element.attribute("type") {
        Some(kind) => format!("{base} {kind}"),
        None => base.to_string(),
    }
}

fn attributes<'v>(class: &'v str, id: Option<&'v str>, lang: Option<&'v str>) -> Vec<(&'static str, &'v str)> {
    let mut attrs = vec![("class", class)];
    if let Some(id) = id {
        attrs.push(("id", id));
    }
    if let Some(lang) = lang {
        attrs.push(("xml:lang", lang));
    }
    attrs
}

fn with_lang<'v>(mut attrs: Vec<(&'static str, &'v str)>, lang: Option<&'v str>) -> Vec<(&'static str, &'v str)> {
    if let Some(lang) = lang {
        attrs.push(("xml:lang", lang));
    }
    attrs
}

fn heading_text(block: &Block<'_>) -> String {
    match block.title() {
        Some(title) if block.number.is_empty() => title.to_string(),
        Some(title) => format!("{}. {title}", block.number),
        None => block.number.clone(),
    }
}

fn contents_link(w: &mut XhtmlWriter, file: &str, block: &Block<'_>) {
    w.open_line("a", &[("class", "stContentsLink"), ("href", file)]);
    w.text(&heading_text(block));
    w.close_line("a");
}

fn navigation_entry(w: &mut XhtmlWriter, file: &str, block: &Block<'_>, top: bool) {
    let href = if top {
        file.to_string()
    } else {
        format!("{file}#{}", block.anchor())
    };
    let divisions: Vec<&Block<'_>> = block
        .children
        .iter()
        .filter(|c| matches!(c.kind, BlockKind::Section | BlockKind::Subsection))
        .collect();

    w.open_line("li", &[]);
    w.open("a", &[("href", href.as_str())]);
    w.text(&heading_text(block));
    w.close("a");
    if divisions.is_empty() {
        w.close_line("li");
        return;
    }
    w.out.push('\n');
    w.depth += 1;
    w.open_block("ol", &[]);
    for child in divisions {
        navigation_entry(w, file, child, false);
    }
    w.close_block("ol");
    w.depth -= 1;
    w.indent();
    w.close_line("li");
}

/// Copy an XHTML fragment, dropping anything outside the XHTML namespace.
fn copy_xhtml(w: &mut XhtmlWriter, element: &Element) {
    if element.name.namespace.as_deref() != Some(XHTML_NS) {
        warn!("{}: dropping non-XHTML branding element {}", element.location, element.name);
        return;
    }
    let attrs: Vec<(String, &str)> = element
        .attributes
        .iter()
        .filter_map(|a| match a.name.namespace.as_deref() {
            None => Some((a.name.local.clone(), a.value.as_str())),
            Some(XML_NS) => Some((format!("xml:{}", a.name.local), a.value.as_str())),
            Some(_) => None,
        })
        .collect();
    let attrs: Vec<(&str, &str)> = attrs.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    let name = element.name.local.as_str();
    if element.children.is_empty() {
        w.empty(name, &attrs);
        return;
    }
    w.open(name, &attrs);
    for node in &element.children {
        match node {
            Node::Text(text) => w.text(text),
            Node::Element(child) => copy_xhtml(w, child),
        }
    }
    w.close(name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_escapes_and_indents() {
        let mut w = XhtmlWriter::new();
        w.open_block("div", &[("class", "a\"b")]);
        w.text_line("p", &[], "x < y");
        w.close_block("div");
        assert_eq!(w.into_string(), "<div class=\"a&quot;b\">\n  <p>x &lt; y</p>\n</div>\n");
    }
}
