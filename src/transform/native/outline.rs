//! The block structure of a source document, with generated identifiers,
//! numbering and the mapping from identifiers to output files.

use std::collections::HashMap;

use crate::catalog::DUBLIN_CORE_NS;
use crate::dispatch::SchemaNamespace;
use crate::xml::Element;

use super::unit::UnitLayout;

pub const INDEX_FILE: &str = "index.xhtml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Section,
    Subsection,
    Paragraph,
    FormalItem,
    Footnote,
    Aside,
}

impl BlockKind {
    fn from_local(local: &str) -> Option<Self> {
        Some(match local {
            "Section" => BlockKind::Section,
            "Subsection" => BlockKind::Subsection,
            "Paragraph" => BlockKind::Paragraph,
            "FormalItem" => BlockKind::FormalItem,
            "Footnote" => BlockKind::Footnote,
            "Aside" => BlockKind::Aside,
            _ => return None,
        })
    }

    /// Element name, also used as the item type in the document index.
    pub fn name(self) -> &'static str {
        match self {
            BlockKind::Section => "Section",
            BlockKind::Subsection => "Subsection",
            BlockKind::Paragraph => "Paragraph",
            BlockKind::FormalItem => "FormalItem",
            BlockKind::Footnote => "Footnote",
            BlockKind::Aside => "Aside",
        }
    }

    pub fn is_container(self) -> bool {
        matches!(self, BlockKind::Section | BlockKind::Subsection | BlockKind::Aside)
    }
}

#[derive(Debug)]
pub struct Block<'d> {
    pub kind: BlockKind,
    pub element: &'d Element,
    /// `d{document}e{ordinal}`, where the ordinal is the element's preorder
    /// position among all elements of the document.
    pub generated: String,
    /// Display number: dotted for sections and subsections, a counter for
    /// paragraphs and formal items, empty otherwise.
    pub number: String,
    pub children: Vec<Block<'d>>,
}

impl<'d> Block<'d> {
    pub fn id(&self) -> Option<&'d str> {
        self.element.attribute("id")
    }

    /// The explicit identifier, or the generated one.
    pub fn anchor(&self) -> &str {
        self.id().unwrap_or(&self.generated)
    }

    pub fn title(&self) -> Option<&'d str> {
        self.element.attribute("title")
    }

    /// Depth-first iteration over this block and everything inside it.
    pub fn walk(&self, visit: &mut dyn FnMut(&Block<'d>)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

#[derive(Debug)]
pub struct Footnote<'d> {
    pub id: &'d str,
    /// 1-based, in order of definition.
    pub number: usize,
    pub element: &'d Element,
    /// Index of the top-level block defining it.
    pub owner: usize,
}

/// A Dublin Core metadata entry.
#[derive(Debug)]
pub struct MetadataEntry<'d> {
    pub name: &'d str,
    pub value: String,
    pub element: &'d Element,
}

#[derive(Debug)]
pub struct Outline<'d> {
    pub generation: SchemaNamespace,
    pub root: &'d Element,
    pub document_number: u64,
    /// Generated identifier of the document element.
    pub generated: String,
    pub metadata: Vec<MetadataEntry<'d>>,
    pub blocks: Vec<Block<'d>>,
    pub footnotes: Vec<Footnote<'d>>,
    /// Identifier to index of the top-level block containing it.
    owners: HashMap<&'d str, usize>,
}

impl<'d> Outline<'d> {
    pub fn build(root: &'d Element, generation: SchemaNamespace, document_number: u64) -> Self {
        let builder = Builder {
            namespace: generation.uri(),
            document_number,
        };
        let blocks = builder.blocks(root, 0, "");

        let metadata = root
            .child_elements()
            .filter(|e| e.name.is(generation.uri(), "Metadata"))
            .flat_map(|m| m.child_elements())
            .filter(|e| e.name.namespace.as_deref() == Some(DUBLIN_CORE_NS))
            .map(|e| MetadataEntry {
                name: &e.name.local,
                value: normalize_space(&e.text()),
                element: e,
            })
            .collect();

        let mut owners = HashMap::new();
        let mut footnotes = Vec::new();
        for (index, block) in blocks.iter().enumerate() {
            for element in block.element.descendants() {
                if let Some(id) = element.attribute("id") {
                    owners.entry(id).or_insert(index);
                    if element.name.is(generation.uri(), "Footnote") {
                        footnotes.push(Footnote {
                            id,
                            number: footnotes.len() + 1,
                            element,
                            owner: index,
                        });
                    }
                }
            }
        }

        Self {
            generation,
            root,
            document_number,
            generated: builder.generated(0),
            metadata,
            blocks,
            footnotes,
            owners,
        }
    }

    pub fn title(&self) -> String {
        self.metadata_value("title").unwrap_or_default().to_string()
    }

    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.value.as_str())
    }

    pub fn language(&self) -> Option<&str> {
        self.metadata_value("language")
    }

    /// Whether the top level is made of sections, which split into files.
    pub fn is_sectioned(&self) -> bool {
        !self.blocks.is_empty() && self.blocks.iter().all(|b| b.kind == BlockKind::Section)
    }

    /// Name of the file the top-level block `index` is written to.
    pub fn file_of(&self, index: usize, layout: UnitLayout) -> String {
        match layout {
            UnitLayout::Single => INDEX_FILE.to_string(),
            _ if self.is_sectioned() => match self.blocks.get(index) {
                Some(block) => format!("{}.xhtml", block.generated),
                None => INDEX_FILE.to_string(),
            },
            UnitLayout::Epub | UnitLayout::Package => format!("{}.xhtml", self.generated),
            UnitLayout::Multi | UnitLayout::Index => INDEX_FILE.to_string(),
        }
    }

    /// Name of the file containing the element with identifier `id`.
    pub fn file_of_id(&self, id: &str, layout: UnitLayout) -> Option<String> {
        self.owners.get(id).map(|&index| self.file_of(index, layout))
    }

    /// The distinct content files, in reading order.
    pub fn content_files(&self, layout: UnitLayout) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for index in 0..self.blocks.len().max(1) {
            let file = self.file_of(index, layout);
            if !files.contains(&file) {
                files.push(file);
            }
        }
        files
    }

    pub fn footnote(&self, id: &str) -> Option<&Footnote<'d>> {
        self.footnotes.iter().find(|f| f.id == id)
    }

    /// Every `LinkFootnote` target inside `element`.
    pub fn footnote_targets(&self, element: &'d Element) -> impl Iterator<Item = &'d str> + '_ {
        let namespace = self.generation.uri();
        element
            .descendants()
            .filter(move |e| e.name.is(namespace, "LinkFootnote"))
            .filter_map(|e| e.attribute("target"))
    }

    /// Whether `element` is `local` in the document's vocabulary.
    pub fn is(&self, element: &Element, local: &str) -> bool {
        element.name.is(self.generation.uri(), local)
    }
}

struct Builder<'n> {
    namespace: &'n str,
    document_number: u64,
}

impl Builder<'_> {
    fn generated(&self, ordinal: usize) -> String {
        format!("d{}e{ordinal}", self.document_number)
    }

    fn blocks<'d>(&self, parent: &'d Element, parent_ordinal: usize, prefix: &str) -> Vec<Block<'d>> {
        let mut blocks = Vec::new();
        let mut ordinal = parent_ordinal + 1;
        let mut divisions = 0;
        let mut items = 0;

        for child in parent.child_elements() {
            let this = ordinal;
            ordinal += child.descendants().count();

            if child.name.namespace.as_deref() != Some(self.namespace) {
                continue;
            }
            let Some(kind) = BlockKind::from_local(&child.name.local) else {
                continue;
            };

            let number = match kind {
                BlockKind::Section | BlockKind::Subsection => {
                    divisions += 1;
                    if prefix.is_empty() {
                        divisions.to_string()
                    } else {
                        format!("{prefix}.{divisions}")
                    }
                }
                BlockKind::Paragraph | BlockKind::FormalItem => {
                    items += 1;
                    items.to_string()
                }
                BlockKind::Footnote | BlockKind::Aside => String::new(),
            };
            let children = if kind.is_container() {
                let inner = if kind == BlockKind::Aside { prefix } else { number.as_str() };
                self.blocks(child, this, inner)
            } else {
                Vec::new()
            };

            blocks.push(Block {
                kind,
                element: child,
                generated: self.generated(this),
                number,
                children,
            });
        }
        blocks
    }
}

/// Collapse runs of whitespace and trim.
pub fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::GENERATION_B_NAMESPACE;
    use crate::resolver::NeverResolver;
    use crate::xml::{Document, XmlReader};

    fn parse(body: &str) -> Document {
        let xml = format!(
            r#"<Document xmlns="{GENERATION_B_NAMESPACE}" xmlns:dc="{DUBLIN_CORE_NS}">
<Metadata><dc:title>Example  Title</dc:title><dc:language>en</dc:language></Metadata>
{body}
</Document>"#
        );
        XmlReader::new(&NeverResolver)
            .parse(xml.as_bytes(), "doc.xml", None)
            .unwrap()
    }

    #[test]
    fn test_generated_identifiers_follow_preorder() {
        let document = parse(
            r#"<Section title="A"><Paragraph>x</Paragraph></Section>
               <Section title="B" id="b"><Subsection title="B1"><Paragraph>y</Paragraph></Subsection></Section>"#,
        );
        let outline = Outline::build(&document.root, SchemaNamespace::GenerationB, 3);
        // Document=0, Metadata=1, dc:title=2, dc:language=3, Section A=4, Paragraph=5, Section B=6
        assert_eq!(outline.generated, "d3e0");
        assert_eq!(outline.blocks[0].generated, "d3e4");
        assert_eq!(outline.blocks[0].children[0].generated, "d3e5");
        assert_eq!(outline.blocks[1].generated, "d3e6");
        assert_eq!(outline.blocks[1].anchor(), "b");
        assert_eq!(outline.blocks[1].children[0].number, "2.1");
        assert_eq!(outline.title(), "Example Title");
        assert!(outline.is_sectioned());
        assert_eq!(outline.file_of(1, UnitLayout::Multi), "d3e6.xhtml");
        assert_eq!(outline.file_of(1, UnitLayout::Single), INDEX_FILE);
        assert_eq!(outline.file_of_id("b", UnitLayout::Epub).as_deref(), Some("d3e6.xhtml"));
    }

    #[test]
    fn test_unsectioned_files() {
        let document = parse("<Paragraph>x</Paragraph><Paragraph>y</Paragraph>");
        let outline = Outline::build(&document.root, SchemaNamespace::GenerationB, 0);
        assert!(!outline.is_sectioned());
        assert_eq!(outline.content_files(UnitLayout::Multi), [INDEX_FILE]);
        assert_eq!(outline.content_files(UnitLayout::Epub), ["d0e0.xhtml"]);
        assert_eq!(outline.blocks[1].number, "2");
    }

    #[test]
    fn test_footnotes_numbered_by_definition() {
        let document = parse(
            r#"<Paragraph>see<LinkFootnote target="f2"/></Paragraph>
               <Footnote id="f1">one</Footnote>
               <Footnote id="f2">two</Footnote>"#,
        );
        let outline = Outline::build(&document.root, SchemaNamespace::GenerationB, 0);
        assert_eq!(outline.footnote("f2").map(|f| f.number), Some(2));
        let targets: Vec<_> = outline.footnote_targets(outline.blocks[0].element).collect();
        assert_eq!(targets, ["f2"]);
    }
}
