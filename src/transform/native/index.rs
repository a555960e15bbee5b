//! The machine-readable document index.

use crate::xml::escape_attribute;

use super::outline::{BlockKind, Outline};
use super::unit::UnitLayout;

pub const INDEX_NS: &str = "urn:com.io7m.structural.index:1:0";
pub const INDEX_DOCUMENT: &str = "xstructural-index.xml";

/// One `Item` per identified section, subsection, paragraph and formal item,
/// in document order, naming the file the multi-file layout puts it in.
pub fn generate_index(outline: &Outline<'_>) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!("<Index xmlns=\"{INDEX_NS}\">\n"));

    for (index, top) in outline.blocks.iter().enumerate() {
        let file = outline.file_of(index, UnitLayout::Index);
        top.walk(&mut |block| {
            let indexed = matches!(
                block.kind,
                BlockKind::Section | BlockKind::Subsection | BlockKind::Paragraph | BlockKind::FormalItem
            );
            let Some(id) = block.id().filter(|_| indexed) else {
                return;
            };
            xml.push_str(&format!(
                "  <Item File=\"{}\" ID=\"{}\" Type=\"{}\"",
                escape_attribute(&file),
                escape_attribute(id),
                block.kind.name()
            ));
            if let Some(title) = block.title() {
                xml.push_str(&format!(" Title=\"{}\"", escape_attribute(title)));
            }
            xml.push_str("/>\n");
        });
    }

    xml.push_str("</Index>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{GENERATION_B_NAMESPACE, SchemaNamespace};
    use crate::resolver::NeverResolver;
    use crate::xml::XmlReader;

    #[test]
    fn test_index_items() {
        let xml = format!(
            r#"<Document xmlns="{GENERATION_B_NAMESPACE}"><Metadata/>
                 <Section title="A" id="a">
                   <Subsection title="A1" id="a1">
                     <Paragraph id="p1">x</Paragraph>
                     <Paragraph>unindexed</Paragraph>
                     <FormalItem title="F" id="f1">y</FormalItem>
                   </Subsection>
                 </Section>
                 <Section title="B"><Paragraph id="p2">z</Paragraph></Section>
               </Document>"#
        );
        let document = XmlReader::new(&NeverResolver)
            .parse(xml.as_bytes(), "doc.xml", None)
            .unwrap();
        let outline = Outline::build(&document.root, SchemaNamespace::GenerationB, 0);
        let index = generate_index(&outline);

        assert_eq!(index.matches("<Item ").count(), 5, "{index}");
        assert!(index.contains(r#"<Item File="d0e2.xhtml" ID="a" Type="Section" Title="A"/>"#));
        assert!(index.contains(r#"ID="p1" Type="Paragraph"/>"#));
        assert!(index.contains(r#"ID="f1" Type="FormalItem" Title="F"/>"#));
        assert!(index.contains(r#"<Item File="d0e7.xhtml" ID="p2""#));
    }
}
