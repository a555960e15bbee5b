//! A compiler and validator for the subset of W3C XML Schema used by the
//! structural vocabularies and the generated XHTML.
//!
//! Supported: global and local element and attribute declarations with
//! qualified/unqualified forms, named and anonymous complex types with
//! `sequence`, `choice`, `all` and `any` particles, model and attribute
//! groups, `anyAttribute`, simple and complex content derivation,
//! simple-type restriction, list and union, the common facets, and the
//! built-in types listed in [`types::Builtin`]. Identity is checked through
//! the `ID`, `IDREF` and `IDREFS` types. Identity constraints
//! (`key`/`unique`/`keyref`) and substitution groups are ignored.
//!
//! ```
//! use structural::catalog::{GENERATION_B_SCHEMA, ResourceCatalog};
//! use structural::config::ParserLimits;
//! use structural::resolver::CatalogResolver;
//! use structural::schema::Schema;
//! use std::sync::Arc;
//!
//! let resolver = CatalogResolver::new(Arc::new(ResourceCatalog::builtin()));
//! let schema = Schema::compile(GENERATION_B_SCHEMA, &resolver, ParserLimits::default()).unwrap();
//! assert_eq!(schema.target_namespace(), Some("urn:com.io7m.structural:8:0"));
//! ```

mod compile;
mod model;
pub mod types;
mod validate;

use std::collections::HashMap;

use crate::config::ParserLimits;
use crate::error::SchemaCompileError;
use crate::resolver::EntityResolver;
use crate::validation::Finding;
use crate::xml::{Document, QName};

use model::{AttributeDecl, ElementDecl, ElementId, TypeDef};

/// A compiled schema, ready to validate any number of documents.
///
/// Schemas are immutable once compiled and may be shared between threads.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    target_namespace: Option<String>,
    types: Vec<TypeDef>,
    elements: Vec<ElementDecl>,
    global_elements: HashMap<QName, ElementId>,
    global_attributes: HashMap<QName, AttributeDecl>,
}

impl Schema {
    /// Load `entry` and everything it includes or imports through `resolver`
    /// and compile the result.
    pub fn compile(
        entry: &str,
        resolver: &dyn EntityResolver,
        limits: ParserLimits,
    ) -> Result<Self, SchemaCompileError> {
        compile::compile(entry, resolver, limits)
    }

    /// Name the schema was compiled from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_namespace(&self) -> Option<&str> {
        self.target_namespace.as_deref()
    }

    /// Whether `name` may appear as a document element.
    pub fn declares_element(&self, name: &QName) -> bool {
        self.global_elements.contains_key(name)
    }

    /// Validate a parsed document, returning every violation found.
    pub fn validate(&self, document: &Document) -> Vec<Finding> {
        validate::validate(self, document)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{ResourceCatalog, ResourceGroup};
    use crate::resolver::{CatalogResolver, NeverResolver};
    use crate::validation::FindingKind;
    use crate::xml::XmlReader;

    const BOOK_XSD: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           xmlns:b="urn:book"
           targetNamespace="urn:book"
           elementFormDefault="qualified">
  <xs:simpleType name="Isbn">
    <xs:restriction base="xs:token">
      <xs:pattern value="[0-9]{3}-[0-9]{10}"/>
    </xs:restriction>
  </xs:simpleType>
  <xs:complexType name="Chapter">
    <xs:sequence>
      <xs:element name="title" type="xs:string"/>
      <xs:element name="para" type="xs:string" minOccurs="0" maxOccurs="unbounded"/>
    </xs:sequence>
    <xs:attribute name="id" type="xs:ID" use="required"/>
    <xs:attribute name="next" type="xs:IDREF"/>
  </xs:complexType>
  <xs:element name="book">
    <xs:complexType>
      <xs:sequence>
        <xs:element ref="b:chapter" maxOccurs="unbounded"/>
      </xs:sequence>
      <xs:attribute name="isbn" type="b:Isbn"/>
      <xs:attribute name="edition" type="xs:positiveInteger"/>
    </xs:complexType>
  </xs:element>
  <xs:element name="chapter" type="b:Chapter"/>
</xs:schema>"#;

    fn book_schema() -> Schema {
        let catalog = ResourceCatalog::empty().with_resource(
            "book.xsd",
            ResourceGroup::Schema,
            Some("urn:book"),
            BOOK_XSD.as_bytes().to_vec(),
        );
        let resolver = CatalogResolver::new(Arc::new(catalog));
        Schema::compile("book.xsd", &resolver, ParserLimits::default()).unwrap()
    }

    fn check(schema: &Schema, xml: &str) -> Vec<Finding> {
        let document = XmlReader::new(&NeverResolver)
            .parse(xml.as_bytes(), "test.xml", None)
            .unwrap();
        schema.validate(&document)
    }

    #[test]
    fn test_valid_document() {
        let schema = book_schema();
        let findings = check(
            &schema,
            r#"<book xmlns="urn:book" isbn="978-0123456789" edition="2">
                 <chapter id="c1" next="c2"><title>One</title><para>x</para></chapter>
                 <chapter id="c2"><title>Two</title></chapter>
               </book>"#,
        );
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[test]
    fn test_independent_violations() {
        let schema = book_schema();
        let findings = check(
            &schema,
            r#"<book xmlns="urn:book" edition="0" colour="red">
                 <chapter id="c1"><para>no title</para></chapter>
               </book>"#,
        );
        assert_eq!(findings.len(), 3, "{findings:?}");
        assert!(findings.iter().any(|f| f.message.contains("edition")));
        assert!(findings.iter().any(|f| f.message.contains("colour")));
        assert!(findings.iter().any(|f| f.message.contains("'para' is not allowed")));
    }

    #[test]
    fn test_identity() {
        let schema = book_schema();
        let findings = check(
            &schema,
            r#"<book xmlns="urn:book">
                 <chapter id="c1" next="missing"><title>One</title></chapter>
                 <chapter id="c1"><title>Two</title></chapter>
               </book>"#,
        );
        assert_eq!(findings.len(), 2, "{findings:?}");
        assert!(findings.iter().all(|f| f.kind == FindingKind::Identity));
        assert!(findings[0].message.contains("duplicate identifier 'c1'"));
        assert!(findings[1].message.contains("undefined identifier 'missing'"));
    }

    #[test]
    fn test_pattern_and_missing_attribute() {
        let schema = book_schema();
        let findings = check(
            &schema,
            r#"<book xmlns="urn:book" isbn="12345"><chapter><title>x</title></chapter></book>"#,
        );
        assert_eq!(findings.len(), 2, "{findings:?}");
        assert!(findings[0].message.contains("does not match the pattern"));
        assert!(findings[1].message.contains("missing required attribute 'id'"));
    }

    #[test]
    fn test_incomplete_content() {
        let schema = book_schema();
        let findings = check(&schema, r#"<book xmlns="urn:book"/>"#);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("incomplete"));
        assert!(findings[0].message.contains("chapter"));
    }

    #[test]
    fn test_undeclared_root() {
        let schema = book_schema();
        let findings = check(&schema, "<novel/>");
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("not declared"));
    }

    #[test]
    fn test_compile_problems_are_collected() {
        let broken = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
            <xs:element name="a" type="Missing"/>
            <xs:element name="b" type="xs:nonsense"/>
        </xs:schema>"#;
        let catalog = ResourceCatalog::empty().with_resource(
            "broken.xsd",
            ResourceGroup::Schema,
            None,
            broken.as_bytes().to_vec(),
        );
        let resolver = CatalogResolver::new(Arc::new(catalog));
        let err = Schema::compile("broken.xsd", &resolver, ParserLimits::default()).unwrap_err();
        assert_eq!(err.problems.len(), 2, "{:?}", err.problems);
    }

    fn compile_text(xsd: &str) -> Result<Schema, SchemaCompileError> {
        let catalog = ResourceCatalog::empty().with_resource(
            "inline.xsd",
            ResourceGroup::Schema,
            Some("urn:grid"),
            xsd.as_bytes().to_vec(),
        );
        let resolver = CatalogResolver::new(Arc::new(catalog));
        Schema::compile("inline.xsd", &resolver, ParserLimits::default())
    }

    #[test]
    fn test_elements_recurse_through_extension() {
        // `cell` extends `Block`, whose content reaches `cell` again.
        let schema = compile_text(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
                 xmlns:g="urn:grid" targetNamespace="urn:grid" elementFormDefault="qualified">
              <xs:element name="block" type="g:Block"/>
              <xs:complexType name="Block" mixed="true">
                <xs:choice minOccurs="0" maxOccurs="unbounded">
                  <xs:element ref="g:row"/>
                </xs:choice>
              </xs:complexType>
              <xs:element name="row">
                <xs:complexType>
                  <xs:sequence><xs:element ref="g:cell" maxOccurs="unbounded"/></xs:sequence>
                </xs:complexType>
              </xs:element>
              <xs:element name="cell" type="g:Cell"/>
              <xs:complexType name="Cell" mixed="true">
                <xs:complexContent>
                  <xs:extension base="g:Block">
                    <xs:attribute name="span" type="xs:positiveInteger"/>
                  </xs:extension>
                </xs:complexContent>
              </xs:complexType>
            </xs:schema>"#,
        )
        .unwrap();

        let findings = check(
            &schema,
            r#"<block xmlns="urn:grid">text<row><cell span="2">a<row><cell>b</cell></row></cell></row></block>"#,
        );
        assert!(findings.is_empty(), "{findings:?}");

        let findings = check(&schema, r#"<block xmlns="urn:grid"><row><cell span="0"/></row></block>"#);
        assert_eq!(findings.len(), 1, "{findings:?}");
        assert!(findings[0].message.contains("span"));
    }

    #[test]
    fn test_circular_derivation_is_refused() {
        let err = compile_text(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
                 xmlns:g="urn:grid" targetNamespace="urn:grid">
              <xs:complexType name="A">
                <xs:complexContent><xs:extension base="g:B"/></xs:complexContent>
              </xs:complexType>
              <xs:complexType name="B">
                <xs:complexContent><xs:extension base="g:A"/></xs:complexContent>
              </xs:complexType>
            </xs:schema>"#,
        )
        .unwrap_err();
        assert!(
            err.problems.iter().any(|p| p.contains("circular type derivation")),
            "{:?}",
            err.problems
        );
    }

    #[test]
    fn test_builtin_schemas_compile() {
        let resolver = CatalogResolver::new(Arc::new(ResourceCatalog::builtin()));
        for name in ["structural-7.xsd", "structural-8.xsd", "xhtml.xsd"] {
            let schema = Schema::compile(name, &resolver, ParserLimits::default());
            assert!(schema.is_ok(), "{name}: {:?}", schema.err());
        }
    }
}
