use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::escape::{resolve_entity, unescape_attribute};
use super::tree::{Attribute, Document, Element, NamespaceScope, QName};
use super::{Location, XINCLUDE_NS, XMLNS_NS, xinclude};
use crate::config::ParserLimits;
use crate::error::XmlError;
use crate::resolver::EntityResolver;
use crate::util::{decode_text, extract_xml_encoding};

/// A hardened XML reader bound to a resolver.
///
/// # Example
///
/// ```
/// use structural::resolver::NeverResolver;
/// use structural::xml::XmlReader;
///
/// let reader = XmlReader::new(&NeverResolver);
/// let doc = reader.parse(b"<a xmlns='urn:x'><b/></a>", "inline", None).unwrap();
/// assert_eq!(doc.root.name.namespace.as_deref(), Some("urn:x"));
///
/// // Entity declarations never get past the reader.
/// let evil = b"<!DOCTYPE a [<!ENTITY e 'boom'>]><a>&e;</a>";
/// assert!(reader.parse(evil, "inline", None).is_err());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct XmlReader<'r> {
    resolver: &'r dyn EntityResolver,
    limits: ParserLimits,
    xinclude: bool,
}

/// Namespaces declared anywhere in a document, found without building a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceSurvey {
    pub namespaces: BTreeSet<String>,
    /// Whether the document contains XInclude elements.
    pub has_includes: bool,
}

impl<'r> XmlReader<'r> {
    pub fn new(resolver: &'r dyn EntityResolver) -> Self {
        Self {
            resolver,
            limits: ParserLimits::default(),
            xinclude: false,
        }
    }

    pub fn with_limits(mut self, limits: ParserLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Expand `xi:include` elements after parsing.
    pub fn with_xinclude(mut self, enabled: bool) -> Self {
        self.xinclude = enabled;
        self
    }

    pub fn resolver(&self) -> &'r dyn EntityResolver {
        self.resolver
    }

    pub fn limits(&self) -> &ParserLimits {
        &self.limits
    }

    /// Parse a complete document.
    ///
    /// `base` is the directory relative inclusions are resolved against.
    pub fn parse(&self, bytes: &[u8], system_id: &str, base: Option<&Path>) -> Result<Document, XmlError> {
        let mut active = vec![system_id.to_string()];
        self.parse_nested(bytes, system_id, base, 0, &mut active)
    }

    pub(crate) fn parse_nested(
        &self,
        bytes: &[u8],
        system_id: &str,
        base: Option<&Path>,
        include_depth: usize,
        active: &mut Vec<String>,
    ) -> Result<Document, XmlError> {
        let text = self.prepare(bytes, system_id)?;
        let mut tokenizer = Tokenizer::new(&text, system_id, self.resolver, self.limits);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        while let Some(token) = tokenizer.next_token()? {
            match token {
                Token::Start(tag) => {
                    let mut element = Element::new(tag.name, tag.location);
                    element.prefix = tag.prefix;
                    element.attributes = tag.attributes;
                    element.namespace_declarations = tag.declarations;
                    if tag.empty {
                        attach(&mut stack, &mut root, element);
                    } else {
                        stack.push(element);
                    }
                }
                Token::End => {
                    if let Some(element) = stack.pop() {
                        attach(&mut stack, &mut root, element);
                    }
                }
                Token::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        top.push_text(&text);
                    }
                }
            }
        }

        let root = root.ok_or_else(|| XmlError::Syntax {
            location: Location::new(system_id, 1, 1),
            message: "document has no root element".to_string(),
        })?;
        let mut document = Document {
            root,
            system_id: Arc::from(system_id),
            doctype: tokenizer.doctype.take(),
        };

        if self.xinclude {
            xinclude::expand(self, &mut document, base, include_depth, active)?;
        }
        Ok(document)
    }

    /// Collect every namespace URI declared in a document.
    ///
    /// This is a non-validating pass: inclusions are not expanded.
    pub fn survey_namespaces(&self, bytes: &[u8], system_id: &str) -> Result<NamespaceSurvey, XmlError> {
        let text = self.prepare(bytes, system_id)?;
        let mut tokenizer = Tokenizer::new(&text, system_id, self.resolver, self.limits);
        let mut survey = NamespaceSurvey::default();
        while let Some(token) = tokenizer.next_token()? {
            if let Token::Start(tag) = token {
                survey
                    .namespaces
                    .extend(tag.declarations.into_iter().map(|(_, uri)| uri).filter(|u| !u.is_empty()));
                if tag.name.is(XINCLUDE_NS, "include") {
                    survey.has_includes = true;
                }
            }
        }
        debug!("{system_id}: declared namespaces {:?}", survey.namespaces);
        Ok(survey)
    }

    fn prepare(&self, bytes: &[u8], system_id: &str) -> Result<String, XmlError> {
        if bytes.len() > self.limits.max_document_bytes {
            return Err(XmlError::Limit {
                location: Location::document(system_id),
                message: format!(
                    "document is {} bytes, larger than the limit of {} bytes",
                    bytes.len(),
                    self.limits.max_document_bytes
                ),
            });
        }
        let decoded = decode_text(bytes, extract_xml_encoding(bytes));
        Ok(normalize_newlines(&decoded))
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(super::Node::Element(element));
    } else {
        *root = Some(element);
    }
}

/// XML end-of-line handling: `\r\n` and lone `\r` become `\n`.
fn normalize_newlines(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(memchr::memchr_iter(b'\n', text.as_bytes()).map(|i| i + 1));
        Self { starts }
    }

    fn locate(&self, offset: usize) -> (usize, usize) {
        let line = self.starts.partition_point(|&s| s <= offset);
        let start = self.starts[line.saturating_sub(1)];
        (line.max(1), offset.saturating_sub(start).saturating_add(1))
    }
}

pub(crate) struct StartTag {
    pub name: QName,
    pub prefix: Option<String>,
    pub attributes: Vec<Attribute>,
    pub declarations: Vec<(Option<String>, String)>,
    pub location: Location,
    pub empty: bool,
}

pub(crate) enum Token {
    Start(StartTag),
    End,
    Text(String),
}

/// Turns quick-xml events into namespace-resolved tokens, enforcing the
/// reader's security rules and limits.
struct Tokenizer<'s> {
    reader: Reader<&'s [u8]>,
    lines: LineIndex,
    system_id: Arc<str>,
    resolver: &'s dyn EntityResolver,
    limits: ParserLimits,
    scope: NamespaceScope,
    depth: usize,
    elements: usize,
    root_closed: bool,
    pending_pop: bool,
    doctype: Option<String>,
}

impl<'s> Tokenizer<'s> {
    fn new(text: &'s str, system_id: &str, resolver: &'s dyn EntityResolver, limits: ParserLimits) -> Self {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);
        Self {
            reader,
            lines: LineIndex::new(text),
            system_id: Arc::from(system_id),
            resolver,
            limits,
            scope: NamespaceScope::new(),
            depth: 0,
            elements: 0,
            root_closed: false,
            pending_pop: false,
            doctype: None,
        }
    }

    fn location(&self, offset: u64) -> Location {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let (line, column) = self.lines.locate(offset);
        Location {
            system_id: Arc::clone(&self.system_id),
            line,
            column,
        }
    }

    fn syntax(&self, offset: u64, message: impl Into<String>) -> XmlError {
        XmlError::Syntax {
            location: self.location(offset),
            message: message.into(),
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, XmlError> {
        if self.pending_pop {
            self.pending_pop = false;
            self.scope.pop();
        }

        loop {
            let offset = self.reader.buffer_position();
            let event = match self.reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    let position = self.reader.error_position();
                    return Err(self.syntax(position, e.to_string()));
                }
            };

            match event {
                Event::Start(e) => return self.start(&e, offset, false).map(Some),
                Event::Empty(e) => return self.start(&e, offset, true).map(Some),
                Event::End(_) => {
                    self.depth = self.depth.saturating_sub(1);
                    self.scope.pop();
                    if self.depth == 0 {
                        self.root_closed = true;
                    }
                    return Ok(Some(Token::End));
                }
                Event::Text(e) => {
                    let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                    if let Some(token) = self.text(text, offset)? {
                        return Ok(Some(token));
                    }
                }
                Event::CData(e) => {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    if let Some(token) = self.text(text, offset)? {
                        return Ok(Some(token));
                    }
                }
                Event::GeneralRef(e) => {
                    let entity = String::from_utf8_lossy(e.as_ref()).into_owned();
                    let Some(c) = resolve_entity(&entity) else {
                        return Err(self.syntax(
                            offset,
                            format!("reference to undeclared entity '&{entity};'"),
                        ));
                    };
                    if let Some(token) = self.text(c.to_string(), offset)? {
                        return Ok(Some(token));
                    }
                }
                Event::DocType(e) => {
                    let content = String::from_utf8_lossy(e.as_ref()).into_owned();
                    self.doctype_declaration(content, offset)?;
                }
                Event::Eof => {
                    if self.depth > 0 {
                        return Err(self.syntax(offset, "unexpected end of document"));
                    }
                    return Ok(None);
                }
                // Declarations, comments and processing instructions carry no content.
                _ => {}
            }
        }
    }

    fn text(&self, text: String, offset: u64) -> Result<Option<Token>, XmlError> {
        if self.depth == 0 {
            if text.trim().is_empty() {
                return Ok(None);
            }
            return Err(self.syntax(offset, "text is not allowed outside the root element"));
        }
        Ok(Some(Token::Text(text)))
    }

    fn doctype_declaration(&mut self, content: String, offset: u64) -> Result<(), XmlError> {
        let (external, subset) = match content.find('[') {
            Some(i) => (&content[..i], Some(&content[i..])),
            None => (content.as_str(), None),
        };

        if let Some(subset) = subset
            && subset.contains("<!ENTITY")
        {
            return Err(XmlError::Forbidden {
                location: self.location(offset),
                message: "entity declarations are forbidden".to_string(),
            });
        }

        let mut words = external.split_whitespace();
        let name = words.next().unwrap_or_default();
        let keyword = words.next();
        if matches!(keyword, Some("SYSTEM") | Some("PUBLIC")) {
            let system_id = external
                .rsplit(['"', '\''])
                .nth(1)
                .filter(|s| !s.trim().is_empty());
            self.resolver.external_subset(name, system_id)?;
        }
        self.doctype = Some(content.trim().to_string());
        Ok(())
    }

    fn start(&mut self, e: &BytesStart<'_>, offset: u64, empty: bool) -> Result<Token, XmlError> {
        if self.root_closed {
            return Err(self.syntax(offset, "content is not allowed after the root element"));
        }
        self.elements += 1;
        if self.elements > self.limits.max_elements {
            return Err(XmlError::Limit {
                location: self.location(offset),
                message: format!("document has more than {} elements", self.limits.max_elements),
            });
        }
        if self.depth + 1 > self.limits.max_depth {
            return Err(XmlError::Limit {
                location: self.location(offset),
                message: format!("elements nested deeper than {}", self.limits.max_depth),
            });
        }

        let raw_name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut declarations = Vec::new();
        let mut raw_attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| self.syntax(offset, err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let raw = String::from_utf8_lossy(&attr.value);
            let value = unescape_attribute(&raw)
                .map_err(|message| self.syntax(offset, message))?
                .into_owned();
            if key == "xmlns" {
                declarations.push((None, value));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                if value.is_empty() {
                    return Err(self.syntax(offset, format!("prefix '{prefix}' cannot be undeclared")));
                }
                declarations.push((Some(prefix.to_string()), value));
            } else {
                raw_attributes.push((key, value));
            }
        }
        if raw_attributes.len() > self.limits.max_attributes {
            return Err(XmlError::Limit {
                location: self.location(offset),
                message: format!(
                    "element '{raw_name}' has more than {} attributes",
                    self.limits.max_attributes
                ),
            });
        }
        if declarations.iter().any(|(_, uri)| uri == XMLNS_NS) {
            return Err(self.syntax(offset, format!("namespace '{XMLNS_NS}' cannot be declared")));
        }

        self.scope.push(&declarations);
        let (prefix, local) = split_name(&raw_name);
        let namespace = self.scope.resolve(prefix);
        if prefix.is_some() && namespace.is_none() {
            self.scope.pop();
            return Err(self.syntax(offset, format!("undeclared namespace prefix in '{raw_name}'")));
        }
        let name = QName::new(namespace, local);

        let mut attributes: Vec<Attribute> = Vec::with_capacity(raw_attributes.len());
        for (key, value) in raw_attributes {
            let (attr_prefix, attr_local) = split_name(&key);
            let attr_ns = match attr_prefix {
                Some(p) => match self.scope.resolve(Some(p)) {
                    Some(ns) => Some(ns),
                    None => {
                        self.scope.pop();
                        return Err(self.syntax(offset, format!("undeclared namespace prefix in '{key}'")));
                    }
                },
                None => None,
            };
            let attr_name = QName::new(attr_ns, attr_local);
            if attributes.iter().any(|a| a.name == attr_name) {
                self.scope.pop();
                return Err(self.syntax(offset, format!("duplicate attribute '{key}'")));
            }
            attributes.push(Attribute {
                name: attr_name,
                prefix: attr_prefix.map(str::to_string),
                value,
            });
        }

        let tag = StartTag {
            name,
            prefix: prefix.map(str::to_string),
            attributes,
            declarations,
            location: self.location(offset),
            empty,
        };

        if empty {
            self.pending_pop = true;
            if self.depth == 0 {
                self.root_closed = true;
            }
        } else {
            self.depth += 1;
        }
        Ok(Token::Start(tag))
    }
}

fn split_name(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::NeverResolver;

    fn parse(xml: &str) -> Result<Document, XmlError> {
        XmlReader::new(&NeverResolver).parse(xml.as_bytes(), "test.xml", None)
    }

    #[test]
    fn test_namespaces_and_locations() {
        let doc = parse("<a xmlns='urn:a' xmlns:b='urn:b'>\n  <b:c b:x='1' y='2'/>\n</a>").unwrap();
        let c = doc.root.child_elements().next().unwrap();
        assert_eq!(c.name, QName::new(Some("urn:b"), "c"));
        assert_eq!(c.attribute_ns("urn:b", "x"), Some("1"));
        assert_eq!(c.attribute("y"), Some("2"));
        assert_eq!((c.location.line, c.location.column), (2, 3));
    }

    #[test]
    fn test_entities_and_cdata() {
        let doc = parse("<a>x &amp; &#x41;<![CDATA[<raw>]]></a>").unwrap();
        assert_eq!(doc.root.text(), "x & A<raw>");
    }

    #[test]
    fn test_rejections() {
        assert!(parse("<a>&nbsp;</a>").is_err());
        assert!(parse("<a><b></a>").is_err());
        assert!(parse("<a/><b/>").is_err());
        assert!(parse("text<a/>").is_err());
        assert!(parse("<p:a/>").is_err());
        assert!(parse("<a x='1' x='2'/>").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_entity_declarations_forbidden() {
        let err = parse("<!DOCTYPE a [<!ENTITY x SYSTEM 'file:///etc/passwd'>]><a>&x;</a>").unwrap_err();
        assert!(matches!(err, XmlError::Forbidden { .. }));
    }

    #[test]
    fn test_external_subset_goes_to_resolver() {
        let err = parse("<!DOCTYPE a SYSTEM 'a.dtd'><a/>").unwrap_err();
        assert!(matches!(err, XmlError::Resolution(_)));
    }

    #[test]
    fn test_depth_limit() {
        let limits = ParserLimits {
            max_depth: 2,
            ..ParserLimits::default()
        };
        let reader = XmlReader::new(&NeverResolver).with_limits(limits);
        assert!(reader.parse(b"<a><b/></a>", "t", None).is_ok());
        let err = reader.parse(b"<a><b><c/></b></a>", "t", None).unwrap_err();
        assert!(matches!(err, XmlError::Limit { .. }));
    }

    #[test]
    fn test_survey() {
        let survey = XmlReader::new(&NeverResolver)
            .survey_namespaces(
                b"<a xmlns='urn:a'><b xmlns:x='urn:x' xmlns:xi='http://www.w3.org/2001/XInclude'><xi:include href='c'/></b></a>",
                "t",
            )
            .unwrap();
        assert_eq!(survey.namespaces.len(), 3);
        assert!(survey.has_includes);
    }

    #[test]
    fn test_line_index() {
        let index = LineIndex::new("ab\ncd\n");
        assert_eq!(index.locate(0), (1, 1));
        assert_eq!(index.locate(4), (2, 2));
        assert_eq!(index.locate(6), (3, 1));
    }
}
