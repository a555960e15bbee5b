use std::fmt;
use std::sync::Arc;

use super::{Location, XML_NS};

/// A namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub namespace: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(namespace: Option<&str>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            local: local.into(),
        }
    }

    pub fn local(local: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local: local.into(),
        }
    }

    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.local == local
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{ns}}}{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub prefix: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: QName,
    pub prefix: Option<String>,
    pub attributes: Vec<Attribute>,
    /// Namespace declarations made on this element, as `(prefix, uri)`.
    pub namespace_declarations: Vec<(Option<String>, String)>,
    pub children: Vec<Node>,
    pub location: Location,
}

impl Element {
    pub fn new(name: QName, location: Location) -> Self {
        Self {
            name,
            prefix: None,
            attributes: Vec::new(),
            namespace_declarations: Vec::new(),
            children: Vec::new(),
            location,
        }
    }

    /// The name as written in the source, e.g. `xs:element`.
    pub fn display_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.name.local),
            None => self.name.local.clone(),
        }
    }

    /// Value of an attribute in no namespace.
    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.namespace.is_none() && a.name.local == local)
            .map(|a| a.value.as_str())
    }

    pub fn attribute_ns(&self, namespace: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.is(namespace, local))
            .map(|a| a.value.as_str())
    }

    pub fn set_attribute(&mut self, name: QName, prefix: Option<&str>, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self.attributes.iter_mut().find(|a| a.name == name) {
            existing.value = value;
        } else {
            self.attributes.push(Attribute {
                name,
                prefix: prefix.map(str::to_string),
                value,
            });
        }
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Concatenated text of this element and all descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Text directly inside this element, ignoring child elements.
    pub fn direct_text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    pub fn has_significant_text(&self) -> bool {
        self.children.iter().any(|n| match n {
            Node::Text(t) => !t.trim().is_empty(),
            Node::Element(_) => false,
        })
    }

    /// This element and all descendant elements in document order.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    pub(crate) fn push_text(&mut self, text: &str) {
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }
}

/// Pre-order iterator over an element subtree.
pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<&'a Element> {
        let next = self.stack.pop()?;
        let before = self.stack.len();
        self.stack.extend(next.child_elements());
        self.stack[before..].reverse();
        Some(next)
    }
}

/// A parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
    pub system_id: Arc<str>,
    /// Raw content of the document type declaration, if one was present.
    pub doctype: Option<String>,
}

/// Prefix bindings in effect at some point of a document.
#[derive(Debug, Clone, Default)]
pub struct NamespaceScope {
    frames: Vec<Vec<(Option<String>, String)>>,
}

impl NamespaceScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, declarations: &[(Option<String>, String)]) {
        self.frames.push(declarations.to_vec());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Resolve a prefix (`None` for the default namespace).
    ///
    /// An empty URI undeclares the binding.
    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NS);
        }
        for frame in self.frames.iter().rev() {
            for (p, uri) in frame.iter().rev() {
                if p.as_deref() == prefix {
                    return (!uri.is_empty()).then_some(uri.as_str());
                }
            }
        }
        None
    }

    /// Resolve a `prefix:local` value such as a schema type reference.
    ///
    /// Unprefixed names take the default namespace.
    pub fn resolve_qname(&self, raw: &str) -> Option<QName> {
        let raw = raw.trim();
        match raw.split_once(':') {
            Some((prefix, local)) => {
                let ns = self.resolve(Some(prefix))?;
                Some(QName::new(Some(ns), local))
            }
            None => Some(QName::new(self.resolve(None), raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Location {
        Location::new("t", 1, 1)
    }

    #[test]
    fn test_descendants_preorder() {
        let mut root = Element::new(QName::local("a"), loc());
        let mut b = Element::new(QName::local("b"), loc());
        b.children.push(Node::Element(Element::new(QName::local("c"), loc())));
        root.children.push(Node::Element(b));
        root.children.push(Node::Element(Element::new(QName::local("d"), loc())));
        let names: Vec<_> = root.descendants().map(|e| e.name.local.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_scope_resolution() {
        let mut scope = NamespaceScope::new();
        scope.push(&[(None, "urn:a".into()), (Some("x".into()), "urn:x".into())]);
        scope.push(&[(None, String::new())]);
        assert_eq!(scope.resolve(None), None);
        assert_eq!(scope.resolve(Some("x")), Some("urn:x"));
        assert_eq!(scope.resolve(Some("xml")), Some(XML_NS));
        scope.pop();
        assert_eq!(scope.resolve_qname("item"), Some(QName::new(Some("urn:a"), "item")));
        assert_eq!(scope.resolve_qname("y:item"), None);
    }
}
