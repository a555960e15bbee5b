//! Compiled schema components.
//!
//! Components live in arenas owned by [`Schema`](super::Schema) and refer
//! to each other by index, which lets recursive content models share
//! declarations without reference counting.

use super::types::{Builtin, Facets};
use crate::xml::QName;

pub(crate) type TypeId = usize;
pub(crate) type ElementId = usize;

#[derive(Debug, Clone)]
pub(crate) struct ElementDecl {
    pub name: QName,
    pub type_id: TypeId,
}

#[derive(Debug, Clone)]
pub(crate) enum TypeDef {
    Simple(SimpleType),
    Complex(ComplexType),
}

#[derive(Debug, Clone)]
pub(crate) struct SimpleType {
    pub variety: SimpleVariety,
}

#[derive(Debug, Clone)]
pub(crate) enum SimpleVariety {
    Builtin(Builtin),
    Restriction { base: TypeId, facets: Facets },
    List { item: TypeId },
    Union { members: Vec<TypeId> },
}

#[derive(Debug, Clone)]
pub(crate) struct ComplexType {
    pub mixed: bool,
    pub content: Content,
    pub attributes: Vec<AttributeUse>,
    pub any_attribute: Option<Wildcard>,
}

impl ComplexType {
    pub fn any_type() -> Self {
        let wildcard = Wildcard {
            namespaces: NamespaceConstraint::Any,
            process: ProcessContents::Lax,
        };
        Self {
            mixed: true,
            content: Content::Particle(Particle {
                min: 0,
                max: None,
                term: Term::Any(wildcard.clone()),
            }),
            attributes: Vec::new(),
            any_attribute: Some(wildcard),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Content {
    Empty,
    Simple(TypeId),
    Particle(Particle),
}

#[derive(Debug, Clone)]
pub(crate) struct Particle {
    pub min: u32,
    /// `None` means unbounded.
    pub max: Option<u32>,
    pub term: Term,
}

#[derive(Debug, Clone)]
pub(crate) enum Term {
    Element(ElementId),
    Sequence(Vec<Particle>),
    Choice(Vec<Particle>),
    All(Vec<Particle>),
    Any(Wildcard),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessContents {
    Strict,
    Lax,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NamespaceConstraint {
    Any,
    /// Any namespace other than this one; unqualified names are excluded too.
    Not(Option<String>),
    Set(Vec<Option<String>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Wildcard {
    pub namespaces: NamespaceConstraint,
    pub process: ProcessContents,
}

impl Wildcard {
    pub fn allows(&self, namespace: Option<&str>) -> bool {
        match &self.namespaces {
            NamespaceConstraint::Any => true,
            NamespaceConstraint::Not(excluded) => {
                namespace.is_some() && namespace != excluded.as_deref()
            }
            NamespaceConstraint::Set(allowed) => allowed.iter().any(|ns| ns.as_deref() == namespace),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct AttributeUse {
    pub name: QName,
    pub type_id: TypeId,
    pub required: bool,
    pub fixed: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct AttributeDecl {
    pub type_id: TypeId,
    pub fixed: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_namespaces() {
        let other = Wildcard {
            namespaces: NamespaceConstraint::Not(Some("urn:a".into())),
            process: ProcessContents::Lax,
        };
        assert!(other.allows(Some("urn:b")));
        assert!(!other.allows(Some("urn:a")));
        assert!(!other.allows(None));

        let local = Wildcard {
            namespaces: NamespaceConstraint::Set(vec![None, Some("urn:a".into())]),
            process: ProcessContents::Strict,
        };
        assert!(local.allows(None));
        assert!(local.allows(Some("urn:a")));
        assert!(!local.allows(Some("urn:b")));
    }
}
