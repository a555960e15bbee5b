//! XInclude expansion over a parsed tree.
//!
//! Supports `href` with `parse="xml"` or `parse="text"` and `xi:fallback`.
//! `xpointer` is not supported. Included roots receive an `xml:base`
//! attribute naming the inclusion they came from.

use std::path::Path;

use log::debug;

use super::reader::XmlReader;
use super::tree::{Document, Element, Node, QName};
use super::{XINCLUDE_NS, XML_NS};
use crate::error::{ResolutionError, XmlError};
use crate::resolver::{ResourceKind, ResourceReference};
use crate::util::decode_text;

pub(crate) fn expand(
    reader: &XmlReader<'_>,
    document: &mut Document,
    base: Option<&Path>,
    depth: usize,
    active: &mut Vec<String>,
) -> Result<(), XmlError> {
    if is_include(&document.root) {
        return Err(XmlError::Include {
            location: document.root.location.clone(),
            message: "the root element cannot be an inclusion".to_string(),
        });
    }
    expand_children(reader, &mut document.root, base, depth, active)
}

fn is_include(element: &Element) -> bool {
    element.name.is(XINCLUDE_NS, "include")
}

fn expand_children(
    reader: &XmlReader<'_>,
    element: &mut Element,
    base: Option<&Path>,
    depth: usize,
    active: &mut Vec<String>,
) -> Result<(), XmlError> {
    let children = std::mem::take(&mut element.children);
    let mut expanded = Vec::with_capacity(children.len());
    for child in children {
        match child {
            Node::Element(e) if is_include(&e) => {
                expanded.extend(include(reader, &e, base, depth, active)?);
            }
            Node::Element(mut e) => {
                expand_children(reader, &mut e, base, depth, active)?;
                expanded.push(Node::Element(e));
            }
            text => expanded.push(text),
        }
    }
    element.children = expanded;
    Ok(())
}

fn include(
    reader: &XmlReader<'_>,
    element: &Element,
    base: Option<&Path>,
    depth: usize,
    active: &mut Vec<String>,
) -> Result<Vec<Node>, XmlError> {
    let fail = |message: String| XmlError::Include {
        location: element.location.clone(),
        message,
    };

    if element.attribute("xpointer").is_some() {
        return Err(fail("xpointer is not supported".to_string()));
    }
    let href = element
        .attribute("href")
        .filter(|h| !h.is_empty())
        .ok_or_else(|| fail("inclusion has no href".to_string()))?;
    let parse = element.attribute("parse").unwrap_or("xml");
    if parse != "xml" && parse != "text" {
        return Err(fail(format!("unknown parse mode '{parse}'")));
    }

    let reference = ResourceReference::new(ResourceKind::Include, href).with_base(base);
    let resolved = match reader.resolver().resolve(&reference) {
        Ok(resolved) => resolved,
        Err(ResolutionError::NotFound { system_id }) => {
            if let Some(fallback) = element
                .child_elements()
                .find(|c| c.name.is(XINCLUDE_NS, "fallback"))
            {
                debug!("using fallback for missing inclusion {system_id}");
                let mut fallback = fallback.clone();
                expand_children(reader, &mut fallback, base, depth, active)?;
                return Ok(fallback.children);
            }
            return Err(XmlError::Resolution(ResolutionError::NotFound { system_id }));
        }
        Err(e) => return Err(XmlError::Resolution(e)),
    };

    if parse == "text" {
        let text = decode_text(&resolved.data, element.attribute("encoding"));
        let text = text.replace("\r\n", "\n");
        return Ok(vec![Node::Text(text)]);
    }

    if active.contains(&resolved.system_id) {
        return Err(fail(format!("inclusion loop through {}", resolved.system_id)));
    }
    if depth + 1 > reader.limits().max_include_depth {
        return Err(XmlError::Limit {
            location: element.location.clone(),
            message: format!(
                "inclusions nested deeper than {}",
                reader.limits().max_include_depth
            ),
        });
    }

    debug!("including {} from {}", resolved.system_id, element.location);
    active.push(resolved.system_id.clone());
    let included = reader.parse_nested(
        &resolved.data,
        &resolved.system_id,
        resolved.base.as_deref(),
        depth + 1,
        active,
    );
    active.pop();

    let mut root = included?.root;
    if root.attribute_ns(XML_NS, "base").is_none() {
        root.set_attribute(QName::new(Some(XML_NS), "base"), Some("xml"), href);
    }
    Ok(vec![Node::Element(root)])
}
