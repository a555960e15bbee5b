//! Instance validation against a compiled [`Schema`].
//!
//! Every independent violation yields its own finding: an element with a bad
//! attribute still has its content checked, and siblings of an invalid
//! element are still visited. The subtree of an element that could not be
//! matched to any declaration is skipped.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::Schema;
use super::model::{
    ComplexType, Content, ElementId, Particle, ProcessContents, SimpleVariety, Term, TypeDef, TypeId,
    Wildcard,
};
use super::types::{Identity, WhiteSpace};
use crate::validation::{Finding, FindingKind};
use crate::xml::{Document, Element, Location, QName, XSI_NS};

pub(super) fn validate(schema: &Schema, document: &Document) -> Vec<Finding> {
    let mut validator = Validator {
        schema,
        findings: Vec::new(),
        ids: HashMap::new(),
        references: Vec::new(),
    };
    let root = &document.root;
    match schema.global_elements.get(&root.name) {
        Some(&id) => validator.element(root, schema.elements[id].type_id),
        None => validator.schema_error(
            &root.location,
            format!(
                "element '{}' is not declared as a document element in {}",
                root.display_name(),
                schema.name
            ),
        ),
    }
    validator.check_references();
    validator.findings
}

#[derive(Debug, Clone, Copy)]
enum Assignment {
    Element(ElementId),
    Wildcard(ProcessContents),
}

struct Validator<'s> {
    schema: &'s Schema,
    findings: Vec<Finding>,
    ids: HashMap<String, Location>,
    references: Vec<(String, Location)>,
}

impl<'s> Validator<'s> {
    fn schema_error(&mut self, location: &Location, message: String) {
        self.findings
            .push(Finding::error(FindingKind::Schema, location.clone(), message));
    }

    fn element(&mut self, element: &Element, type_id: TypeId) {
        let schema = self.schema;
        match &schema.types[type_id] {
            TypeDef::Simple(_) => {
                if let Some(attr) = element
                    .attributes
                    .iter()
                    .find(|a| a.name.namespace.as_deref() != Some(XSI_NS))
                {
                    self.schema_error(
                        &element.location,
                        format!(
                            "attribute '{}' is not allowed on element '{}'",
                            attr.name.local,
                            element.display_name()
                        ),
                    );
                }
                self.simple_content(element, type_id);
            }
            TypeDef::Complex(complex) => {
                self.attributes(element, complex);
                match &complex.content {
                    Content::Empty => {
                        if element.child_elements().next().is_some() || element.has_significant_text() {
                            self.schema_error(
                                &element.location,
                                format!("element '{}' must be empty", element.display_name()),
                            );
                        }
                    }
                    Content::Simple(value_type) => self.simple_content(element, *value_type),
                    Content::Particle(particle) => self.element_content(element, complex, particle),
                }
            }
        }
    }

    fn simple_content(&mut self, element: &Element, type_id: TypeId) {
        if element.child_elements().next().is_some() {
            self.schema_error(
                &element.location,
                format!(
                    "element '{}' cannot contain child elements",
                    element.display_name()
                ),
            );
            return;
        }
        let what = format!("element '{}'", element.display_name());
        self.value(type_id, &element.text(), &element.location, &what);
    }

    fn attributes(&mut self, element: &Element, complex: &ComplexType) {
        let mut seen = Vec::new();
        for attr in &element.attributes {
            if attr.name.namespace.as_deref() == Some(XSI_NS) {
                continue;
            }
            let what = format!("attribute '{}'", display_attribute(&attr.name, attr.prefix.as_deref()));
            if let Some(used) = complex.attributes.iter().find(|u| u.name == attr.name) {
                seen.push(&used.name);
                self.value(used.type_id, &attr.value, &element.location, &what);
                self.fixed(used.fixed.as_deref(), used.type_id, &attr.value, &element.location, &what);
                continue;
            }
            match &complex.any_attribute {
                Some(wildcard) if wildcard.allows(attr.name.namespace.as_deref()) => {
                    self.wildcard_attribute(wildcard, element, &attr.name, &attr.value, &what);
                }
                _ => self.schema_error(
                    &element.location,
                    format!("{what} is not allowed on element '{}'", element.display_name()),
                ),
            }
        }
        for used in complex.attributes.iter().filter(|u| u.required) {
            if !seen.contains(&&used.name) {
                self.schema_error(
                    &element.location,
                    format!(
                        "missing required attribute '{}' on element '{}'",
                        used.name.local,
                        element.display_name()
                    ),
                );
            }
        }
    }

    fn wildcard_attribute(&mut self, wildcard: &Wildcard, element: &Element, name: &QName, value: &str, what: &str) {
        if wildcard.process == ProcessContents::Skip {
            return;
        }
        match self.schema.global_attributes.get(name) {
            Some(decl) => {
                let (type_id, fixed) = (decl.type_id, decl.fixed.clone());
                self.value(type_id, value, &element.location, what);
                self.fixed(fixed.as_deref(), type_id, value, &element.location, what);
            }
            None if wildcard.process == ProcessContents::Strict => self.schema_error(
                &element.location,
                format!("no declaration found for {what}"),
            ),
            None => {}
        }
    }

    fn fixed(&mut self, fixed: Option<&str>, type_id: TypeId, value: &str, location: &Location, what: &str) {
        let Some(fixed) = fixed else {
            return;
        };
        let ws = self.whitespace(type_id);
        if ws.apply(value) != ws.apply(fixed) {
            self.schema_error(location, format!("{what} must have the fixed value '{fixed}'"));
        }
    }

    /// Check a value and record identity constraints; one finding at most.
    fn value(&mut self, type_id: TypeId, value: &str, location: &Location, what: &str) {
        match self.schema.check_value(type_id, value) {
            Ok(normalized) => match self.schema.identity(type_id) {
                Some(Identity::Id) => {
                    if let Some(first) = self.ids.get(&normalized) {
                        let message = format!(
                            "duplicate identifier '{normalized}'; first defined at {first}"
                        );
                        self.findings
                            .push(Finding::error(FindingKind::Identity, location.clone(), message));
                    } else {
                        self.ids.insert(normalized, location.clone());
                    }
                }
                Some(Identity::IdRef) => self.references.push((normalized, location.clone())),
                Some(Identity::IdRefs) => {
                    for token in normalized.split(' ').filter(|t| !t.is_empty()) {
                        self.references.push((token.to_string(), location.clone()));
                    }
                }
                None => {}
            },
            Err(reason) => self.schema_error(location, format!("invalid value for {what}: {reason}")),
        }
    }

    fn whitespace(&self, type_id: TypeId) -> WhiteSpace {
        self.schema.whitespace(type_id)
    }

    fn element_content(&mut self, element: &Element, complex: &ComplexType, particle: &Particle) {
        if !complex.mixed && element.has_significant_text() {
            self.schema_error(
                &element.location,
                format!(
                    "text is not allowed in element '{}', which has element-only content",
                    element.display_name()
                ),
            );
        }

        let children: Vec<&Element> = element.child_elements().collect();
        let mut matcher = Matcher {
            schema: self.schema,
            children: &children,
            assignments: HashMap::new(),
            expected: BTreeMap::new(),
            reached: 0,
        };
        let ends = matcher.particle(particle, &BTreeSet::from([0]));
        if !ends.contains(&children.len()) {
            let message = matcher.describe_failure(element);
            let location = children
                .get(matcher.reached)
                .map(|c| c.location.clone())
                .unwrap_or_else(|| element.location.clone());
            self.schema_error(&location, message);
        }

        let assignments = matcher.assignments;
        for (index, child) in children.iter().enumerate() {
            match assignments.get(&index) {
                Some(Assignment::Element(id)) => {
                    let type_id = self.schema.elements[*id].type_id;
                    self.element(child, type_id);
                }
                Some(Assignment::Wildcard(ProcessContents::Skip)) => {}
                Some(Assignment::Wildcard(process)) => match self.schema.global_elements.get(&child.name).copied() {
                    Some(id) => {
                        let type_id = self.schema.elements[id].type_id;
                        self.element(child, type_id);
                    }
                    None if *process == ProcessContents::Strict => self.schema_error(
                        &child.location,
                        format!("no declaration found for element '{}'", child.display_name()),
                    ),
                    None => self.lax_children(child),
                },
                None => {}
            }
        }
    }

    /// Inside undeclared lax content, validate any descendants that are declared.
    fn lax_children(&mut self, element: &Element) {
        for child in element.child_elements() {
            match self.schema.global_elements.get(&child.name).copied() {
                Some(id) => {
                    let type_id = self.schema.elements[id].type_id;
                    self.element(child, type_id);
                }
                None => self.lax_children(child),
            }
        }
    }

    fn check_references(&mut self) {
        let references = std::mem::take(&mut self.references);
        for (target, location) in references {
            if !self.ids.contains_key(&target) {
                self.findings.push(Finding::error(
                    FindingKind::Identity,
                    location,
                    format!("reference to undefined identifier '{target}'"),
                ));
            }
        }
    }
}

fn display_attribute(name: &QName, prefix: Option<&str>) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}:{}", name.local),
        None => name.local.clone(),
    }
}

/// Matches the children of one element against a content model.
///
/// The matcher works on sets of positions: each particle maps the set of
/// positions it may start at to the set of positions it may end at.
struct Matcher<'a> {
    schema: &'a Schema,
    children: &'a [&'a Element],
    assignments: HashMap<usize, Assignment>,
    /// Names that would have been accepted at each position.
    expected: BTreeMap<usize, BTreeSet<String>>,
    /// Furthest position any path reached.
    reached: usize,
}

impl Matcher<'_> {
    fn particle(&mut self, particle: &Particle, starts: &BTreeSet<usize>) -> BTreeSet<usize> {
        let mut ends = BTreeSet::new();
        if particle.min == 0 {
            ends.extend(starts.iter().copied());
        }
        let mut current = starts.clone();
        let mut seen = starts.clone();
        let mut count = 0u32;
        while particle.max.is_none_or(|max| count < max) {
            let next = self.term(&particle.term, &current);
            count += 1;
            if next.is_empty() {
                break;
            }
            if count >= particle.min {
                ends.extend(next.iter().copied());
                if next.is_subset(&seen) {
                    break;
                }
            }
            seen.extend(next.iter().copied());
            current = next;
        }
        ends
    }

    fn term(&mut self, term: &Term, starts: &BTreeSet<usize>) -> BTreeSet<usize> {
        if let Some(&last) = starts.last() {
            self.reached = self.reached.max(last);
        }
        match term {
            Term::Element(id) => self.leaf(starts, |m, child| {
                let decl = &m.schema.elements[*id];
                (child.name == decl.name).then_some(Assignment::Element(*id))
            }, |m| m.schema.elements[*id].name.local.clone()),
            Term::Any(wildcard) => self.leaf(starts, |_, child| {
                wildcard
                    .allows(child.name.namespace.as_deref())
                    .then_some(Assignment::Wildcard(wildcard.process))
            }, |_| "any element".to_string()),
            Term::Sequence(particles) => {
                let mut positions = starts.clone();
                for particle in particles {
                    positions = self.particle(particle, &positions);
                    if positions.is_empty() {
                        break;
                    }
                }
                positions
            }
            Term::Choice(particles) => {
                let mut ends = BTreeSet::new();
                for particle in particles {
                    ends.extend(self.particle(particle, starts));
                }
                ends
            }
            Term::All(particles) => {
                let mut ends = BTreeSet::new();
                for &start in starts {
                    if let Some(end) = self.all(particles, start) {
                        ends.insert(end);
                    }
                }
                ends
            }
        }
    }

    fn leaf(
        &mut self,
        starts: &BTreeSet<usize>,
        accepts: impl Fn(&Self, &Element) -> Option<Assignment>,
        name: impl Fn(&Self) -> String,
    ) -> BTreeSet<usize> {
        let mut ends = BTreeSet::new();
        for &position in starts {
            let assignment = self.children.get(position).and_then(|child| accepts(self, child));
            match assignment {
                Some(assignment) => {
                    self.assignments.entry(position).or_insert(assignment);
                    self.reached = self.reached.max(position + 1);
                    ends.insert(position + 1);
                }
                None => {
                    let expected = name(self);
                    self.expected.entry(position).or_default().insert(expected);
                }
            }
        }
        ends
    }

    /// Greedy matching of an `xs:all` group of single elements.
    fn all(&mut self, particles: &[Particle], start: usize) -> Option<usize> {
        let mut used = vec![false; particles.len()];
        let mut position = start;
        while let Some(child) = self.children.get(position) {
            let found = particles.iter().enumerate().find_map(|(i, p)| match p.term {
                Term::Element(id) if !used[i] && self.schema.elements[id].name == child.name => Some((i, id)),
                _ => None,
            });
            let Some((index, id)) = found else {
                break;
            };
            used[index] = true;
            self.assignments.entry(position).or_insert(Assignment::Element(id));
            position += 1;
            self.reached = self.reached.max(position);
        }
        let complete = particles.iter().zip(&used).all(|(p, &u)| u || p.min == 0);
        if !complete {
            for (particle, _) in particles.iter().zip(&used).filter(|(_, u)| !**u) {
                if let Term::Element(id) = particle.term {
                    let name = self.schema.elements[id].name.local.clone();
                    self.expected.entry(position).or_default().insert(name);
                }
            }
        }
        complete.then_some(position)
    }

    fn describe_failure(&self, element: &Element) -> String {
        let expected = self
            .expected
            .get(&self.reached)
            .map(|names| names.iter().cloned().collect::<Vec<_>>().join(", "));
        match (self.children.get(self.reached), expected) {
            (Some(child), Some(expected)) => format!(
                "element '{}' is not allowed here in '{}'; expected one of: {expected}",
                child.display_name(),
                element.display_name()
            ),
            (Some(child), None) => format!(
                "element '{}' is not allowed here in '{}'",
                child.display_name(),
                element.display_name()
            ),
            (None, Some(expected)) => format!(
                "content of element '{}' is incomplete; expected one of: {expected}",
                element.display_name()
            ),
            (None, None) => format!("content of element '{}' is incomplete", element.display_name()),
        }
    }
}

impl Schema {
    /// Check a lexical value, returning it whitespace-normalized.
    pub(crate) fn check_value(&self, type_id: TypeId, value: &str) -> Result<String, String> {
        let normalized = self.whitespace(type_id).apply(value);
        match &self.types[type_id] {
            TypeDef::Complex(_) => Ok(normalized),
            TypeDef::Simple(simple) => match &simple.variety {
                SimpleVariety::Builtin(builtin) => {
                    builtin.check(&normalized)?;
                    Ok(normalized)
                }
                SimpleVariety::Restriction { base, facets } => {
                    let normalized = self.check_value(*base, &normalized)?;
                    let length = if self.is_list(type_id) {
                        normalized.split(' ').filter(|t| !t.is_empty()).count()
                    } else {
                        normalized.chars().count()
                    };
                    facets.check(&normalized, length)?;
                    Ok(normalized)
                }
                SimpleVariety::List { item } => {
                    for token in normalized.split(' ').filter(|t| !t.is_empty()) {
                        self.check_value(*item, token)?;
                    }
                    Ok(normalized)
                }
                SimpleVariety::Union { members } => {
                    let mut reasons = Vec::new();
                    for member in members {
                        match self.check_value(*member, value) {
                            Ok(normalized) => return Ok(normalized),
                            Err(reason) => reasons.push(reason),
                        }
                    }
                    Err(reasons.join("; "))
                }
            },
        }
    }

    pub(crate) fn whitespace(&self, type_id: TypeId) -> WhiteSpace {
        match &self.types[type_id] {
            TypeDef::Complex(_) => WhiteSpace::Preserve,
            TypeDef::Simple(simple) => match &simple.variety {
                SimpleVariety::Builtin(builtin) => builtin.whitespace(),
                SimpleVariety::Restriction { base, facets } => {
                    facets.white_space.unwrap_or_else(|| self.whitespace(*base))
                }
                SimpleVariety::List { .. } => WhiteSpace::Collapse,
                SimpleVariety::Union { .. } => WhiteSpace::Preserve,
            },
        }
    }

    fn is_list(&self, type_id: TypeId) -> bool {
        match &self.types[type_id] {
            TypeDef::Complex(_) => false,
            TypeDef::Simple(simple) => match &simple.variety {
                SimpleVariety::Builtin(builtin) => builtin.is_list(),
                SimpleVariety::Restriction { base, .. } => self.is_list(*base),
                SimpleVariety::List { .. } => true,
                SimpleVariety::Union { .. } => false,
            },
        }
    }

    pub(crate) fn identity(&self, type_id: TypeId) -> Option<Identity> {
        match &self.types[type_id] {
            TypeDef::Complex(_) => None,
            TypeDef::Simple(simple) => match &simple.variety {
                SimpleVariety::Builtin(builtin) => builtin.identity(),
                SimpleVariety::Restriction { base, .. } => self.identity(*base),
                SimpleVariety::List { item } => match self.identity(*item) {
                    Some(Identity::IdRef) => Some(Identity::IdRefs),
                    _ => None,
                },
                SimpleVariety::Union { .. } => None,
            },
        }
    }
}
