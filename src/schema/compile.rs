//! Loading and compiling schema documents.
//!
//! Compilation happens in two phases. The entry document and every document
//! reachable through `xs:include` and `xs:import` are loaded through the
//! entity resolver and their global components indexed by qualified name.
//! Components are then compiled lazily, on first reference, into the arenas
//! of a [`Schema`]. A reference to an element's type only reserves its slot;
//! the body is compiled when a derivation needs it or when the globals are
//! swept, so element declarations may recurse through type derivations. Problems are collected rather than returned on first
//! sight so that a broken schema reports everything wrong with it at once.

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;

use super::Schema;
use super::model::{
    AttributeDecl, AttributeUse, ComplexType, Content, ElementDecl, ElementId, NamespaceConstraint,
    Particle, ProcessContents, SimpleType, SimpleVariety, Term, TypeDef, TypeId, Wildcard,
};
use super::types::{Builtin, Facets, WhiteSpace, compile_pattern};
use crate::config::ParserLimits;
use crate::error::SchemaCompileError;
use crate::resolver::{EntityResolver, ResourceKind, ResourceReference};
use crate::xml::{Element, NamespaceScope, QName, XSD_NS, XmlReader};

struct SchemaDoc {
    system_id: String,
    target: Option<String>,
    elements_qualified: bool,
    attributes_qualified: bool,
    root: Element,
}

fn is_xsd(element: &Element, local: &str) -> bool {
    element.name.is(XSD_NS, local)
}

fn xsd_children(element: &Element) -> impl Iterator<Item = &Element> {
    element
        .child_elements()
        .filter(|c| c.name.namespace.as_deref() == Some(XSD_NS) && c.name.local != "annotation")
}

/// Load the entry document and the closure of its includes and imports.
fn load(
    entry: &str,
    resolver: &dyn EntityResolver,
    limits: ParserLimits,
) -> Result<Vec<SchemaDoc>, String> {
    let reader = XmlReader::new(resolver).with_limits(limits);
    let mut docs = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back((ResourceReference::new(ResourceKind::Schema, entry), None::<String>));

    while let Some((reference, chameleon)) = queue.pop_front() {
        let resolved = resolver
            .resolve(&reference)
            .map_err(|e| format!("cannot load schema {}: {e}", reference.system_id))?;
        if !seen.insert(resolved.system_id.clone()) {
            continue;
        }
        debug!("loading schema document {}", resolved.system_id);
        let document = reader
            .parse(&resolved.data, &resolved.system_id, resolved.base.as_deref())
            .map_err(|e| format!("cannot parse schema {}: {e}", resolved.system_id))?;
        let root = document.root;
        if !is_xsd(&root, "schema") {
            return Err(format!(
                "{}: document element is {}, not xs:schema",
                root.location,
                root.display_name()
            ));
        }

        let target = root
            .attribute("targetNamespace")
            .map(str::to_string)
            .or(chameleon);
        for child in xsd_children(&root) {
            match child.name.local.as_str() {
                "include" | "redefine" => {
                    let Some(location) = child.attribute("schemaLocation") else {
                        return Err(format!("{}: include without schemaLocation", child.location));
                    };
                    let reference = ResourceReference::new(ResourceKind::Schema, location)
                        .with_base(resolved.base.as_deref());
                    queue.push_back((reference, target.clone()));
                }
                "import" => {
                    let namespace = child.attribute("namespace");
                    let Some(system_id) = child.attribute("schemaLocation").or(namespace) else {
                        return Err(format!(
                            "{}: import without namespace or schemaLocation",
                            child.location
                        ));
                    };
                    let mut reference = ResourceReference::new(ResourceKind::Schema, system_id)
                        .with_base(resolved.base.as_deref());
                    if let Some(ns) = namespace {
                        reference = reference.with_namespace(ns);
                    }
                    queue.push_back((reference, None));
                }
                _ => {}
            }
        }

        docs.push(SchemaDoc {
            system_id: resolved.system_id,
            target,
            elements_qualified: root.attribute("elementFormDefault") == Some("qualified"),
            attributes_qualified: root.attribute("attributeFormDefault") == Some("qualified"),
            root,
        });
    }
    Ok(docs)
}

pub(super) fn compile(
    entry: &str,
    resolver: &dyn EntityResolver,
    limits: ParserLimits,
) -> Result<Schema, SchemaCompileError> {
    let fail = |problems| SchemaCompileError {
        schema: entry.to_string(),
        problems,
    };
    let docs = load(entry, resolver, limits).map_err(|p| fail(vec![p]))?;
    let target = docs.first().and_then(|d| d.target.clone());
    for doc in &docs {
        debug!("schema document {} has target namespace {:?}", doc.system_id, doc.target);
    }

    let mut compiler = Compiler::new(&docs);
    compiler.index();
    compiler.compile_globals();
    let schema = compiler.finish(entry, target).map_err(fail)?;
    debug!(
        "compiled schema {entry}: {} documents, {} types, {} elements",
        docs.len(),
        schema.types.len(),
        schema.elements.len()
    );
    Ok(schema)
}

#[derive(Clone, Copy)]
struct Global<'d> {
    doc: &'d SchemaDoc,
    element: &'d Element,
}

#[derive(Clone)]
struct Ctx<'d> {
    doc: &'d SchemaDoc,
    scope: NamespaceScope,
}

impl<'d> Ctx<'d> {
    fn for_global(global: Global<'d>) -> Self {
        let mut scope = NamespaceScope::new();
        scope.push(&global.doc.root.namespace_declarations);
        scope.push(&global.element.namespace_declarations);
        Self {
            doc: global.doc,
            scope,
        }
    }

    fn target(&self) -> Option<&'d str> {
        self.doc.target.as_deref()
    }

    fn qname(&self, element: &Element, raw: &str) -> Result<QName, String> {
        self.scope
            .resolve_qname(raw)
            .ok_or_else(|| format!("{}: undeclared prefix in '{raw}'", element.location))
    }
}

/// Parsed content of a complex type body, before derivation is applied.
#[derive(Default)]
struct Model {
    particle: Option<Particle>,
    attributes: Vec<AttributeUse>,
    prohibited: Vec<QName>,
    any_attribute: Option<Wildcard>,
}

#[derive(Default)]
struct AttributeGroup {
    attributes: Vec<AttributeUse>,
    any_attribute: Option<Wildcard>,
}

struct Compiler<'d> {
    docs: &'d [SchemaDoc],
    global_element_defs: HashMap<QName, Global<'d>>,
    type_defs: HashMap<QName, Global<'d>>,
    group_defs: HashMap<QName, Global<'d>>,
    attribute_group_defs: HashMap<QName, Global<'d>>,
    attribute_defs: HashMap<QName, Global<'d>>,

    types: Vec<Option<TypeDef>>,
    elements: Vec<Option<ElementDecl>>,
    named_types: HashMap<QName, TypeId>,
    pending_types: HashMap<TypeId, QName>,
    pending_element_types: Vec<(TypeId, Ctx<'d>, &'d Element)>,
    builtin_types: HashMap<Builtin, TypeId>,
    global_elements: HashMap<QName, ElementId>,
    global_attributes: HashMap<QName, AttributeDecl>,
    groups: HashMap<QName, Particle>,
    attribute_groups: HashMap<QName, AttributeGroup>,
    in_progress: Vec<QName>,
    any_type: TypeId,
    problems: Vec<String>,
}

impl<'d> Compiler<'d> {
    fn new(docs: &'d [SchemaDoc]) -> Self {
        Self {
            docs,
            global_element_defs: HashMap::new(),
            type_defs: HashMap::new(),
            group_defs: HashMap::new(),
            attribute_group_defs: HashMap::new(),
            attribute_defs: HashMap::new(),
            types: vec![Some(TypeDef::Complex(ComplexType::any_type()))],
            elements: Vec::new(),
            named_types: HashMap::new(),
            pending_types: HashMap::new(),
            pending_element_types: Vec::new(),
            builtin_types: HashMap::new(),
            global_elements: HashMap::new(),
            global_attributes: HashMap::new(),
            groups: HashMap::new(),
            attribute_groups: HashMap::new(),
            in_progress: Vec::new(),
            any_type: 0,
            problems: Vec::new(),
        }
    }

    fn index(&mut self) {
        for doc in self.docs {
            for element in xsd_children(&doc.root) {
                let table = match element.name.local.as_str() {
                    "element" => &mut self.global_element_defs,
                    "complexType" | "simpleType" => &mut self.type_defs,
                    "group" => &mut self.group_defs,
                    "attributeGroup" => &mut self.attribute_group_defs,
                    "attribute" => &mut self.attribute_defs,
                    _ => continue,
                };
                let Some(name) = element.attribute("name") else {
                    self.problems.push(format!(
                        "{}: global {} has no name",
                        element.location,
                        element.display_name()
                    ));
                    continue;
                };
                let qname = QName::new(doc.target.as_deref(), name);
                if table.insert(qname.clone(), Global { doc, element }).is_some() {
                    self.problems.push(format!(
                        "{}: duplicate global {} {qname}",
                        element.location,
                        element.display_name()
                    ));
                }
            }
        }
    }

    fn compile_globals(&mut self) {
        let mut elements: Vec<QName> = self.global_element_defs.keys().cloned().collect();
        elements.sort();
        for name in elements {
            if let Err(problem) = self.element_ref(&name) {
                self.problems.push(problem);
            }
        }
        let mut types: Vec<QName> = self.type_defs.keys().cloned().collect();
        types.sort();
        for name in types {
            if let Err(problem) = self.named_type(&name) {
                self.problems.push(problem);
            }
        }
        while let Some((id, mut ctx, definition)) = self.pending_element_types.pop() {
            match self.within(&mut ctx, definition, |c, ctx| c.type_definition(ctx, definition)) {
                Ok(def) => self.types[id] = Some(def),
                Err(problem) => self.problems.push(problem),
            }
        }
        let mut attributes: Vec<QName> = self.attribute_defs.keys().cloned().collect();
        attributes.sort();
        for name in attributes {
            if let Err(problem) = self.attribute_decl(&name) {
                self.problems.push(problem);
            }
        }
    }

    fn finish(self, entry: &str, target: Option<String>) -> Result<Schema, Vec<String>> {
        if !self.problems.is_empty() {
            return Err(self.problems);
        }
        let incomplete = || vec![format!("schema {entry} contains unfinished components")];
        let types = self.types.into_iter().collect::<Option<Vec<_>>>().ok_or_else(incomplete)?;
        let elements = self
            .elements
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(incomplete)?;
        Ok(Schema {
            name: entry.to_string(),
            target_namespace: target,
            types,
            elements,
            global_elements: self.global_elements,
            global_attributes: self.global_attributes,
        })
    }

    /// Run `f` with the namespace declarations of `element` in scope.
    fn within<R>(
        &mut self,
        ctx: &mut Ctx<'d>,
        element: &Element,
        f: impl FnOnce(&mut Self, &mut Ctx<'d>) -> R,
    ) -> R {
        ctx.scope.push(&element.namespace_declarations);
        let result = f(self, ctx);
        ctx.scope.pop();
        result
    }

    fn reserve_type(&mut self) -> TypeId {
        self.types.push(None);
        self.types.len() - 1
    }

    fn builtin_type(&mut self, builtin: Builtin) -> TypeId {
        if let Some(&id) = self.builtin_types.get(&builtin) {
            return id;
        }
        let id = self.reserve_type();
        self.types[id] = Some(TypeDef::Simple(SimpleType {
            variety: SimpleVariety::Builtin(builtin),
        }));
        self.builtin_types.insert(builtin, id);
        id
    }

    fn type_ref(&mut self, at: &Element, name: &QName) -> Result<TypeId, String> {
        if name.namespace.as_deref() == Some(XSD_NS) {
            if name.local == "anyType" {
                return Ok(self.any_type);
            }
            return Builtin::from_name(&name.local)
                .map(|b| self.builtin_type(b))
                .ok_or_else(|| format!("{}: unsupported built-in type xs:{}", at.location, name.local));
        }
        if !self.type_defs.contains_key(name) {
            return Err(format!("{}: reference to undefined type {name}", at.location));
        }
        Ok(self.reserve_named(name))
    }

    /// The slot of a named type, reserved without compiling its body.
    fn reserve_named(&mut self, name: &QName) -> TypeId {
        if let Some(&id) = self.named_types.get(name) {
            return id;
        }
        let id = self.reserve_type();
        self.named_types.insert(name.clone(), id);
        self.pending_types.insert(id, name.clone());
        id
    }

    fn named_type(&mut self, name: &QName) -> Result<TypeId, String> {
        if !self.type_defs.contains_key(name) {
            return Err(format!("reference to undefined type {name}"));
        }
        let id = self.reserve_named(name);
        self.complete_type(id)?;
        Ok(id)
    }

    /// Compile the body of a reserved named type, if it is still pending.
    fn complete_type(&mut self, id: TypeId) -> Result<(), String> {
        let Some(name) = self.pending_types.remove(&id) else {
            return Ok(());
        };
        let Some(&global) = self.type_defs.get(&name) else {
            return Err(format!("reference to undefined type {name}"));
        };
        let mut ctx = Ctx::for_global(global);
        let def = self.type_definition(&mut ctx, global.element)?;
        self.types[id] = Some(def);
        Ok(())
    }

    fn type_definition(&mut self, ctx: &mut Ctx<'d>, element: &'d Element) -> Result<TypeDef, String> {
        if is_xsd(element, "simpleType") {
            Ok(TypeDef::Simple(self.simple_type(ctx, element)?))
        } else {
            Ok(TypeDef::Complex(self.complex_type(ctx, element)?))
        }
    }

    fn anonymous_type(&mut self, ctx: &mut Ctx<'d>, element: &'d Element) -> Result<TypeId, String> {
        let id = self.reserve_type();
        let def = self.within(ctx, element, |c, ctx| c.type_definition(ctx, element))?;
        self.types[id] = Some(def);
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------

    fn element_ref(&mut self, name: &QName) -> Result<ElementId, String> {
        if let Some(&id) = self.global_elements.get(name) {
            return Ok(id);
        }
        let Some(&global) = self.global_element_defs.get(name) else {
            return Err(format!("reference to undefined element {name}"));
        };
        let id = self.elements.len();
        self.elements.push(None);
        self.global_elements.insert(name.clone(), id);
        let mut ctx = Ctx::for_global(global);
        let type_id = self.element_type(&mut ctx, global.element)?;
        self.elements[id] = Some(ElementDecl {
            name: name.clone(),
            type_id,
        });
        Ok(id)
    }

    fn local_element(&mut self, ctx: &mut Ctx<'d>, element: &'d Element) -> Result<ElementId, String> {
        let Some(local) = element.attribute("name") else {
            return Err(format!("{}: local element has neither name nor ref", element.location));
        };
        let qualified = match element.attribute("form") {
            Some(form) => form == "qualified",
            None => ctx.doc.elements_qualified,
        };
        let name = QName::new(qualified.then(|| ctx.target()).flatten(), local);
        let id = self.elements.len();
        self.elements.push(None);
        let type_id = self.element_type(ctx, element)?;
        self.elements[id] = Some(ElementDecl { name, type_id });
        Ok(id)
    }

    fn element_type(&mut self, ctx: &mut Ctx<'d>, element: &'d Element) -> Result<TypeId, String> {
        if let Some(raw) = element.attribute("type") {
            let name = ctx.qname(element, raw)?;
            return self.type_ref(element, &name);
        }
        match xsd_children(element).find(|c| is_xsd(c, "complexType") || is_xsd(c, "simpleType")) {
            Some(definition) => {
                // Compiled once the globals are swept, like named types.
                let id = self.reserve_type();
                self.pending_element_types.push((id, ctx.clone(), definition));
                Ok(id)
            }
            None => Ok(self.any_type),
        }
    }

    // ------------------------------------------------------------------
    // Complex types
    // ------------------------------------------------------------------

    fn complex_type(&mut self, ctx: &mut Ctx<'d>, element: &'d Element) -> Result<ComplexType, String> {
        let mut mixed = element.attribute("mixed") == Some("true");

        if let Some(simple) = xsd_children(element).find(|c| is_xsd(c, "simpleContent")) {
            return self.within(ctx, simple, |c, ctx| c.simple_content(ctx, simple));
        }

        if let Some(complex) = xsd_children(element).find(|c| is_xsd(c, "complexContent")) {
            mixed |= complex.attribute("mixed") == Some("true");
            return self.within(ctx, complex, |c, ctx| c.complex_content(ctx, complex, mixed));
        }

        let model = self.model(ctx, element)?;
        Ok(ComplexType {
            mixed,
            content: content_of(model.particle, mixed),
            attributes: model.attributes,
            any_attribute: model.any_attribute,
        })
    }

    fn derivation(&mut self, ctx: &mut Ctx<'d>, holder: &'d Element) -> Result<(&'d Element, TypeId), String> {
        let Some(derivation) =
            xsd_children(holder).find(|c| is_xsd(c, "extension") || is_xsd(c, "restriction"))
        else {
            return Err(format!(
                "{}: {} needs an extension or restriction",
                holder.location,
                holder.display_name()
            ));
        };
        let Some(raw) = derivation.attribute("base") else {
            return Err(format!("{}: derivation without a base type", derivation.location));
        };
        let base_name = ctx.qname(derivation, raw)?;
        let base = self.type_ref(derivation, &base_name)?;
        Ok((derivation, base))
    }

    fn base_definition(&mut self, at: &Element, base: TypeId) -> Result<&TypeDef, String> {
        self.complete_type(base)?;
        self.types[base]
            .as_ref()
            .ok_or_else(|| format!("{}: circular type derivation", at.location))
    }

    fn simple_content(&mut self, ctx: &mut Ctx<'d>, holder: &'d Element) -> Result<ComplexType, String> {
        let (derivation, base) = self.derivation(ctx, holder)?;
        let (mut value_type, inherited, inherited_wildcard) = match self.base_definition(derivation, base)? {
            TypeDef::Simple(_) => (base, Vec::new(), None),
            TypeDef::Complex(ComplexType {
                content: Content::Simple(value),
                attributes,
                any_attribute,
                ..
            }) => (*value, attributes.clone(), any_attribute.clone()),
            TypeDef::Complex(_) => {
                return Err(format!(
                    "{}: simple content must derive from a simple type",
                    derivation.location
                ));
            }
        };

        let model = self.within(ctx, derivation, |c, ctx| c.model(ctx, derivation))?;
        if is_xsd(derivation, "restriction") {
            let facets = Self::facets(derivation)?;
            if !facets_empty(&facets) {
                let restricted = self.reserve_type();
                self.types[restricted] = Some(TypeDef::Simple(SimpleType {
                    variety: SimpleVariety::Restriction {
                        base: value_type,
                        facets,
                    },
                }));
                value_type = restricted;
            }
        }

        Ok(ComplexType {
            mixed: false,
            content: Content::Simple(value_type),
            attributes: merge_attributes(inherited, model.attributes, &model.prohibited),
            any_attribute: model.any_attribute.or(inherited_wildcard),
        })
    }

    fn complex_content(
        &mut self,
        ctx: &mut Ctx<'d>,
        holder: &'d Element,
        mixed: bool,
    ) -> Result<ComplexType, String> {
        let (derivation, base) = self.derivation(ctx, holder)?;
        let base_type = match self.base_definition(derivation, base)? {
            TypeDef::Complex(complex) => complex.clone(),
            TypeDef::Simple(_) => {
                return Err(format!(
                    "{}: complex content cannot derive from a simple type",
                    derivation.location
                ));
            }
        };
        let model = self.within(ctx, derivation, |c, ctx| c.model(ctx, derivation))?;

        if is_xsd(derivation, "extension") {
            let mixed = mixed || base_type.mixed;
            let particle = match (base_type.content, model.particle) {
                (Content::Particle(inherited), Some(own)) => Some(Particle {
                    min: 1,
                    max: Some(1),
                    term: Term::Sequence(vec![inherited, own]),
                }),
                (Content::Particle(inherited), None) => Some(inherited),
                (_, own) => own,
            };
            Ok(ComplexType {
                mixed,
                content: content_of(particle, mixed),
                attributes: merge_attributes(base_type.attributes, model.attributes, &model.prohibited),
                any_attribute: model.any_attribute.or(base_type.any_attribute),
            })
        } else {
            // A restriction restates its content model in full.
            Ok(ComplexType {
                mixed,
                content: content_of(model.particle, mixed),
                attributes: merge_attributes(base_type.attributes, model.attributes, &model.prohibited),
                any_attribute: model.any_attribute,
            })
        }
    }

    fn model(&mut self, ctx: &mut Ctx<'d>, element: &'d Element) -> Result<Model, String> {
        let mut model = Model::default();
        for child in xsd_children(element) {
            match child.name.local.as_str() {
                "sequence" | "choice" | "all" | "group" => {
                    if model.particle.is_some() {
                        return Err(format!(
                            "{}: more than one content model in {}",
                            child.location,
                            element.display_name()
                        ));
                    }
                    model.particle = self.within(ctx, child, |c, ctx| c.particle(ctx, child))?;
                }
                "attribute" => {
                    let (name, used) = self.within(ctx, child, |c, ctx| c.attribute_use(ctx, child))?;
                    match used {
                        Some(used) => push_attribute(&mut model.attributes, used),
                        None => model.prohibited.push(name),
                    }
                }
                "attributeGroup" => {
                    let group = self.within(ctx, child, |c, ctx| c.attribute_group_ref(ctx, child))?;
                    for used in group.attributes {
                        push_attribute(&mut model.attributes, used);
                    }
                    if model.any_attribute.is_none() {
                        model.any_attribute = group.any_attribute;
                    }
                }
                "anyAttribute" => {
                    model.any_attribute = Some(self.wildcard(ctx, child));
                }
                _ => {}
            }
        }
        Ok(model)
    }

    // ------------------------------------------------------------------
    // Particles
    // ------------------------------------------------------------------

    fn occurs(element: &Element) -> Result<(u32, Option<u32>), String> {
        let parse = |raw: &str| {
            raw.trim()
                .parse::<u32>()
                .map_err(|_| format!("{}: invalid occurrence count '{raw}'", element.location))
        };
        let min = element.attribute("minOccurs").map(parse).transpose()?.unwrap_or(1);
        let max = match element.attribute("maxOccurs") {
            Some("unbounded") => None,
            Some(raw) => Some(parse(raw)?),
            None => Some(1),
        };
        if max.is_some_and(|max| max < min) {
            return Err(format!("{}: maxOccurs is less than minOccurs", element.location));
        }
        Ok((min, max))
    }

    /// Compile a particle; `None` when `maxOccurs="0"` removes it.
    fn particle(&mut self, ctx: &mut Ctx<'d>, element: &'d Element) -> Result<Option<Particle>, String> {
        let (min, max) = Self::occurs(element)?;
        if max == Some(0) {
            return Ok(None);
        }
        let term = match element.name.local.as_str() {
            "element" => match element.attribute("ref") {
                Some(raw) => {
                    let name = ctx.qname(element, raw)?;
                    if !self.global_element_defs.contains_key(&name) {
                        return Err(format!("{}: reference to undefined element {name}", element.location));
                    }
                    Term::Element(self.element_ref(&name)?)
                }
                None => Term::Element(self.local_element(ctx, element)?),
            },
            "sequence" | "choice" | "all" => {
                let mut particles = Vec::new();
                for child in xsd_children(element) {
                    if let Some(p) = self.within(ctx, child, |c, ctx| c.particle(ctx, child))? {
                        particles.push(p);
                    }
                }
                match element.name.local.as_str() {
                    "sequence" => Term::Sequence(particles),
                    "choice" => Term::Choice(particles),
                    _ => Term::All(particles),
                }
            }
            "group" => {
                let Some(raw) = element.attribute("ref") else {
                    return Err(format!("{}: group reference without ref", element.location));
                };
                let name = ctx.qname(element, raw)?;
                self.group(element, &name)?.term
            }
            "any" => Term::Any(self.wildcard(ctx, element)),
            other => {
                return Err(format!("{}: unexpected xs:{other} in content model", element.location));
            }
        };
        Ok(Some(Particle { min, max, term }))
    }

    fn group(&mut self, at: &Element, name: &QName) -> Result<Particle, String> {
        if let Some(particle) = self.groups.get(name) {
            return Ok(particle.clone());
        }
        let Some(&global) = self.group_defs.get(name) else {
            return Err(format!("{}: reference to undefined group {name}", at.location));
        };
        if self.in_progress.contains(name) {
            return Err(format!("{}: circular group reference {name}", at.location));
        }
        let Some(body) = xsd_children(global.element).next() else {
            return Err(format!("{}: group {name} is empty", global.element.location));
        };
        self.in_progress.push(name.clone());
        let mut ctx = Ctx::for_global(global);
        let compiled = self.within(&mut ctx, body, |c, ctx| c.particle(ctx, body));
        self.in_progress.pop();
        let particle = compiled?.unwrap_or(Particle {
            min: 1,
            max: Some(1),
            term: Term::Sequence(Vec::new()),
        });
        self.groups.insert(name.clone(), particle.clone());
        Ok(particle)
    }

    fn wildcard(&self, ctx: &Ctx<'d>, element: &Element) -> Wildcard {
        let target = ctx.target().map(str::to_string);
        let namespaces = match element.attribute("namespace").map(str::trim) {
            None | Some("##any") => NamespaceConstraint::Any,
            Some("##other") => NamespaceConstraint::Not(target),
            Some(list) => NamespaceConstraint::Set(
                list.split_whitespace()
                    .map(|token| match token {
                        "##targetNamespace" => target.clone(),
                        "##local" => None,
                        uri => Some(uri.to_string()),
                    })
                    .collect(),
            ),
        };
        let process = match element.attribute("processContents") {
            Some("lax") => ProcessContents::Lax,
            Some("skip") => ProcessContents::Skip,
            _ => ProcessContents::Strict,
        };
        Wildcard { namespaces, process }
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    fn attribute_decl(&mut self, name: &QName) -> Result<AttributeDecl, String> {
        if let Some(decl) = self.global_attributes.get(name) {
            return Ok(decl.clone());
        }
        let Some(&global) = self.attribute_defs.get(name) else {
            return Err(format!("reference to undefined attribute {name}"));
        };
        let mut ctx = Ctx::for_global(global);
        let type_id = self.attribute_type(&mut ctx, global.element)?;
        let decl = AttributeDecl {
            type_id,
            fixed: global.element.attribute("fixed").map(str::to_string),
        };
        self.global_attributes.insert(name.clone(), decl.clone());
        Ok(decl)
    }

    fn attribute_type(&mut self, ctx: &mut Ctx<'d>, element: &'d Element) -> Result<TypeId, String> {
        if let Some(raw) = element.attribute("type") {
            let name = ctx.qname(element, raw)?;
            return self.type_ref(element, &name);
        }
        match xsd_children(element).find(|c| is_xsd(c, "simpleType")) {
            Some(definition) => self.anonymous_type(ctx, definition),
            None => Ok(self.builtin_type(Builtin::AnySimpleType)),
        }
    }

    /// Compile an attribute use; the use is `None` when prohibited.
    fn attribute_use(
        &mut self,
        ctx: &mut Ctx<'d>,
        element: &'d Element,
    ) -> Result<(QName, Option<AttributeUse>), String> {
        let required = element.attribute("use") == Some("required");
        let prohibited = element.attribute("use") == Some("prohibited");

        let (name, type_id, fixed) = match element.attribute("ref") {
            Some(raw) => {
                let name = ctx.qname(element, raw)?;
                if !self.attribute_defs.contains_key(&name) {
                    return Err(format!("{}: reference to undefined attribute {name}", element.location));
                }
                let decl = self.attribute_decl(&name)?;
                let fixed = element.attribute("fixed").map(str::to_string).or(decl.fixed);
                (name, decl.type_id, fixed)
            }
            None => {
                let Some(local) = element.attribute("name") else {
                    return Err(format!("{}: attribute has neither name nor ref", element.location));
                };
                let qualified = match element.attribute("form") {
                    Some(form) => form == "qualified",
                    None => ctx.doc.attributes_qualified,
                };
                let name = QName::new(qualified.then(|| ctx.target()).flatten(), local);
                let type_id = self.attribute_type(ctx, element)?;
                (name, type_id, element.attribute("fixed").map(str::to_string))
            }
        };

        if prohibited {
            return Ok((name, None));
        }
        Ok((
            name.clone(),
            Some(AttributeUse {
                name,
                type_id,
                required,
                fixed,
            }),
        ))
    }

    fn attribute_group_ref(&mut self, ctx: &mut Ctx<'d>, element: &'d Element) -> Result<AttributeGroup, String> {
        let Some(raw) = element.attribute("ref") else {
            return Err(format!("{}: attribute group reference without ref", element.location));
        };
        let name = ctx.qname(element, raw)?;
        if let Some(group) = self.attribute_groups.get(&name) {
            return Ok(AttributeGroup {
                attributes: group.attributes.clone(),
                any_attribute: group.any_attribute.clone(),
            });
        }
        let Some(&global) = self.attribute_group_defs.get(&name) else {
            return Err(format!("{}: reference to undefined attribute group {name}", element.location));
        };
        if self.in_progress.contains(&name) {
            return Err(format!("{}: circular attribute group {name}", element.location));
        }
        self.in_progress.push(name.clone());
        let mut group_ctx = Ctx::for_global(global);
        let model = self.model(&mut group_ctx, global.element);
        self.in_progress.pop();
        let model = model?;
        let group = AttributeGroup {
            attributes: model.attributes,
            any_attribute: model.any_attribute,
        };
        self.attribute_groups.insert(
            name,
            AttributeGroup {
                attributes: group.attributes.clone(),
                any_attribute: group.any_attribute.clone(),
            },
        );
        Ok(group)
    }

    // ------------------------------------------------------------------
    // Simple types
    // ------------------------------------------------------------------

    fn simple_type(&mut self, ctx: &mut Ctx<'d>, element: &'d Element) -> Result<SimpleType, String> {
        let Some(body) = xsd_children(element).next() else {
            return Err(format!("{}: empty simple type", element.location));
        };
        self.within(ctx, body, |c, ctx| c.simple_body(ctx, body))
    }

    fn simple_body(&mut self, ctx: &mut Ctx<'d>, body: &'d Element) -> Result<SimpleType, String> {
        let variety = match body.name.local.as_str() {
            "restriction" => {
                let base = match body.attribute("base") {
                    Some(raw) => {
                        let name = ctx.qname(body, raw)?;
                        self.type_ref(body, &name)?
                    }
                    None => match xsd_children(body).find(|c| is_xsd(c, "simpleType")) {
                        Some(inner) => self.anonymous_type(ctx, inner)?,
                        None => return Err(format!("{}: restriction without a base", body.location)),
                    },
                };
                self.complete_type(base)?;
                if matches!(self.types[base], Some(TypeDef::Complex(_))) {
                    return Err(format!("{}: simple type restricts a complex type", body.location));
                }
                SimpleVariety::Restriction {
                    base,
                    facets: Self::facets(body)?,
                }
            }
            "list" => {
                let item = match body.attribute("itemType") {
                    Some(raw) => {
                        let name = ctx.qname(body, raw)?;
                        self.type_ref(body, &name)?
                    }
                    None => match xsd_children(body).find(|c| is_xsd(c, "simpleType")) {
                        Some(inner) => self.anonymous_type(ctx, inner)?,
                        None => return Err(format!("{}: list without an item type", body.location)),
                    },
                };
                SimpleVariety::List { item }
            }
            "union" => {
                let mut members = Vec::new();
                for raw in body.attribute("memberTypes").unwrap_or("").split_whitespace() {
                    let name = ctx.qname(body, raw)?;
                    members.push(self.type_ref(body, &name)?);
                }
                for inner in xsd_children(body).filter(|c| is_xsd(c, "simpleType")) {
                    members.push(self.anonymous_type(ctx, inner)?);
                }
                if members.is_empty() {
                    return Err(format!("{}: union without member types", body.location));
                }
                SimpleVariety::Union { members }
            }
            other => return Err(format!("{}: unexpected xs:{other} in simple type", body.location)),
        };
        Ok(SimpleType { variety })
    }

    fn facets(restriction: &Element) -> Result<Facets, String> {
        let mut facets = Facets::default();
        let mut patterns = Vec::new();
        for facet in xsd_children(restriction) {
            let local = facet.name.local.as_str();
            if matches!(
                local,
                "simpleType"
                    | "attribute"
                    | "attributeGroup"
                    | "anyAttribute"
                    | "sequence"
                    | "choice"
                    | "all"
                    | "group"
            ) {
                continue;
            }
            let Some(value) = facet.attribute("value") else {
                return Err(format!("{}: facet xs:{local} has no value", facet.location));
            };
            let size = || {
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| format!("{}: invalid {local} '{value}'", facet.location))
            };
            let bound = || {
                value
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("{}: invalid {local} '{value}'", facet.location))
            };
            match local {
                "enumeration" => facets.enumeration.push(value.to_string()),
                "pattern" => patterns.push(value),
                "length" => facets.length = Some(size()?),
                "minLength" => facets.min_length = Some(size()?),
                "maxLength" => facets.max_length = Some(size()?),
                "minInclusive" => facets.min_inclusive = Some(bound()?),
                "maxInclusive" => facets.max_inclusive = Some(bound()?),
                "minExclusive" => facets.min_exclusive = Some(bound()?),
                "maxExclusive" => facets.max_exclusive = Some(bound()?),
                "whiteSpace" => {
                    facets.white_space = Some(WhiteSpace::parse(value).ok_or_else(|| {
                        format!("{}: invalid whiteSpace '{value}'", facet.location)
                    })?);
                }
                "totalDigits" | "fractionDigits" => {
                    debug!("{}: ignoring facet xs:{local}", facet.location);
                }
                other => return Err(format!("{}: unsupported facet xs:{other}", facet.location)),
            }
        }
        if !patterns.is_empty() {
            // Patterns given at one derivation step are alternatives.
            let combined = format!("(?:{})", patterns.join(")|(?:"));
            let regex = compile_pattern(&combined)
                .map_err(|e| format!("{}: {e}", restriction.location))?;
            facets.patterns.push(regex);
        }
        Ok(facets)
    }
}

fn content_of(particle: Option<Particle>, mixed: bool) -> Content {
    match particle {
        Some(particle) => Content::Particle(particle),
        None if mixed => Content::Particle(Particle {
            min: 1,
            max: Some(1),
            term: Term::Sequence(Vec::new()),
        }),
        None => Content::Empty,
    }
}

fn push_attribute(attributes: &mut Vec<AttributeUse>, used: AttributeUse) {
    match attributes.iter_mut().find(|a| a.name == used.name) {
        Some(existing) => *existing = used,
        None => attributes.push(used),
    }
}

fn merge_attributes(
    inherited: Vec<AttributeUse>,
    own: Vec<AttributeUse>,
    prohibited: &[QName],
) -> Vec<AttributeUse> {
    let mut merged: Vec<AttributeUse> = inherited
        .into_iter()
        .filter(|a| !prohibited.contains(&a.name))
        .collect();
    for used in own {
        push_attribute(&mut merged, used);
    }
    merged
}

fn facets_empty(facets: &Facets) -> bool {
    facets.enumeration.is_empty()
        && facets.patterns.is_empty()
        && facets.length.is_none()
        && facets.min_length.is_none()
        && facets.max_length.is_none()
        && facets.min_inclusive.is_none()
        && facets.max_inclusive.is_none()
        && facets.min_exclusive.is_none()
        && facets.max_exclusive.is_none()
        && facets.white_space.is_none()
}
