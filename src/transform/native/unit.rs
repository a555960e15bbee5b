//! Template units: the declarative stylesheets understood by the native engine.
//!
//! ```xml
//! <unit xmlns="urn:com.io7m.structural.unit:1:0"
//!       name="structural-8-single" generation="8" layout="single">
//!   <parameter name="outputDirectory" required="true"/>
//!   <stylesheet href="reset.css"/>
//! </unit>
//! ```

use std::fmt;

use crate::dispatch::SchemaNamespace;
use crate::resolver::NeverResolver;
use crate::transform::engine::{EngineDiagnostic, ErrorListener, StylesheetSource};
use crate::xml::{Element, Location, XmlReader};

pub const UNIT_NS: &str = "urn:com.io7m.structural.unit:1:0";

/// What a unit renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitLayout {
    Single,
    Multi,
    Index,
    Epub,
    Package,
}

impl UnitLayout {
    fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "single" => UnitLayout::Single,
            "multi" => UnitLayout::Multi,
            "index" => UnitLayout::Index,
            "epub" => UnitLayout::Epub,
            "package" => UnitLayout::Package,
            _ => return None,
        })
    }

    /// Layouts only defined for the second generation of the vocabulary.
    fn requires_generation_b(self) -> bool {
        matches!(self, UnitLayout::Index | UnitLayout::Epub | UnitLayout::Package)
    }

    fn renders_pages(self) -> bool {
        matches!(self, UnitLayout::Single | UnitLayout::Multi | UnitLayout::Epub)
    }
}

impl fmt::Display for UnitLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitLayout::Single => "single",
            UnitLayout::Multi => "multi",
            UnitLayout::Index => "index",
            UnitLayout::Epub => "epub",
            UnitLayout::Package => "package",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitParameter {
    pub name: String,
    pub required: bool,
}

/// A compiled unit.
#[derive(Debug, Clone)]
pub struct Unit {
    pub name: String,
    pub generation: SchemaNamespace,
    pub layout: UnitLayout,
    pub parameters: Vec<UnitParameter>,
    /// Stylesheet links placed in every generated page, in order.
    pub stylesheets: Vec<String>,
    pub location: Location,
}

impl Unit {
    /// Parse and check a unit, reporting every problem to `errors`.
    ///
    /// Returns `None` if any error was reported.
    pub fn compile(source: &StylesheetSource, errors: &mut dyn ErrorListener) -> Option<Unit> {
        let document = match XmlReader::new(&NeverResolver).parse(&source.data, &source.system_id, None) {
            Ok(document) => document,
            Err(e) => {
                let location = e
                    .location()
                    .cloned()
                    .unwrap_or_else(|| Location::document(source.system_id.as_str()));
                errors.report(EngineDiagnostic::error(location, e.message()));
                return None;
            }
        };

        let mut checker = UnitChecker { errors, failed: false };
        let unit = checker.unit(&document.root);
        if checker.failed { None } else { unit }
    }

    pub fn parameter(&self, name: &str) -> Option<&UnitParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }
}

struct UnitChecker<'e> {
    errors: &'e mut dyn ErrorListener,
    failed: bool,
}

impl UnitChecker<'_> {
    fn error(&mut self, location: &Location, message: impl Into<String>) {
        self.failed = true;
        self.errors.report(EngineDiagnostic::error(location.clone(), message));
    }

    fn warning(&mut self, location: &Location, message: impl Into<String>) {
        self.errors.report(EngineDiagnostic::warning(location.clone(), message));
    }

    fn required<'a>(&mut self, element: &'a Element, attribute: &str) -> Option<&'a str> {
        let value = element.attribute(attribute).map(str::trim).filter(|v| !v.is_empty());
        if value.is_none() {
            self.error(
                &element.location,
                format!("element '{}' requires a non-empty '{attribute}' attribute", element.name.local),
            );
        }
        value
    }

    fn unit(&mut self, root: &Element) -> Option<Unit> {
        if !root.name.is(UNIT_NS, "unit") {
            self.error(
                &root.location,
                format!("expected a 'unit' element in {UNIT_NS}, found '{}'", root.name),
            );
            return None;
        }

        let name = self.required(root, "name").map(str::to_string);
        let generation = self.required(root, "generation").and_then(|text| match text {
            "7" => Some(SchemaNamespace::GenerationA),
            "8" => Some(SchemaNamespace::GenerationB),
            other => {
                self.error(&root.location, format!("unknown generation '{other}'; expected 7 or 8"));
                None
            }
        });
        let layout = self.required(root, "layout").and_then(|text| {
            let layout = UnitLayout::parse(text);
            if layout.is_none() {
                self.error(
                    &root.location,
                    format!("unknown layout '{text}'; expected single, multi, index, epub or package"),
                );
            }
            layout
        });

        if let (Some(generation), Some(layout)) = (generation, layout)
            && layout.requires_generation_b()
            && generation != SchemaNamespace::GenerationB
        {
            self.error(
                &root.location,
                format!("the {layout} layout requires generation 8, not {}", generation.version()),
            );
        }

        let mut parameters: Vec<UnitParameter> = Vec::new();
        let mut stylesheets = Vec::new();
        for child in root.child_elements() {
            if child.name.namespace.as_deref() != Some(UNIT_NS) {
                self.error(&child.location, format!("unexpected element '{}'", child.name));
                continue;
            }
            match child.name.local.as_str() {
                "parameter" => {
                    let Some(name) = self.required(child, "name") else {
                        continue;
                    };
                    let required = match child.attribute("required").unwrap_or("false") {
                        "true" | "1" => true,
                        "false" | "0" => false,
                        other => {
                            self.error(
                                &child.location,
                                format!("parameter '{name}': 'required' must be true or false, not '{other}'"),
                            );
                            false
                        }
                    };
                    if parameters.iter().any(|p| p.name == name) {
                        self.error(&child.location, format!("parameter '{name}' is declared twice"));
                        continue;
                    }
                    parameters.push(UnitParameter {
                        name: name.to_string(),
                        required,
                    });
                }
                "stylesheet" => {
                    if let Some(href) = self.required(child, "href") {
                        stylesheets.push(href.to_string());
                    }
                }
                other => self.error(&child.location, format!("unexpected element '{other}'")),
            }
        }

        if let Some(layout) = layout
            && layout.renders_pages()
            && stylesheets.is_empty()
        {
            self.warning(&root.location, "unit renders pages but links no stylesheets");
        }

        Some(Unit {
            name: name?,
            generation: generation?,
            layout: layout?,
            parameters,
            stylesheets,
            location: root.location.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::transform::engine::CollectingErrorListener;

    fn compile(text: &str) -> (Option<Unit>, CollectingErrorListener) {
        let source = StylesheetSource {
            system_id: "unit.xml".to_string(),
            data: Cow::Owned(text.as_bytes().to_vec()),
        };
        let mut errors = CollectingErrorListener::new();
        let unit = Unit::compile(&source, &mut errors);
        (unit, errors)
    }

    #[test]
    fn test_valid_unit() {
        let (unit, errors) = compile(&format!(
            r#"<unit xmlns="{UNIT_NS}" name="u" generation="8" layout="multi">
                 <parameter name="outputDirectory" required="true"/>
                 <parameter name="branding"/>
                 <stylesheet href="reset.css"/>
               </unit>"#
        ));
        let unit = unit.unwrap();
        assert!(errors.diagnostics().is_empty());
        assert_eq!(unit.layout, UnitLayout::Multi);
        assert_eq!(unit.required_parameters().collect::<Vec<_>>(), ["outputDirectory"]);
        assert_eq!(unit.stylesheets, ["reset.css"]);
    }

    #[test]
    fn test_every_problem_is_reported_with_location() {
        let (unit, errors) = compile(&format!(
            "<unit xmlns=\"{UNIT_NS}\" name=\"u\" generation=\"7\" layout=\"epub\">\n\
             <parameter name=\"a\"/>\n\
             <parameter name=\"a\"/>\n\
             <bogus/>\n\
             </unit>"
        ));
        assert!(unit.is_none());
        let diagnostics = errors.into_diagnostics();
        let errors: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.severity == crate::transform::DiagnosticSeverity::Error)
            .collect();
        assert_eq!(errors.len(), 3, "{diagnostics:?}");
        assert_eq!(errors[0].location.line, 1);
        assert!(errors[0].message.contains("requires generation 8"));
        assert_eq!(errors[1].location.line, 3);
        assert_eq!(errors[2].location.line, 4);
        assert!(errors.iter().all(|d| &*d.location.system_id == "unit.xml"));
    }

    #[test]
    fn test_malformed_unit() {
        let (unit, errors) = compile("<unit");
        assert!(unit.is_none());
        assert!(errors.has_errors());
    }
}
