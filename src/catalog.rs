//! The bundled resource catalog.
//!
//! A [`ResourceCatalog`] maps logical names to the schemas, stylesheets,
//! style assets and package templates compiled into the crate. It is built
//! explicitly, never mutated after construction, and shared by reference
//! (typically as `Arc<ResourceCatalog>`) between pipeline components.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;

use crate::dispatch::{GENERATION_A_NAMESPACE, GENERATION_B_NAMESPACE};
use crate::xml::{XHTML_NS, XML_NS};

pub const XML_SCHEMA: &str = "xml.xsd";
pub const DUBLIN_CORE_SCHEMA: &str = "dc.xsd";
pub const GENERATION_A_SCHEMA: &str = "structural-7.xsd";
pub const GENERATION_B_SCHEMA: &str = "structural-8.xsd";
pub const XHTML_SCHEMA: &str = "xhtml.xsd";
pub const CONTAINER_TEMPLATE: &str = "container.xml";

pub const DUBLIN_CORE_NS: &str = "http://purl.org/dc/elements/1.1/";

/// Schemas copied by [`ResourceCatalog::export_schemas`].
const EXPORTED_SCHEMAS: [&str; 4] = [
    XML_SCHEMA,
    DUBLIN_CORE_SCHEMA,
    GENERATION_A_SCHEMA,
    GENERATION_B_SCHEMA,
];

/// What a catalog resource is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceGroup {
    Schema,
    Stylesheet,
    StyleAsset,
    PackageTemplate,
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub name: String,
    pub group: ResourceGroup,
    /// Target namespace for schema entries.
    pub namespace: Option<String>,
    pub data: Cow<'static, [u8]>,
}

/// An immutable name to bytes mapping.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

macro_rules! bundled {
    ($catalog:ident, $group:expr, $ns:expr, $name:expr, $path:literal) => {
        $catalog = $catalog.with_resource(
            $name,
            $group,
            $ns,
            Cow::Borrowed(include_bytes!(concat!("../resources/", $path)).as_slice()),
        );
    };
}

impl ResourceCatalog {
    /// A catalog with nothing in it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The catalog of resources bundled with this crate.
    pub fn builtin() -> Self {
        use ResourceGroup::*;

        let mut c = Self::empty();
        bundled!(c, Schema, Some(XML_NS), XML_SCHEMA, "schemas/xml.xsd");
        bundled!(c, Schema, Some(DUBLIN_CORE_NS), DUBLIN_CORE_SCHEMA, "schemas/dc.xsd");
        bundled!(
            c,
            Schema,
            Some(GENERATION_A_NAMESPACE),
            GENERATION_A_SCHEMA,
            "schemas/structural-7.xsd"
        );
        bundled!(
            c,
            Schema,
            Some(GENERATION_B_NAMESPACE),
            GENERATION_B_SCHEMA,
            "schemas/structural-8.xsd"
        );
        bundled!(c, Schema, Some(XHTML_NS), XHTML_SCHEMA, "schemas/xhtml.xsd");

        bundled!(c, Stylesheet, None, "structural-7-single.xml", "stylesheets/structural-7-single.xml");
        bundled!(c, Stylesheet, None, "structural-7-multi.xml", "stylesheets/structural-7-multi.xml");
        bundled!(c, Stylesheet, None, "structural-8-single.xml", "stylesheets/structural-8-single.xml");
        bundled!(c, Stylesheet, None, "structural-8-multi.xml", "stylesheets/structural-8-multi.xml");
        bundled!(c, Stylesheet, None, "structural-8-index.xml", "stylesheets/structural-8-index.xml");
        bundled!(c, Stylesheet, None, "structural-8-epub.xml", "stylesheets/structural-8-epub.xml");
        bundled!(
            c,
            Stylesheet,
            None,
            "structural-8-epub-package.xml",
            "stylesheets/structural-8-epub-package.xml"
        );

        bundled!(c, StyleAsset, None, "reset.css", "css/reset.css");
        bundled!(c, StyleAsset, None, "structural.css", "css/structural.css");
        bundled!(c, StyleAsset, None, "reset-epub.css", "css/reset-epub.css");
        bundled!(c, StyleAsset, None, "structural-epub.css", "css/structural-epub.css");

        bundled!(c, PackageTemplate, None, CONTAINER_TEMPLATE, "package/container.xml");
        c
    }

    /// Add or replace a resource.
    pub fn with_resource(
        mut self,
        name: impl Into<String>,
        group: ResourceGroup,
        namespace: Option<&str>,
        data: impl Into<Cow<'static, [u8]>>,
    ) -> Self {
        let name = name.into();
        self.entries.insert(
            name.clone(),
            CatalogEntry {
                name,
                group,
                namespace: namespace.map(str::to_string),
                data: data.into(),
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        self.get(name).map(|e| e.data.as_ref())
    }

    /// The schema whose target namespace is `namespace`.
    pub fn schema_for_namespace(&self, namespace: &str) -> Option<&CatalogEntry> {
        self.entries
            .values()
            .find(|e| e.group == ResourceGroup::Schema && e.namespace.as_deref() == Some(namespace))
    }

    pub fn names(&self, group: ResourceGroup) -> impl Iterator<Item = &str> {
        self.entries
            .values()
            .filter(move |e| e.group == group)
            .map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy the public schemas into `directory`.
    ///
    /// Existing files are left alone unless `replace` is set. Returns the
    /// paths that were written.
    pub fn export_schemas(&self, directory: &Path, replace: bool) -> io::Result<Vec<PathBuf>> {
        fs::create_dir_all(directory)?;
        let mut written = Vec::new();
        for name in EXPORTED_SCHEMAS {
            let Some(data) = self.bytes(name) else {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("schema {name} is not in the catalog"),
                ));
            };
            let target = directory.join(name);
            if target.exists() && !replace {
                info!("schema {} exists, not replacing it", target.display());
                continue;
            }
            info!("writing schema {}", target.display());
            fs::write(&target, data)?;
            written.push(target);
        }
        Ok(written)
    }
}
