//! Entity and resource resolution.
//!
//! Every external reference requested while parsing (schema imports, DTDs,
//! XInclude targets, linked assets) is answered by an [`EntityResolver`].
//! Two implementations are provided:
//!
//! - [`NeverResolver`] refuses everything. It is used for untrusted input and
//!   for namespace sniffing, where no external access is ever needed.
//! - [`CatalogResolver`] consults the closed [`ResourceCatalog`] first and,
//!   if a sandbox root is configured, falls back to files beneath that root.
//!
//! # Security
//!
//! Filesystem lookups are normalized lexically and then canonicalized, and
//! the result must remain under the sandbox root both times. Remote schemes
//! are never fetched.

use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use percent_encoding::percent_decode_str;

use crate::catalog::ResourceCatalog;
use crate::error::ResolutionError;

/// What kind of reference is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Schema,
    Dtd,
    Include,
    Asset,
}

/// A reference requested during parsing or transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    pub kind: ResourceKind,
    pub system_id: String,
    pub public_id: Option<String>,
    /// Target namespace, for schema requests.
    pub namespace: Option<String>,
    /// Directory that relative system identifiers are resolved against.
    pub base: Option<PathBuf>,
}

impl ResourceReference {
    pub fn new(kind: ResourceKind, system_id: impl Into<String>) -> Self {
        Self {
            kind,
            system_id: system_id.into(),
            public_id: None,
            namespace: None,
            base: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_public_id(mut self, public_id: impl Into<String>) -> Self {
        self.public_id = Some(public_id.into());
        self
    }

    pub fn with_base(mut self, base: Option<&Path>) -> Self {
        self.base = base.map(Path::to_path_buf);
        self
    }
}

/// The bytes behind a resolved reference.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    /// Identifier used in diagnostics for the resolved resource.
    pub system_id: String,
    /// Directory for resolving references made from inside the resource.
    pub base: Option<PathBuf>,
    pub data: Cow<'static, [u8]>,
}

/// Answers external references on behalf of the XML reader.
pub trait EntityResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, reference: &ResourceReference) -> Result<ResolvedResource, ResolutionError>;

    /// Called when a document type declaration names an external subset.
    ///
    /// Returning `Ok` means the declaration is accepted and the subset is
    /// not loaded.
    fn external_subset(&self, name: &str, system_id: Option<&str>) -> Result<(), ResolutionError>;
}

/// Refuses every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverResolver;

impl EntityResolver for NeverResolver {
    fn resolve(&self, reference: &ResourceReference) -> Result<ResolvedResource, ResolutionError> {
        Err(ResolutionError::Forbidden(format!(
            "External entities are explicitly forbidden by this parser configuration.\n  System ID: {}",
            reference.system_id
        )))
    }

    fn external_subset(&self, name: &str, _system_id: Option<&str>) -> Result<(), ResolutionError> {
        Err(ResolutionError::Forbidden(format!(
            "External subsets are explicitly forbidden by this parser configuration.\n  Name: {name}"
        )))
    }
}

#[derive(Debug, Clone)]
struct Sandbox {
    root: PathBuf,
    canonical_root: Option<PathBuf>,
}

/// Catalog-first resolution with an optional filesystem sandbox.
#[derive(Debug, Clone)]
pub struct CatalogResolver {
    catalog: Arc<ResourceCatalog>,
    sandbox: Option<Sandbox>,
}

impl CatalogResolver {
    /// A resolver that only answers from the catalog.
    pub fn new(catalog: Arc<ResourceCatalog>) -> Self {
        Self {
            catalog,
            sandbox: None,
        }
    }

    /// Allow files beneath `root` to be resolved.
    pub fn with_sandbox(mut self, root: impl Into<PathBuf>) -> Self {
        let root = normalize_lexically(&root.into());
        let canonical_root = root.canonicalize().ok();
        self.sandbox = Some(Sandbox {
            root,
            canonical_root,
        });
        self
    }

    pub fn sandbox_root(&self) -> Option<&Path> {
        self.sandbox.as_ref().map(|s| s.root.as_path())
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    /// Resolve a name to a regular file beneath the sandbox root.
    pub fn sandboxed_path(&self, name: &str, base: Option<&Path>) -> Result<PathBuf, ResolutionError> {
        let Some(sandbox) = &self.sandbox else {
            return Err(ResolutionError::NotFound {
                system_id: name.to_string(),
            });
        };

        let decoded = decode_system_id(name);
        let requested = Path::new(&*decoded);
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            base.unwrap_or(&sandbox.root).join(requested)
        };
        let normalized = normalize_lexically(&joined);

        if !normalized.starts_with(&sandbox.root) {
            return Err(sandbox_violation(&sandbox.root, &normalized));
        }

        let canonical = match normalized.canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("not found in sandbox: {}", normalized.display());
                return Err(ResolutionError::NotFound {
                    system_id: name.to_string(),
                });
            }
            Err(source) => {
                return Err(ResolutionError::Io {
                    path: normalized,
                    source,
                });
            }
        };
        if let Some(canonical_root) = &sandbox.canonical_root
            && !canonical.starts_with(canonical_root)
        {
            return Err(sandbox_violation(&sandbox.root, &canonical));
        }
        if !canonical.is_file() {
            debug!("not a regular file: {}", canonical.display());
            return Err(ResolutionError::NotFound {
                system_id: name.to_string(),
            });
        }
        Ok(normalized)
    }

    fn from_catalog(&self, reference: &ResourceReference) -> Option<ResolvedResource> {
        let by_namespace = match (&reference.kind, &reference.namespace) {
            (ResourceKind::Schema, Some(ns)) => self.catalog.schema_for_namespace(ns),
            _ => None,
        };
        let entry = by_namespace.or_else(|| self.catalog.get(&reference.system_id))?;
        debug!("resolved {} from catalog entry {}", reference.system_id, entry.name);
        Some(ResolvedResource {
            system_id: entry.name.clone(),
            base: None,
            data: entry.data.clone(),
        })
    }
}

impl EntityResolver for CatalogResolver {
    fn resolve(&self, reference: &ResourceReference) -> Result<ResolvedResource, ResolutionError> {
        debug!(
            "resolve {:?} system={} public={:?} namespace={:?}",
            reference.kind, reference.system_id, reference.public_id, reference.namespace
        );

        if let Some(resolved) = self.from_catalog(reference) {
            return Ok(resolved);
        }

        if is_remote(&reference.system_id) {
            warn!("refusing to fetch remote resource {}", reference.system_id);
            return Err(ResolutionError::Forbidden(format!(
                "Remote resources are never fetched.\n  System ID: {}",
                reference.system_id
            )));
        }

        let path = self.sandboxed_path(&reference.system_id, reference.base.as_deref())?;
        let data = fs::read(&path).map_err(|source| ResolutionError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(ResolvedResource {
            system_id: path.display().to_string(),
            base: path.parent().map(Path::to_path_buf),
            data: Cow::Owned(data),
        })
    }

    fn external_subset(&self, name: &str, system_id: Option<&str>) -> Result<(), ResolutionError> {
        debug!("not loading external subset for {name} ({system_id:?})");
        Ok(())
    }
}

fn sandbox_violation(root: &Path, path: &Path) -> ResolutionError {
    let err = ResolutionError::SandboxViolation {
        base: root.to_path_buf(),
        path: path.to_path_buf(),
    };
    warn!("sandbox violation: {err}");
    err
}

fn is_remote(system_id: &str) -> bool {
    let Some((scheme, _)) = system_id.split_once(':') else {
        return false;
    };
    // Windows drive letters look like one-letter schemes.
    scheme.len() > 1
        && scheme != "file"
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn decode_system_id(system_id: &str) -> Cow<'_, str> {
    let path = system_id
        .strip_prefix("file://")
        .or_else(|| system_id.strip_prefix("file:"))
        .unwrap_or(system_id);
    percent_decode_str(path).decode_utf8_lossy()
}

/// Remove `.` and `..` components without touching the filesystem.
///
/// `..` never climbs above the root of an absolute path.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                );
                if at_root {
                    if !path.is_absolute() {
                        out.push("..");
                    }
                } else if out.ends_with("..") {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(normalize_lexically(Path::new("/a/../../..")), PathBuf::from("/"));
        assert_eq!(normalize_lexically(Path::new("../x")), PathBuf::from("../x"));
    }

    #[test]
    fn test_remote_detection() {
        assert!(is_remote("http://www.w3.org/2001/xml.xsd"));
        assert!(is_remote("https://example.com/a"));
        assert!(!is_remote("file:///tmp/x"));
        assert!(!is_remote("chapter.xml"));
        assert!(!is_remote("C:\\docs\\x.xml"));
    }

    #[test]
    fn test_never_resolver_refuses() {
        let reference = ResourceReference::new(ResourceKind::Dtd, "x.dtd");
        let err = NeverResolver.resolve(&reference).unwrap_err();
        assert!(err.to_string().contains("explicitly forbidden"));
        let err = NeverResolver.external_subset("html", Some("x.dtd")).unwrap_err();
        assert!(err.to_string().contains("Name: html"));
    }

    #[test]
    fn test_decode_system_id() {
        assert_eq!(decode_system_id("my%20file.xml"), "my file.xml");
        assert_eq!(decode_system_id("file:///tmp/a.xml"), "/tmp/a.xml");
    }
}
