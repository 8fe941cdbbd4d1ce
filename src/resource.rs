//! Schema resource stores and the resolver that locates imported documents.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::{SchemaError, SchemaResult};

/// Prefixes tried, in order, when a reference cannot be resolved relative to its base
pub const FALLBACK_PREFIXES: [&str; 4] = ["", "ebxml/", "w3/", "xmlsoap/"];

/// Normalized location of a document inside a resource store.
///
/// No leading slash, `.` and `..` segments collapsed, never above the store root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath(String);

impl ResourcePath {
    /// Normalize `raw`; `None` when it is empty or climbs above the root
    pub fn parse(raw: &str) -> Option<Self> {
        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop()?;
                }
                other => segments.push(other),
            }
        }

        if segments.is_empty() {
            None
        } else {
            Some(ResourcePath(segments.join("/")))
        }
    }

    /// Resolve `reference` against the directory containing this resource
    pub fn resolve_relative(&self, reference: &str) -> Option<Self> {
        match self.0.rsplit_once('/') {
            Some((dir, _)) => Self::parse(&format!("{}/{}", dir, reference)),
            None => Self::parse(reference),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read access to schema documents by logical path.
///
/// A missing entry must be reported as [`io::ErrorKind::NotFound`].
#[cfg_attr(test, mockall::automock)]
pub trait ResourceStore: Send + Sync {
    fn read(&self, location: &ResourcePath) -> io::Result<Vec<u8>>;
}

/// Schemas laid out under a directory on disk
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceStore for DirectoryStore {
    fn read(&self, location: &ResourcePath) -> io::Result<Vec<u8>> {
        let path = self.root.join(location.as_str());
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a file", path.display()),
            ));
        }
        std::fs::read(path)
    }
}

/// In-memory schemas, keyed by normalized path
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<ResourcePath, Arc<[u8]>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, content: impl AsRef<[u8]>) -> Self {
        self.insert(path, content);
        self
    }

    /// Store `content` at `path`; returns false when the path does not normalize
    pub fn insert(&mut self, path: &str, content: impl AsRef<[u8]>) -> bool {
        match ResourcePath::parse(path) {
            Some(location) => {
                self.entries.insert(location, Arc::from(content.as_ref()));
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceStore for MemoryStore {
    fn read(&self, location: &ResourcePath) -> io::Result<Vec<u8>> {
        self.entries
            .get(location)
            .map(|content| content.to_vec())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, location.to_string()))
    }
}

/// A document found by the resolver, with the location it was found at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    pub location: ResourcePath,
    pub content: Vec<u8>,
}

/// Locates schema documents referenced by `schemaLocation` attributes.
///
/// Stateless apart from the store handle; safe to share between threads.
#[derive(Clone)]
pub struct SchemaResourceResolver {
    store: Arc<dyn ResourceStore>,
}

impl SchemaResourceResolver {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Find `reference` as seen from the document at `base`.
    ///
    /// `./` and `../` references are tried against the base directory first; every
    /// reference then falls back to the prefix list. First match wins.
    pub fn resolve(&self, reference: &str, base: Option<&ResourcePath>) -> Option<ResolvedResource> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }

        if is_relative(reference)
            && let Some(base) = base
            && let Some(candidate) = base.resolve_relative(reference)
            && let Some(found) = self.try_read(candidate)
        {
            return Some(found);
        }

        FALLBACK_PREFIXES
            .iter()
            .filter_map(|prefix| ResourcePath::parse(&format!("{}{}", prefix, reference)))
            .find_map(|candidate| self.try_read(candidate))
    }

    /// Load a group member by its exact path (no fallback)
    pub fn load(&self, path: &str) -> SchemaResult<ResolvedResource> {
        let location = ResourcePath::parse(path).ok_or_else(|| SchemaError::ResourceNotFound {
            path: path.to_string(),
        })?;

        match self.store.read(&location) {
            Ok(content) => Ok(ResolvedResource { location, content }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SchemaError::ResourceNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(SchemaError::ResourceRead {
                path: path.to_string(),
                details: e.to_string(),
            }),
        }
    }

    fn try_read(&self, candidate: ResourcePath) -> Option<ResolvedResource> {
        match self.store.read(&candidate) {
            Ok(content) => Some(ResolvedResource {
                location: candidate,
                content,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                debug!(location = %candidate, error = %e, "schema resource unreadable, skipping");
                None
            }
        }
    }
}

fn is_relative(reference: &str) -> bool {
    reference.starts_with("./") || reference.starts_with("../")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use tempfile::TempDir;

    #[test]
    fn test_resource_path_normalization() {
        assert_eq!(
            ResourcePath::parse("/w3/./xmldsig-core-schema.xsd").unwrap().as_str(),
            "w3/xmldsig-core-schema.xsd"
        );
        assert_eq!(
            ResourcePath::parse("ebxml/../w3/soap-envelope.xsd").unwrap().as_str(),
            "w3/soap-envelope.xsd"
        );
        assert!(ResourcePath::parse("../../../soap-envelope.xsd").is_none());
        assert!(ResourcePath::parse("").is_none());
        assert!(ResourcePath::parse("./").is_none());
    }

    #[test]
    fn test_resolve_relative() {
        let base = ResourcePath::parse("ebxml/ebms-header-3_0-200704.xsd").unwrap();
        assert_eq!(
            base.resolve_relative("../w3/xmldsig-core-schema.xsd").unwrap().as_str(),
            "w3/xmldsig-core-schema.xsd"
        );
        assert_eq!(
            base.resolve_relative("./ebbp-signals-2.0.xsd").unwrap().as_str(),
            "ebxml/ebbp-signals-2.0.xsd"
        );
        assert!(base.resolve_relative("../../escape.xsd").is_none());

        let top = ResourcePath::parse("root.xsd").unwrap();
        assert_eq!(top.resolve_relative("./sibling.xsd").unwrap().as_str(), "sibling.xsd");
    }

    fn store() -> Arc<dyn ResourceStore> {
        Arc::new(
            MemoryStore::new()
                .with("w3/xmldsig-core-schema.xsd", "dsig")
                .with("ebxml/ebbp-signals-2.0.xsd", "ebbp")
                .with("ebxml/shared.xsd", "ebxml shared")
                .with("xmlsoap/shared.xsd", "xmlsoap shared"),
        )
    }

    #[test]
    fn test_relative_reference_resolves_against_base() {
        let resolver = SchemaResourceResolver::new(store());
        let base = ResourcePath::parse("ebxml/ebms-header-3_0-200704.xsd").unwrap();

        let found = resolver
            .resolve("../w3/xmldsig-core-schema.xsd", Some(&base))
            .unwrap();
        assert_eq!(found.location.as_str(), "w3/xmldsig-core-schema.xsd");
        assert_eq!(found.content, b"dsig");
    }

    #[test]
    fn test_bare_reference_uses_prefixes_in_order() {
        let resolver = SchemaResourceResolver::new(store());
        let base = ResourcePath::parse("ebxml/ebbp-signals-2.0.xsd").unwrap();

        let dsig = resolver
            .resolve("xmldsig-core-schema.xsd", Some(&base))
            .unwrap();
        assert_eq!(dsig.location.as_str(), "w3/xmldsig-core-schema.xsd");

        // ebxml/ precedes xmlsoap/
        let shared = resolver.resolve("shared.xsd", None).unwrap();
        assert_eq!(shared.location.as_str(), "ebxml/shared.xsd");
        assert_eq!(shared.content, b"ebxml shared");
    }

    #[test]
    fn test_unresolvable_references() {
        let resolver = SchemaResourceResolver::new(store());
        let base = ResourcePath::parse("ebxml/ebbp-signals-2.0.xsd").unwrap();

        assert!(resolver.resolve("missing.xsd", Some(&base)).is_none());
        assert!(resolver.resolve("../../../soap-envelope.xsd", Some(&base)).is_none());
        assert!(resolver.resolve("", Some(&base)).is_none());
    }

    #[test]
    fn test_relative_reference_falls_back_to_prefixes() {
        let resolver = SchemaResourceResolver::new(store());
        let base = ResourcePath::parse("custom/nested/thing.xsd").unwrap();

        // custom/nested/xmldsig-core-schema.xsd does not exist; w3/ prefix does
        let found = resolver
            .resolve("./xmldsig-core-schema.xsd", Some(&base))
            .unwrap();
        assert_eq!(found.location.as_str(), "w3/xmldsig-core-schema.xsd");
    }

    #[test]
    fn test_store_errors_are_treated_as_not_found() {
        let mut mock = MockResourceStore::new();
        let mut seq = Sequence::new();

        mock.expect_read()
            .withf(|location| location.as_str() == "shared.xsd")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")));
        mock.expect_read()
            .withf(|location| location.as_str() == "ebxml/shared.xsd")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(b"found".to_vec()));

        let resolver = SchemaResourceResolver::new(Arc::new(mock));
        let found = resolver.resolve("shared.xsd", None).unwrap();
        assert_eq!(found.location.as_str(), "ebxml/shared.xsd");
    }

    #[test]
    fn test_first_match_wins_stops_probing() {
        let mut mock = MockResourceStore::new();
        mock.expect_read()
            .withf(|location| location.as_str() == "w3/other.xsd")
            .times(1)
            .returning(|_| Ok(b"sibling".to_vec()));

        let resolver = SchemaResourceResolver::new(Arc::new(mock));
        let base = ResourcePath::parse("w3/base.xsd").unwrap();
        let found = resolver.resolve("./other.xsd", Some(&base)).unwrap();
        assert_eq!(found.content, b"sibling");
    }

    #[test]
    fn test_load_member() {
        let resolver = SchemaResourceResolver::new(store());

        let member = resolver.load("/w3/xmldsig-core-schema.xsd").unwrap();
        assert_eq!(member.location.as_str(), "w3/xmldsig-core-schema.xsd");

        assert_eq!(
            resolver.load("nonexistent/path/schema.xsd").unwrap_err(),
            SchemaError::ResourceNotFound {
                path: "nonexistent/path/schema.xsd".to_string()
            }
        );
        assert!(matches!(
            resolver.load("../../../soap-envelope.xsd"),
            Err(SchemaError::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn test_load_member_read_failure() {
        let mut mock = MockResourceStore::new();
        mock.expect_read()
            .returning(|_| Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")));

        let resolver = SchemaResourceResolver::new(Arc::new(mock));
        match resolver.load("w3/soap-envelope.xsd") {
            Err(SchemaError::ResourceRead { path, details }) => {
                assert_eq!(path, "w3/soap-envelope.xsd");
                assert!(details.contains("denied"));
            }
            other => panic!("Expected ResourceRead, got {:?}", other),
        }
    }

    #[test]
    fn test_directory_store() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("w3")).unwrap();
        std::fs::write(temp_dir.path().join("w3/a.xsd"), "<a/>").unwrap();

        let store = DirectoryStore::new(temp_dir.path());
        let location = ResourcePath::parse("w3/a.xsd").unwrap();
        assert_eq!(store.read(&location).unwrap(), b"<a/>");

        let missing = ResourcePath::parse("w3/b.xsd").unwrap();
        assert_eq!(store.read(&missing).unwrap_err().kind(), io::ErrorKind::NotFound);

        let directory = ResourcePath::parse("w3").unwrap();
        assert_eq!(store.read(&directory).unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_memory_store_rejects_escaping_keys() {
        let mut store = MemoryStore::new();
        assert!(!store.insert("../outside.xsd", "x"));
        assert!(store.insert("./inside.xsd", "x"));
        assert_eq!(store.len(), 1);
    }
}
