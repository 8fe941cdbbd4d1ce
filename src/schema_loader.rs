//! Builds a self-contained schema bundle for a group of schema resources.
//!
//! Every member and every document it transitively imports, includes, or redefines is
//! loaded into memory up front. References are resolved through the
//! [`SchemaResourceResolver`] and rewritten to `schema-store:///<path>` URIs, so libxml2
//! never touches the file system or the network while compiling. A generated driver
//! schema then pulls all members into one compilation unit.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::{CStr, CString};
use std::fmt::Display;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Writer};
use tracing::{debug, warn};

use crate::error::{SchemaError, SchemaResult};
use crate::resource::{ResolvedResource, ResourcePath, SchemaResourceResolver};

/// URI scheme under which bundle documents are served to libxml2
pub const STORE_URI_PREFIX: &str = "schema-store:///";

const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";

/// Directory used for generated per-namespace wrapper documents
const BUNDLE_DIR: &str = ".bundle";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReferenceKind {
    Import,
    Include,
    Redefine,
}

impl ReferenceKind {
    fn from_local_name(local: &[u8]) -> Option<Self> {
        match local {
            b"import" => Some(ReferenceKind::Import),
            b"include" => Some(ReferenceKind::Include),
            b"redefine" => Some(ReferenceKind::Redefine),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Import => "import",
            ReferenceKind::Include => "include",
            ReferenceKind::Redefine => "redefine",
        }
    }
}

/// Rewritten schema documents keyed by store location, NUL-terminated for libxml2
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    documents: HashMap<String, CString>,
}

impl SchemaCatalog {
    pub fn insert(&mut self, location: &ResourcePath, content: Vec<u8>) -> SchemaResult<()> {
        let content = CString::new(content).map_err(|_| SchemaError::InvalidResource {
            path: location.to_string(),
            details: "document contains a NUL byte".to_string(),
        })?;
        self.documents.insert(location.to_string(), content);
        Ok(())
    }

    pub fn get(&self, location: &str) -> Option<&CStr> {
        self.documents.get(location).map(CString::as_c_str)
    }

    pub fn contains(&self, location: &ResourcePath) -> bool {
        self.documents.contains_key(location.as_str())
    }

    /// Sorted store locations of every document in the catalog
    pub fn locations(&self) -> Vec<&str> {
        let mut locations: Vec<&str> = self.documents.keys().map(String::as_str).collect();
        locations.sort_unstable();
        locations
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Everything libxml2 needs to compile one schema group
#[derive(Debug)]
pub struct SchemaBundle {
    pub driver: Vec<u8>,
    pub catalog: SchemaCatalog,
    pub members: Vec<ResourcePath>,
}

/// A document after reference rewriting
struct ScannedSchema {
    content: Vec<u8>,
    target_namespace: Option<String>,
    discovered: Vec<ResolvedResource>,
}

/// Loads schema groups through a resolver
#[derive(Clone)]
pub struct SchemaLoader {
    resolver: SchemaResourceResolver,
}

impl SchemaLoader {
    pub fn new(resolver: SchemaResourceResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &SchemaResourceResolver {
        &self.resolver
    }

    /// Load `paths` and everything they reference into a bundle.
    ///
    /// All members are read before any reference is followed; a missing member fails
    /// the whole group.
    pub fn load_bundle(&self, paths: &[&str]) -> SchemaResult<SchemaBundle> {
        if paths.is_empty() {
            return Err(SchemaError::EmptyPathSet);
        }

        let loaded = paths
            .iter()
            .map(|path| self.resolver.load(path))
            .collect::<SchemaResult<Vec<_>>>()?;

        let mut members = Vec::with_capacity(loaded.len());
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        for resource in loaded {
            if seen.insert(resource.location.clone()) {
                members.push(resource.location.clone());
                queue.push_back(resource);
            }
        }

        let mut catalog = SchemaCatalog::default();
        let mut namespaces: HashMap<ResourcePath, Option<String>> = HashMap::new();

        while let Some(document) = queue.pop_front() {
            let scanned = self.rewrite_references(&document)?;
            for found in scanned.discovered {
                if seen.insert(found.location.clone()) {
                    queue.push_back(found);
                }
            }
            namespaces.insert(document.location.clone(), scanned.target_namespace);
            catalog.insert(&document.location, scanned.content)?;
        }

        let member_namespaces: Vec<(ResourcePath, Option<String>)> = members
            .iter()
            .map(|member| (member.clone(), namespaces.get(member).cloned().flatten()))
            .collect();
        let driver = build_driver(&member_namespaces, &mut catalog)?;

        debug!(
            members = members.len(),
            documents = catalog.len(),
            "prepared schema bundle"
        );

        Ok(SchemaBundle {
            driver,
            catalog,
            members,
        })
    }

    /// Resolve and rewrite every import/include/redefine in `document`
    fn rewrite_references(&self, document: &ResolvedResource) -> SchemaResult<ScannedSchema> {
        let invalid = |details: &dyn Display| SchemaError::InvalidResource {
            path: document.location.to_string(),
            details: details.to_string(),
        };

        let mut reader = NsReader::from_reader(document.content.as_slice());
        let mut writer = Writer::new(Vec::with_capacity(document.content.len()));
        let mut buf = Vec::new();
        let mut root_seen = false;
        let mut target_namespace = None;
        let mut discovered = Vec::new();
        let mut entities = HashMap::new();

        loop {
            let (namespace, event) = reader
                .read_resolved_event_into(&mut buf)
                .map_err(|e| invalid(&e))?;
            let in_xsd_ns = matches!(
                namespace,
                ResolveResult::Bound(Namespace(uri)) if uri == XSD_NS.as_bytes()
            );

            if let Event::DocType(doctype) = &event {
                entities = internal_entities(&String::from_utf8_lossy(doctype));
            }

            if !root_seen
                && let Event::Start(element) | Event::Empty(element) = &event
            {
                root_seen = true;
                if !in_xsd_ns || element.local_name().as_ref() != b"schema" {
                    return Err(invalid(&"root element is not xs:schema"));
                }
                target_namespace = element
                    .try_get_attribute("targetNamespace")
                    .map_err(|e| invalid(&e))?
                    .map(|attr| {
                        attr.unescape_value_with(|name| entities.get(name).map(String::as_str))
                            .map(|v| v.into_owned())
                    })
                    .transpose()
                    .map_err(|e| invalid(&e))?;
            }

            let output = match event {
                Event::Eof => break,
                Event::Start(element) => {
                    match self.rewrite_element(&element, in_xsd_ns, document, &entities, &mut discovered)? {
                        Some(rewritten) => Event::Start(rewritten),
                        None => Event::Start(element),
                    }
                }
                Event::Empty(element) => {
                    match self.rewrite_element(&element, in_xsd_ns, document, &entities, &mut discovered)? {
                        Some(rewritten) => Event::Empty(rewritten),
                        None => Event::Empty(element),
                    }
                }
                other => other,
            };

            writer.write_event(output).map_err(|e| invalid(&e))?;
            buf.clear();
        }

        if !root_seen {
            return Err(invalid(&"document has no root element"));
        }

        Ok(ScannedSchema {
            content: writer.into_inner(),
            target_namespace,
            discovered,
        })
    }

    /// `Some` replacement when `element` is a schema reference that needs rewriting
    fn rewrite_element(
        &self,
        element: &BytesStart<'_>,
        in_xsd_ns: bool,
        document: &ResolvedResource,
        entities: &HashMap<String, String>,
        discovered: &mut Vec<ResolvedResource>,
    ) -> SchemaResult<Option<BytesStart<'static>>> {
        let Some(kind) = in_xsd_ns
            .then(|| ReferenceKind::from_local_name(element.local_name().as_ref()))
            .flatten()
        else {
            return Ok(None);
        };

        let invalid = |details: String| SchemaError::InvalidResource {
            path: document.location.to_string(),
            details,
        };

        let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
        let mut rewritten = BytesStart::new(name);
        let mut reference = None;

        for attr in element.attributes() {
            let attr = attr.map_err(|e| invalid(e.to_string()))?;
            if attr.key.as_ref() == b"schemaLocation" {
                let value = attr
                    .unescape_value_with(|name| entities.get(name).map(String::as_str))
                    .map_err(|e| invalid(e.to_string()))?;
                reference = Some(value.into_owned());
            } else {
                rewritten.push_attribute(attr);
            }
        }

        let Some(reference) = reference else {
            return Ok(None);
        };

        match self.resolver.resolve(&reference, Some(&document.location)) {
            Some(found) => {
                let location = format!("{}{}", STORE_URI_PREFIX, found.location);
                rewritten.push_attribute(("schemaLocation", location.as_str()));
                discovered.push(found);
            }
            None if kind == ReferenceKind::Import => {
                warn!(
                    reference = %reference,
                    base = %document.location,
                    "unresolved schema import, dropping location hint"
                );
            }
            None => {
                return Err(SchemaError::UnresolvedReference {
                    kind: kind.as_str(),
                    reference,
                    base: document.location.to_string(),
                });
            }
        }

        Ok(Some(rewritten))
    }
}

/// General entities declared with a literal value in a DOCTYPE internal subset.
///
/// Parameter entities and external (`SYSTEM`/`PUBLIC`) entities are skipped.
fn internal_entities(doctype: &str) -> HashMap<String, String> {
    let mut entities = HashMap::new();

    for declaration in doctype.split("<!ENTITY").skip(1) {
        let declaration = declaration.trim_start();
        if declaration.starts_with('%') {
            continue;
        }

        let Some((name, rest)) = declaration.split_once(char::is_whitespace) else {
            continue;
        };
        let rest = rest.trim_start();
        let Some(quote) = rest.chars().next().filter(|c| *c == '\'' || *c == '"') else {
            continue;
        };
        if let Some((value, _)) = rest[1..].split_once(quote) {
            entities
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }

    entities
}

/// Driver schema importing namespaced members and including no-namespace ones.
///
/// Members sharing a target namespace are included into a generated wrapper document
/// so that each namespace is imported exactly once.
fn build_driver(
    members: &[(ResourcePath, Option<String>)],
    catalog: &mut SchemaCatalog,
) -> SchemaResult<Vec<u8>> {
    let mut groups: Vec<(Option<&str>, Vec<&ResourcePath>)> = Vec::new();
    for (location, namespace) in members {
        let namespace = namespace.as_deref();
        match groups
            .iter_mut()
            .find(|(existing, _)| namespace.is_some() && *existing == namespace)
        {
            Some((_, locations)) => locations.push(location),
            None => groups.push((namespace, vec![location])),
        }
    }

    let mut references: Vec<(&'static str, Option<&str>, String)> = Vec::new();
    for (index, (namespace, locations)) in groups.iter().enumerate() {
        match (namespace, locations.as_slice()) {
            (None, locations) => {
                for location in locations {
                    references.push(("xs:include", None, store_uri(location)));
                }
            }
            (Some(namespace), [single]) => {
                references.push(("xs:import", Some(*namespace), store_uri(single)));
            }
            (Some(namespace), shared) => {
                let wrapper_location = ResourcePath::parse(&format!("{}/{}.xsd", BUNDLE_DIR, index))
                    .ok_or_else(|| SchemaError::Compile {
                        details: "invalid bundle wrapper location".to_string(),
                    })?;
                let includes = shared
                    .iter()
                    .map(|location| ("xs:include", None, store_uri(location)))
                    .collect::<Vec<_>>();
                catalog.insert(&wrapper_location, write_schema(Some(*namespace), &includes)?)?;
                references.push(("xs:import", Some(*namespace), store_uri(&wrapper_location)));
            }
        }
    }

    write_schema(None, &references)
}

fn store_uri(location: &ResourcePath) -> String {
    format!("{}{}", STORE_URI_PREFIX, location)
}

/// `<xs:schema>` holding one empty element per reference
fn write_schema(
    target_namespace: Option<&str>,
    references: &[(&str, Option<&str>, String)],
) -> SchemaResult<Vec<u8>> {
    let failed = |e: &dyn Display| SchemaError::Compile {
        details: format!("failed to write driver schema: {}", e),
    };

    let mut writer = Writer::new(Vec::new());
    let mut root = BytesStart::new("xs:schema");
    root.push_attribute(("xmlns:xs", XSD_NS));
    if let Some(namespace) = target_namespace {
        root.push_attribute(("targetNamespace", namespace));
    }
    writer
        .write_event(Event::Start(root))
        .map_err(|e| failed(&e))?;

    for (element, namespace, location) in references {
        let mut reference = BytesStart::new(*element);
        if let Some(namespace) = namespace {
            reference.push_attribute(("namespace", *namespace));
        }
        reference.push_attribute(("schemaLocation", location.as_str()));
        writer
            .write_event(Event::Empty(reference))
            .map_err(|e| failed(&e))?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("xs:schema")))
        .map_err(|e| failed(&e))?;
    Ok(writer.into_inner())
}
