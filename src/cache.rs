//! Compiled schema cache.
//!
//! A [`SchemaContextCache`] is constructed explicitly and owned by whoever wires the
//! application together. It compiles each schema group at most once and hands out the
//! same `Arc<CompiledSchema>` for every later request. Entries never expire.
//!
//! `moka`'s `try_get_with` coalesces concurrent misses on one key: a single caller
//! compiles, the others wait and receive the published artifact. Failures are returned
//! to every waiter and are not cached.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collector::{Diagnostic, ValidationErrorCollector};
use crate::document;
use crate::error::{Result, SchemaError, SchemaResult, ValidationError};
use crate::libxml2::{LibXml2Wrapper, ValidCtxt, ValidationResult, XmlSchemaPtr};
use crate::resource::{ResourcePath, ResourceStore, SchemaResourceResolver};
use crate::schema_loader::SchemaLoader;

pub const SOAP_ENVELOPE_XSD: &str = "w3/soap-envelope.xsd";
pub const EBMS_HEADER_XSD: &str = "ebxml/ebms-header-3_0-200704.xsd";
pub const EBBP_SIGNALS_XSD: &str = "ebxml/ebbp-signals-2.0.xsd";
pub const XMLDSIG_XSD: &str = "w3/xmldsig-core-schema.xsd";

/// Named schema group for one message family
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationContext {
    SignalMessage,
    UserMessage,
    NrrReceipt,
}

impl ValidationContext {
    pub const ALL: [ValidationContext; 3] = [
        ValidationContext::SignalMessage,
        ValidationContext::UserMessage,
        ValidationContext::NrrReceipt,
    ];

    /// Member schemas, in compilation order
    pub fn schema_paths(&self) -> &'static [&'static str] {
        match self {
            ValidationContext::SignalMessage | ValidationContext::UserMessage => {
                &[SOAP_ENVELOPE_XSD, EBMS_HEADER_XSD, XMLDSIG_XSD]
            }
            ValidationContext::NrrReceipt => &[EBMS_HEADER_XSD, EBBP_SIGNALS_XSD, XMLDSIG_XSD],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValidationContext::SignalMessage => "signal-message",
            ValidationContext::UserMessage => "user-message",
            ValidationContext::NrrReceipt => "nrr-receipt",
        }
    }
}

impl fmt::Display for ValidationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cache key. Custom path lists are order-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SchemaKey {
    Context(ValidationContext),
    Paths(String),
}

impl SchemaKey {
    pub fn for_paths(paths: &[&str]) -> Self {
        SchemaKey::Paths(paths.join("|"))
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaKey::Context(context) => write!(f, "context:{}", context),
            SchemaKey::Paths(paths) => write!(f, "paths:{}", paths),
        }
    }
}

/// An immutable compiled schema group, shared between threads
#[derive(Debug)]
pub struct CompiledSchema {
    key: SchemaKey,
    members: Vec<ResourcePath>,
    document_count: usize,
    schema: XmlSchemaPtr,
}

impl CompiledSchema {
    pub fn key(&self) -> &SchemaKey {
        &self.key
    }

    pub fn members(&self) -> &[ResourcePath] {
        &self.members
    }

    /// Number of schema documents in the compiled closure, generated ones included
    pub fn document_count(&self) -> usize {
        self.document_count
    }

    pub(crate) fn schema_ptr(&self) -> &XmlSchemaPtr {
        &self.schema
    }
}

pub struct SchemaContextCache {
    compiled: Cache<SchemaKey, Arc<CompiledSchema>>,
    loader: SchemaLoader,
    libxml2: LibXml2Wrapper,
}

impl SchemaContextCache {
    pub fn new(resolver: SchemaResourceResolver) -> Self {
        Self {
            compiled: Cache::builder().build(),
            loader: SchemaLoader::new(resolver),
            libxml2: LibXml2Wrapper::new(),
        }
    }

    pub fn from_store(store: Arc<dyn ResourceStore>) -> Self {
        Self::new(SchemaResourceResolver::new(store))
    }

    /// Compiled schema for a built-in context
    pub fn get(&self, context: ValidationContext) -> Result<Arc<CompiledSchema>> {
        self.get_or_compile(SchemaKey::Context(context), context.schema_paths())
    }

    /// Compiled schema for an explicit, ordered list of resource paths
    pub fn get_paths(&self, paths: &[&str]) -> Result<Arc<CompiledSchema>> {
        if paths.is_empty() {
            return Err(SchemaError::EmptyPathSet.into());
        }
        self.get_or_compile(SchemaKey::for_paths(paths), paths)
    }

    fn get_or_compile(&self, key: SchemaKey, paths: &[&str]) -> Result<Arc<CompiledSchema>> {
        if let Some(hit) = self.compiled.get(&key) {
            return Ok(hit);
        }

        self.compiled
            .try_get_with(key.clone(), || self.compile(key, paths))
            .map_err(|e| ValidationError::SchemaCompilation((*e).clone()))
    }

    fn compile(&self, key: SchemaKey, paths: &[&str]) -> SchemaResult<Arc<CompiledSchema>> {
        let started = Instant::now();
        let bundle = self.loader.load_bundle(paths)?;
        let document_count = bundle.catalog.len();
        let schema = self
            .libxml2
            .compile_with_catalog(&bundle.driver, Arc::new(bundle.catalog))?;

        debug!(
            key = %key,
            documents = document_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compiled schema group"
        );

        Ok(Arc::new(CompiledSchema {
            key,
            members: bundle.members,
            document_count,
            schema,
        }))
    }

    /// A fresh session for one structural pass; never shared
    pub fn new_validation_session(&self, schema: &Arc<CompiledSchema>) -> Result<ValidationSession> {
        let ctxt = self.libxml2.new_valid_ctxt(schema.schema_ptr())?;
        Ok(ValidationSession {
            ctxt,
            schema: Arc::clone(schema),
        })
    }

    /// Compile (or fetch) `context` and open a session on it
    pub fn session_for(&self, context: ValidationContext) -> Result<ValidationSession> {
        let schema = self.get(context)?;
        self.new_validation_session(&schema)
    }

    /// Compile every built-in context
    pub fn warm_up(&self) -> Result<()> {
        for context in ValidationContext::ALL {
            self.get(context)?;
        }
        Ok(())
    }

    pub fn contains(&self, key: &SchemaKey) -> bool {
        self.compiled.contains_key(key)
    }

    pub fn len(&self) -> u64 {
        self.compiled.run_pending_tasks();
        self.compiled.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs exactly one structural validation pass.
///
/// Consumed by the pass; not `Send`, so it stays on the thread that created it.
pub struct ValidationSession {
    ctxt: ValidCtxt,
    schema: Arc<CompiledSchema>,
}

impl ValidationSession {
    pub fn schema(&self) -> &Arc<CompiledSchema> {
        &self.schema
    }

    /// Validate a serialized document, reporting every diagnostic into `collector`
    pub fn validate(
        mut self,
        document: &[u8],
        collector: &mut ValidationErrorCollector,
    ) -> Result<ValidationResult> {
        Ok(self.ctxt.validate_memory(document, collector)?)
    }

    /// Validate `node` as a standalone document
    pub fn validate_node(
        self,
        node: roxmltree::Node<'_, '_>,
        collector: &mut ValidationErrorCollector,
    ) -> Result<ValidationResult> {
        let serialized = document::serialize_subtree(node)?;
        self.validate(serialized.as_bytes(), collector)
    }

    /// Validate with a private collector; `Ok` carries the warnings
    pub fn check(self, document: &[u8]) -> Result<Vec<Diagnostic>> {
        let mut collector = ValidationErrorCollector::new();
        self.validate(document, &mut collector)?;
        collector.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryStore;

    const ORDER_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
    targetNamespace="urn:order" xmlns:o="urn:order" elementFormDefault="qualified">
  <xs:import namespace="urn:common" schemaLocation="common.xsd"/>
  <xs:element name="order" type="xs:positiveInteger"/>
</xs:schema>"#;

    const COMMON_XSD: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
    targetNamespace="urn:common">
  <xs:element name="note" type="xs:string"/>
</xs:schema>"#;

    fn cache() -> SchemaContextCache {
        SchemaContextCache::from_store(Arc::new(
            MemoryStore::new()
                .with("orders/order.xsd", ORDER_XSD)
                .with("ebxml/common.xsd", COMMON_XSD),
        ))
    }

    #[test]
    fn test_context_paths() {
        assert_eq!(
            ValidationContext::NrrReceipt.schema_paths(),
            &[EBMS_HEADER_XSD, EBBP_SIGNALS_XSD, XMLDSIG_XSD]
        );
        assert_eq!(
            ValidationContext::SignalMessage.schema_paths(),
            ValidationContext::UserMessage.schema_paths()
        );
        assert_eq!(ValidationContext::NrrReceipt.to_string(), "nrr-receipt");
    }

    #[test]
    fn test_path_keys_are_order_sensitive() {
        assert_eq!(
            SchemaKey::for_paths(&["a.xsd", "b.xsd"]),
            SchemaKey::Paths("a.xsd|b.xsd".to_string())
        );
        assert_ne!(
            SchemaKey::for_paths(&["a.xsd", "b.xsd"]),
            SchemaKey::for_paths(&["b.xsd", "a.xsd"])
        );
    }

    #[test]
    fn test_repeated_get_returns_same_instance() {
        let cache = cache();
        let first = cache.get_paths(&["orders/order.xsd"]).unwrap();
        let second = cache.get_paths(&["orders/order.xsd"]).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.document_count(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_missing_path_is_never_cached() {
        let cache = cache();
        let key = SchemaKey::for_paths(&["nonexistent/path/schema.xsd"]);

        for _ in 0..2 {
            match cache.get_paths(&["nonexistent/path/schema.xsd"]) {
                Err(ValidationError::SchemaCompilation(SchemaError::ResourceNotFound { path })) => {
                    assert_eq!(path, "nonexistent/path/schema.xsd")
                }
                other => panic!("Expected ResourceNotFound, got {:?}", other.map(|_| ())),
            }
        }
        assert!(!cache.contains(&key));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_session_runs_one_pass() {
        let cache = cache();
        let schema = cache.get_paths(&["orders/order.xsd"]).unwrap();

        let session = cache.new_validation_session(&schema).unwrap();
        assert!(Arc::ptr_eq(session.schema(), &schema));
        assert!(
            session
                .check(br#"<order xmlns="urn:order">12</order>"#)
                .unwrap()
                .is_empty()
        );

        let session = cache.new_validation_session(&schema).unwrap();
        let err = session
            .check(br#"<order xmlns="urn:order">twelve</order>"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::StructuralValidationFailure { .. }
        ));
    }

    #[test]
    fn test_empty_path_list() {
        assert!(matches!(
            cache().get_paths(&[]),
            Err(ValidationError::SchemaCompilation(SchemaError::EmptyPathSet))
        ));
    }
}
