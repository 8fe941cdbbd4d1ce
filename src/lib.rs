//! # as4-validate Library
//!
//! Two-tier validation of AS4 (ebMS 3.0) messages: structural validation against
//! compiled XSD schema groups, cached per validation context, and profile
//! conformance rules for non-repudiation receipts.

pub mod cache;
pub mod cli;
pub mod collector;
pub mod config;
pub mod conformance;
pub mod document;
pub mod error;
pub mod file_discovery;
pub mod libxml2;
pub mod namespace;
pub mod output;
pub mod policy;
pub mod receipt;
pub mod resource;
pub mod schema_loader;
pub mod validator;

pub use cache::{
    CompiledSchema, SchemaContextCache, SchemaKey, ValidationContext, ValidationSession,
};
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use collector::{Diagnostic, Severity, ValidationErrorCollector};
pub use config::{Config, ConfigError, ConfigManager};
pub use conformance::ConformanceRuleEngine;
pub use error::{ConformanceCode, ConformanceError, SchemaError, ValidationError};
pub use file_discovery::{DiscoveryStats, FileDiscovery};
pub use libxml2::{LibXml2Wrapper, ValidationResult, XmlSchemaPtr};
pub use namespace::NamespaceRegistry;
pub use output::Output;
pub use policy::{Action, ValidationMode, ValidationOutcomePolicy};
pub use receipt::{ReceiptOutcome, ReceiptValidator};
pub use resource::{
    DirectoryStore, MemoryStore, ResourcePath, ResourceStore, SchemaResourceResolver,
};
pub use schema_loader::{SchemaBundle, SchemaCatalog, SchemaLoader};
pub use validator::{
    FileValidationResult, ValidationConfig, ValidationEngine, ValidationResults,
    ValidationStatus,
};
