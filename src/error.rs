use std::path::PathBuf;

use thiserror::Error;

use crate::collector::{Diagnostic, render_diagnostics};

/// Main error type covering both validation tiers and the tool around them
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Schema compilation failed: {0}")]
    SchemaCompilation(#[from] SchemaError),

    #[error("Structural validation failed: {}", render_diagnostics(.errors).trim_end())]
    StructuralValidationFailure {
        errors: Vec<Diagnostic>,
        warnings: Vec<Diagnostic>,
    },

    #[error("Receipt not found in the response message")]
    ReceiptAbsent,

    #[error("{0}")]
    Conformance(ConformanceError),

    #[error("No prefix found for namespace URI: {uri}")]
    UnknownNamespace { uri: String },

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LibXML2 internal error: {details}")]
    LibXml2Internal { details: String },

    #[error("File system traversal error: {path} - {reason}")]
    FileSystemTraversal { path: PathBuf, reason: String },

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

impl ValidationError {
    /// ebMS error code reported to the sending party, when one applies
    pub fn ebms_code(&self) -> Option<&'static str> {
        match self {
            ValidationError::ReceiptAbsent => Some(ConformanceCode::ReceiptAbsent.ebms_code()),
            ValidationError::Conformance(err) => Some(err.code.ebms_code()),
            ValidationError::StructuralValidationFailure { .. } => Some(EBMS_INVALID_RECEIPT),
            _ => None,
        }
    }
}

/// Failures while loading, resolving, or compiling a group of schemas.
///
/// `Clone` so that every caller coalesced onto one failed compilation gets the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema resource not found: {path}")]
    ResourceNotFound { path: String },

    #[error("Failed to read schema resource: {path} - {details}")]
    ResourceRead { path: String, details: String },

    #[error("Invalid schema resource: {path} - {details}")]
    InvalidResource { path: String, details: String },

    #[error("Unresolved schema {kind} '{reference}' in {base}")]
    UnresolvedReference {
        kind: &'static str,
        reference: String,
        base: String,
    },

    #[error("Empty schema path set")]
    EmptyPathSet,

    #[error("{details}")]
    Compile { details: String },
}

pub const EBMS_RECEIPT_MISSING: &str = "EBMS:0301";
pub const EBMS_INVALID_RECEIPT: &str = "EBMS:0302";

/// Fixed taxonomy of conformance failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ConformanceCode {
    ReceiptAbsent,
    MissingNonRepudiationInformation,
    MultipleNonRepudiationInformation,
    MissingMessagePartNRInformation,
    ReferenceWithMessagePartIdentifier,
    MissingDigestReference,
    MultipleReceipts,
    MessagingHeader,
}

impl ConformanceCode {
    pub fn ebms_code(&self) -> &'static str {
        match self {
            ConformanceCode::ReceiptAbsent => EBMS_RECEIPT_MISSING,
            _ => EBMS_INVALID_RECEIPT,
        }
    }

    pub fn is_violation(&self) -> bool {
        !matches!(self, ConformanceCode::ReceiptAbsent)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConformanceError {
    pub message: String,
    pub code: ConformanceCode,
}

impl ConformanceError {
    pub fn new(code: ConformanceCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

impl From<ConformanceError> for ValidationError {
    fn from(err: ConformanceError) -> Self {
        match err.code {
            ConformanceCode::ReceiptAbsent => ValidationError::ReceiptAbsent,
            _ => ValidationError::Conformance(err),
        }
    }
}

/// Errors building or serializing the read-only document view
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("XML is not well-formed: {0}")]
    Parse(#[from] roxmltree::Error),

    #[error("Failed to serialize element {element}: {details}")]
    Serialize { element: String, details: String },
}

/// LibXML2-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: {details}")]
    SchemaParseFailed { details: String },

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Document too large for libxml2: {size} bytes")]
    DocumentTooLarge { size: usize },

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Schema validation internal error: code {code}")]
    InternalError { code: i32 },
}

impl From<LibXml2Error> for ValidationError {
    fn from(err: LibXml2Error) -> Self {
        ValidationError::LibXml2Internal {
            details: err.to_string(),
        }
    }
}

impl From<LibXml2Error> for SchemaError {
    fn from(err: LibXml2Error) -> Self {
        match err {
            LibXml2Error::SchemaParseFailed { details } => SchemaError::Compile { details },
            other => SchemaError::Compile {
                details: other.to_string(),
            },
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Schema compilation result type alias
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
