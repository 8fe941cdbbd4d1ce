//! LibXML2 FFI wrapper for XML Schema compilation and validation.
//!
//! The Rust ecosystem has no mature XSD validator; roxmltree and quick-xml cover the
//! read-only document view and schema scanning, libxml2 does the schema work.
//!
//! ## Thread safety
//!
//! - **Schema parsing** is NOT thread-safe in libxml2. Every parse in this module runs
//!   under [`SCHEMA_PARSE_LOCK`].
//! - **Validation** is thread-safe for distinct validation contexts. A compiled
//!   [`XmlSchemaPtr`] is shared read-only; each pass creates its own [`ValidCtxt`].
//!
//! ## Schema documents
//!
//! Imports are never fetched from the file system or the network. Schema bundles
//! rewrite every `schemaLocation` to a `schema-store:///` URI, and the external entity
//! loader installed here serves those URIs from the catalog bound to the compiling
//! thread.

use std::cell::RefCell;
use std::ffi::CStr;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex, Once, OnceLock, PoisonError};

use libc::{c_char, c_int, c_uchar, c_void};
use tracing::debug;

use crate::collector::{Diagnostic, Severity, ValidationErrorCollector};
use crate::error::{LibXml2Error, LibXml2Result};
use crate::schema_loader::{STORE_URI_PREFIX, SchemaCatalog};

/// Global initialization flag for libxml2
static LIBXML2_INIT: Once = Once::new();

/// Serializes every call into the libxml2 schema parser
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

/// Loader that was active before ours was installed
static DEFAULT_ENTITY_LOADER: OnceLock<XmlExternalEntityLoader> = OnceLock::new();

thread_local! {
    static ACTIVE_CATALOG: RefCell<Option<Arc<SchemaCatalog>>> = const { RefCell::new(None) };
}

const XML_ERR_WARNING: c_int = 1;
const XML_ERR_FATAL: c_int = 3;

const XML_PARSE_NOERROR: c_int = 1 << 5;
const XML_PARSE_NOWARNING: c_int = 1 << 6;
const XML_PARSE_NONET: c_int = 1 << 11;

const DOCUMENT_PARSE_OPTIONS: c_int = XML_PARSE_NOERROR | XML_PARSE_NOWARNING | XML_PARSE_NONET;

// Opaque libxml2 structures
#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserInput {
    _private: [u8; 0],
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut xmlError)>;

pub type XmlExternalEntityLoader = Option<
    unsafe extern "C" fn(
        url: *const c_char,
        id: *const c_char,
        ctxt: *mut XmlParserCtxt,
    ) -> *mut XmlParserInput,
>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();
    pub fn xmlInitGlobals();

    // Schema parsing functions
    pub fn xmlSchemaNewMemParserCtxt(
        buffer: *const c_char,
        size: c_int,
    ) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Schema validation functions
    pub fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;

    // Instance documents
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);
    pub fn xmlGetLastError() -> *const xmlError;
    pub fn xmlResetLastError();

    // Entity loading
    pub fn xmlGetExternalEntityLoader() -> XmlExternalEntityLoader;
    pub fn xmlSetExternalEntityLoader(loader: XmlExternalEntityLoader);
    pub fn xmlNewStringInputStream(
        ctxt: *mut XmlParserCtxt,
        buffer: *const c_uchar,
    ) -> *mut XmlParserInput;
}

/// Convert a libxml2 error record into a diagnostic
///
/// # Safety
///
/// `error.message` must be null or point to a NUL-terminated string.
unsafe fn diagnostic_from(error: &xmlError) -> Diagnostic {
    let message = if error.message.is_null() {
        "unknown libxml2 error".to_string()
    } else {
        unsafe { CStr::from_ptr(error.message) }
            .to_string_lossy()
            .trim()
            .to_string()
    };

    let severity = match error.level {
        XML_ERR_WARNING => Severity::Warning,
        XML_ERR_FATAL => Severity::Fatal,
        _ => Severity::Error,
    };

    Diagnostic::new(
        severity,
        error.line.max(0) as u32,
        error.int2.max(0) as u32,
        message,
    )
}

/// Structured error callback; `user_data` is a `ValidationErrorCollector`
unsafe extern "C" fn collect_structured_error(user_data: *mut c_void, error: *mut xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }

    let collector = unsafe { &mut *(user_data as *mut ValidationErrorCollector) };
    let diagnostic = unsafe { diagnostic_from(&*error) };
    collector.record(diagnostic);
}

/// Serves `schema-store:///` URIs from the catalog bound to the current thread
unsafe extern "C" fn catalog_entity_loader(
    url: *const c_char,
    id: *const c_char,
    ctxt: *mut XmlParserCtxt,
) -> *mut XmlParserInput {
    let catalog = ACTIVE_CATALOG
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten();

    let Some(catalog) = catalog else {
        return match DEFAULT_ENTITY_LOADER.get().copied().flatten() {
            Some(default_loader) => unsafe { default_loader(url, id, ctxt) },
            None => ptr::null_mut(),
        };
    };

    if url.is_null() {
        return ptr::null_mut();
    }

    let requested = unsafe { CStr::from_ptr(url) }.to_string_lossy();
    let document = requested
        .strip_prefix(STORE_URI_PREFIX)
        .and_then(|location| catalog.get(location));

    match document {
        Some(content) => unsafe { xmlNewStringInputStream(ctxt, content.as_ptr() as *const c_uchar) },
        None => {
            debug!(url = %requested, "refusing entity outside the schema catalog");
            ptr::null_mut()
        }
    }
}

/// Binds a catalog to the current thread for the duration of one schema parse
struct CatalogScope;

impl CatalogScope {
    fn enter(catalog: Arc<SchemaCatalog>) -> Self {
        ACTIVE_CATALOG.with(|slot| *slot.borrow_mut() = Some(catalog));
        CatalogScope
    }
}

impl Drop for CatalogScope {
    fn drop(&mut self) {
        let _ = ACTIVE_CATALOG.try_with(|slot| slot.borrow_mut().take());
    }
}

/// Thread-safe wrapper for a compiled libxml2 schema
///
/// Frees the schema when the last clone is dropped. libxml2 schemas are read-only
/// after parsing and can be shared across validation threads.
#[derive(Debug)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: libxml2 documentation states that xmlSchema structures are thread-safe for reading
// See: http://xmlsoft.org/threads.html
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// # Safety
    ///
    /// `ptr` must come from `xmlSchemaParse` and must not be freed elsewhere.
    pub(crate) unsafe fn from_raw(ptr: *mut XmlSchema) -> LibXml2Result<Self> {
        if ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed {
                details: "null schema pointer".to_string(),
            });
        }

        Ok(XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                _phantom: PhantomData,
            }),
        })
    }

    pub(crate) fn as_ptr(&self) -> *const XmlSchema {
        self.inner.ptr
    }

    pub fn is_valid(&self) -> bool {
        !self.inner.ptr.is_null()
    }
}

impl Clone for XmlSchemaPtr {
    fn clone(&self) -> Self {
        XmlSchemaPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlSchemaFree(self.ptr);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

/// Outcome of one libxml2 validation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Validation succeeded (return code 0)
    Valid,
    /// Document not well-formed or not schema-valid
    Invalid { error_count: i32 },
    /// Internal error occurred (return code < 0)
    InternalError { code: i32 },
}

impl ValidationResult {
    pub fn from_code(code: c_int) -> Self {
        match code {
            0 => ValidationResult::Valid,
            n if n > 0 => ValidationResult::Invalid { error_count: n },
            n => ValidationResult::InternalError { code: n },
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationResult::Invalid { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ValidationResult::InternalError { .. })
    }
}

/// A libxml2 validation context bound to one compiled schema.
///
/// Holds a raw context pointer, so it is neither `Send` nor `Sync`.
pub struct ValidCtxt {
    ptr: NonNull<XmlSchemaValidCtxt>,
    _schema: XmlSchemaPtr,
}

impl ValidCtxt {
    /// Parse `document` and validate it, reporting into `collector`.
    ///
    /// A document that is not well-formed yields one fatal diagnostic and `Invalid`.
    pub fn validate_memory(
        &mut self,
        document: &[u8],
        collector: &mut ValidationErrorCollector,
    ) -> LibXml2Result<ValidationResult> {
        let size = c_int::try_from(document.len()).map_err(|_| LibXml2Error::DocumentTooLarge {
            size: document.len(),
        })?;

        unsafe {
            xmlResetLastError();
            let doc = xmlReadMemory(
                document.as_ptr() as *const c_char,
                size,
                ptr::null(),
                ptr::null(),
                DOCUMENT_PARSE_OPTIONS,
            );

            if doc.is_null() {
                let last = xmlGetLastError();
                let mut diagnostic = if last.is_null() {
                    Diagnostic::new(Severity::Fatal, 0, 0, "Document is not well-formed")
                } else {
                    diagnostic_from(&*last)
                };
                diagnostic.severity = Severity::Fatal;
                collector.record(diagnostic);
                return Ok(ValidationResult::Invalid { error_count: 1 });
            }

            xmlSchemaSetValidStructuredErrors(
                self.ptr.as_ptr(),
                Some(collect_structured_error),
                collector as *mut ValidationErrorCollector as *mut c_void,
            );

            let code = xmlSchemaValidateDoc(self.ptr.as_ptr(), doc);

            // The collector borrow ends here
            xmlSchemaSetValidStructuredErrors(self.ptr.as_ptr(), None, ptr::null_mut());
            xmlFreeDoc(doc);

            match ValidationResult::from_code(code) {
                ValidationResult::InternalError { code } => Err(LibXml2Error::InternalError { code }),
                result => Ok(result),
            }
        }
    }
}

impl Drop for ValidCtxt {
    fn drop(&mut self) {
        unsafe {
            xmlSchemaFreeValidCtxt(self.ptr.as_ptr());
        }
    }
}

/// Entry point for all libxml2 work
///
/// Creating a wrapper initializes libxml2 and installs the catalog entity loader,
/// once per process.
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            xmlInitGlobals();
            let _ = DEFAULT_ENTITY_LOADER.set(xmlGetExternalEntityLoader());
            xmlSetExternalEntityLoader(Some(catalog_entity_loader));
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Compile a self-contained schema held in memory
    pub fn parse_schema_from_memory(&self, schema_data: &[u8]) -> LibXml2Result<XmlSchemaPtr> {
        self.parse_serialized(schema_data, None)
    }

    /// Compile `driver`, serving every `schema-store:///` reference from `catalog`
    pub fn compile_with_catalog(
        &self,
        driver: &[u8],
        catalog: Arc<SchemaCatalog>,
    ) -> LibXml2Result<XmlSchemaPtr> {
        self.parse_serialized(driver, Some(catalog))
    }

    fn parse_serialized(
        &self,
        schema_data: &[u8],
        catalog: Option<Arc<SchemaCatalog>>,
    ) -> LibXml2Result<XmlSchemaPtr> {
        let size = c_int::try_from(schema_data.len()).map_err(|_| LibXml2Error::DocumentTooLarge {
            size: schema_data.len(),
        })?;

        let _guard = SCHEMA_PARSE_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _scope = catalog.map(CatalogScope::enter);
        let mut collector = ValidationErrorCollector::new();

        unsafe {
            let parser_ctxt = xmlSchemaNewMemParserCtxt(schema_data.as_ptr() as *const c_char, size);
            if parser_ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }

            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(collect_structured_error),
                &mut collector as *mut ValidationErrorCollector as *mut c_void,
            );

            let schema_ptr = xmlSchemaParse(parser_ctxt);
            xmlSchemaFreeParserCtxt(parser_ctxt);

            if schema_ptr.is_null() {
                let details = collector.errors_as_string();
                return Err(LibXml2Error::SchemaParseFailed {
                    details: if details.is_empty() {
                        "no schema produced".to_string()
                    } else {
                        details.trim_end().to_string()
                    },
                });
            }

            for warning in collector.warnings() {
                debug!(%warning, "schema compiler warning");
            }

            XmlSchemaPtr::from_raw(schema_ptr)
        }
    }

    /// Create a fresh validation context for `schema`
    pub fn new_valid_ctxt(&self, schema: &XmlSchemaPtr) -> LibXml2Result<ValidCtxt> {
        let raw = unsafe { xmlSchemaNewValidCtxt(schema.as_ptr()) };
        let ptr = NonNull::new(raw).ok_or(LibXml2Error::ValidationContextCreationFailed)?;

        Ok(ValidCtxt {
            ptr,
            _schema: schema.clone(),
        })
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}
