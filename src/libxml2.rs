//! LibXML2 FFI wrapper for XML Schema validation.
//!
//! No mature pure Rust library validates XML against an XSD, so schemas are
//! compiled and enforced by libxml2 through direct FFI. Documents are parsed
//! from memory with a hardened option set:
//!
//! - `XML_PARSE_NONET`: the parser never opens network resources
//! - no `XML_PARSE_NOENT` / `XML_PARSE_DTDLOAD`: entities are never
//!   substituted and external DTDs and parameter entities are never loaded
//! - `XML_PARSE_IGNORE_ENC`: input is always the already decoded UTF-8 text,
//!   whatever the prolog declares
//!
//! Any document that still carries a DOCTYPE is rejected after parsing.
//!
//! ## Thread safety
//!
//! - **Schema parsing** is not thread-safe in libxml2 and is serialized
//!   through a process-wide lock.
//! - **Document parsing and validation** run in parallel; each call owns its
//!   parser and validation contexts.
//! - **Compiled schemas** are read-only after parsing and shared across
//!   threads through [`XmlSchemaPtr`].

use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Once};

use libc::{c_char, c_int, c_void};

use crate::error::{LibXml2Error, LibXml2Result};

/// libxml2's parser and globals are initialized exactly once.
static LIBXML2_INIT: Once = Once::new();

/// Serializes `xmlSchemaParse`. Held only while compiling a schema.
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

const XML_PARSE_NOERROR: c_int = 1 << 5;
const XML_PARSE_NOWARNING: c_int = 1 << 6;
const XML_PARSE_NONET: c_int = 1 << 11;
const XML_PARSE_IGNORE_ENC: c_int = 1 << 21;

/// Options for parsing untrusted payloads.
const HARDENED_PARSE_OPTIONS: c_int =
    XML_PARSE_NONET | XML_PARSE_NOERROR | XML_PARSE_NOWARNING | XML_PARSE_IGNORE_ENC;

const XML_ERR_WARNING: c_int = 1;

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
pub struct XmlParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDtd {
    _private: [u8; 0],
}

#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();
    pub fn xmlInitGlobals();

    // Schema parsing
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

    // Document parsing
    pub fn xmlNewParserCtxt() -> *mut XmlParserCtxt;
    pub fn xmlFreeParserCtxt(ctxt: *mut XmlParserCtxt);
    pub fn xmlCtxtReadMemory(
        ctxt: *mut XmlParserCtxt,
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlCtxtGetLastError(ctx: *mut c_void) -> *const xmlError;
    pub fn xmlGetIntSubset(doc: *const XmlDoc) -> *mut XmlDtd;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);

    // Schema validation
    pub fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        sherr: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaValidateDoc(ctxt: *const XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;
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

/// A message reported by libxml2 during schema parsing or validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDiagnostic {
    pub warning: bool,
    pub line: i32,
    pub message: String,
}

impl std::fmt::Display for XmlDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.line > 0 {
            write!(f, "line {}: {}", self.line, self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Read a libxml2 error record.
///
/// # Safety
///
/// `error` must be null or point to a live `xmlError`.
unsafe fn diagnostic_from(error: *const xmlError) -> Option<XmlDiagnostic> {
    if error.is_null() {
        return None;
    }
    let error = unsafe { &*error };
    if error.message.is_null() {
        return None;
    }
    let message = unsafe { CStr::from_ptr(error.message) }
        .to_string_lossy()
        .trim()
        .to_string();

    Some(XmlDiagnostic {
        warning: error.level == XML_ERR_WARNING,
        line: error.line,
        message,
    })
}

/// Structured error callback; `user_data` is a `Vec<XmlDiagnostic>`.
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *mut xmlError) {
    if user_data.is_null() {
        return;
    }
    let diagnostics = unsafe { &mut *(user_data as *mut Vec<XmlDiagnostic>) };
    if let Some(diagnostic) = unsafe { diagnostic_from(error) } {
        diagnostics.push(diagnostic);
    }
}

fn buffer_len(len: usize) -> LibXml2Result<c_int> {
    c_int::try_from(len).map_err(|_| LibXml2Error::PayloadTooLarge { len })
}

/// Shared, reference-counted handle to a compiled schema.
#[derive(Debug, Clone)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: compiled xmlSchema structures are read-only after parsing and
// libxml2 supports concurrent validation against them.
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// # Safety
    ///
    /// `ptr` must be null or a schema returned by `xmlSchemaParse` that no
    /// other owner will free.
    pub(crate) unsafe fn from_raw(ptr: *mut XmlSchema) -> LibXml2Result<Self> {
        if ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed {
                details: "libxml2 returned no schema".to_string(),
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

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlSchemaFree(self.ptr);
            }
            self.ptr = std::ptr::null_mut();
        }
    }
}

/// A parsed document, freed on drop. Confined to the thread that parsed it.
#[derive(Debug)]
pub struct XmlDocument {
    ptr: *mut XmlDoc,
}

impl XmlDocument {
    fn has_doctype(&self) -> bool {
        unsafe { !xmlGetIntSubset(self.ptr).is_null() }
    }
}

impl Drop for XmlDocument {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlFreeDoc(self.ptr);
            }
        }
    }
}

struct ParserCtxtGuard(*mut XmlParserCtxt);

impl Drop for ParserCtxtGuard {
    fn drop(&mut self) {
        unsafe {
            xmlFreeParserCtxt(self.0);
        }
    }
}

/// Validation result from libxml2
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Return code 0
    Valid,
    /// Return code > 0
    Invalid {
        error_count: i32,
        errors: Vec<XmlDiagnostic>,
    },
    /// Return code < 0
    InternalError { code: i32 },
}

impl ValidationResult {
    pub fn from_code(code: c_int, errors: Vec<XmlDiagnostic>) -> Self {
        match code {
            0 => ValidationResult::Valid,
            n if n > 0 => ValidationResult::Invalid {
                error_count: n,
                errors,
            },
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

/// Safe access to libxml2 schema compilation, hardened document parsing and
/// schema validation.
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            xmlInitGlobals();
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Compile an XSD held in memory.
    ///
    /// Serialized with every other schema compilation in the process.
    pub fn parse_schema_from_memory(&self, schema_data: &[u8]) -> LibXml2Result<XmlSchemaPtr> {
        let size = buffer_len(schema_data.len())?;
        let _guard = SCHEMA_PARSE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut diagnostics: Vec<XmlDiagnostic> = Vec::new();
        unsafe {
            let parser_ctxt =
                xmlSchemaNewMemParserCtxt(schema_data.as_ptr() as *const c_char, size);
            if parser_ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }

            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(structured_error_callback),
                &mut diagnostics as *mut Vec<XmlDiagnostic> as *mut c_void,
            );

            let schema_ptr = xmlSchemaParse(parser_ctxt);
            xmlSchemaFreeParserCtxt(parser_ctxt);

            if schema_ptr.is_null() {
                return Err(LibXml2Error::SchemaParseFailed {
                    details: join_diagnostics(&diagnostics, "schema could not be compiled"),
                });
            }

            XmlSchemaPtr::from_raw(schema_ptr)
        }
    }

    /// Parse decoded document text with the hardened option set.
    ///
    /// Fails with `MalformedXml` for ill-formed input and `DoctypeForbidden`
    /// for any document with a DOCTYPE.
    pub fn parse_document(&self, xml: &str) -> LibXml2Result<XmlDocument> {
        let size = buffer_len(xml.len())?;
        let encoding = CString::new("UTF-8").map_err(|_| LibXml2Error::MemoryAllocation)?;

        unsafe {
            let ctxt = xmlNewParserCtxt();
            if ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }
            let ctxt = ParserCtxtGuard(ctxt);

            let doc = xmlCtxtReadMemory(
                ctxt.0,
                xml.as_ptr() as *const c_char,
                size,
                std::ptr::null(),
                encoding.as_ptr(),
                HARDENED_PARSE_OPTIONS,
            );

            if doc.is_null() {
                let details = diagnostic_from(xmlCtxtGetLastError(ctxt.0 as *mut c_void))
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "document is not well-formed".to_string());
                return Err(LibXml2Error::MalformedXml { details });
            }

            let document = XmlDocument { ptr: doc };
            if document.has_doctype() {
                return Err(LibXml2Error::DoctypeForbidden);
            }
            Ok(document)
        }
    }

    /// Validate a parsed document against a compiled schema.
    ///
    /// Safe to call concurrently; each call owns its validation context.
    pub fn validate_document(
        &self,
        schema: &XmlSchemaPtr,
        document: &XmlDocument,
    ) -> LibXml2Result<ValidationResult> {
        let mut errors: Vec<XmlDiagnostic> = Vec::new();

        let result_code = unsafe {
            let valid_ctxt = xmlSchemaNewValidCtxt(schema.as_ptr());
            if valid_ctxt.is_null() {
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }

            xmlSchemaSetValidStructuredErrors(
                valid_ctxt,
                Some(structured_error_callback),
                &mut errors as *mut Vec<XmlDiagnostic> as *mut c_void,
            );

            let code = xmlSchemaValidateDoc(valid_ctxt, document.ptr);
            xmlSchemaFreeValidCtxt(valid_ctxt);
            code
        };

        match ValidationResult::from_code(result_code, errors) {
            ValidationResult::InternalError { code } => {
                Err(LibXml2Error::ValidationAborted { code })
            }
            result => Ok(result),
        }
    }

    /// Parse and validate decoded document text in one step.
    pub fn validate_memory(
        &self,
        schema: &XmlSchemaPtr,
        xml: &str,
    ) -> LibXml2Result<ValidationResult> {
        let document = self.parse_document(xml)?;
        self.validate_document(schema, &document)
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}

fn join_diagnostics(diagnostics: &[XmlDiagnostic], fallback: &str) -> String {
    if diagnostics.is_empty() {
        return fallback.to_string();
    }
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
