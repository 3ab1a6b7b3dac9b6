//! # apikit-validate Library
//!
//! Charset normalization and schema validation of inbound API payloads.
//! JSON payloads are checked against JSON Schema, XML payloads against XSD
//! through libxml2. Compiled schemas and payload transformers are built once
//! per key and shared between concurrent requests.

pub mod cache;
pub mod charset;
pub mod cli;
pub mod config;
pub mod error;
pub mod json_validator;
pub mod libxml2;
pub mod media_type;
pub mod output;
pub mod payload;
pub mod schema_source;
pub mod transform;
pub mod validator;
pub mod xml_validator;

pub use cache::{CacheConfig, CacheStats, KeyedBuildCache};
pub use charset::{Bom, Encoding};
pub use cli::{Cli, VerbosityLevel};
pub use config::{Config, ConfigManager};
pub use error::{Result, ValidationError};
pub use json_validator::JsonSchemaValidator;
pub use libxml2::{LibXml2Wrapper, ValidationResult, XmlSchemaPtr};
pub use media_type::MediaType;
pub use output::{Output, PayloadOutcome, PayloadStatus, RunSummary};
pub use payload::{NormalizedPayload, PayloadNormalizer, RawPayload};
pub use schema_source::{ApiIdentity, FsSchemaSource, InMemorySchemaSource, SchemaKey, SchemaSource};
pub use transform::{
    Content, DataType, DataTypePair, Representation, SerializationPolicy, Transformer,
    TransformerRegistry, TransformerResolver,
};
pub use validator::{
    PayloadValidator, ReportPolicy, SchemaValidator, Validated, ValidationReport,
    ValidationSettings,
};
pub use xml_validator::XmlSchemaValidator;
