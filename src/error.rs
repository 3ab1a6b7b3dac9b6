use thiserror::Error;

/// Main error type: every failure is classified as either client-caused
/// (`BadRequest`) or internal before it leaves a validator.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Failed to build {key}: {details}")]
    Build { key: String, details: String },

    #[error("Internal error: {details}")]
    Internal { details: String },

    #[error("Timed out after {waited_ms}ms waiting for build of {key}")]
    Timeout { key: String, waited_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ValidationError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ValidationError::BadRequest {
            message: message.into(),
        }
    }

    pub fn internal(details: impl Into<String>) -> Self {
        ValidationError::Internal {
            details: details.into(),
        }
    }

    /// True for failures attributable to the request payload.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ValidationError::BadRequest { .. })
    }

    /// HTTP-equivalent status code for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            ValidationError::BadRequest { .. } => 400,
            ValidationError::Timeout { .. } => 504,
            _ => 500,
        }
    }
}

/// Charset resolution and decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CharsetError {
    #[error("Unsupported charset: {0}")]
    Unsupported(String),

    #[error("Payload is not valid {encoding}")]
    Malformed { encoding: String },

    #[error("Truncated {encoding} payload: {len} bytes is not a multiple of {unit}")]
    Truncated {
        encoding: String,
        len: usize,
        unit: usize,
    },
}

/// LibXML2-specific error types
#[derive(Error, Debug, Clone)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: {details}")]
    SchemaParseFailed { details: String },

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Malformed XML: {details}")]
    MalformedXml { details: String },

    #[error("DOCTYPE declarations are not allowed")]
    DoctypeForbidden,

    #[error("Payload too large for libxml2: {len} bytes")]
    PayloadTooLarge { len: usize },

    #[error("libxml2 validation aborted with code {code}")]
    ValidationAborted { code: i32 },
}

/// Errors raised by the schema source collaborator
#[derive(Error, Debug, Clone)]
pub enum SchemaSourceError {
    #[error("Schema not found: {schema_path} (api {api})")]
    NotFound { api: String, schema_path: String },

    #[error("Cannot read schema {schema_path}: {details}")]
    Read {
        schema_path: String,
        details: String,
    },
}

/// Errors raised while building or running a transformer
#[derive(Error, Debug, Clone)]
pub enum TransformError {
    #[error("No transformer from {source_type} to {result_type}")]
    NotFound {
        source_type: String,
        result_type: String,
    },

    #[error("Unsupported input for {transformer}: expected {expected}")]
    UnsupportedInput {
        transformer: String,
        expected: String,
    },

    #[error("{transformer} failed: {details}")]
    Failed {
        transformer: String,
        details: String,
    },
}

/// Configuration-specific error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

// Charset problems come from the client's bytes or headers.
impl From<CharsetError> for ValidationError {
    fn from(err: CharsetError) -> Self {
        ValidationError::bad_request(err.to_string())
    }
}

impl From<LibXml2Error> for ValidationError {
    fn from(err: LibXml2Error) -> Self {
        match err {
            LibXml2Error::MalformedXml { .. }
            | LibXml2Error::DoctypeForbidden
            | LibXml2Error::PayloadTooLarge { .. } => ValidationError::bad_request(err.to_string()),
            other => ValidationError::internal(other.to_string()),
        }
    }
}

impl From<TransformError> for ValidationError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::NotFound { .. } => ValidationError::internal(err.to_string()),
            other => ValidationError::bad_request(other.to_string()),
        }
    }
}

impl From<ConfigError> for ValidationError {
    fn from(err: ConfigError) -> Self {
        ValidationError::Config(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ValidationError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let bad = ValidationError::bad_request("expected string, found integer");
        assert!(bad.to_string().contains("Bad request"));
        assert!(bad.to_string().contains("expected string"));

        let build = ValidationError::Build {
            key: "cfg:/schemas/order.json".to_string(),
            details: "invalid schema".to_string(),
        };
        assert!(build.to_string().contains("Failed to build"));
        assert!(build.to_string().contains("order.json"));

        let timeout = ValidationError::Timeout {
            key: "k".to_string(),
            waited_ms: 250,
        };
        assert!(timeout.to_string().contains("250ms"));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(ValidationError::bad_request("x").status_code(), 400);
        assert!(ValidationError::bad_request("x").is_client_error());

        let build = ValidationError::Build {
            key: "k".to_string(),
            details: "d".to_string(),
        };
        assert_eq!(build.status_code(), 500);
        assert!(!build.is_client_error());

        let timeout = ValidationError::Timeout {
            key: "k".to_string(),
            waited_ms: 1,
        };
        assert_eq!(timeout.status_code(), 504);
    }

    #[test]
    fn test_charset_error_is_client_error() {
        let err: ValidationError = CharsetError::Unsupported("X-KLINGON".to_string()).into();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("X-KLINGON"));
    }

    #[test]
    fn test_libxml2_error_conversion() {
        let malformed: ValidationError = LibXml2Error::MalformedXml {
            details: "premature end of data".to_string(),
        }
        .into();
        assert!(malformed.is_client_error());

        let doctype: ValidationError = LibXml2Error::DoctypeForbidden.into();
        assert!(doctype.is_client_error());

        let alloc: ValidationError = LibXml2Error::MemoryAllocation.into();
        match alloc {
            ValidationError::Internal { .. } => (),
            other => panic!("Expected Internal, got {:?}", other),
        }
    }

    #[test]
    fn test_transform_error_conversion() {
        let missing: ValidationError = TransformError::NotFound {
            source_type: "text/csv".to_string(),
            result_type: "image/png".to_string(),
        }
        .into();
        assert!(!missing.is_client_error());

        let failed: ValidationError = TransformError::Failed {
            transformer: "JsonToObject".to_string(),
            details: "EOF".to_string(),
        }
        .into();
        assert!(failed.is_client_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "cut off");
        let validation_error: ValidationError = io_error.into();

        match validation_error {
            ValidationError::Io(_) => (),
            _ => panic!("Expected ValidationError::Io"),
        }
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;

        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let validation_error = ValidationError::Io(io_error);

        let source = validation_error.source().unwrap();
        assert_eq!(source.to_string(), "File not found");
    }
}
