//! Schema validation dispatch.
//!
//! Payloads are validated by one of a closed set of validators, JSON Schema
//! or XSD, chosen from the declared media type. Both share the same
//! lifecycle:
//!
//! - **Async**: payload materialization, schema loading, cache lookups
//! - **Blocking**: schema compilation and instance validation run inside
//!   `spawn_blocking`
//! - **Single-flight**: compiled schemas come from a [`KeyedBuildCache`] per
//!   validator, keyed by [`SchemaKey`]
//!
//! [`KeyedBuildCache`]: crate::cache::KeyedBuildCache

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::CacheConfig;
use crate::charset::Encoding;
use crate::error::{Result, ValidationError};
use crate::json_validator::JsonSchemaValidator;
use crate::libxml2::LibXml2Wrapper;
use crate::media_type::{DEFAULT_CONTENT_TYPE, MediaType};
use crate::payload::{NormalizedPayload, PayloadNormalizer, RawPayload};
use crate::schema_source::{SchemaKey, SchemaSource};
use crate::xml_validator::XmlSchemaValidator;

/// Severity of a validation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("ERROR"),
            Severity::Warning => f.write_str("WARNING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub severity: Severity,
    pub message: String,
}

/// Ordered validation messages for one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    entries: Vec<ReportEntry>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: Severity, message: impl Into<String>) {
        self.entries.push(ReportEntry {
            severity,
            message: message.into(),
        });
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(|e| e.severity == Severity::Warning)
    }

    /// Entries that cause the payload to be rejected.
    pub fn disqualifying(&self, fail_on_warning: bool) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(move |e| e.severity == Severity::Error || fail_on_warning)
    }
}

/// How much of a report is produced before a payload is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportPolicy {
    /// Stop at the first disqualifying message.
    #[default]
    FailFast,
    /// Produce every message, then reject with all disqualifying ones.
    CollectAll,
}

/// Settings threaded into every validation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSettings {
    /// Treat WARNING messages as failures.
    pub fail_on_warning: bool,
    pub report_policy: ReportPolicy,
}

impl ValidationSettings {
    /// Whether validation should keep producing messages after `report`.
    pub fn should_continue(&self, report: &ValidationReport) -> bool {
        match self.report_policy {
            ReportPolicy::CollectAll => true,
            ReportPolicy::FailFast => report
                .disqualifying(self.fail_on_warning)
                .next()
                .is_none(),
        }
    }

    /// Reject the payload if `report` holds a disqualifying message.
    pub fn enforce(&self, report: &ValidationReport) -> Result<()> {
        let mut failures = report.disqualifying(self.fail_on_warning);
        let Some(first) = failures.next() else {
            return Ok(());
        };

        let message = match self.report_policy {
            ReportPolicy::FailFast => first.message.clone(),
            ReportPolicy::CollectAll => std::iter::once(first)
                .chain(failures)
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        };

        info!(%message, "payload rejected by schema");
        Err(ValidationError::bad_request(message))
    }
}

/// An accepted payload ready to be passed on, with any non-fatal messages.
#[derive(Debug, Clone)]
pub struct Validated {
    pub payload: NormalizedPayload,
    pub report: ValidationReport,
}

/// One of the two schema validators.
#[derive(Clone)]
pub enum SchemaValidator {
    Json(Arc<JsonSchemaValidator>),
    Xml(Arc<XmlSchemaValidator>),
}

impl SchemaValidator {
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaValidator::Json(_) => "json",
            SchemaValidator::Xml(_) => "xml",
        }
    }

    pub async fn validate(
        &self,
        key: &SchemaKey,
        raw: RawPayload,
        header_charset: Option<&Encoding>,
    ) -> Result<Validated> {
        match self {
            SchemaValidator::Json(validator) => validator.validate(key, raw, header_charset).await,
            SchemaValidator::Xml(validator) => validator.validate(key, raw, header_charset).await,
        }
    }
}

/// Entry point: dispatches payloads to the JSON or XML validator by media
/// type. Both validators share one schema source, normalizer and settings.
#[derive(Clone)]
pub struct PayloadValidator {
    json: Arc<JsonSchemaValidator>,
    xml: Arc<XmlSchemaValidator>,
}

impl PayloadValidator {
    pub fn new(
        source: Arc<dyn SchemaSource>,
        default_encoding: Encoding,
        settings: ValidationSettings,
        cache_config: &CacheConfig,
    ) -> Self {
        let normalizer = PayloadNormalizer::new(default_encoding);
        let json = JsonSchemaValidator::new(
            Arc::clone(&source),
            normalizer.clone(),
            settings,
            cache_config,
        );
        let xml = XmlSchemaValidator::new(
            source,
            normalizer,
            settings,
            cache_config,
            Arc::new(LibXml2Wrapper::new()),
        );

        Self {
            json: Arc::new(json),
            xml: Arc::new(xml),
        }
    }

    /// The validator for `media_type`, if it is in the JSON or XML family.
    pub fn for_media_type(&self, media_type: &MediaType) -> Option<SchemaValidator> {
        if media_type.is_json() {
            Some(SchemaValidator::Json(Arc::clone(&self.json)))
        } else if media_type.is_xml() {
            Some(SchemaValidator::Xml(Arc::clone(&self.xml)))
        } else {
            None
        }
    }

    pub fn json(&self) -> &Arc<JsonSchemaValidator> {
        &self.json
    }

    pub fn xml(&self) -> &Arc<XmlSchemaValidator> {
        &self.xml
    }

    /// Validate `raw` as declared by `content_type`.
    ///
    /// A missing `Content-Type` is treated as XML. Payloads in neither family
    /// are rejected as bad requests.
    pub async fn validate(
        &self,
        key: &SchemaKey,
        raw: RawPayload,
        content_type: Option<&str>,
    ) -> Result<Validated> {
        let declared = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);
        let media_type = MediaType::parse(declared).ok_or_else(|| {
            ValidationError::bad_request(format!("Invalid Content-Type: {}", declared))
        })?;

        let validator = self.for_media_type(&media_type).ok_or_else(|| {
            ValidationError::bad_request(format!(
                "Don't know how to parse {} payloads",
                media_type.essence()
            ))
        })?;

        let header_charset = media_type.charset();
        validator.validate(key, raw, header_charset.as_ref()).await
    }
}
