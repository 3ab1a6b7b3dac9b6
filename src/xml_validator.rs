//! XSD validation of XML payloads.
//!
//! Payload bytes are decoded to text before any parsing happens. The decoded
//! text is scanned once with `quick-xml`, which rejects DOCTYPE declarations
//! and ill-formed markup before a schema is even loaded, and is then parsed
//! and validated by libxml2 with network and entity loading disabled.

use std::sync::Arc;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, instrument};

use crate::cache::{CacheConfig, KeyedBuildCache};
use crate::charset::Encoding;
use crate::error::{LibXml2Error, Result, ValidationError};
use crate::libxml2::{LibXml2Wrapper, ValidationResult, XmlSchemaPtr};
use crate::payload::{PayloadNormalizer, RawPayload};
use crate::schema_source::{SchemaKey, SchemaSource};
use crate::validator::{Validated, ValidationReport, ValidationSettings};

/// Reject DOCTYPE declarations and markup quick-xml cannot read.
pub fn precheck_document(text: &str) -> Result<()> {
    let mut reader = Reader::from_str(text);

    loop {
        match reader.read_event() {
            Ok(Event::DocType(_)) => return Err(LibXml2Error::DoctypeForbidden.into()),
            Ok(Event::Eof) => return Ok(()),
            Ok(_) => {}
            Err(e) => {
                return Err(LibXml2Error::MalformedXml {
                    details: format!("at byte {}: {}", reader.buffer_position(), e),
                }
                .into());
            }
        }
    }
}

/// Validates XML payloads against XSDs from a [`SchemaSource`].
pub struct XmlSchemaValidator {
    source: Arc<dyn SchemaSource>,
    cache: KeyedBuildCache<SchemaKey, XmlSchemaPtr>,
    normalizer: PayloadNormalizer,
    settings: ValidationSettings,
    libxml2: Arc<LibXml2Wrapper>,
}

impl XmlSchemaValidator {
    pub fn new(
        source: Arc<dyn SchemaSource>,
        normalizer: PayloadNormalizer,
        settings: ValidationSettings,
        cache_config: &CacheConfig,
        libxml2: Arc<LibXml2Wrapper>,
    ) -> Self {
        Self {
            source,
            cache: KeyedBuildCache::new("xml-schemas", cache_config),
            normalizer,
            settings,
            libxml2,
        }
    }

    pub fn cache(&self) -> &KeyedBuildCache<SchemaKey, XmlSchemaPtr> {
        &self.cache
    }

    /// The compiled XSD for `key`.
    pub async fn compiled_schema(&self, key: &SchemaKey) -> Result<XmlSchemaPtr> {
        let source = Arc::clone(&self.source);
        let libxml2 = Arc::clone(&self.libxml2);
        let build_key = key.clone();

        self.cache
            .get(key.clone(), || async move {
                let bytes = source
                    .load(&build_key.api, &build_key.schema_path)
                    .await
                    .map_err(|e| e.to_string())?;

                tokio::task::spawn_blocking(move || {
                    libxml2
                        .parse_schema_from_memory(&bytes)
                        .map_err(|e| e.to_string())
                })
                .await
                .map_err(|e| format!("XSD compilation task failed: {}", e))?
            })
            .await
    }

    #[instrument(
        name = "validate_xml",
        skip(self, raw, header_charset),
        fields(config_id = %key.config_id, schema_path = %key.schema_path)
    )]
    pub async fn validate(
        &self,
        key: &SchemaKey,
        raw: RawPayload,
        header_charset: Option<&Encoding>,
    ) -> Result<Validated> {
        let payload = self.normalizer.normalize_xml(raw, header_charset).await?;
        precheck_document(payload.text())?;

        let schema = self.compiled_schema(key).await?;
        let libxml2 = Arc::clone(&self.libxml2);
        let text = payload.text().to_string();
        let result = tokio::task::spawn_blocking(move || libxml2.validate_memory(&schema, &text))
            .await
            .map_err(|e| ValidationError::internal(format!("XML validation task failed: {}", e)))??;

        let report = self.report_for(result);
        self.settings.enforce(&report)?;
        debug!(messages = report.len(), "XML payload accepted");

        Ok(Validated { payload, report })
    }

    fn report_for(&self, result: ValidationResult) -> ValidationReport {
        let mut report = ValidationReport::new();
        let ValidationResult::Invalid {
            error_count,
            errors,
        } = result
        else {
            return report;
        };

        for diagnostic in errors {
            if diagnostic.warning {
                report.warning(diagnostic.to_string());
            } else {
                report.error(diagnostic.to_string());
            }
            if !self.settings.should_continue(&report) {
                return report;
            }
        }

        if !report.has_errors() {
            report.error(format!(
                "Document does not conform to schema ({} errors)",
                error_count
            ));
        }
        report
    }
}
