//! JSON Schema validation.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::cache::{CacheConfig, KeyedBuildCache};
use crate::charset::Encoding;
use crate::error::{Result, ValidationError};
use crate::payload::{PayloadNormalizer, RawPayload};
use crate::schema_source::{SchemaKey, SchemaSource};
use crate::validator::{ReportPolicy, Validated, ValidationReport, ValidationSettings};

/// Keywords of JSON Schema drafts 4 through 2020-12.
const KNOWN_KEYWORDS: &[&str] = &[
    "$schema", "$id", "id", "$ref", "$defs", "definitions", "$comment", "$anchor",
    "$dynamicRef", "$dynamicAnchor", "$recursiveRef", "$recursiveAnchor", "$vocabulary",
    "title", "description", "default", "examples", "deprecated", "readOnly", "writeOnly",
    "type", "enum", "const", "multipleOf", "maximum", "exclusiveMaximum", "minimum",
    "exclusiveMinimum", "maxLength", "minLength", "pattern", "items", "additionalItems",
    "prefixItems", "unevaluatedItems", "contains", "maxContains", "minContains", "maxItems",
    "minItems", "uniqueItems", "maxProperties", "minProperties", "required", "properties",
    "patternProperties", "additionalProperties", "unevaluatedProperties", "dependencies",
    "dependentRequired", "dependentSchemas", "propertyNames", "allOf", "anyOf", "oneOf",
    "not", "if", "then", "else", "format", "contentEncoding", "contentMediaType",
    "contentSchema",
];

/// Keywords whose value is a single subschema.
const SCHEMA_KEYWORDS: &[&str] = &[
    "additionalItems", "additionalProperties", "contains", "contentSchema", "else", "if",
    "not", "propertyNames", "then", "unevaluatedItems", "unevaluatedProperties",
];

/// Keywords whose value is an array of subschemas.
const SCHEMA_ARRAY_KEYWORDS: &[&str] = &["allOf", "anyOf", "oneOf", "prefixItems"];

/// Keywords whose value maps names to subschemas.
const SCHEMA_MAP_KEYWORDS: &[&str] = &[
    "$defs", "definitions", "dependentSchemas", "patternProperties", "properties",
];

/// A compiled JSON schema with the warnings produced while compiling it.
pub struct CompiledJsonSchema {
    validator: jsonschema::Validator,
    warnings: Vec<String>,
}

impl CompiledJsonSchema {
    /// Compile a schema document. CPU-bound.
    pub fn compile(schema: &Value) -> std::result::Result<Self, String> {
        let validator = jsonschema::validator_for(schema).map_err(|e| e.to_string())?;
        Ok(Self {
            validator,
            warnings: unknown_keyword_warnings(schema),
        })
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Validate `instance`, appending messages to `report` until `settings`
    /// say to stop.
    pub fn validate_into(
        &self,
        instance: &Value,
        settings: &ValidationSettings,
        report: &mut ValidationReport,
    ) {
        for warning in &self.warnings {
            report.warning(warning.clone());
        }
        if !settings.should_continue(report) {
            return;
        }

        let errors = self.validator.iter_errors(instance).map(|error| {
            let path = error.instance_path.to_string();
            if path.is_empty() {
                error.to_string()
            } else {
                format!("{}: {}", path, error)
            }
        });

        match settings.report_policy {
            ReportPolicy::FailFast => {
                if let Some(first) = errors.take(1).next() {
                    report.error(first);
                }
            }
            ReportPolicy::CollectAll => {
                for message in errors {
                    report.error(message);
                }
            }
        }
    }
}

/// Messages for keywords outside the JSON Schema vocabulary, one per schema
/// object that has any.
pub fn unknown_keyword_warnings(schema: &Value) -> Vec<String> {
    let mut warnings = Vec::new();
    collect_unknown_keywords(schema, "", &mut warnings);
    warnings
}

fn collect_unknown_keywords(schema: &Value, pointer: &str, warnings: &mut Vec<String>) {
    let Value::Object(object) = schema else {
        return;
    };

    let unknown: Vec<&str> = object
        .keys()
        .map(String::as_str)
        .filter(|key| !KNOWN_KEYWORDS.contains(key))
        .collect();
    if !unknown.is_empty() {
        let location = if pointer.is_empty() { "/" } else { pointer };
        warnings.push(format!(
            "{}: the following keywords are unknown and will be ignored: [{}]",
            location,
            unknown.join(", ")
        ));
    }

    for (keyword, value) in object {
        let child = format!("{}/{}", pointer, escape_pointer(keyword));
        match (keyword.as_str(), value) {
            ("items", Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    collect_unknown_keywords(item, &format!("{}/{}", child, i), warnings);
                }
            }
            ("items", _) => collect_unknown_keywords(value, &child, warnings),
            ("dependencies", Value::Object(map)) => {
                for (name, dependency) in map {
                    if dependency.is_object() {
                        let path = format!("{}/{}", child, escape_pointer(name));
                        collect_unknown_keywords(dependency, &path, warnings);
                    }
                }
            }
            (k, _) if SCHEMA_KEYWORDS.contains(&k) => {
                collect_unknown_keywords(value, &child, warnings)
            }
            (k, Value::Array(items)) if SCHEMA_ARRAY_KEYWORDS.contains(&k) => {
                for (i, item) in items.iter().enumerate() {
                    collect_unknown_keywords(item, &format!("{}/{}", child, i), warnings);
                }
            }
            (k, Value::Object(map)) if SCHEMA_MAP_KEYWORDS.contains(&k) => {
                for (name, subschema) in map {
                    let path = format!("{}/{}", child, escape_pointer(name));
                    collect_unknown_keywords(subschema, &path, warnings);
                }
            }
            _ => {}
        }
    }
}

fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Validates JSON payloads against schemas from a [`SchemaSource`].
pub struct JsonSchemaValidator {
    source: Arc<dyn SchemaSource>,
    cache: KeyedBuildCache<SchemaKey, Arc<CompiledJsonSchema>>,
    normalizer: PayloadNormalizer,
    settings: ValidationSettings,
}

impl JsonSchemaValidator {
    pub fn new(
        source: Arc<dyn SchemaSource>,
        normalizer: PayloadNormalizer,
        settings: ValidationSettings,
        cache_config: &CacheConfig,
    ) -> Self {
        Self {
            source,
            cache: KeyedBuildCache::new("json-schemas", cache_config),
            normalizer,
            settings,
        }
    }

    pub fn cache(&self) -> &KeyedBuildCache<SchemaKey, Arc<CompiledJsonSchema>> {
        &self.cache
    }

    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    /// The compiled schema for `key`, compiled at most once at a time.
    pub async fn compiled_schema(&self, key: &SchemaKey) -> Result<Arc<CompiledJsonSchema>> {
        let source = Arc::clone(&self.source);
        let build_key = key.clone();

        self.cache
            .get(key.clone(), || async move {
                let bytes = source
                    .load(&build_key.api, &build_key.schema_path)
                    .await
                    .map_err(|e| e.to_string())?;

                tokio::task::spawn_blocking(move || {
                    let schema: Value = serde_json::from_slice(&bytes)
                        .map_err(|e| format!("schema is not valid JSON: {}", e))?;
                    CompiledJsonSchema::compile(&schema).map(Arc::new)
                })
                .await
                .map_err(|e| format!("schema compilation task failed: {}", e))?
            })
            .await
    }

    /// Normalize `raw`, parse it as JSON and validate it against the schema
    /// identified by `key`.
    #[instrument(
        name = "validate_json",
        skip(self, raw, header_charset),
        fields(config_id = %key.config_id, schema_path = %key.schema_path)
    )]
    pub async fn validate(
        &self,
        key: &SchemaKey,
        raw: RawPayload,
        header_charset: Option<&Encoding>,
    ) -> Result<Validated> {
        let payload = self.normalizer.normalize(raw, header_charset).await?;

        let instance: Value = serde_json::from_str(payload.text())
            .map_err(|e| ValidationError::bad_request(format!("Invalid JSON payload: {}", e)))?;

        let schema = self.compiled_schema(key).await?;
        let settings = self.settings;
        let report = tokio::task::spawn_blocking(move || {
            let mut report = ValidationReport::new();
            schema.validate_into(&instance, &settings, &mut report);
            report
        })
        .await
        .map_err(|e| ValidationError::internal(format!("JSON validation task failed: {}", e)))?;

        self.settings.enforce(&report)?;
        debug!(messages = report.len(), "JSON payload accepted");

        Ok(Validated { payload, report })
    }
}
