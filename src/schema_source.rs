//! Access to schema documents referenced by an API definition.
//!
//! The API definition itself is opaque here: all a validator needs is "given
//! an API and a schema path, return the schema's source bytes".

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::SchemaSourceError;

/// Identity of the API definition a schema belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiIdentity(String);

impl ApiIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        ApiIdentity(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApiIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a compiled schema: configuration, schema path and API.
///
/// Two keys with equal fields share one cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    pub config_id: String,
    pub schema_path: String,
    pub api: ApiIdentity,
}

impl SchemaKey {
    pub fn new(config_id: impl Into<String>, schema_path: impl Into<String>, api: ApiIdentity) -> Self {
        Self {
            config_id: config_id.into(),
            schema_path: schema_path.into(),
            api,
        }
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.config_id, self.api, self.schema_path)
    }
}

/// Provider of schema source bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn load(&self, api: &ApiIdentity, schema_path: &str) -> Result<Bytes, SchemaSourceError>;
}

/// Schemas stored on disk as `<root>/<api>/<schema_path>`, falling back to
/// `<root>/<schema_path>`.
#[derive(Debug, Clone)]
pub struct FsSchemaSource {
    root: PathBuf,
}

impl FsSchemaSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative form of `schema_path`; `None` if it would escape the root.
    fn relative(schema_path: &str) -> Option<PathBuf> {
        let relative = PathBuf::from(schema_path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            None
        } else {
            Some(relative)
        }
    }
}

#[async_trait]
impl SchemaSource for FsSchemaSource {
    async fn load(&self, api: &ApiIdentity, schema_path: &str) -> Result<Bytes, SchemaSourceError> {
        let not_found = || SchemaSourceError::NotFound {
            api: api.to_string(),
            schema_path: schema_path.to_string(),
        };
        let relative = Self::relative(schema_path).ok_or_else(not_found)?;

        let mut candidates = Vec::with_capacity(2);
        if Self::relative(api.as_str()).is_some() {
            candidates.push(self.root.join(api.as_str()).join(&relative));
        }
        candidates.push(self.root.join(&relative));

        for candidate in candidates {
            match tokio::fs::read(&candidate).await {
                Ok(data) => {
                    debug!(path = %candidate.display(), "loaded schema source");
                    return Ok(Bytes::from(data));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(SchemaSourceError::Read {
                        schema_path: schema_path.to_string(),
                        details: e.to_string(),
                    });
                }
            }
        }

        Err(not_found())
    }
}

/// Map-backed schema source.
#[derive(Debug, Default)]
pub struct InMemorySchemaSource {
    schemas: RwLock<HashMap<(ApiIdentity, String), Bytes>>,
}

impl InMemorySchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, api: ApiIdentity, schema_path: impl Into<String>, source: impl Into<Bytes>) {
        let mut schemas = self.schemas.write().unwrap_or_else(|e| e.into_inner());
        schemas.insert((api, schema_path.into()), source.into());
    }

    pub fn with_schema(
        self,
        api: ApiIdentity,
        schema_path: impl Into<String>,
        source: impl Into<Bytes>,
    ) -> Self {
        self.insert(api, schema_path, source);
        self
    }
}

#[async_trait]
impl SchemaSource for InMemorySchemaSource {
    async fn load(&self, api: &ApiIdentity, schema_path: &str) -> Result<Bytes, SchemaSourceError> {
        let schemas = self.schemas.read().unwrap_or_else(|e| e.into_inner());
        schemas
            .get(&(api.clone(), schema_path.to_string()))
            .cloned()
            .ok_or_else(|| SchemaSourceError::NotFound {
                api: api.to_string(),
                schema_path: schema_path.to_string(),
            })
    }
}
