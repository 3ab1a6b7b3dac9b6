//! Concurrency behaviour of compiled-schema caching: one build per key,
//! failures are retried, slow builds time out.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use apikit_validate::error::SchemaSourceError;
use apikit_validate::{
    ApiIdentity, CacheConfig, Encoding, InMemorySchemaSource, PayloadValidator, RawPayload,
    SchemaKey, SchemaSource, ValidationError, ValidationSettings,
};
use async_trait::async_trait;
use bytes::Bytes;
use common::*;

/// Wraps a schema source, counting loads and delaying each one.
struct SlowCountingSource {
    inner: InMemorySchemaSource,
    delay: Duration,
    loads: AtomicUsize,
}

impl SlowCountingSource {
    fn new(delay: Duration) -> Self {
        Self {
            inner: order_schemas(),
            delay,
            loads: AtomicUsize::new(0),
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaSource for SlowCountingSource {
    async fn load(&self, api: &ApiIdentity, schema_path: &str) -> Result<Bytes, SchemaSourceError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.load(api, schema_path).await
    }
}

/// Fails its first load, then delegates.
struct FlakySource {
    inner: InMemorySchemaSource,
    loads: AtomicUsize,
}

#[async_trait]
impl SchemaSource for FlakySource {
    async fn load(&self, api: &ApiIdentity, schema_path: &str) -> Result<Bytes, SchemaSourceError> {
        if self.loads.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(SchemaSourceError::Read {
                schema_path: schema_path.to_string(),
                details: "connection reset".to_string(),
            });
        }
        self.inner.load(api, schema_path).await
    }
}

fn validator_over(source: Arc<dyn SchemaSource>, cache_config: &CacheConfig) -> PayloadValidator {
    PayloadValidator::new(
        source,
        Encoding::utf8(),
        ValidationSettings::default(),
        cache_config,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_build_schema_once() {
    let source = Arc::new(SlowCountingSource::new(Duration::from_millis(100)));
    let validator = validator_over(source.clone(), &CacheConfig::default());

    let tasks = (0..16).map(|i| {
        let validator = validator.clone();
        tokio::spawn(async move {
            let (key, payload, content_type) = if i % 2 == 0 {
                (json_key(), r#"{"id": 1, "item": "pen"}"#, "application/json")
            } else {
                (xml_key(), VALID_ORDER_XML, "application/xml")
            };
            validator
                .validate(&key, RawPayload::from(payload), Some(content_type))
                .await
        })
    });

    for result in futures::future::join_all(tasks).await {
        assert!(result.unwrap().is_ok());
    }

    // One load per distinct schema
    assert_eq!(source.loads(), 2);

    let json_stats = validator.json().cache().stats().await;
    assert_eq!(json_stats.builds, 1);
    assert_eq!(json_stats.lookups, 8);
    assert_eq!(json_stats.entry_count, 1);

    let xml_stats = validator.xml().cache().stats().await;
    assert_eq!(xml_stats.builds, 1);
    assert_eq!(xml_stats.entry_count, 1);
}

#[tokio::test]
async fn test_distinct_config_ids_are_distinct_keys() {
    let source = Arc::new(SlowCountingSource::new(Duration::ZERO));
    let validator = validator_over(source.clone(), &CacheConfig::default());

    for config_id in ["cfg-a", "cfg-b", "cfg-a"] {
        let key = SchemaKey::new(config_id, "order.json", api());
        validator
            .validate(
                &key,
                RawPayload::from(r#"{"id": 1, "item": "pen"}"#),
                Some("application/json"),
            )
            .await
            .unwrap();
    }

    assert_eq!(source.loads(), 2);
}

#[tokio::test]
async fn test_failed_build_is_not_cached() {
    let source = Arc::new(FlakySource {
        inner: order_schemas(),
        loads: AtomicUsize::new(0),
    });
    let validator = validator_over(source.clone(), &CacheConfig::default());
    let payload = || RawPayload::from(r#"{"id": 1, "item": "pen"}"#);

    let err = validator
        .validate(&json_key(), payload(), Some("application/json"))
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::Build { .. }));
    assert!(err.to_string().contains("connection reset"));
    assert!(!validator.json().cache().contains(&json_key()));

    validator
        .validate(&json_key(), payload(), Some("application/json"))
        .await
        .unwrap();
    assert_eq!(source.loads.load(Ordering::SeqCst), 2);

    let stats = validator.json().cache().stats().await;
    assert_eq!(stats.failed_builds, 1);
    assert_eq!(stats.entry_count, 1);
}

#[tokio::test]
async fn test_slow_build_times_out() {
    let source = Arc::new(SlowCountingSource::new(Duration::from_secs(5)));
    let cache_config = CacheConfig {
        max_capacity: 10,
        build_timeout: Some(Duration::from_millis(50)),
    };
    let validator = validator_over(source, &cache_config);

    let err = validator
        .validate(&xml_key(), RawPayload::from(VALID_ORDER_XML), None)
        .await
        .unwrap_err();

    match err {
        ValidationError::Timeout { waited_ms, .. } => assert_eq!(waited_ms, 50),
        other => panic!("Expected Timeout, got {:?}", other),
    }
}
