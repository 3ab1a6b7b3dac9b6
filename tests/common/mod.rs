#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use apikit_validate::{
    ApiIdentity, CacheConfig, Encoding, InMemorySchemaSource, PayloadValidator, SchemaKey,
    ValidationSettings,
};
use tempfile::TempDir;

pub const ORDER_JSON_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "id": { "type": "integer" },
    "item": { "type": "string" },
    "qty": { "type": "integer", "minimum": 1 }
  },
  "required": ["id", "item"]
}"#;

/// Same shape as [`ORDER_JSON_SCHEMA`], plus a keyword no draft defines.
pub const ORDER_JSON_SCHEMA_WITH_UNKNOWN_KEYWORD: &str = r#"{
  "type": "object",
  "properties": {
    "id": { "type": "integer" },
    "item": { "type": "string", "displayHint": "short" }
  },
  "required": ["id", "item"]
}"#;

pub const ORDER_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="order">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="id" type="xs:int"/>
        <xs:element name="item" type="xs:string"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

pub const VALID_ORDER_XML: &str = "<order><id>7</id><item>pen</item></order>";
pub const INVALID_ORDER_XML: &str = "<order><id>seven</id><item>pen</item></order>";

pub fn api() -> ApiIdentity {
    ApiIdentity::new("orders-api")
}

pub fn json_key() -> SchemaKey {
    SchemaKey::new("cfg", "order.json", api())
}

pub fn xml_key() -> SchemaKey {
    SchemaKey::new("cfg", "order.xsd", api())
}

pub fn order_schemas() -> InMemorySchemaSource {
    InMemorySchemaSource::new()
        .with_schema(api(), "order.json", ORDER_JSON_SCHEMA)
        .with_schema(api(), "order-lenient.json", ORDER_JSON_SCHEMA_WITH_UNKNOWN_KEYWORD)
        .with_schema(api(), "order.xsd", ORDER_XSD)
}

pub fn payload_validator(settings: ValidationSettings) -> PayloadValidator {
    PayloadValidator::new(
        Arc::new(order_schemas()),
        Encoding::utf8(),
        settings,
        &CacheConfig::default(),
    )
}

/// Encode `text` as UTF-16 with the given byte order, prefixed by its BOM.
pub fn utf16_with_bom(text: &str, big_endian: bool) -> Vec<u8> {
    let mut bytes = if big_endian {
        vec![0xFE, 0xFF]
    } else {
        vec![0xFF, 0xFE]
    };
    for unit in text.encode_utf16() {
        let pair = if big_endian {
            unit.to_be_bytes()
        } else {
            unit.to_le_bytes()
        };
        bytes.extend_from_slice(&pair);
    }
    bytes
}

/// A schema root on disk laid out as `<root>/<api>/<schema>`.
pub struct SchemaTree {
    pub dir: TempDir,
}

impl SchemaTree {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let api_dir = dir.path().join(api().as_str());
        std::fs::create_dir_all(&api_dir).unwrap();
        std::fs::write(api_dir.join("order.json"), ORDER_JSON_SCHEMA).unwrap();
        std::fs::write(
            api_dir.join("order-lenient.json"),
            ORDER_JSON_SCHEMA_WITH_UNKNOWN_KEYWORD,
        )
        .unwrap();
        std::fs::write(api_dir.join("order.xsd"), ORDER_XSD).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_payload(&self, name: &str, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}
