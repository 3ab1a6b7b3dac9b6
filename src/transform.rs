//! Converters between in-memory payload representations.
//!
//! A [`TransformerResolver`] turns a [`DataTypePair`] into a [`Transformer`],
//! building it on first use and caching it in a [`KeyedBuildCache`]. JSON and
//! XML pairs are handled directly; anything else is looked up in an optional
//! [`TransformerRegistry`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cache::{CacheConfig, KeyedBuildCache};
use crate::config::Config;
use crate::error::{Result, TransformError};
use crate::media_type::MediaType;

/// In-memory shape of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Representation {
    Text,
    Bytes,
    /// A structured object; the name identifies its type and is the root
    /// element when the object is bound to XML.
    Object(String),
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Representation::Text => f.write_str("text"),
            Representation::Bytes => f.write_str("bytes"),
            Representation::Object(name) => write!(f, "object<{}>", name),
        }
    }
}

/// A media type paired with an in-memory representation.
///
/// Media type parameters do not take part in equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataType {
    media_type: MediaType,
    representation: Representation,
}

impl DataType {
    pub fn new(media_type: &MediaType, representation: Representation) -> Self {
        Self {
            media_type: MediaType::new(media_type.primary_type(), media_type.sub_type()),
            representation,
        }
    }

    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    pub fn representation(&self) -> &Representation {
        &self.representation
    }

    fn object_name(&self) -> Option<&str> {
        match &self.representation {
            Representation::Object(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} as {}", self.media_type, self.representation)
    }
}

/// Source and result data types of a conversion; the transformer cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataTypePair {
    pub source: DataType,
    pub result: DataType,
}

impl DataTypePair {
    pub fn new(source: DataType, result: DataType) -> Self {
        Self { source, result }
    }
}

impl fmt::Display for DataTypePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.result)
    }
}

/// A payload value flowing through a transformer.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    Bytes(Bytes),
    Object(Value),
}

impl Content {
    fn kind(&self) -> &'static str {
        match self {
            Content::Text(_) => "text",
            Content::Bytes(_) => "bytes",
            Content::Object(_) => "object",
        }
    }
}

pub trait Transformer: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn transform(&self, input: Content) -> std::result::Result<Content, TransformError>;
}

/// External lookup for pairs with no built-in transformer.
pub trait TransformerRegistry: Send + Sync {
    fn lookup(&self, pair: &DataTypePair) -> Option<Arc<dyn Transformer>>;
}

/// Map-backed [`TransformerRegistry`].
#[derive(Default)]
pub struct StaticRegistry {
    transformers: HashMap<DataTypePair, Arc<dyn Transformer>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, pair: DataTypePair, transformer: Arc<dyn Transformer>) -> Self {
        self.transformers.insert(pair, transformer);
        self
    }
}

impl TransformerRegistry for StaticRegistry {
    fn lookup(&self, pair: &DataTypePair) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(pair).cloned()
    }
}

/// Which object fields are written when binding to XML.
///
/// Denied fields are dropped at every depth. When an allow list is set, only
/// those top-level fields are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationPolicy {
    allow: Option<BTreeSet<String>>,
    deny: BTreeSet<String>,
}

impl Default for SerializationPolicy {
    fn default() -> Self {
        Self::deny(["stackTrace", "suppressed"])
    }
}

impl SerializationPolicy {
    pub fn deny<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: None,
            deny: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_allow<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    fn admits(&self, field: &str, top_level: bool) -> bool {
        if self.deny.contains(field) {
            return false;
        }
        match (&self.allow, top_level) {
            (Some(allow), true) => allow.contains(field),
            _ => true,
        }
    }
}

fn unsupported(transformer: &str, expected: &str) -> TransformError {
    TransformError::UnsupportedInput {
        transformer: transformer.to_string(),
        expected: expected.to_string(),
    }
}

fn failed(transformer: &str, details: impl fmt::Display) -> TransformError {
    TransformError::Failed {
        transformer: transformer.to_string(),
        details: details.to_string(),
    }
}

/// Parses JSON text into an object.
#[derive(Debug)]
pub struct JsonToObject {
    name: String,
}

impl JsonToObject {
    pub fn new(target: &Representation) -> Self {
        Self {
            name: format!("JsonToObject({})", target),
        }
    }
}

impl Transformer for JsonToObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, input: Content) -> std::result::Result<Content, TransformError> {
        let value = match input {
            Content::Text(text) => serde_json::from_str(&text),
            Content::Bytes(bytes) => serde_json::from_slice(&bytes),
            Content::Object(value) => return Ok(Content::Object(value)),
        };
        value
            .map(Content::Object)
            .map_err(|e| failed(&self.name, e))
    }
}

/// Serializes an object as JSON text.
#[derive(Debug)]
pub struct ObjectToJson {
    name: String,
}

impl ObjectToJson {
    pub fn new(source: &Representation) -> Self {
        Self {
            name: format!("ObjectToJson({})", source),
        }
    }
}

impl Transformer for ObjectToJson {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, input: Content) -> std::result::Result<Content, TransformError> {
        match input {
            Content::Object(value) => serde_json::to_string(&value)
                .map(Content::Text)
                .map_err(|e| failed(&self.name, e)),
            Content::Text(text) => Ok(Content::Text(text)),
            other => Err(unsupported(&self.name, &format!("object, got {}", other.kind()))),
        }
    }
}

/// Unmarshals an XML document into an object bound to its root element.
///
/// Attributes become `@name` fields, mixed text becomes `#text`, repeated
/// child elements become arrays.
#[derive(Debug)]
pub struct XmlToObject {
    name: String,
    root: String,
}

impl XmlToObject {
    pub fn new(root: &str) -> Self {
        Self {
            name: format!("XmlToObject({})", root),
            root: root.to_string(),
        }
    }

    fn parse(&self, text: &str) -> std::result::Result<Value, TransformError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<FrameParts> = Vec::new();
        let mut root: Option<(String, Value)> = None;

        loop {
            let event = reader.read_event().map_err(|e| failed(&self.name, e))?;
            match event {
                Event::DocType(_) => {
                    return Err(failed(&self.name, "DOCTYPE declarations are not allowed"));
                }
                Event::Start(start) | Event::Empty(start) if root.is_some() => {
                    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                    return Err(failed(&self.name, format!("unexpected element <{}> after root", tag)));
                }
                Event::Start(start) => {
                    stack.push(self.open(&start)?);
                }
                Event::Empty(start) => {
                    let frame = self.open(&start)?;
                    Self::close(&mut stack, &mut root, frame.name, frame.fields, frame.text);
                }
                Event::End(_) => {
                    if let Some(frame) = stack.pop() {
                        Self::close(&mut stack, &mut root, frame.name, frame.fields, frame.text);
                    }
                }
                Event::Text(text) => {
                    if let Some(frame) = stack.last_mut() {
                        let unescaped = text.unescape().map_err(|e| failed(&self.name, e))?;
                        frame.text.push_str(&unescaped);
                    }
                }
                Event::CData(data) => {
                    if let Some(frame) = stack.last_mut() {
                        frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        match root {
            Some((name, value)) if name == self.root => Ok(value),
            Some((name, _)) => Err(failed(
                &self.name,
                format!("expected root element <{}>, found <{}>", self.root, name),
            )),
            None => Err(failed(&self.name, "document has no root element")),
        }
    }

    fn open(&self, start: &BytesStart<'_>) -> std::result::Result<FrameParts, TransformError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut fields = Map::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| failed(&self.name, e))?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|e| failed(&self.name, e))?;
            fields.insert(format!("@{}", key), Value::String(value.into_owned()));
        }
        Ok(FrameParts {
            name,
            fields,
            text: String::new(),
        })
    }

    fn close(
        stack: &mut Vec<FrameParts>,
        root: &mut Option<(String, Value)>,
        name: String,
        mut fields: Map<String, Value>,
        text: String,
    ) {
        let value = if fields.is_empty() {
            if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            }
        } else {
            if !text.is_empty() {
                fields.insert("#text".to_string(), Value::String(text));
            }
            Value::Object(fields)
        };

        let Some(parent) = stack.last_mut() else {
            *root = Some((name, value));
            return;
        };
        match parent.fields.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                parent.fields.insert(name, value);
            }
        }
    }
}

/// An open element while unmarshalling.
struct FrameParts {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Transformer for XmlToObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, input: Content) -> std::result::Result<Content, TransformError> {
        let text = match input {
            Content::Text(text) => text,
            Content::Bytes(bytes) => String::from_utf8(bytes.to_vec())
                .map_err(|_| unsupported(&self.name, "UTF-8 XML bytes"))?,
            Content::Object(_) => return Err(unsupported(&self.name, "XML text")),
        };
        self.parse(&text).map(Content::Object)
    }
}

/// Marshals an object to XML under a root element, honouring a
/// [`SerializationPolicy`].
#[derive(Debug)]
pub struct ObjectToXml {
    name: String,
    root: String,
    policy: SerializationPolicy,
}

impl ObjectToXml {
    pub fn new(root: &str, policy: SerializationPolicy) -> Self {
        Self {
            name: format!("ObjectToXml({})", root),
            root: root.to_string(),
            policy,
        }
    }

    fn write_element(
        &self,
        writer: &mut Writer<Vec<u8>>,
        tag: &str,
        value: &Value,
        top_level: bool,
    ) -> std::result::Result<(), TransformError> {
        if !is_xml_name(tag) {
            return Err(failed(&self.name, format!("'{}' is not a valid element name", tag)));
        }

        match value {
            Value::Array(items) => {
                for item in items {
                    self.write_element(writer, tag, item, false)?;
                }
                Ok(())
            }
            Value::Object(fields) => {
                let mut start = BytesStart::new(tag);
                let mut text = None;
                let mut children = Vec::new();

                for (key, field) in fields {
                    if !self.policy.admits(key.trim_start_matches('@'), top_level) {
                        continue;
                    }
                    if let Some(attribute) = key.strip_prefix('@') {
                        start.push_attribute((attribute, scalar_text(field).as_str()));
                    } else if key == "#text" {
                        text = Some(scalar_text(field));
                    } else {
                        children.push((key, field));
                    }
                }

                self.emit(writer, Event::Start(start))?;
                if let Some(text) = text {
                    self.emit(writer, Event::Text(BytesText::new(&text)))?;
                }
                for (key, field) in children {
                    self.write_element(writer, key, field, false)?;
                }
                self.emit(writer, Event::End(BytesEnd::new(tag)))
            }
            Value::Null => self.emit(writer, Event::Empty(BytesStart::new(tag))),
            scalar => {
                let text = scalar_text(scalar);
                self.emit(writer, Event::Start(BytesStart::new(tag)))?;
                self.emit(writer, Event::Text(BytesText::new(&text)))?;
                self.emit(writer, Event::End(BytesEnd::new(tag)))
            }
        }
    }

    fn emit(
        &self,
        writer: &mut Writer<Vec<u8>>,
        event: Event<'_>,
    ) -> std::result::Result<(), TransformError> {
        writer.write_event(event).map_err(|e| failed(&self.name, e))
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

impl Transformer for ObjectToXml {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, input: Content) -> std::result::Result<Content, TransformError> {
        let Content::Object(value) = input else {
            return Err(unsupported(&self.name, "object"));
        };

        let mut writer = Writer::new(Vec::new());
        self.write_element(&mut writer, &self.root, &value, true)?;
        String::from_utf8(writer.into_inner())
            .map(Content::Text)
            .map_err(|e| failed(&self.name, e))
    }
}

/// Renders plain content as a string.
#[derive(Debug)]
pub struct ObjectToString;

impl Transformer for ObjectToString {
    fn name(&self) -> &str {
        "ObjectToString"
    }

    fn transform(&self, input: Content) -> std::result::Result<Content, TransformError> {
        match input {
            Content::Text(text) => Ok(Content::Text(text)),
            Content::Bytes(bytes) => String::from_utf8(bytes.to_vec())
                .map(Content::Text)
                .map_err(|_| unsupported(self.name(), "UTF-8 bytes")),
            Content::Object(Value::String(text)) => Ok(Content::Text(text)),
            Content::Object(value) => Ok(Content::Text(value.to_string())),
        }
    }
}

/// Resolves and caches transformers by [`DataTypePair`].
pub struct TransformerResolver {
    cache: KeyedBuildCache<DataTypePair, Arc<dyn Transformer>>,
    registry: Option<Arc<dyn TransformerRegistry>>,
    policy: SerializationPolicy,
}

impl TransformerResolver {
    pub fn new(cache_config: &CacheConfig) -> Self {
        Self {
            cache: KeyedBuildCache::new("transformers", cache_config),
            registry: None,
            policy: SerializationPolicy::default(),
        }
    }

    /// A resolver using the transformer cache bounds of `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.transformer_cache_config())
    }

    pub fn with_registry(mut self, registry: Arc<dyn TransformerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_policy(mut self, policy: SerializationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache(&self) -> &KeyedBuildCache<DataTypePair, Arc<dyn Transformer>> {
        &self.cache
    }

    /// The transformer for `pair`, built at most once at a time.
    pub async fn resolve(&self, pair: &DataTypePair) -> Result<Arc<dyn Transformer>> {
        let build_pair = pair.clone();
        let policy = self.policy.clone();
        let registry = self.registry.clone();

        self.cache
            .get(pair.clone(), || async move {
                Self::build(&build_pair, &policy, registry.as_deref())
            })
            .await
    }

    /// Resolve the transformer for `pair` and run it on `input`.
    pub async fn transform(&self, pair: &DataTypePair, input: Content) -> Result<Content> {
        let transformer = self.resolve(pair).await?;
        Ok(transformer.transform(input)?)
    }

    fn build(
        pair: &DataTypePair,
        policy: &SerializationPolicy,
        registry: Option<&dyn TransformerRegistry>,
    ) -> std::result::Result<Arc<dyn Transformer>, TransformError> {
        let (source, result) = (&pair.source, &pair.result);

        let built: Option<Arc<dyn Transformer>> = if source.media_type().is_json() {
            Some(Arc::new(JsonToObject::new(result.representation())))
        } else if result.media_type().is_json() {
            Some(Arc::new(ObjectToJson::new(source.representation())))
        } else if source.media_type().is_xml() {
            match result.object_name() {
                Some(root) => Some(Arc::new(XmlToObject::new(root))),
                None => {
                    warn!(%pair, "cannot bind XML to a non-object result; trying registry");
                    None
                }
            }
        } else if result.media_type().is_xml() {
            if source.representation() == &Representation::Text {
                Some(Arc::new(ObjectToString))
            } else {
                match source.object_name() {
                    Some(root) => Some(Arc::new(ObjectToXml::new(root, policy.clone()))),
                    None => {
                        warn!(%pair, "cannot bind a non-object source to XML; trying registry");
                        None
                    }
                }
            }
        } else {
            None
        };

        if let Some(transformer) = built {
            debug!(%pair, transformer = transformer.name(), "built transformer");
            return Ok(transformer);
        }

        registry
            .and_then(|registry| registry.lookup(pair))
            .inspect(|transformer| {
                debug!(%pair, transformer = transformer.name(), "transformer from registry")
            })
            .ok_or_else(|| TransformError::NotFound {
                source_type: source.to_string(),
                result_type: result.to_string(),
            })
    }
}
