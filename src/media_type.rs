use std::fmt;

use serde::{Deserialize, Serialize};

use crate::charset::Encoding;

/// Media type assumed when a request carries no `Content-Type` header.
pub const DEFAULT_CONTENT_TYPE: &str = "application/xml";

/// A parsed `type/subtype; name=value` media type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaType {
    primary: String,
    sub: String,
    params: Vec<(String, String)>,
}

impl MediaType {
    pub fn new(primary: &str, sub: &str) -> Self {
        Self {
            primary: primary.to_ascii_lowercase(),
            sub: sub.to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    pub fn application_json() -> Self {
        Self::new("application", "json")
    }

    pub fn application_xml() -> Self {
        Self::new("application", "xml")
    }

    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    /// Parse a `Content-Type` value. Returns `None` when there is no
    /// `type/subtype` pair.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(';');
        let essence = parts.next()?.trim();
        let (primary, sub) = essence.split_once('/')?;
        let (primary, sub) = (primary.trim(), sub.trim());
        if primary.is_empty() || sub.is_empty() {
            return None;
        }

        let params = parts
            .filter_map(|param| {
                let (name, value) = param.split_once('=')?;
                let value = value.trim().trim_matches('"');
                Some((name.trim().to_ascii_lowercase(), value.to_string()))
            })
            .filter(|(name, _)| !name.is_empty())
            .collect();

        Some(Self {
            primary: primary.to_ascii_lowercase(),
            sub: sub.to_ascii_lowercase(),
            params,
        })
    }

    pub fn with_charset(mut self, charset: &Encoding) -> Self {
        self.params.retain(|(name, _)| name != "charset");
        self.params
            .push(("charset".to_string(), charset.as_str().to_string()));
        self
    }

    pub fn primary_type(&self) -> &str {
        &self.primary
    }

    pub fn sub_type(&self) -> &str {
        &self.sub
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn charset(&self) -> Option<Encoding> {
        self.param("charset")
            .filter(|value| !value.is_empty())
            .map(Encoding::new)
    }

    /// Compare type and subtype, ignoring parameters.
    pub fn matches(&self, other: &MediaType) -> bool {
        self.primary == other.primary && self.sub == other.sub
    }

    /// `application/json`, `text/json` or any `+json` subtype.
    pub fn is_json(&self) -> bool {
        self.sub == "json" || self.sub.ends_with("+json")
    }

    /// `application/xml`, `text/xml` or any `+xml` subtype.
    pub fn is_xml(&self) -> bool {
        self.sub == "xml" || self.sub.ends_with("+xml")
    }

    /// Media type without parameters.
    pub fn essence(&self) -> String {
        format!("{}/{}", self.primary, self.sub)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.primary, self.sub)?;
        for (name, value) in &self.params {
            write!(f, "; {}={}", name, value)?;
        }
        Ok(())
    }
}

/// The charset declared by a `Content-Type` header, if any.
///
/// A missing header is treated as [`DEFAULT_CONTENT_TYPE`], which carries no
/// charset.
pub fn header_charset(content_type: Option<&str>) -> Option<Encoding> {
    let content_type = content_type.unwrap_or(DEFAULT_CONTENT_TYPE);
    MediaType::parse(content_type).and_then(|media| media.charset())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let media = MediaType::parse("application/json").unwrap();
        assert_eq!(media.primary_type(), "application");
        assert_eq!(media.sub_type(), "json");
        assert!(media.charset().is_none());
    }

    #[test]
    fn test_parse_with_params() {
        let media = MediaType::parse("Text/XML; Charset=\"ISO-8859-1\"; q=0.5").unwrap();
        assert_eq!(media.essence(), "text/xml");
        assert_eq!(media.charset().unwrap().as_str(), "ISO-8859-1");
        assert_eq!(media.param("q"), Some("0.5"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MediaType::parse("json").is_none());
        assert!(MediaType::parse("/json").is_none());
        assert!(MediaType::parse("").is_none());
    }

    #[test]
    fn test_family_detection() {
        assert!(MediaType::parse("application/json").unwrap().is_json());
        assert!(MediaType::parse("text/json").unwrap().is_json());
        assert!(MediaType::parse("application/vnd.api+json").unwrap().is_json());
        assert!(MediaType::parse("application/xml").unwrap().is_xml());
        assert!(MediaType::parse("text/xml").unwrap().is_xml());
        assert!(MediaType::parse("application/atom+xml").unwrap().is_xml());
        assert!(!MediaType::parse("text/plain").unwrap().is_xml());
        assert!(!MediaType::parse("application/jsonl").unwrap().is_json());
    }

    #[test]
    fn test_header_charset() {
        assert_eq!(
            header_charset(Some("application/json; charset=UTF-16LE"))
                .unwrap()
                .as_str(),
            "UTF-16LE"
        );
        assert!(header_charset(Some("application/json")).is_none());
        assert!(header_charset(None).is_none());
        assert!(header_charset(Some("application/json; charset=")).is_none());
    }

    #[test]
    fn test_with_charset_replaces_existing() {
        let media = MediaType::parse("application/json; charset=latin1")
            .unwrap()
            .with_charset(&Encoding::utf8());
        assert_eq!(media.to_string(), "application/json; charset=UTF-8");
    }
}
