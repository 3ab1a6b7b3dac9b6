//! Charset resolution for inbound payloads.
//!
//! The definitive encoding of a payload is resolved in strict order, first
//! success wins:
//!
//! 1. an explicit `charset=` on the request's `Content-Type` header (or, for
//!    XML, the `encoding=` pseudo-attribute of the document's prolog);
//! 2. binary detection: a byte-order-mark, then the leading null-byte pattern
//!    of UTF-16/UTF-32 text;
//! 3. the configured default encoding.
//!
//! Any `UTF-16*` result is folded to the bare `UTF-16` tag. Decoding of the
//! folded tag recovers the byte order from the BOM or the null-byte pattern.

use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

use regex::bytes::Regex;
use tracing::debug;

use crate::error::CharsetError;

/// Cached regex for the XML declaration's encoding pseudo-attribute
static XML_DECL_ENCODING_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_xml_decl_encoding_regex() -> &'static Regex {
    XML_DECL_ENCODING_REGEX.get_or_init(|| {
        Regex::new(r#"^\s*<\?xml\s[^>]*?encoding\s*=\s*["']([A-Za-z][A-Za-z0-9._\-]*)["']"#)
            .expect("Failed to compile XML declaration regex")
    })
}

/// A charset identifier such as `UTF-8` or `ISO-8859-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Encoding(String);

impl Encoding {
    pub fn new(label: impl Into<String>) -> Self {
        Encoding(label.into().trim().to_string())
    }

    pub fn utf8() -> Self {
        Encoding("UTF-8".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fold every `UTF-16*` variant to the bare `UTF-16` tag.
    pub fn canonicalize(self) -> Self {
        if self.0.to_ascii_uppercase().starts_with("UTF-16") {
            Encoding("UTF-16".to_string())
        } else {
            self
        }
    }

    /// Whether payloads in this charset can be decoded.
    pub fn is_supported(&self) -> bool {
        utf32_order(&self.0).is_some() || encoding_rs::Encoding::for_label(self.0.as_bytes()).is_some()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Encoding {
    fn from(label: &str) -> Self {
        Encoding::new(label)
    }
}

/// Byte-order-marks, longest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bom {
    Utf32Be,
    Utf32Le,
    Utf8,
    Utf16Be,
    Utf16Le,
}

impl Bom {
    // UTF-16LE's mark is a prefix of UTF-32LE's, so 4-byte marks go first.
    const ORDERED: [(Bom, &'static [u8]); 5] = [
        (Bom::Utf32Be, &[0x00, 0x00, 0xFE, 0xFF]),
        (Bom::Utf32Le, &[0xFF, 0xFE, 0x00, 0x00]),
        (Bom::Utf8, &[0xEF, 0xBB, 0xBF]),
        (Bom::Utf16Be, &[0xFE, 0xFF]),
        (Bom::Utf16Le, &[0xFF, 0xFE]),
    ];

    pub fn detect(content: &[u8]) -> Option<Bom> {
        Self::ORDERED
            .iter()
            .find(|(_, mark)| content.starts_with(mark))
            .map(|(bom, _)| *bom)
    }

    pub fn len(self) -> usize {
        match self {
            Bom::Utf32Be | Bom::Utf32Le => 4,
            Bom::Utf8 => 3,
            Bom::Utf16Be | Bom::Utf16Le => 2,
        }
    }

    pub fn encoding_name(self) -> &'static str {
        match self {
            Bom::Utf32Be => "UTF-32BE",
            Bom::Utf32Le => "UTF-32LE",
            Bom::Utf8 => "UTF-8",
            Bom::Utf16Be => "UTF-16BE",
            Bom::Utf16Le => "UTF-16LE",
        }
    }
}

/// Remove a leading byte-order-mark, if any.
///
/// Only the longest matching mark is removed; content without a mark is
/// returned unchanged.
pub fn trim_bom(content: &[u8]) -> &[u8] {
    match Bom::detect(content) {
        Some(bom) => {
            debug!(bom_size = bom.len(), "trimming BOM");
            &content[bom.len()..]
        }
        None => content,
    }
}

/// Detect the encoding of raw bytes from a BOM or, failing that, from the
/// null-byte pattern of the first four bytes.
pub fn detect_encoding(content: &[u8]) -> Option<Encoding> {
    if let Some(bom) = Bom::detect(content) {
        return Some(Encoding::new(bom.encoding_name()));
    }

    let head = content.get(..4)?;
    let nul: Vec<bool> = head.iter().map(|b| *b == 0).collect();
    let name = match nul.as_slice() {
        [true, true, true, false] => "UTF-32BE",
        [false, true, true, true] => "UTF-32LE",
        [true, false, true, false] => "UTF-16BE",
        [false, true, false, true] => "UTF-16LE",
        _ => return None,
    };
    Some(Encoding::new(name))
}

/// Read the `encoding` declared in an XML prolog.
pub fn xml_declared_encoding(content: &[u8]) -> Option<Encoding> {
    let content = trim_bom(content);
    get_xml_decl_encoding_regex()
        .captures(content)
        .and_then(|caps| caps.get(1))
        .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
        .map(Encoding::new)
}

fn log_encoding(encoding: Option<&Encoding>) -> Cow<'_, str> {
    encoding
        .map(|e| Cow::Borrowed(e.as_str()))
        .unwrap_or(Cow::Borrowed("not specified"))
}

/// Resolve the definitive encoding of a payload.
pub fn resolve(
    header_charset: Option<&Encoding>,
    body: &[u8],
    configured_default: &Encoding,
) -> Encoding {
    resolve_label(header_charset, body, configured_default).canonicalize()
}

/// Resolve the encoding of an XML payload, preferring the document's own
/// declaration over binary detection.
pub fn resolve_xml(body: &[u8], configured_default: &Encoding) -> Encoding {
    resolve_xml_label(body, configured_default).canonicalize()
}

/// Like [`resolve`], but keeps the label as found. `UTF-16LE` and `UTF-16BE`
/// still carry their byte order, which [`decode`] needs for unmarked bodies.
pub fn resolve_label(
    header_charset: Option<&Encoding>,
    body: &[u8],
    configured_default: &Encoding,
) -> Encoding {
    debug!(charset = %log_encoding(header_charset), "request Content-Type charset");
    resolve_chain(header_charset, body, configured_default)
}

/// Like [`resolve_xml`], but keeps the label as found.
pub fn resolve_xml_label(body: &[u8], configured_default: &Encoding) -> Encoding {
    let declared = xml_declared_encoding(body);
    debug!(encoding = %log_encoding(declared.as_ref()), "xml declaration encoding");
    resolve_chain(declared.as_ref(), body, configured_default)
}

fn resolve_chain(
    declared: Option<&Encoding>,
    body: &[u8],
    configured_default: &Encoding,
) -> Encoding {
    match declared {
        Some(encoding) => encoding.clone(),
        None => {
            let detected = detect_encoding(body);
            debug!(encoding = %log_encoding(detected.as_ref()), "detected payload encoding");
            detected.unwrap_or_else(|| {
                debug!(encoding = %configured_default, "defaulting to configured encoding");
                configured_default.clone()
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Big,
    Little,
}

fn utf32_order(label: &str) -> Option<Option<ByteOrder>> {
    match label.to_ascii_uppercase().as_str() {
        "UTF-32" | "UTF32" => Some(None),
        "UTF-32BE" | "UTF32BE" => Some(Some(ByteOrder::Big)),
        "UTF-32LE" | "UTF32LE" => Some(Some(ByteOrder::Little)),
        _ => None,
    }
}

fn utf16_order(label: &str) -> Option<Option<ByteOrder>> {
    match label.to_ascii_uppercase().as_str() {
        "UTF-16" | "UTF16" => Some(None),
        "UTF-16BE" | "UTF16BE" => Some(Some(ByteOrder::Big)),
        "UTF-16LE" | "UTF16LE" => Some(Some(ByteOrder::Little)),
        _ => None,
    }
}

/// Byte order for an unmarked UTF-16/32 body: BOM first, then the position
/// of the null bytes, else big-endian.
fn sniff_order(content: &[u8]) -> ByteOrder {
    match Bom::detect(content) {
        Some(Bom::Utf16Le | Bom::Utf32Le) => ByteOrder::Little,
        Some(Bom::Utf16Be | Bom::Utf32Be) => ByteOrder::Big,
        _ => match content {
            [first, 0, ..] if *first != 0 => ByteOrder::Little,
            _ => ByteOrder::Big,
        },
    }
}

fn decode_utf32(content: &[u8], order: ByteOrder, label: &str) -> Result<String, CharsetError> {
    if content.len() % 4 != 0 {
        return Err(CharsetError::Truncated {
            encoding: label.to_string(),
            len: content.len(),
            unit: 4,
        });
    }
    content
        .chunks_exact(4)
        .map(|chunk| {
            let unit = [chunk[0], chunk[1], chunk[2], chunk[3]];
            let code = match order {
                ByteOrder::Big => u32::from_be_bytes(unit),
                ByteOrder::Little => u32::from_le_bytes(unit),
            };
            char::from_u32(code).ok_or_else(|| CharsetError::Malformed {
                encoding: label.to_string(),
            })
        })
        .collect()
}

/// Decode raw payload bytes (BOM included or not) into text.
///
/// A leading BOM is never part of the returned text.
pub fn decode(content: &[u8], encoding: &Encoding) -> Result<String, CharsetError> {
    let label = encoding.as_str();
    let body = trim_bom(content);

    if let Some(explicit) = utf32_order(label) {
        let order = explicit.unwrap_or_else(|| sniff_order(content));
        return decode_utf32(body, order, label);
    }

    let codec = match utf16_order(label) {
        Some(explicit) => match explicit.unwrap_or_else(|| sniff_order(content)) {
            ByteOrder::Big => encoding_rs::UTF_16BE,
            ByteOrder::Little => encoding_rs::UTF_16LE,
        },
        None => encoding_rs::Encoding::for_label(label.as_bytes())
            .ok_or_else(|| CharsetError::Unsupported(label.to_string()))?,
    };

    codec
        .decode_without_bom_handling_and_without_replacement(body)
        .map(Cow::into_owned)
        .ok_or_else(|| CharsetError::Malformed {
            encoding: label.to_string(),
        })
}
