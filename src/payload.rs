//! Raw request payloads and their normalized, BOM-free form.

use std::fmt;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::charset::{self, Bom, Encoding};
use crate::error::{Result, ValidationError};

/// A request payload in exactly one of its three possible shapes.
pub enum RawPayload {
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    Text(String),
    Bytes(Bytes),
}

impl RawPayload {
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        RawPayload::Stream(Box::new(reader))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RawPayload::Stream(_) => "stream",
            RawPayload::Text(_) => "text",
            RawPayload::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Debug for RawPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawPayload::Stream(_) => f.write_str("RawPayload::Stream(..)"),
            RawPayload::Text(text) => f.debug_tuple("RawPayload::Text").field(text).finish(),
            RawPayload::Bytes(bytes) => f.debug_tuple("RawPayload::Bytes").field(bytes).finish(),
        }
    }
}

impl From<String> for RawPayload {
    fn from(text: String) -> Self {
        RawPayload::Text(text)
    }
}

impl From<&str> for RawPayload {
    fn from(text: &str) -> Self {
        RawPayload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for RawPayload {
    fn from(bytes: Vec<u8>) -> Self {
        RawPayload::Bytes(Bytes::from(bytes))
    }
}

impl From<Bytes> for RawPayload {
    fn from(bytes: Bytes) -> Self {
        RawPayload::Bytes(bytes)
    }
}

/// A decoded payload with its byte-order-mark removed.
///
/// `bytes` are the BOM-free body in `encoding`; `text` is the same body
/// decoded. `encoding` is what must be attached to the outgoing payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPayload {
    bytes: Bytes,
    text: String,
    encoding: Encoding,
}

impl NormalizedPayload {
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn into_parts(self) -> (Bytes, String, Encoding) {
        (self.bytes, self.text, self.encoding)
    }
}

/// Read a stream to the end. The reader is dropped on every exit path.
async fn materialize(mut reader: Box<dyn AsyncRead + Send + Unpin>) -> Result<Bytes> {
    let mut buffer = Vec::new();
    reader
        .read_to_end(&mut buffer)
        .await
        .map_err(|e| ValidationError::bad_request(format!("Failed to read payload: {}", e)))?;
    Ok(Bytes::from(buffer))
}

/// How the encoding of a byte payload is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    /// Header charset, then binary detection.
    Header,
    /// Header charset, then the XML prolog, then binary detection.
    XmlProlog,
}

/// Turns raw payloads into [`NormalizedPayload`]s.
#[derive(Debug, Clone)]
pub struct PayloadNormalizer {
    default_encoding: Encoding,
}

impl PayloadNormalizer {
    pub fn new(default_encoding: Encoding) -> Self {
        Self { default_encoding }
    }

    pub fn default_encoding(&self) -> &Encoding {
        &self.default_encoding
    }

    /// Normalize a payload, resolving its encoding from the header charset or
    /// binary detection.
    pub async fn normalize(
        &self,
        raw: RawPayload,
        header_charset: Option<&Encoding>,
    ) -> Result<NormalizedPayload> {
        self.normalize_with(raw, header_charset, EncodingSource::Header)
            .await
    }

    /// Normalize an XML payload; without a header charset the document's own
    /// declaration is consulted before binary detection.
    pub async fn normalize_xml(
        &self,
        raw: RawPayload,
        header_charset: Option<&Encoding>,
    ) -> Result<NormalizedPayload> {
        self.normalize_with(raw, header_charset, EncodingSource::XmlProlog)
            .await
    }

    pub async fn normalize_with(
        &self,
        raw: RawPayload,
        header_charset: Option<&Encoding>,
        source: EncodingSource,
    ) -> Result<NormalizedPayload> {
        let bytes = match raw {
            RawPayload::Text(text) => return Ok(Self::normalize_text(text)),
            RawPayload::Bytes(bytes) => bytes,
            RawPayload::Stream(reader) => {
                debug!("materializing payload stream");
                materialize(reader).await?
            }
        };
        self.normalize_bytes(bytes, header_charset, source)
    }

    fn normalize_text(text: String) -> NormalizedPayload {
        let text = match text.strip_prefix('\u{FEFF}') {
            Some(stripped) => stripped.to_string(),
            None => text,
        };
        NormalizedPayload {
            bytes: Bytes::from(text.clone().into_bytes()),
            text,
            encoding: Encoding::utf8(),
        }
    }

    fn normalize_bytes(
        &self,
        bytes: Bytes,
        header_charset: Option<&Encoding>,
        source: EncodingSource,
    ) -> Result<NormalizedPayload> {
        // Decode with the label as found; only the re-attached tag is folded
        let label = match (header_charset, source) {
            (None, EncodingSource::XmlProlog) => {
                charset::resolve_xml_label(&bytes, &self.default_encoding)
            }
            (header, _) => charset::resolve_label(header, &bytes, &self.default_encoding),
        };

        let text = charset::decode(&bytes, &label)?;
        let encoding = label.canonicalize();
        let bom_len = Bom::detect(&bytes).map(Bom::len).unwrap_or(0);

        Ok(NormalizedPayload {
            bytes: bytes.slice(bom_len..),
            text,
            encoding,
        })
    }
}
