//! Streaming body decoding.
//!
//! Chunks are fed through a write-side decompressor as they arrive, so a
//! gzip body is never buffered compressed in full before inflating.

use std::error::Error as StdError;
use std::io::{self, Write};
use std::pin::pin;
use std::string::FromUtf8Error;

use bytes::Bytes;
use flate2::write::{GzDecoder, ZlibDecoder};
use futures::{Stream, StreamExt};
use reqwest::header::HeaderValue;
use thiserror::Error;
use tracing::trace;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors that can occur while reading and decoding a response body.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The body stream failed before end-of-data (e.g. connection reset).
    #[error("body stream interrupted: {0}")]
    Stream(BoxError),

    /// The compressed payload is corrupt or truncated.
    #[error("decompression failed: {0}")]
    Decompress(#[from] io::Error),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),

    #[error("unsupported content encoding {0:?}")]
    UnsupportedEncoding(String),
}

/// Declared transfer encoding of a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
    Other(String),
}

impl ContentEncoding {
    /// Interprets a `Content-Encoding` header; absent means identity.
    pub fn from_header(value: Option<&HeaderValue>) -> Self {
        let Some(value) = value else {
            return Self::Identity;
        };
        let raw = String::from_utf8_lossy(value.as_bytes());
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Self::Identity,
            "gzip" | "x-gzip" => Self::Gzip,
            "deflate" => Self::Deflate,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Other(name) => name,
        }
    }
}

/// A fully reassembled, decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub text: String,
    /// Bytes received on the wire, before decompression.
    pub wire_bytes: usize,
}

enum BodyDecoder {
    Identity(Vec<u8>),
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(ZlibDecoder<Vec<u8>>),
}

impl BodyDecoder {
    fn for_encoding(encoding: &ContentEncoding) -> Result<Self, DecodeError> {
        match encoding {
            ContentEncoding::Identity => Ok(Self::Identity(Vec::new())),
            ContentEncoding::Gzip => Ok(Self::Gzip(GzDecoder::new(Vec::new()))),
            ContentEncoding::Deflate => Ok(Self::Deflate(ZlibDecoder::new(Vec::new()))),
            ContentEncoding::Other(name) => Err(DecodeError::UnsupportedEncoding(name.clone())),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self {
            Self::Identity(buf) => {
                buf.extend_from_slice(chunk);
                Ok(())
            }
            Self::Gzip(decoder) => decoder.write_all(chunk),
            Self::Deflate(decoder) => decoder.write_all(chunk),
        }
    }

    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            Self::Identity(buf) => Ok(buf),
            Self::Gzip(decoder) => decoder.finish(),
            Self::Deflate(decoder) => decoder.finish(),
        }
    }
}

/// Consumes `chunks` in arrival order until end-of-stream and returns the
/// decoded text.
///
/// # Errors
///
/// Returns [`DecodeError::Stream`] if the stream yields an error,
/// [`DecodeError::Decompress`] if the compressed data is corrupt, and
/// [`DecodeError::Utf8`] if the decoded bytes are not UTF-8.
pub async fn decode_body<S, E>(
    encoding: &ContentEncoding,
    chunks: S,
) -> Result<DecodedPayload, DecodeError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    let mut decoder = BodyDecoder::for_encoding(encoding)?;
    let mut chunks = pin!(chunks);
    let mut wire_bytes = 0;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| DecodeError::Stream(e.into()))?;
        wire_bytes += chunk.len();
        trace!(len = chunk.len(), "Body chunk received");
        decoder.push(&chunk)?;
    }

    let text = String::from_utf8(decoder.finish()?)?;
    Ok(DecodedPayload { text, wire_bytes })
}
