//! Transport: one GET per poll cycle against the configured feed endpoint.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONTENT_ENCODING, HeaderValue};
use reqwest::{Method, Request, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::config::PollConfig;
use crate::decode::{ContentEncoding, DecodeError, DecodedPayload, decode_body};

/// Transport-level failures: the request never produced a usable response.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid feed url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(StatusCode),
}

/// A response whose headers have arrived but whose body has not been read.
#[derive(Debug)]
pub struct FeedResponse {
    encoding: ContentEncoding,
    response: reqwest::Response,
}

impl FeedResponse {
    /// Encoding the upstream declared in `Content-Encoding`.
    pub fn encoding(&self) -> &ContentEncoding {
        &self.encoding
    }

    /// Reads the body to end-of-stream and decodes it into text.
    pub async fn into_payload(self) -> Result<DecodedPayload, DecodeError> {
        decode_body(&self.encoding, self.response.bytes_stream()).await
    }
}

/// Builds the feed request: GET with the configured `Accept-Encoding` and a
/// JSON `Accept` header, no body.
pub fn build_request(config: &PollConfig) -> Result<Request, FetchError> {
    let url = config.url();
    let parsed = reqwest::Url::parse(&url).map_err(|e| FetchError::InvalidUrl {
        url: url.clone(),
        reason: e.to_string(),
    })?;

    let mut req = Request::new(Method::GET, parsed);
    let headers = req.headers_mut();
    headers.insert(
        ACCEPT_ENCODING,
        HeaderValue::from_static(config.accept_encoding.header_value()),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Ok(req)
}

/// Issues one request and returns the response once its headers are in.
///
/// # Errors
///
/// Returns [`FetchError`] on connection failure, timeout, or a non-success status.
#[tracing::instrument(skip_all, fields(url = %config.url()))]
pub async fn fetch_feed<C: HttpClient + ?Sized>(
    client: &C,
    config: &PollConfig,
) -> Result<FeedResponse, FetchError> {
    let req = build_request(config)?;
    let response = client.execute(req).await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }

    let encoding = ContentEncoding::from_header(response.headers().get(CONTENT_ENCODING));
    debug!(%status, ?encoding, "Feed response headers received");

    Ok(FeedResponse { encoding, response })
}
