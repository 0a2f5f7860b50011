//! HTTP implementations of the fetch traits.
//!
//! Both fetchers address a slide server rooted at a base URL (for example
//! `http://localhost:5000/api`) and append the resolver's paths to it:
//!
//! - `GET {base}/slides/{slide_id}/dzi` - descriptor, JSON or DZI XML
//! - `GET {base}/slides/{slide_id}/tiles/{level}/{x}/{y}` - tile image

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use super::{DescriptorSource, TileFetcher};
use crate::error::{ClientError, DescriptorFetchError, TileFetchError};
use crate::pyramid::{descriptor_uri, parse_dzi_xml, RawDescriptor, SlideId};

/// Request timeout for descriptor fetches.
pub const DEFAULT_DESCRIPTOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Validate `base_url` and normalise it to have no trailing slash.
fn normalise_base(base_url: &str) -> Result<String, url::ParseError> {
    let parsed = Url::parse(base_url)?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

// =============================================================================
// Descriptor Source
// =============================================================================

/// Fetches descriptors from a slide server.
#[derive(Clone)]
pub struct HttpDescriptorSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDescriptorSource {
    /// Create a source for the server rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_DESCRIPTOR_TIMEOUT)
    }

    /// Create a source with a custom request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = normalise_base(base_url)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Full URL of a slide's descriptor.
    pub fn descriptor_url(&self, slide_id: &SlideId) -> String {
        format!("{}{}", self.base_url, descriptor_uri(slide_id))
    }
}

/// Decode a descriptor body, accepting the JSON contract or Deep Zoom XML.
fn decode_descriptor(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<RawDescriptor, DescriptorFetchError> {
    let looks_like_xml = content_type.is_some_and(|ct| ct.contains("xml"))
        || body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'<');

    if looks_like_xml {
        let text = std::str::from_utf8(body)
            .map_err(|e| DescriptorFetchError::Malformed(e.to_string()))?;
        parse_dzi_xml(text).map_err(|e| DescriptorFetchError::Malformed(e.to_string()))
    } else {
        serde_json::from_slice(body).map_err(|e| DescriptorFetchError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl DescriptorSource for HttpDescriptorSource {
    async fn fetch_descriptor(
        &self,
        slide_id: &SlideId,
    ) -> Result<RawDescriptor, DescriptorFetchError> {
        let url = self.descriptor_url(slide_id);
        debug!("Fetching descriptor {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DescriptorFetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DescriptorFetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let body = response
            .bytes()
            .await
            .map_err(|e| DescriptorFetchError::Transport(e.to_string()))?;

        decode_descriptor(content_type.as_deref(), &body)
    }
}

// =============================================================================
// Tile Fetcher
// =============================================================================

/// Fetches tile images from a slide server.
///
/// Timeouts are applied by the scheduler, not by the client.
#[derive(Clone)]
pub struct HttpTileFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTileFetcher {
    /// Create a fetcher for the server rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = normalise_base(base_url)?;
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch_tile(&self, uri: &str) -> Result<Bytes, TileFetchError> {
        let url = format!("{}{}", self.base_url, uri);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TileFetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TileFetchError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| TileFetchError::Transport(e.to_string()))
    }
}
