//! Prepared request metadata.

use bytes::Bytes;
use http::{HeaderMap, Method};
use url::Url;

/// A validated request, ready to be sent.
///
/// Produced by [`crate::Client::build_request`] without any network I/O.
/// The same metadata is turned into a fresh transport request for every
/// attempt, so retries always resend the identical request.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// The HTTP method (GET, POST, etc.).
    pub method: Method,

    /// The full target URL.
    pub url: Url,

    /// Headers for this request, on top of the client's defaults.
    pub headers: HeaderMap,

    /// The request body, if any.
    pub body: Option<Bytes>,
}

impl RequestMetadata {
    /// Creates metadata with no headers and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Sets the request body.
    pub fn with_body(mut self, body: Option<Bytes>) -> Self {
        self.body = body;
        self
    }
}
