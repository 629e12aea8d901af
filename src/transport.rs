//! Fully read responses and the wireserver proxy translation.
//!
//! When the agent sits behind wireserver, every call is tunneled through the
//! proxy's plugin endpoint, and the proxy answers 200 even when the agent
//! did not: the agent's real status travels inside the JSON body as
//! `httpStatusCode`. [`translate_wireserver`] restores the real status and
//! records which side produced it in the [`ERROR_SOURCE_HEADER`] header, so
//! the rest of the client can treat both deployments alike.

use crate::error::{ContentError, ERROR_SOURCE_HEADER};
use crate::{Error, ErrorSource, Operation, Result};
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use url::Url;

/// The only content type accepted for JSON replies.
pub const MIME_JSON: &str = "application/json";

const WIRESERVER_PLUGIN_PATH: &str = "/machine/plugins/";
const WIRESERVER_STATUS_KEY: &str = "httpStatusCode";

/// A response whose body has been read in full.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// The length the response declared before its body was read.
    pub content_length: Option<u64>,
}

impl Reply {
    /// The declared `Content-Type`, or `""` if absent or not ASCII.
    pub fn content_type(&self) -> &str {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }

    /// Returns `true` if the media type is JSON, ignoring parameters such as
    /// `charset`.
    pub fn is_json(&self) -> bool {
        let media_type = self.content_type().split(';').next().unwrap_or_default();
        media_type.trim().eq_ignore_ascii_case(MIME_JSON)
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Content`] if the reply is not declared as JSON, and
    /// [`Error::Decode`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(self, op: Operation) -> Result<T> {
        if !self.is_json() {
            let content_type = self.content_type().to_string();
            tracing::warn!(
                operation = %op,
                content_type = %content_type,
                "Unexpected content type"
            );
            return Err(Error::Content {
                op,
                source: ContentError {
                    content_type,
                    body: self.body,
                    content_length: self.content_length,
                },
            });
        }

        serde_json::from_slice(&self.body).map_err(|source| {
            let raw_response = String::from_utf8_lossy(&self.body).into_owned();
            tracing::error!(
                error = %source,
                raw_response = %raw_response,
                "Failed to deserialize response"
            );
            Error::Decode {
                op,
                source,
                raw_response,
            }
        })
    }
}

/// Rewrites a direct agent URL into the wireserver plugin URL carrying the
/// agent path, form-encoded, as its `type` parameter.
pub(crate) fn wireserver_url(mut url: Url) -> Url {
    let path = url.path().trim_start_matches('/').to_string();
    url.set_path(WIRESERVER_PLUGIN_PATH);
    url.query_pairs_mut()
        .clear()
        .append_pair("comp", "nmagent")
        .append_pair("type", &path);
    url
}

fn tag_source(headers: &mut HeaderMap, source: ErrorSource) {
    headers.insert(ERROR_SOURCE_HEADER, HeaderValue::from_static(source.as_str()));
}

fn embedded_status(value: &Value) -> Option<StatusCode> {
    let code = match value {
        Value::String(code) => code.trim().parse::<u16>().ok()?,
        Value::Number(code) => u16::try_from(code.as_u64()?).ok()?,
        _ => return None,
    };
    StatusCode::from_u16(code).ok()
}

/// Translates a reply relayed by wireserver into the agent's own answer.
///
/// A non-200 from the proxy is the proxy's own failure. A 200 carries the
/// agent's answer; if it is declared JSON and its object body embeds a
/// status, that status replaces the proxy's and is removed from the body.
pub(crate) fn translate_wireserver(mut reply: Reply) -> Reply {
    if reply.status != StatusCode::OK {
        tag_source(&mut reply.headers, ErrorSource::Wireserver);
        return reply;
    }
    tag_source(&mut reply.headers, ErrorSource::Agent);

    if !reply.is_json() {
        return reply;
    }
    let Ok(mut object) = serde_json::from_slice::<Map<String, Value>>(&reply.body) else {
        return reply;
    };
    let Some(embedded) = object.remove(WIRESERVER_STATUS_KEY) else {
        return reply;
    };
    let Some(status) = embedded_status(&embedded) else {
        tracing::warn!(value = %embedded, "Ignoring unparseable wireserver status");
        return reply;
    };

    if let Ok(body) = serde_json::to_vec(&object) {
        reply.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        reply.content_length = Some(body.len() as u64);
        reply.body = Bytes::from(body);
    }
    reply.status = status;
    reply
}
