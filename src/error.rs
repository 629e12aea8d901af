//! Error types for calls to the agent.
//!
//! Every failure a caller can observe is an [`Error`]. The variants keep the
//! structured details of a failure (the [`AgentError`] of a rejected call,
//! the [`ContentError`] of an unparseable reply) so callers can act on the
//! status code or error source instead of matching on message text.

use crate::context::ContextError;
use crate::request::ValidationError;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::fmt;

/// Response header naming the subsystem that produced an error response.
pub const ERROR_SOURCE_HEADER: &str = "x-error-source";

/// The operation a call was performing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    JoinNetwork,
    GetNetworkConfiguration,
    PutNetworkContainer,
    DeleteNetworkContainer,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::JoinNetwork => "join network",
            Operation::GetNetworkConfiguration => "get network configuration",
            Operation::PutNetworkContainer => "put network container",
            Operation::DeleteNetworkContainer => "delete network container",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the remote host produced an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorSource {
    /// The wireserver proxy in front of the agent.
    Wireserver,
    /// The agent itself.
    Agent,
    /// The response did not say.
    #[default]
    Unknown,
}

impl ErrorSource {
    /// Reads the [`ERROR_SOURCE_HEADER`] header; absent or unrecognised
    /// values are [`ErrorSource::Unknown`].
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(ERROR_SOURCE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(Self::from_header_value)
            .unwrap_or_default()
    }

    fn from_header_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "wireserver" => ErrorSource::Wireserver,
            "agent" | "nmagent" => ErrorSource::Agent,
            _ => ErrorSource::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSource::Wireserver => "wireserver",
            ErrorSource::Agent => "agent",
            ErrorSource::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The agent answered with a status other than 200.
///
/// Built once from the terminal response of a call. `body` is whatever
/// could be read from the response; it is empty when reading failed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("agent responded with status {code} (source: {error_source}): {}", String::from_utf8_lossy(.body))]
pub struct AgentError {
    pub code: StatusCode,
    pub error_source: ErrorSource,
    pub body: Bytes,
}

impl AgentError {
    pub(crate) fn from_response(code: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        Self {
            code,
            error_source: ErrorSource::from_headers(headers),
            body,
        }
    }

    /// Returns `true` if the agent rejected the call's credentials.
    pub fn is_unauthorized(&self) -> bool {
        self.code == StatusCode::UNAUTHORIZED
    }

    /// Returns `true` if the status is in the 5xx range.
    pub fn is_server_error(&self) -> bool {
        self.code.is_server_error()
    }
}

/// The agent answered 200 but not with JSON.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unexpected content type {content_type:?}: body: {}", String::from_utf8_lossy(.body))]
pub struct ContentError {
    /// The `Content-Type` the agent declared, empty if none.
    pub content_type: String,
    pub body: Bytes,
    /// The `Content-Length` the agent declared, if any.
    pub content_length: Option<u64>,
}

/// The main error type for calls to the agent.
///
/// Variants other than [`Error::InvalidConfig`], [`Error::Configuration`]
/// and [`Error::InvalidUrl`] happen during a call and name the
/// [`Operation`] that failed.
///
/// # Examples
///
/// ```no_run
/// use netagent_client::{Client, Config, Context, Error, GetNetworkConfigRequest};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::new(Config::new("168.63.129.16", 80))?;
/// let req = GetNetworkConfigRequest { vnet_id: "vnet-1".to_string() };
///
/// match client.get_network_configuration(&Context::background(), &req).await {
///     Ok(vnet) => println!("{} subnets", vnet.subnets.len()),
///     Err(err) if err.agent_error().is_some_and(|e| e.is_unauthorized()) => {
///         eprintln!("credentials rejected");
///     }
///     Err(err) => eprintln!("failed: {err}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The client configuration is incomplete. No client was built.
    #[error("validating config: {0}")]
    InvalidConfig(#[source] ValidationError),

    /// The client could not be assembled, e.g. because of a bad header.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The configured host and port do not form a valid URL.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request payload is incomplete. Nothing was sent.
    #[error("{op}: validating request: {source}")]
    Validation {
        op: Operation,
        source: ValidationError,
    },

    /// The request body could not be serialized. Nothing was sent.
    #[error("{op}: retrieving request body: {source}")]
    Serialization {
        op: Operation,
        source: serde_json::Error,
    },

    /// A network-level failure before a response arrived: connection
    /// refused, DNS, TLS, reset, or timeout.
    #[error("{op}: executing request: {source}")]
    Transport {
        op: Operation,
        source: reqwest::Error,
    },

    /// The agent answered 200 but the connection failed while its body was
    /// being read (dropped, reset, or timed out mid-body).
    #[error("{op}: reading response body: {source}")]
    Body {
        op: Operation,
        source: reqwest::Error,
    },

    /// The call's context was cancelled or ran out of time.
    #[error("{op}: {source}")]
    Context {
        op: Operation,
        source: ContextError,
    },

    /// The agent rejected the call.
    #[error("{op}: {source}")]
    Agent { op: Operation, source: AgentError },

    /// The agent accepted the call but its reply was not JSON.
    #[error("{op}: {source}")]
    Content { op: Operation, source: ContentError },

    /// The reply was JSON but did not match the expected shape.
    #[error("{op}: decoding json response: {source}")]
    Decode {
        op: Operation,
        source: serde_json::Error,
        /// The body that failed to decode.
        raw_response: String,
    },

    /// The retry strategy ran out of attempts.
    #[error("{op}: max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        op: Operation,
        attempts: usize,
        #[source]
        last_error: Box<Error>,
    },
}

impl Error {
    /// Returns the operation that failed, if the error happened during a call.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            Error::InvalidConfig(_) | Error::Configuration(_) | Error::InvalidUrl(_) => None,
            Error::Validation { op, .. }
            | Error::Serialization { op, .. }
            | Error::Transport { op, .. }
            | Error::Body { op, .. }
            | Error::Context { op, .. }
            | Error::Agent { op, .. }
            | Error::Content { op, .. }
            | Error::Decode { op, .. }
            | Error::MaxRetriesExceeded { op, .. } => Some(*op),
        }
    }

    /// Returns `true` if another attempt could succeed.
    ///
    /// Only transient transport failures (see
    /// [`crate::retry::is_transient`]) and interrupted body reads qualify. A
    /// response from the agent, however unwelcome, is final.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytes::Bytes;
    /// use http::StatusCode;
    /// use netagent_client::{AgentError, Error, ErrorSource, Operation};
    ///
    /// let err = Error::Agent {
    ///     op: Operation::JoinNetwork,
    ///     source: AgentError {
    ///         code: StatusCode::SERVICE_UNAVAILABLE,
    ///         error_source: ErrorSource::Agent,
    ///         body: Bytes::from_static(b"busy"),
    ///     },
    /// };
    ///
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { source, .. } => crate::retry::is_transient(source),
            Error::Body { .. } => true,
            _ => false,
        }
    }

    /// Returns the agent's rejection, looking through exhausted retries.
    pub fn agent_error(&self) -> Option<&AgentError> {
        match self {
            Error::Agent { source, .. } => Some(source),
            Error::MaxRetriesExceeded { last_error, .. } => last_error.agent_error(),
            _ => None,
        }
    }

    /// Returns the content mismatch, if that is what failed.
    pub fn content_error(&self) -> Option<&ContentError> {
        match self {
            Error::Content { source, .. } => Some(source),
            Error::MaxRetriesExceeded { last_error, .. } => last_error.content_error(),
            _ => None,
        }
    }

    /// Returns the context error if the call was cancelled or timed out.
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Error::Context { source, .. } => Some(*source),
            _ => None,
        }
    }

    /// Returns the HTTP status code of the reply, if one was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Agent { source, .. } => Some(source.code),
            Error::Content { .. } | Error::Decode { .. } | Error::Body { .. } => {
                Some(StatusCode::OK)
            }
            Error::Transport { source, .. } => source.status(),
            Error::MaxRetriesExceeded { last_error, .. } => last_error.status(),
            _ => None,
        }
    }
}

/// A specialized `Result` type for calls to the agent.
pub type Result<T> = std::result::Result<T, Error>;
