//! Client for the node-local network configuration agent.
//!
//! The [`Client`] type is the main entry point. Use [`ClientBuilder`] to
//! tune timeouts, headers, or the retry policy.

use crate::{
    metadata::RequestMetadata,
    request::{
        DeleteContainerRequest, GetNetworkConfigRequest, JoinNetworkRequest,
        PutNetworkContainerRequest, Request,
    },
    response::VirtualNetwork,
    retry::{Attempt, Retrier, Retry, RetryOnTransport, RetryPredicate, RetryStrategy},
    transport::{self, Reply, MIME_JSON},
    Config, Context, Error, Operation, Result,
};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A client for the agent.
///
/// The client is cheap to clone and safe to share between tasks: it holds
/// no per-call state, and the underlying connection pool is shared.
///
/// Operations that are safe to repeat ([`Client::join_network`],
/// [`Client::get_network_configuration`]) retry transient transport
/// failures with exponential backoff until the call's [`Context`] is done.
/// Operations with side effects ([`Client::put_network_container`],
/// [`Client::delete_network_container`]) are attempted exactly once.
///
/// # Examples
///
/// ```no_run
/// use netagent_client::{Client, Config, Context, JoinNetworkRequest};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), netagent_client::Error> {
/// let client = Client::new(Config::new("168.63.129.16", 80))?;
/// let ctx = Context::background().with_timeout(Duration::from_secs(30));
///
/// let req = JoinNetworkRequest { network_id: "vnet-1".to_string() };
/// client.join_network(&ctx, &req).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    base_url: Url,
    wireserver: bool,
    default_headers: HeaderMap,
    retrier: Arc<dyn Retry<Reply>>,
    timeout: Option<Duration>,
}

impl Client {
    /// Creates a client with the default retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the host or port is missing.
    pub fn new(config: Config) -> Result<Self> {
        ClientBuilder::new(config).build()
    }

    /// Creates a `ClientBuilder` for the given configuration.
    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Joins the node to a customer's virtual network.
    ///
    /// Retried on transient transport failures.
    pub async fn join_network(&self, ctx: &Context, req: &JoinNetworkRequest) -> Result<()> {
        let op = Operation::JoinNetwork;
        let metadata = self.build_request(op, req)?;
        self.retried(ctx, op, &metadata).await?;
        Ok(())
    }

    /// Retrieves the configuration of a customer's virtual network. Only
    /// subnets delegated to this node are returned.
    ///
    /// Retried on transient transport failures.
    ///
    /// # Errors
    ///
    /// Besides the usual call failures, returns [`Error::Content`] if the
    /// agent's reply is not JSON and [`Error::Decode`] if it is malformed.
    pub async fn get_network_configuration(
        &self,
        ctx: &Context,
        req: &GetNetworkConfigRequest,
    ) -> Result<VirtualNetwork> {
        let op = Operation::GetNetworkConfiguration;
        let metadata = self.build_request(op, req)?;
        let reply = self.retried(ctx, op, &metadata).await?;
        reply.json(op)
    }

    /// Applies a network container goal state.
    ///
    /// Attempted exactly once: a failure is surfaced immediately and never
    /// silently resubmitted.
    pub async fn put_network_container(
        &self,
        ctx: &Context,
        req: &PutNetworkContainerRequest,
    ) -> Result<()> {
        let op = Operation::PutNetworkContainer;
        let metadata = self.build_request(op, req)?;
        self.single_shot(ctx, op, &metadata).await?;
        Ok(())
    }

    /// Removes a network container, its IP addresses, and its policies
    /// from an interface.
    ///
    /// Attempted exactly once.
    pub async fn delete_network_container(
        &self,
        ctx: &Context,
        req: &DeleteContainerRequest,
    ) -> Result<()> {
        let op = Operation::DeleteNetworkContainer;
        let metadata = self.build_request(op, req)?;
        self.single_shot(ctx, op, &metadata).await?;
        Ok(())
    }

    /// Validates `req` and builds the request to send for it.
    ///
    /// Never touches the network. An invalid request fails here with
    /// [`Error::Validation`] and can never reach the transport.
    pub fn build_request(&self, op: Operation, req: &dyn Request) -> Result<RequestMetadata> {
        req.validate()
            .map_err(|source| Error::Validation { op, source })?;

        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Configuration("base url cannot carry a path".to_string()))?
            .clear()
            .extend(req.path_segments());
        if self.inner.wireserver {
            url = transport::wireserver_url(url);
        }

        let body = req
            .body()
            .map_err(|source| Error::Serialization { op, source })?;

        let mut metadata = RequestMetadata::new(req.method(), url).with_body(body);
        if metadata.body.is_some() {
            metadata
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(MIME_JSON));
        }
        Ok(metadata)
    }

    async fn retried(
        &self,
        ctx: &Context,
        op: Operation,
        metadata: &RequestMetadata,
    ) -> Result<Reply> {
        let attempt = move || self.attempt(ctx, op, metadata);
        self.inner.retrier.retry(ctx, op, &attempt).await
    }

    async fn single_shot(
        &self,
        ctx: &Context,
        op: Operation,
        metadata: &RequestMetadata,
    ) -> Result<Reply> {
        if let Some(source) = ctx.err() {
            return Err(Error::Context { op, source });
        }
        self.execute(ctx, op, metadata).await
    }

    fn attempt<'a>(
        &'a self,
        ctx: &'a Context,
        op: Operation,
        metadata: &'a RequestMetadata,
    ) -> Attempt<'a, Reply> {
        Box::pin(self.execute(ctx, op, metadata))
    }

    /// Sends one attempt and classifies its response.
    ///
    /// The send and the body read both race the context, so a cancelled
    /// call surfaces [`Error::Context`] rather than a transport error.
    async fn execute(
        &self,
        ctx: &Context,
        op: Operation,
        metadata: &RequestMetadata,
    ) -> Result<Reply> {
        tracing::debug!(
            method = %metadata.method,
            url = %metadata.url,
            operation = %op,
            "Executing HTTP request"
        );

        let mut request = self
            .inner
            .http_client
            .request(metadata.method.clone(), metadata.url.clone());

        for (name, value) in &self.inner.default_headers {
            request = request.header(name, value);
        }
        for (name, value) in &metadata.headers {
            request = request.header(name, value);
        }

        if let Some(timeout) = self.inner.timeout {
            request = request.timeout(timeout);
        }

        if let Some(body) = &metadata.body {
            request = request.body(body.clone());
        }

        let response = tokio::select! {
            biased;
            source = ctx.done() => return Err(Error::Context { op, source }),
            sent = request.send() => sent.map_err(|source| Error::Transport { op, source })?,
        };

        let status = response.status();
        let headers = response.headers().clone();
        let content_length = response.content_length();

        let body = tokio::select! {
            biased;
            source = ctx.done() => return Err(Error::Context { op, source }),
            read = response.bytes() => read,
        };
        let body = match body {
            Ok(body) => body,
            // the status and source say more than the body; keep going without it
            Err(e) if status != StatusCode::OK => {
                tracing::debug!(error = %e, "Failed to read error response body");
                Bytes::new()
            }
            Err(source) => return Err(Error::Body { op, source }),
        };

        let mut reply = Reply {
            status,
            headers,
            body,
            content_length,
        };
        if self.inner.wireserver {
            reply = transport::translate_wireserver(reply);
        }

        tracing::info!(
            status = reply.status.as_u16(),
            operation = %op,
            "Received HTTP response"
        );

        if reply.status != StatusCode::OK {
            let error = crate::AgentError::from_response(reply.status, &reply.headers, reply.body);
            if error.code.is_client_error() {
                tracing::error!(
                    status = error.code.as_u16(),
                    error_source = %error.error_source,
                    "Agent rejected request"
                );
            } else {
                tracing::warn!(
                    status = error.code.as_u16(),
                    error_source = %error.error_source,
                    "Agent returned an error"
                );
            }
            return Err(Error::Agent { op, source: error });
        }

        Ok(reply)
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use netagent_client::{ClientBuilder, Config, RetryStrategy};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), netagent_client::Error> {
/// let client = ClientBuilder::new(Config::new("168.63.129.16", 80).with_wireserver(true))
///     .timeout(Duration::from_secs(10))
///     .retry_strategy(RetryStrategy::ExponentialBackoff {
///         initial_delay: Duration::from_millis(500),
///         multiplier: 2,
///         max_delay: Some(Duration::from_secs(8)),
///         max_retries: Some(5),
///         jitter: true,
///     })
///     .default_header("User-Agent", "node-agent/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    config: Config,
    default_headers: HeaderMap,
    retry_strategy: RetryStrategy,
    retry_predicate: Option<Box<dyn RetryPredicate>>,
    retrier: Option<Arc<dyn Retry<Reply>>>,
    timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Creates a builder with the default retry policy and no timeout.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            default_headers: HeaderMap::new(),
            retry_strategy: RetryStrategy::default(),
            retry_predicate: None,
            retrier: None,
            timeout: None,
        }
    }

    /// Adds a header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the cooldown schedule of the default retrier.
    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    /// Sets which failures the default retrier retries.
    ///
    /// By default only transient transport failures are retried.
    pub fn retry_predicate(mut self, predicate: Box<dyn RetryPredicate>) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }

    /// Replaces the retrier entirely. Overrides
    /// [`ClientBuilder::retry_strategy`] and [`ClientBuilder::retry_predicate`].
    pub fn retrier(mut self, retrier: Arc<dyn Retry<Reply>>) -> Self {
        self.retrier = Some(retrier);
        self
    }

    /// Sets a timeout for each individual attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is incomplete,
    /// [`Error::InvalidUrl`] if the host is not a valid URL host, and
    /// [`Error::Configuration`] if the HTTP client cannot be created.
    pub fn build(self) -> Result<Client> {
        self.config.validate().map_err(Error::InvalidConfig)?;

        let base_url = Url::parse(&format!(
            "{}://{}/",
            self.config.scheme(),
            self.config.host_port()
        ))?;

        let http_client = reqwest::Client::builder().build().map_err(|e| {
            Error::Configuration(format!("Failed to build HTTP client: {}", e))
        })?;

        let retrier = self.retrier.unwrap_or_else(|| {
            let predicate = self
                .retry_predicate
                .unwrap_or_else(|| Box::new(RetryOnTransport));
            Arc::new(Retrier::new(self.retry_strategy, predicate))
        });

        tracing::debug!(
            base_url = %base_url,
            wireserver = self.config.wireserver,
            "Built agent client"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                http_client,
                base_url,
                wireserver: self.config.wireserver,
                default_headers: self.default_headers,
                retrier,
                timeout: self.timeout,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Policy;

    fn client(config: Config) -> Client {
        Client::new(config).unwrap()
    }

    #[test]
    fn test_invalid_config_builds_no_client() {
        let err = Client::new(Config::new("", 0)).err().unwrap();
        match err {
            Error::InvalidConfig(source) => assert_eq!(source.missing, vec!["host", "port"]),
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }

        assert!(matches!(
            Client::new(Config::new("localhost", 0)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_host_is_a_construction_error() {
        assert!(matches!(
            Client::new(Config::new("not a host", 80)),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_build_request_rejects_invalid_payload() {
        let client = client(Config::new("localhost", 8080));

        let err = client
            .build_request(Operation::JoinNetwork, &JoinNetworkRequest::default())
            .unwrap_err();

        assert!(matches!(err, Error::Validation { op: Operation::JoinNetwork, .. }));
        assert_eq!(
            err.to_string(),
            "join network: validating request: missing fields: network_id"
        );
    }

    #[test]
    fn test_build_request_url_follows_config() {
        let req = GetNetworkConfigRequest {
            vnet_id: "vnet-1".to_string(),
        };

        let plain = client(Config::new("localhost", 8080))
            .build_request(Operation::GetNetworkConfiguration, &req)
            .unwrap();
        assert_eq!(plain.method, http::Method::GET);
        assert_eq!(
            plain.url.as_str(),
            "http://localhost:8080/NetworkManagement/joinedVirtualNetworks/vnet-1/api-version/1"
        );
        assert!(plain.body.is_none());
        assert!(plain.headers.get(CONTENT_TYPE).is_none());

        let tls = client(Config::new("::1", 8443).with_tls(true))
            .build_request(Operation::GetNetworkConfiguration, &req)
            .unwrap();
        assert_eq!(
            tls.url.as_str(),
            "https://[::1]:8443/NetworkManagement/joinedVirtualNetworks/vnet-1/api-version/1"
        );
    }

    #[test]
    fn test_build_request_escapes_path_values() {
        let client = client(Config::new("localhost", 8080));

        let req = JoinNetworkRequest {
            network_id: "a/../b?c#d%".to_string(),
        };
        let metadata = client.build_request(Operation::JoinNetwork, &req).unwrap();
        assert_eq!(
            metadata.url.as_str(),
            "http://localhost:8080/NetworkManagement/joinedVirtualNetworks/a%2F..%2Fb%3Fc%23d%25/api-version/1"
        );

        let req = JoinNetworkRequest {
            network_id: "..".to_string(),
        };
        let err = client.build_request(Operation::JoinNetwork, &req).unwrap_err();
        assert!(matches!(err, Error::Validation { op: Operation::JoinNetwork, .. }));
    }

    #[test]
    fn test_build_request_through_wireserver() {
        let req = JoinNetworkRequest {
            network_id: "vnet-1".to_string(),
        };

        let metadata = client(Config::new("168.63.129.16", 80).with_wireserver(true))
            .build_request(Operation::JoinNetwork, &req)
            .unwrap();

        assert_eq!(metadata.method, http::Method::POST);
        assert_eq!(metadata.url.path(), "/machine/plugins/");
        assert_eq!(
            metadata.url.query(),
            Some(
                "comp=nmagent&type=NetworkManagement%2FjoinedVirtualNetworks%2Fvnet-1%2Fapi-version%2F1"
            )
        );
    }

    #[test]
    fn test_build_request_sets_json_body() {
        let req = PutNetworkContainerRequest {
            id: "nc-1".to_string(),
            vnet_id: "vnet-1".to_string(),
            version: 1,
            subnet_name: "subnet-a".to_string(),
            policies: vec![Policy {
                id: "p".to_string(),
                kind: "ACL".to_string(),
            }],
            authentication_token: "secret".to_string(),
            primary_address: "10.0.0.1".to_string(),
            ..Default::default()
        };

        let metadata = client(Config::new("localhost", 8080))
            .build_request(Operation::PutNetworkContainer, &req)
            .unwrap();

        assert_eq!(metadata.headers.get(CONTENT_TYPE).unwrap(), MIME_JSON);
        let body: serde_json::Value =
            serde_json::from_slice(metadata.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["networkContainerID"], "nc-1");
        assert!(body.get("authenticationToken").is_none());
    }

    #[test]
    fn test_default_header_rejects_invalid_name() {
        let result =
            ClientBuilder::new(Config::new("localhost", 80)).default_header("bad header", "x");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
