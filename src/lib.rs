//! # netagent-client - a client for the node-local network configuration agent
//!
//! The agent runs on every host and owns the host's network configuration.
//! This crate talks to it over HTTP: joining the node to a virtual network,
//! fetching a network's configuration, and applying or removing network
//! container goal states.
//!
//! ## Quick Start
//!
//! ```no_run
//! use netagent_client::{Client, Config, Context, GetNetworkConfigRequest, JoinNetworkRequest};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), netagent_client::Error> {
//!     let client = Client::new(Config::new("168.63.129.16", 80).with_wireserver(true))?;
//!
//!     // Retried calls keep going until the context gives up.
//!     let ctx = Context::background().with_timeout(Duration::from_secs(30));
//!
//!     client
//!         .join_network(&ctx, &JoinNetworkRequest { network_id: "vnet-1".to_string() })
//!         .await?;
//!
//!     let vnet = client
//!         .get_network_configuration(
//!             &ctx,
//!             &GetNetworkConfigRequest { vnet_id: "vnet-1".to_string() },
//!         )
//!         .await?;
//!     for subnet in &vnet.subnets {
//!         println!("{} {}", subnet.subnet_name, subnet.address_prefix);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Retries
//!
//! Joining a network and fetching configuration are idempotent, so
//! transient transport failures (connection refused, DNS, TLS, resets,
//! timeouts) are retried with exponential backoff: 1s, 2s, 4s, and so on,
//! each cooldown cut short by the context's deadline. Any response from the
//! agent, including a 5xx, is final. Applying and removing network
//! containers have side effects and are attempted exactly once.
//!
//! ## Error Handling
//!
//! A rejected call carries the agent's status code, the subsystem that
//! produced the error, and the response body:
//!
//! ```no_run
//! use netagent_client::{Client, Config, Context, Error, JoinNetworkRequest};
//!
//! # async fn example(client: Client) {
//! let req = JoinNetworkRequest { network_id: "vnet-1".to_string() };
//! match client.join_network(&Context::background(), &req).await {
//!     Ok(()) => {}
//!     Err(Error::Agent { source, .. }) => {
//!         eprintln!("{} from {}: {:?}", source.code, source.error_source, source.body);
//!     }
//!     Err(err) => eprintln!("{err}"),
//! }
//! # }
//! ```

mod client;
mod config;
mod context;
mod error;
pub mod metadata;
mod request;
mod response;
pub mod retry;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use config::Config;
pub use context::{Context, ContextError};
pub use error::{
    AgentError, ContentError, Error, ErrorSource, Operation, Result, ERROR_SOURCE_HEADER,
};
pub use request::{
    DeleteContainerRequest, GetNetworkConfigRequest, JoinNetworkRequest, Policy,
    PutNetworkContainerRequest, Request, ValidationError,
};
pub use response::{Subnet, Tag, VirtualNetwork};
pub use retry::{Retrier, Retry, RetryPredicate, RetryStrategy};
