//! Request payloads understood by the agent.
//!
//! Every operation payload implements [`Request`], which is all the client
//! needs to turn it into an HTTP request: a self-check, path segments, a method,
//! and an optional body. The payloads share no data with each other.

use bytes::Bytes;
use http::Method;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Behavior shared by every operation payload.
///
/// [`Request::validate`] must fail closed: the client never sends a payload
/// that does not validate.
pub trait Request: fmt::Debug + Send + Sync {
    /// Checks that every field the agent requires is present.
    fn validate(&self) -> Result<(), ValidationError>;

    /// The URL path of the operation, one unescaped segment per item.
    ///
    /// The client percent-encodes each segment, so a field value can never
    /// add segments or a query of its own.
    fn path_segments(&self) -> Vec<&str>;

    /// The HTTP method of the operation.
    fn method(&self) -> Method;

    /// The serialized request body, or `None` for an empty body.
    fn body(&self) -> serde_json::Result<Option<Bytes>> {
        Ok(None)
    }
}

/// One or more required fields were empty or unusable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationError {
    /// Names of the missing fields, in declaration order.
    pub missing: Vec<String>,
    /// Names of path fields whose value is `.` or `..`, which URL
    /// normalization would resolve into a different endpoint.
    pub invalid: Vec<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.missing.is_empty() {
            write!(f, "missing fields: {}", self.missing.join(", "))?;
        }
        if !self.invalid.is_empty() {
            if !self.missing.is_empty() {
                f.write_str("; ")?;
            }
            write!(f, "invalid path fields: {}", self.invalid.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    /// Collects the names of every empty field; `Ok` when none are empty.
    pub(crate) fn check<'a>(
        fields: impl IntoIterator<Item = (&'a str, bool)>,
    ) -> Result<(), ValidationError> {
        let missing: Vec<String> = fields
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| name.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                missing,
                ..Default::default()
            })
        }
    }

    fn require(&mut self, name: &str, value: &str) -> &mut Self {
        if value.is_empty() {
            self.missing.push(name.to_string());
        }
        self
    }

    /// Like `require`, for a value that becomes a URL path segment: `.` and
    /// `..` are rejected too.
    fn require_segment(&mut self, name: &str, value: &str) -> &mut Self {
        if matches!(value, "." | "..") {
            self.invalid.push(name.to_string());
        }
        self.require(name, value)
    }

    fn into_result(self) -> Result<(), ValidationError> {
        if self.missing.is_empty() && self.invalid.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

fn joined_network_path(id: &str) -> Vec<&str> {
    vec!["NetworkManagement", "joinedVirtualNetworks", id, "api-version", "1"]
}

fn network_container_path<'a>(
    primary_address: &'a str,
    id: &'a str,
    token: &'a str,
) -> Vec<&'a str> {
    vec![
        "NetworkManagement",
        "interfaces",
        primary_address,
        "networkContainers",
        id,
        "authenticationToken",
        token,
        "api-version",
        "1",
    ]
}

/// Joins the node to a customer's virtual network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinNetworkRequest {
    /// The virtual network to join.
    pub network_id: String,
}

impl Request for JoinNetworkRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut err = ValidationError::default();
        err.require_segment("network_id", &self.network_id);
        err.into_result()
    }

    fn path_segments(&self) -> Vec<&str> {
        joined_network_path(&self.network_id)
    }

    fn method(&self) -> Method {
        Method::POST
    }
}

/// Fetches the configuration of a joined virtual network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetNetworkConfigRequest {
    pub vnet_id: String,
}

impl Request for GetNetworkConfigRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut err = ValidationError::default();
        err.require_segment("vnet_id", &self.vnet_id);
        err.into_result()
    }

    fn path_segments(&self) -> Vec<&str> {
        joined_network_path(&self.vnet_id)
    }

    fn method(&self) -> Method {
        Method::GET
    }
}

/// A network policy attached to a network container.
///
/// On the wire a policy is the single string `"{id}, {kind}"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    pub id: String,
    pub kind: String,
}

impl Policy {
    fn is_complete(&self) -> bool {
        !self.id.is_empty() && !self.kind.is_empty()
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.id, self.kind)
    }
}

impl Serialize for Policy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Policy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let (id, kind) = raw.split_once(',').ok_or_else(|| {
            serde::de::Error::custom(format!("policy {raw:?} is not of the form \"id, type\""))
        })?;
        Ok(Policy {
            id: id.trim().to_string(),
            kind: kind.trim().to_string(),
        })
    }
}

fn version_as_string<S: Serializer>(version: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(version)
}

/// Applies a network container goal state on an interface.
///
/// The authentication token and primary address select the target and are
/// carried in the path only; they are never serialized into the body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PutNetworkContainerRequest {
    #[serde(rename = "networkContainerID")]
    pub id: String,

    #[serde(rename = "virtualNetworkID")]
    pub vnet_id: String,

    /// Goal state version; newer versions replace older ones.
    #[serde(serialize_with = "version_as_string")]
    pub version: u64,

    #[serde(rename = "subnetName")]
    pub subnet_name: String,

    #[serde(rename = "ipV4Addresses")]
    pub ipv4_addrs: Vec<String>,

    pub policies: Vec<Policy>,

    #[serde(rename = "vlanId")]
    pub vlan_id: i32,

    #[serde(rename = "greKey")]
    pub gre_key: u16,

    #[serde(skip)]
    pub authentication_token: String,

    /// Primary address of the interface the container lives on.
    #[serde(skip)]
    pub primary_address: String,
}

impl Request for PutNetworkContainerRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut err = ValidationError::default();
        err.require_segment("id", &self.id)
            .require("vnet_id", &self.vnet_id)
            .require("subnet_name", &self.subnet_name)
            .require_segment("authentication_token", &self.authentication_token)
            .require_segment("primary_address", &self.primary_address);

        for (index, policy) in self.policies.iter().enumerate() {
            if !policy.is_complete() {
                err.missing.push(format!("policies[{index}]"));
            }
        }

        err.into_result()
    }

    fn path_segments(&self) -> Vec<&str> {
        network_container_path(&self.primary_address, &self.id, &self.authentication_token)
    }

    fn method(&self) -> Method {
        Method::POST
    }

    fn body(&self) -> serde_json::Result<Option<Bytes>> {
        serde_json::to_vec(self).map(|body| Some(Bytes::from(body)))
    }
}

/// Removes a network container, its IP addresses, and its policies from an
/// interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteContainerRequest {
    pub network_container_id: String,
    pub primary_address: String,
    pub authentication_token: String,
}

impl Request for DeleteContainerRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut err = ValidationError::default();
        err.require_segment("network_container_id", &self.network_container_id)
            .require_segment("primary_address", &self.primary_address)
            .require_segment("authentication_token", &self.authentication_token);
        err.into_result()
    }

    // The agent has no DELETE verb; the method rides in the path.
    fn path_segments(&self) -> Vec<&str> {
        let mut segments = network_container_path(
            &self.primary_address,
            &self.network_container_id,
            &self.authentication_token,
        );
        segments.extend(["method", "DELETE"]);
        segments
    }

    fn method(&self) -> Method {
        Method::POST
    }
}
