//! Payloads returned by the agent.

use serde::{Deserialize, Serialize};

/// The configuration of a customer's virtual network.
///
/// Only subnets delegated to this node are listed. Every field defaults
/// when the agent omits it.
///
/// # Examples
///
/// ```
/// use netagent_client::VirtualNetwork;
///
/// let vnet: VirtualNetwork = serde_json::from_str(r#"{"subnets":[]}"#).unwrap();
/// assert!(vnet.subnets.is_empty());
/// assert_eq!(vnet, VirtualNetwork::default());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualNetwork {
    pub cnet_space: String,
    pub default_gateway: String,
    pub dns_servers: Vec<String>,
    pub subnets: Vec<Subnet>,
    pub vnet_space: String,
    pub vnet_version: String,
}

/// A subnet delegated to this node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subnet {
    /// CIDR of the subnet, e.g. `10.0.0.0/24`.
    pub address_prefix: String,
    pub subnet_name: String,
    pub tags: Vec<Tag>,
}

/// A name/type pair attached to a subnet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tag {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_virtual_network() {
        let raw = r#"{
            "cnetSpace": "10.0.0.0/8",
            "defaultGateway": "10.0.0.1",
            "dnsServers": ["168.63.129.16"],
            "subnets": [{
                "addressPrefix": "10.0.1.0/24",
                "subnetName": "delegated",
                "tags": [{"name": "owner", "type": "service"}]
            }],
            "vnetSpace": "10.0.0.0/16",
            "vnetVersion": "12"
        }"#;

        let vnet: VirtualNetwork = serde_json::from_str(raw).unwrap();

        assert_eq!(vnet.default_gateway, "10.0.0.1");
        assert_eq!(vnet.dns_servers, vec!["168.63.129.16"]);
        assert_eq!(vnet.subnets.len(), 1);
        assert_eq!(vnet.subnets[0].address_prefix, "10.0.1.0/24");
        assert_eq!(vnet.subnets[0].tags[0].kind, "service");
        assert_eq!(vnet.vnet_version, "12");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let vnet: VirtualNetwork =
            serde_json::from_str(r#"{"subnets":[],"somethingNew":true}"#).unwrap();
        assert_eq!(vnet, VirtualNetwork::default());
    }
}
