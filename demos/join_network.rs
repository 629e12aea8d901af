//! Joins a virtual network and prints its delegated subnets.
//!
//! This example shows how to:
//! - Configure a client from JSON
//! - Bound retried calls with a deadline
//! - Tell the agent's rejections apart from transport trouble
//!
//! Run with: `cargo run --example join_network -- '{"host":"127.0.0.1","port":8080}' vnet-1`

use netagent_client::{Client, Config, Context, Error, GetNetworkConfigRequest, JoinNetworkRequest};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("netagent_client=debug,join_network=info")
        .init();

    let mut args = std::env::args().skip(1);
    let raw_config = args
        .next()
        .unwrap_or_else(|| r#"{"host":"127.0.0.1","port":8080}"#.to_string());
    let vnet_id = args.next().unwrap_or_else(|| "vnet-1".to_string());

    let config: Config = serde_json::from_str(&raw_config)?;
    let client = Client::new(config)?;
    let ctx = Context::background().with_timeout(Duration::from_secs(20));

    let join = JoinNetworkRequest {
        network_id: vnet_id.clone(),
    };
    match client.join_network(&ctx, &join).await {
        Ok(()) => println!("Joined {vnet_id}"),
        Err(Error::Agent { source, .. }) => {
            eprintln!(
                "Agent refused to join {vnet_id}: {} from {}",
                source.code, source.error_source
            );
            return Ok(());
        }
        Err(err) if err.context_error().is_some() => {
            eprintln!("Gave up waiting for the agent: {err}");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }

    let vnet = client
        .get_network_configuration(&ctx, &GetNetworkConfigRequest { vnet_id })
        .await?;

    println!("Gateway: {}", vnet.default_gateway);
    for subnet in &vnet.subnets {
        println!("  {} {}", subnet.subnet_name, subnet.address_prefix);
    }

    Ok(())
}
