//! # Connection Probe
//!
//! Purpose: Load a JSON client config, connect to every listed server once,
//! and print one line per server with the outcome. Useful for checking
//! reachability and breaker settings before wiring a client into a service.
//!
//! Usage: `mcnet-probe <config.json> [attempts]`
//!
//! Logging follows `RUST_LOG` (default `mcnet_client=info`).

use std::env;
use std::fs;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use mcnet_client::Client;
use mcnet_common::ProbeConfig;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mcnet_client=info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: mcnet-probe <config.json> [attempts]");
    };
    let attempts = args
        .next()
        .map(|raw| raw.parse::<usize>())
        .transpose()
        .context("attempts must be a positive integer")?
        .unwrap_or(1)
        .max(1);

    let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
    let config = ProbeConfig::from_json_str(&raw).with_context(|| format!("parsing {path}"))?;
    if config.servers.is_empty() {
        bail!("{path} lists no servers");
    }

    let mut client = Client::builder(config.client)
        .servers(config.servers)
        .build();

    for round in 1..=attempts {
        for index in 0..client.servers().len() {
            let started = Instant::now();
            let outcome = client.connect(index);
            let elapsed = started.elapsed();
            let server = &client.servers()[index];
            match outcome {
                Ok(()) => println!(
                    "[{round}] {} {} connected in {elapsed:?}",
                    server.transport(),
                    server.label()
                ),
                Err(err) => println!(
                    "[{round}] {} {} failed in {elapsed:?}: {} (failures={})",
                    server.transport(),
                    server.label(),
                    err.error,
                    server.failure_count()
                ),
            }
        }
        // Drop descriptors so the next round exercises the full connect path.
        for index in 0..client.servers().len() {
            if let Some(server) = client.server_mut(index) {
                server.close();
            }
        }
    }

    Ok(())
}
