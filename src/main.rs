use anyhow::{Context, Result};
use clap::{Arg, Command};
use futures::future::join_all;
use std::sync::Arc;

use fabric_boot::exchange::exchange_addresses;
use fabric_boot::fabric::{EndpointConfig, SimProvider, bootstrap};
use fabric_boot::rendezvous::LocalRendezvous;

/// Stands up one simulated endpoint per rank and runs the address
/// exchange between them, all inside this process.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let matches = Command::new("fabric-boot")
        .arg(
            Arg::new("PARTICIPANTS")
                .long("participants")
                .default_value("2")
                .help("Number of ranks to stand up"),
        )
        .arg(
            Arg::new("DEVICE_ID")
                .long("device-id")
                .default_value("0")
                .help("Logical device identifier scoping the exchange keys"),
        )
        .arg(
            Arg::new("PROVIDER_HINT")
                .long("provider")
                .help("Preferred provider name; omit to accept any"),
        )
        .get_matches();
    let participants: usize = matches
        .get_one::<String>("PARTICIPANTS")
        .context("missing participant count")?
        .parse()?;
    let device_id: u32 = matches
        .get_one::<String>("DEVICE_ID")
        .context("missing device id")?
        .parse()?;
    let provider_hint = matches.get_one::<String>("PROVIDER_HINT").cloned();

    let provider = Arc::new(SimProvider::new());
    let rendezvous = LocalRendezvous::new(participants);

    let mut tasks = Vec::with_capacity(participants);
    for rank in 0..participants {
        let provider = provider.clone();
        let rendezvous = rendezvous.clone();
        let hints = EndpointConfig {
            provider_hint: provider_hint.clone(),
            ..EndpointConfig::default()
        };
        tasks.push(tokio::spawn(async move {
            let mut handle = bootstrap(provider.as_ref(), &hints)?;
            let table =
                exchange_addresses(&mut handle, &rendezvous, device_id, rank, participants).await?;
            println!("rank {}: peer tokens {:?}", rank, table.tokens());
            handle.shutdown()
        }));
    }
    for task in join_all(tasks).await {
        task??;
    }

    let counters = provider.counters();
    println!(
        "all {} ranks exchanged addresses, {} resources still open",
        participants,
        counters.open_now()
    );
    Ok(())
}
