use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use once_cell::sync::Lazy;
use tokio::time::sleep;

use fabric_boot::exchange::{
    PeerAddressTable, RawEndpointAddress, exchange_addresses, exchange_key,
};
use fabric_boot::fabric::{EndpointConfig, SimAttrs, SimProvider, bootstrap};
use fabric_boot::rendezvous::{LocalRendezvous, Rendezvous};

static INIT: Lazy<()> = Lazy::new(|| {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
});

/// Runs bootstrap plus exchange for one rank and returns its table.
async fn run_rank(
    provider: Arc<SimProvider>,
    rendezvous: LocalRendezvous,
    device_id: u32,
    rank: usize,
    participants: usize,
) -> Result<PeerAddressTable> {
    let mut handle = bootstrap(provider.as_ref(), &EndpointConfig::default())?;
    let table =
        exchange_addresses(&mut handle, &rendezvous, device_id, rank, participants).await?;
    handle.shutdown()?;
    Ok(table)
}

#[tokio::test]
async fn two_ranks_exchange_on_device_seven() -> Result<()> {
    Lazy::force(&INIT);
    let provider = Arc::new(SimProvider::new());
    let rendezvous = LocalRendezvous::new(2);

    let mut tasks = Vec::new();
    for rank in 0..2 {
        let provider = provider.clone();
        let rendezvous = rendezvous.clone();
        tasks.push(tokio::spawn(async move {
            let mut handle = bootstrap(provider.as_ref(), &EndpointConfig::default())?;
            let table = exchange_addresses(&mut handle, &rendezvous, 7, rank, 2).await?;
            assert_eq!(table.len(), 2);

            // The peer's entry must equal the token produced by inserting
            // the peer's exact published bytes.
            let peer = 1 - rank;
            let record = rendezvous.get(&exchange_key(7, peer)).await?;
            let peer_addr = RawEndpointAddress::deserialize(&record)?;
            let resolved = handle.av_mut().insert(&peer_addr.to_bytes())?;
            assert_eq!(resolved, vec![table.token(peer).unwrap()]);

            // The self entry must match a direct self-insertion.
            let raw = handle.endpoint().raw_addr()?;
            let self_addr = RawEndpointAddress::from_bytes(&raw)?;
            let resolved = handle.av_mut().insert(&self_addr.to_bytes())?;
            assert_eq!(resolved, vec![table.token(rank).unwrap()]);

            handle.shutdown()
        }));
    }
    for task in join_all(tasks).await {
        task??;
    }

    // Both ranks published under the device-scoped keys.
    assert!(rendezvous.contains("LCI_KEY_7_0").await);
    assert!(rendezvous.contains("LCI_KEY_7_1").await);
    Ok(())
}

#[tokio::test]
async fn exchange_terminates_for_any_publish_order() -> Result<()> {
    let participants = 4;
    let provider = Arc::new(SimProvider::new());
    let rendezvous = LocalRendezvous::new(participants);

    // Start ranks out of order with staggered delays so publish timing
    // is permuted relative to rank order.
    let mut tasks = Vec::new();
    for (delay, rank) in [2usize, 0, 3, 1].into_iter().enumerate() {
        let provider = provider.clone();
        let rendezvous = rendezvous.clone();
        tasks.push(tokio::spawn(async move {
            sleep(Duration::from_millis(20 * delay as u64)).await;
            run_rank(provider, rendezvous, 0, rank, participants).await
        }));
    }

    for task in join_all(tasks).await {
        let table = task??;
        assert_eq!(table.len(), participants);
    }
    assert_eq!(provider.counters().open_now(), 0);
    Ok(())
}

#[tokio::test]
async fn single_rank_exchange_resolves_only_itself() -> Result<()> {
    let provider = Arc::new(SimProvider::new());
    let rendezvous = LocalRendezvous::new(1);
    let table = run_rank(provider, rendezvous, 3, 0, 1).await?;
    assert_eq!(table.len(), 1);
    assert!(table.token(0).is_some());
    assert!(table.token(1).is_none());
    Ok(())
}

#[tokio::test]
async fn full_budget_address_exchanges() -> Result<()> {
    let provider = Arc::new(SimProvider::with_attrs(SimAttrs {
        addr_len: 48,
        ..SimAttrs::default()
    }));
    let rendezvous = LocalRendezvous::new(1);
    let table = run_rank(provider, rendezvous, 0, 0, 1).await?;
    assert_eq!(table.len(), 1);
    Ok(())
}

#[tokio::test]
async fn oversized_address_fails_before_publishing() -> Result<()> {
    let provider = SimProvider::with_attrs(SimAttrs {
        addr_len: 49,
        ..SimAttrs::default()
    });
    let rendezvous = LocalRendezvous::new(1);

    let mut handle = bootstrap(&provider, &EndpointConfig::default())?;
    let err = exchange_addresses(&mut handle, &rendezvous, 0, 0, 1)
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("budget"),
        "unexpected error: {err:#}"
    );
    // Nothing reached the rendezvous service.
    assert!(!rendezvous.contains(&exchange_key(0, 0)).await);
    handle.shutdown()
}

#[tokio::test]
async fn corrupt_address_record_fails_the_exchange() -> Result<()> {
    let provider = SimProvider::new();
    let rendezvous = LocalRendezvous::new(2);

    // Rank 1 "published" a record with a truncated token.
    rendezvous
        .publish(&exchange_key(0, 1), "0123-bad-record")
        .await?;

    let mut handle = bootstrap(&provider, &EndpointConfig::default())?;
    let rendezvous_for_peer = rendezvous.clone();
    // Stand in for rank 1 at the barriers so rank 0 can proceed; it only
    // needs to reach the parse failure.
    let peer = tokio::spawn(async move {
        rendezvous_for_peer.barrier().await?;
        rendezvous_for_peer.barrier().await
    });

    let err = exchange_addresses(&mut handle, &rendezvous, 0, 0, 2)
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("parsing address record of rank 1"),
        "unexpected error: {err:#}"
    );
    peer.abort();
    handle.shutdown()
}
