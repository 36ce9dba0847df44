use anyhow::{Context, Result, ensure};
use tracing::debug;

use crate::exchange::addr::{MAX_ADDR_LEN, RawEndpointAddress, exchange_key};
use crate::fabric::EndpointHandle;
use crate::rendezvous::Rendezvous;

/// One resolved address-vector token per participant rank, including self.
#[derive(Clone, Debug)]
pub struct PeerAddressTable {
    tokens: Vec<u64>,
}

impl PeerAddressTable {
    pub fn token(&self, rank: usize) -> Option<u64> {
        self.tokens.get(rank).copied()
    }

    pub fn tokens(&self) -> &[u64] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Makes every participant's endpoint reachable from every other one.
///
/// Fixed linear sequence: discover the local raw address, publish it
/// under the device/rank-scoped key, barrier, resolve all ranks into the
/// local address vector, barrier again. The second barrier guarantees no
/// participant addresses a peer before that peer can be addressed.
///
/// Any budget overflow, parse mismatch, or insertion-count mismatch
/// aborts the whole exchange; a corrupted address table would target the
/// wrong peer's memory, so there is no partial or retry path.
pub async fn exchange_addresses(
    handle: &mut EndpointHandle,
    rendezvous: &dyn Rendezvous,
    device_id: u32,
    rank: usize,
    participants: usize,
) -> Result<PeerAddressTable> {
    ensure!(participants > 0, "at least one participant is required");
    ensure!(
        rank < participants,
        "rank {} out of range for {} participants",
        rank,
        participants
    );

    // Self-discovery. The budget check runs before anything is published.
    let addr_len = handle.endpoint().addr_len();
    ensure!(
        addr_len <= MAX_ADDR_LEN,
        "endpoint address is {} bytes, budget is {}",
        addr_len,
        MAX_ADDR_LEN
    );
    let raw = handle
        .endpoint()
        .raw_addr()
        .context("querying endpoint address")?;
    let self_addr = RawEndpointAddress::from_bytes(&raw)?;

    rendezvous
        .publish(&exchange_key(device_id, rank), &self_addr.serialize())
        .await
        .context("publishing endpoint address")?;
    rendezvous
        .barrier()
        .await
        .context("waiting for peers to publish")?;

    let mut tokens = Vec::with_capacity(participants);
    for peer in 0..participants {
        let peer_addr = if peer == rank {
            self_addr
        } else {
            let record = rendezvous
                .get(&exchange_key(device_id, peer))
                .await
                .with_context(|| format!("fetching address of rank {}", peer))?;
            RawEndpointAddress::deserialize(&record)
                .with_context(|| format!("parsing address record of rank {}", peer))?
        };
        let resolved = handle
            .av_mut()
            .insert(&peer_addr.to_bytes())
            .with_context(|| format!("inserting address of rank {}", peer))?;
        ensure!(
            resolved.len() == 1,
            "address of rank {} resolved to {} tokens, expected exactly 1",
            peer,
            resolved.len()
        );
        tokens.push(resolved[0]);
    }

    rendezvous
        .barrier()
        .await
        .context("waiting for peers to resolve addresses")?;
    debug!(rank, participants, "address exchange complete");

    Ok(PeerAddressTable { tokens })
}
