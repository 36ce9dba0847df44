use std::borrow::Cow;
use std::net::ToSocketAddrs;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_zookeeper::{Acl, CreateMode, ZooKeeper, error};
use tracing::info;

use super::Rendezvous;

pub const ZOOKEEPER_CLIENT_PORT: u16 = 2181;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Metadata stored on each participant's registration node.
#[derive(Debug, Serialize, Deserialize)]
struct ParticipantRecord {
    rank: usize,
    host: String,
}

/// Rendezvous backed by a zookeeper ensemble. Publishes values as znodes
/// under a per-session root; barriers are per-epoch znodes that fill up
/// with one ephemeral child per participant.
pub struct ZookeeperRendezvous {
    client: ZooKeeper,
    root: String,
    participants: usize,
    epoch: Mutex<u64>,
}

impl ZookeeperRendezvous {
    /// Connects to the ensemble at `host` and registers this participant
    /// under the shared session root. Every participant of one exchange
    /// must use the same `session` string.
    pub async fn connect(
        host: &str,
        session: &str,
        rank: usize,
        participants: usize,
    ) -> Result<Self> {
        let addr = format!("{}:{}", host, ZOOKEEPER_CLIENT_PORT);
        let socket_addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or(anyhow!("Failed to resolve address"))?;
        info!("Connecting to {}", socket_addr);
        let (client, _default_watcher) = ZooKeeper::connect(&socket_addr)
            .await
            .map_err(|e| anyhow!("Failed to connect to zookeeper: {}", e))?;

        let root = format!("/fabric_{}", session);
        ensure_node(&client, &root).await?;
        ensure_node(&client, &format!("{}/kv", root)).await?;
        ensure_node(&client, &format!("{}/barrier", root)).await?;
        ensure_node(&client, &format!("{}/participants", root)).await?;

        let record = ParticipantRecord {
            rank,
            host: hostname::get()?.to_string_lossy().to_string(),
        };
        let data: Cow<'static, [u8]> = Cow::Owned(serde_json::to_vec(&record)?);
        client
            .create(
                &format!("{}/participants/member", root),
                data,
                Acl::open_unsafe(),
                CreateMode::EphemeralSequential,
            )
            .await?
            .map_err(|e| anyhow!("Failed to register participant: {}", e))?;

        Ok(Self {
            client,
            root,
            participants,
            epoch: Mutex::new(0),
        })
    }
}

async fn ensure_node(client: &ZooKeeper, path: &str) -> Result<()> {
    let created = client
        .create(path, &b""[..], Acl::open_unsafe(), CreateMode::Persistent)
        .await?;
    match created {
        Err(error::Create::NodeExists) => {
            tracing::info!("{} already exists, skipping", path);
            Ok(())
        }
        _ => {
            created.map_err(|e| anyhow!("Failed to create {}: {}", path, e))?;
            Ok(())
        }
    }
}

#[async_trait]
impl Rendezvous for ZookeeperRendezvous {
    async fn publish(&self, key: &str, value: &str) -> Result<()> {
        let path = format!("{}/kv/{}", self.root, key);
        let data: Cow<'static, [u8]> = Cow::Owned(value.as_bytes().to_vec());
        self.client
            .create(&path, data, Acl::open_unsafe(), CreateMode::Persistent)
            .await?
            .map_err(|e| anyhow!("Failed to publish {}: {}", key, e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        let path = format!("{}/kv/{}", self.root, key);
        loop {
            if let Some((data, _)) = self.client.get_data(&path).await? {
                return Ok(String::from_utf8(data)?);
            }
            // Not published yet; poll until it shows up.
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn barrier(&self) -> Result<()> {
        let epoch = {
            let mut epoch = self.epoch.lock().await;
            let current = *epoch;
            *epoch += 1;
            current
        };
        let parent = format!("{}/barrier/epoch{:06}", self.root, epoch);
        // Whoever arrives first creates the epoch node.
        ensure_node(&self.client, &parent).await?;
        self.client
            .create(
                &format!("{}/member", parent),
                &b""[..],
                Acl::open_unsafe(),
                CreateMode::EphemeralSequential,
            )
            .await?
            .map_err(|e| anyhow!("Failed to join barrier: {}", e))?;
        loop {
            let children = self
                .client
                .get_children(&parent)
                .await?
                .ok_or(anyhow!("Barrier node {} disappeared", parent))?;
            if children.len() >= self.participants {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
