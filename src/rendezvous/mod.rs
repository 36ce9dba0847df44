pub mod local;
pub mod zookeeper;

pub use self::local::*;
pub use self::zookeeper::*;

use anyhow::Result;
use async_trait::async_trait;

/// Out-of-band key/value rendezvous across a known set of participants.
///
/// `get` and `barrier` may block indefinitely; there are no timeouts at
/// this layer, so a hung peer hangs everyone behind it. Address exchange
/// must be globally consistent before any participant proceeds, and a
/// bounded-wait variant belongs in an implementation of this trait.
#[async_trait]
pub trait Rendezvous: Send + Sync {
    /// Makes `value` visible to every participant under `key`.
    async fn publish(&self, key: &str, value: &str) -> Result<()>;

    /// Fetches the value under `key`, blocking until it is published.
    async fn get(&self, key: &str) -> Result<String>;

    /// Blocks until all participants have called `barrier`.
    async fn barrier(&self) -> Result<()>;
}
