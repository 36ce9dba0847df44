use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, ensure};
use async_trait::async_trait;
use tokio::sync::{Mutex, watch};

use super::Rendezvous;

/// In-process rendezvous for tests and single-node demos. Clones share
/// state; create one and hand a clone to each participant task.
#[derive(Clone)]
pub struct LocalRendezvous {
    inner: Arc<Inner>,
}

struct Inner {
    participants: usize,
    store: Mutex<HashMap<String, String>>,
    // Bumped on every publish so blocked `get`s re-check the store.
    store_tx: watch::Sender<u64>,
    barrier: Mutex<BarrierState>,
    barrier_tx: watch::Sender<u64>,
}

#[derive(Default)]
struct BarrierState {
    generation: u64,
    arrived: usize,
}

impl LocalRendezvous {
    pub fn new(participants: usize) -> Self {
        let (store_tx, _) = watch::channel(0);
        let (barrier_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                participants,
                store: Mutex::new(HashMap::new()),
                store_tx,
                barrier: Mutex::new(BarrierState::default()),
                barrier_tx,
            }),
        }
    }

    /// Whether `key` has been published yet. Does not block.
    pub async fn contains(&self, key: &str) -> bool {
        self.inner.store.lock().await.contains_key(key)
    }
}

#[async_trait]
impl Rendezvous for LocalRendezvous {
    async fn publish(&self, key: &str, value: &str) -> Result<()> {
        let mut store = self.inner.store.lock().await;
        ensure!(
            !store.contains_key(key),
            "key {:?} was already published",
            key
        );
        store.insert(key.to_string(), value.to_string());
        drop(store);
        self.inner.store_tx.send_modify(|version| *version += 1);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String> {
        let mut rx = self.inner.store_tx.subscribe();
        loop {
            if let Some(value) = self.inner.store.lock().await.get(key) {
                return Ok(value.clone());
            }
            rx.changed().await?;
        }
    }

    async fn barrier(&self) -> Result<()> {
        // Subscribe before touching the state so a generation bump
        // between unlock and wait is still observed.
        let mut rx = self.inner.barrier_tx.subscribe();
        let generation = {
            let mut state = self.inner.barrier.lock().await;
            if state.arrived + 1 == self.inner.participants {
                // Last one in releases everyone.
                state.arrived = 0;
                state.generation += 1;
                let generation = state.generation;
                self.inner.barrier_tx.send_modify(|g| *g = generation);
                return Ok(());
            }
            state.arrived += 1;
            state.generation
        };
        while *rx.borrow_and_update() <= generation {
            rx.changed().await?;
        }
        Ok(())
    }
}
