//! Peer registry (spec §4.B).
//!
//! All mutators take the registry's exclusive lock; `find`/`snapshot` take a
//! shared lock. `write` holds the exclusive lock across the encode call,
//! because a `PeerEntry`'s `FramedWrite` is not safe to share across
//! concurrent writers — this serializes sends per-registry rather than
//! per-peer, acceptable at the fleet sizes this engine targets (spec §4.B).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::message::{Message, PeerInfo};
use crate::peer::PeerEntry;

/// Thread-safe rank → peer map.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<RwLock<HashMap<i64, PeerEntry>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        PeerRegistry::default()
    }

    /// Inserts or replaces the entry for `rank` (spec invariant P1: the old
    /// entry, if any, is dropped — and its connection closed — before the new
    /// one takes its place).
    pub async fn add(&self, rank: i64, address: String, writer: OwnedWriteHalf) {
        let mut guard = self.inner.write().await;
        if let Some(mut old) = guard.insert(rank, PeerEntry::new(rank, address, writer)) {
            old.close().await;
        }
        metrics::gauge!("navy_peer_count", guard.len() as f64);
    }

    /// Removes the entry for `rank`, if present. Idempotent.
    pub async fn delete(&self, rank: i64) {
        let mut guard = self.inner.write().await;
        if let Some(mut old) = guard.remove(&rank) {
            old.close().await;
        }
        metrics::gauge!("navy_peer_count", guard.len() as f64);
    }

    /// True iff the stored entry for `rank` matches `address` exactly.
    pub async fn find(&self, rank: i64, address: &str) -> bool {
        let guard = self.inner.read().await;
        matches!(guard.get(&rank), Some(p) if p.address == address)
    }

    /// True iff any entry for `rank` exists, regardless of address.
    pub async fn contains(&self, rank: i64) -> bool {
        self.inner.read().await.contains_key(&rank)
    }

    /// Marks a peer ready, if present. A `READY` frame for a rank we never
    /// dialed is just ignored (the peer will show up once we do).
    pub async fn mark_ready(&self, rank: i64) {
        if let Some(peer) = self.inner.write().await.get_mut(&rank) {
            peer.ready = true;
        }
    }

    /// Encodes `msg` on `rank`'s outbound connection.
    pub async fn write(&self, rank: i64, msg: Message) -> Result<()> {
        let mut guard = self.inner.write().await;
        match guard.get_mut(&rank) {
            Some(peer) => peer.write(msg).await,
            None => Err(Error::PeerNotFound(rank)),
        }
    }

    /// A point-in-time copy of `{rank, address, ready}` triples, safe to
    /// iterate over for broadcast without holding the registry lock across
    /// I/O (spec §4.B).
    pub async fn snapshot(&self) -> Vec<PeerInfo> {
        self.inner
            .read()
            .await
            .values()
            .map(|p| PeerInfo {
                rank: p.rank,
                address: p.address.clone(),
                ready: p.ready,
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
