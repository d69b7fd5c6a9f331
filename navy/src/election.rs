//! Bully election state machine (spec §4.E).
//!
//! Two deliberate deviations from textbook Bully are preserved from
//! `original_source/pkg/navy/engine.go`, per spec §9: `elect()` broadcasts
//! `ELECTION` to every peer rather than only higher-ranked ones, and the main
//! loop launches its own `elect()` in response to an `ELECTION` from a
//! *lower* rank (not a higher one).

use std::sync::atomic::Ordering;

use tokio::time::timeout;

use crate::member::Member;
use crate::message::{Message, MessageType};

impl Member {
    /// Runs one round of the Bully algorithm: broadcast `ELECTION`, then
    /// either stand down on an `OK` or declare victory on timeout.
    pub(crate) async fn elect(&self) {
        let peers = self.inner.registry.snapshot().await;
        tracing::debug!(rank = self.inner.rank, peer_count = peers.len(), "starting election");

        for peer in &peers {
            let rank = self.inner.rank;
            let addr = self.inner.external_address.clone();
            let callsign = self.inner.callsign.clone();
            let result = self
                .send(peer.rank, &peer.address, move || Message::new(MessageType::Election, rank, addr.clone(), callsign.clone()))
                .await;
            if let Err(e) = result {
                tracing::warn!(rank = peer.rank, error = %e, "failed to send ELECTION");
            }
        }

        let mut election_rx = self.inner.election_rx.lock().await;
        let outcome = timeout(self.inner.config.election_timeout, election_rx.recv()).await;
        drop(election_rx);

        match outcome {
            Ok(Some(_ok)) => {
                tracing::debug!(rank = self.inner.rank, "stood down, a higher rank is driving the election");
            }
            Ok(None) | Err(_) => {
                // Either the channel closed (shutting down) or the deadline
                // elapsed: declare victory.
                self.declare_victory().await;
            }
        }
    }

    async fn declare_victory(&self) {
        let payload = self.inner.leader.lock().await.local_payload.clone();
        self.set_leader(self.inner.external_address.clone(), payload.clone(), self.inner.rank)
            .await;

        let peers = self.inner.registry.snapshot().await;
        for peer in &peers {
            tracing::info!(rank = self.inner.rank, peer = peer.rank, "announcing as admiral");
            let rank = self.inner.rank;
            let addr = self.inner.external_address.clone();
            let callsign = self.inner.callsign.clone();
            let payload = payload.clone();
            let result = self
                .send(peer.rank, &peer.address, move || {
                    Message::new(MessageType::Admiral, rank, addr.clone(), callsign.clone()).with_payload(payload.clone())
                })
                .await;
            if let Err(e) = result {
                tracing::warn!(rank = peer.rank, error = %e, "failed to announce ADMIRAL");
            }
        }
    }

    /// Reactions to messages that land in the main receive channel and
    /// concern the election itself (the rest of spec §4.E's reactions live
    /// in `router.rs`/`discovery.rs`, which hand off `PEERS`/`WHOISLEADER`/
    /// `READY` appropriately).
    pub(crate) async fn handle_election_frame(&self, msg: Message) {
        if msg.rank < self.inner.rank && self.inner.ready.load(Ordering::Acquire) {
            tracing::warn!(from = msg.rank, "new election from a lower rank");
            let rank = self.inner.rank;
            let addr = self.inner.external_address.clone();
            let callsign = self.inner.callsign.clone();
            let result = self
                .send(msg.rank, &msg.address, move || Message::new(MessageType::Ok, rank, addr.clone(), callsign.clone()))
                .await;
            if let Err(e) = result {
                tracing::warn!(rank = msg.rank, error = %e, "failed to reply OK");
            }
            self.elect().await;
        }
    }

    pub(crate) async fn handle_admiral_frame(&self, msg: Message) {
        tracing::info!(from = msg.rank, addr = %msg.address, "setting new leader");
        self.set_leader(msg.address, msg.payload, msg.rank).await;
    }
}
