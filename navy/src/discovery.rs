//! Fleet discovery (spec §4.F): find the current leader through a seed
//! address, fetch the full peer list from it, join the mesh, and announce
//! readiness.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::sleep;

use crate::config::Backoff;
use crate::error::{Error, Result};
use crate::member::Member;
use crate::message::{Message, MessageType};

impl Member {
    /// Single discovery attempt against `seeds`, tried in order until one
    /// answers. Returns `Ok(())` once this member has joined the mesh and
    /// marked itself ready; `Err(Error::DiscoveryAllSeedsFailed)` if every
    /// seed was unreachable (a candidate for retrying with backoff), and any
    /// other error (notably `CallsignMismatch`) as fatal.
    pub async fn discover(&self, seeds: &[String]) -> Result<()> {
        if seeds.is_empty() {
            return Err(Error::DiscoveryNoSeed);
        }

        let who_is_leader = Message::new(MessageType::WhoIsLeader, self.inner.rank, self.inner.external_address.clone(), self.inner.callsign.clone());

        let mut reply = None;
        for seed in seeds {
            match self.send_one_shot(seed, who_is_leader.clone()).await {
                Ok(msg) => {
                    reply = Some(msg);
                    break;
                }
                Err(e) => tracing::warn!(seed, error = %e, "seed unreachable during discovery"),
            }
        }
        let Some(reply) = reply else {
            return Err(Error::DiscoveryAllSeedsFailed);
        };

        match reply.kind {
            MessageType::Unknown => Err(Error::CallsignMismatch),
            MessageType::Unready => {
                tracing::info!("fleet is not ready yet, will retry");
                Err(Error::DiscoveryAllSeedsFailed)
            }
            MessageType::Leader => self.join_via(reply).await,
            other => {
                tracing::warn!(kind = ?other, "unexpected reply to WHOISLEADER");
                Err(Error::DiscoveryAllSeedsFailed)
            }
        }
    }

    /// Retries [`Member::discover`] with exponential backoff
    /// (`base_delay * 2^attempt`), matching
    /// `original_source/pkg/navy/discovery.go`'s `RetryWithBackoff`. Stops
    /// retrying immediately on a fatal error such as `CallsignMismatch`.
    pub async fn discover_with_backoff(&self, seeds: &[String], backoff: Backoff) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.discover(seeds).await {
                Ok(()) => return Ok(()),
                Err(Error::DiscoveryAllSeedsFailed) | Err(Error::DiscoveryNoSeed) if attempt + 1 < backoff.max_retries => {
                    let delay = backoff_delay(backoff.base_delay, attempt);
                    tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "retrying discovery");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Having learned the current leader, fetches the full peer list from it,
    /// dials every member (leader included), and announces readiness.
    async fn join_via(&self, leader: Message) -> Result<()> {
        self.set_leader(leader.address.clone(), leader.payload.clone(), leader.rank).await;

        let peers_query = Message::new(MessageType::Peers, self.inner.rank, self.inner.external_address.clone(), self.inner.callsign.clone());
        let peer_list = self.send_one_shot(&leader.address, peers_query).await?;

        let members = peer_list.peers.unwrap_or_default();
        for peer in &members {
            if peer.rank == self.inner.rank {
                continue;
            }
            let ready = Message::new(MessageType::Ready, self.inner.rank, self.inner.external_address.clone(), self.inner.callsign.clone());
            if let Err(e) = self.send(peer.rank, &peer.address, move || ready.clone()).await {
                tracing::warn!(rank = peer.rank, error = %e, "failed to announce readiness to peer during join");
            }
        }

        self.inner.ready.store(true, Ordering::Release);
        tracing::info!(rank = self.inner.rank, "joined fleet and marked ready");
        Ok(())
    }
}

/// Computes `base_delay * 2^attempt`, saturating rather than overflowing for
/// implausibly large attempt counts.
fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    base_delay.saturating_mul(2u32.saturating_pow(attempt))
}
