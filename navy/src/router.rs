//! Frame classification (spec §4.D).
//!
//! [`Member::dispatch`] is the first stop for every decoded frame, called
//! directly from each connection's decode loop: `OK` is handed to the
//! election channel with a bounded delivery timeout (mirroring
//! `original_source/pkg/navy/network.go`'s `receive()` select against a
//! 200ms timer around the same send), and everything else is forwarded to
//! the main channel, exactly as that same `receive()` splits its decoded
//! frames across `electionChan` and `receiveChan`. [`Member::dispatch_main`]
//! is the main channel's consumer, run from [`Member::run`]'s loop —
//! `ELECTION`/`ADMIRAL` drive the Bully state machine, `READY` marks a peer
//! ready in the registry (dialing back if needed), `CLOSE` is a no-op here
//! (the decode loop's EOF, not this frame, is what actually tears the peer
//! down — the original sends `CLOSE` purely as a courtesy before it stops
//! writing).
//!
//! `WHOISLEADER`/`PEERS` never reach either function: they're answered
//! in-place by [`Member::reply_for`] from the decode loop before a frame is
//! ever dispatched. The original's `receive()` answers these the same way,
//! just over a second, short-lived connection opened by `SendOneShot`; since
//! our one-shot exchange already owns a dedicated connection end to end, the
//! reply is written directly back to it rather than needing a
//! `discoverChan` to correlate an asynchronous answer with its asker.
//! `LEADER`/`PEERLIST`/`UNREADY`/`UNKNOWN` are the replies to those
//! one-shots, read directly off [`Member::send_one_shot`]'s return value —
//! seeing one of them in `dispatch_main` means it arrived on a connection
//! discovery wasn't waiting on.

use crate::member::Member;
use crate::message::{Message, MessageType, PeerInfo};

impl Member {
    /// Routes a freshly decoded, non-one-shot frame to whichever channel its
    /// eventual handler drains: `OK` to the election channel, everything
    /// else to the main channel (spec §4.D).
    pub(crate) async fn dispatch(&self, msg: Message) {
        if msg.kind == MessageType::Ok {
            match tokio::time::timeout(self.inner.config.ok_delivery_timeout, self.inner.election_tx.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => tracing::debug!("election channel closed, dropping OK"),
                Err(_) => tracing::debug!("no election in progress, dropping OK"),
            }
            return;
        }

        if self.inner.main_tx.send(msg).await.is_err() {
            tracing::debug!("main channel closed, dropping frame");
        }
    }

    /// Handles one frame pulled off the main channel by [`Member::run`]'s
    /// dispatch loop.
    pub(crate) async fn dispatch_main(&self, msg: Message) {
        match msg.kind {
            MessageType::Election => self.handle_election_frame(msg).await,
            MessageType::Admiral => self.handle_admiral_frame(msg).await,
            MessageType::Leader | MessageType::PeerList | MessageType::Unready | MessageType::Unknown => {
                tracing::warn!(from = msg.rank, kind = ?msg.kind, "stray discovery-phase frame outside a one-shot exchange, dropping");
            }
            MessageType::Ready => {
                // Connections are one-directional, so the first time we hear
                // from a rank we don't yet have an outbound connection to,
                // dial it back — this is how two members end up with a
                // connection in each direction after a `READY` handshake
                // (spec §4.F).
                if self.inner.registry.contains(msg.rank).await {
                    self.inner.registry.mark_ready(msg.rank).await;
                } else {
                    match self.dial(&msg.address).await {
                        Ok(stream) => {
                            let (_read, write) = stream.into_split();
                            self.inner.registry.add(msg.rank, msg.address.clone(), write).await;
                        }
                        Err(e) => {
                            tracing::warn!(rank = msg.rank, error = %e, "failed to dial back after READY");
                        }
                    }
                }
            }
            MessageType::Close => {
                tracing::debug!(from = msg.rank, "peer sent CLOSE");
            }
            MessageType::WhoIsLeader | MessageType::Peers => {
                tracing::warn!(from = msg.rank, "one-shot query arrived outside the decode loop's reply path");
            }
            MessageType::Promotion => {
                tracing::debug!(from = msg.rank, "ignoring unused PROMOTION frame");
            }
            MessageType::Ok => {
                unreachable!("OK is routed straight to the election channel in Member::dispatch");
            }
        }
    }

    /// Builds the reply for a one-shot query, if `msg` is one. `None` means
    /// "not a query type" and the frame should go through [`Member::dispatch`]
    /// instead.
    ///
    /// A callsign mismatch always gets `UNKNOWN` (spec §4.F: fleets running
    /// different callsigns must never merge); a query that arrives before
    /// this member knows of any leader gets `UNREADY` so the asker knows to
    /// back off and retry rather than treating an empty answer as "no
    /// leader". This is gated on the leader state, not this member's own
    /// `ready` flag: `discover`'s `join_via` calls `set_leader` before it
    /// finishes dialing every peer and marking itself ready, and a
    /// `WHOISLEADER` landing in that window already has a real answer to
    /// give.
    pub(crate) async fn reply_for(&self, msg: &Message) -> Option<Message> {
        if !matches!(msg.kind, MessageType::WhoIsLeader | MessageType::Peers) {
            return None;
        }

        if msg.callsign != self.inner.callsign {
            return Some(Message::new(MessageType::Unknown, self.inner.rank, self.inner.external_address.clone(), self.inner.callsign.clone()));
        }

        let guard = self.inner.leader.lock().await;
        if guard.leader_rank == i64::MIN {
            drop(guard);
            return Some(Message::new(MessageType::Unready, self.inner.rank, self.inner.external_address.clone(), self.inner.callsign.clone()));
        }

        match msg.kind {
            MessageType::WhoIsLeader => Some(
                Message::new(MessageType::Leader, guard.leader_rank, guard.leader_address.clone(), self.inner.callsign.clone())
                    .with_payload(guard.leader_payload.clone()),
            ),
            MessageType::Peers => {
                drop(guard);
                let mut peers = self.inner.registry.snapshot().await;
                peers.push(PeerInfo {
                    rank: self.inner.rank,
                    address: self.inner.external_address.clone(),
                    ready: true,
                });
                Some(
                    Message::new(MessageType::PeerList, self.inner.rank, self.inner.external_address.clone(), self.inner.callsign.clone())
                        .with_peers(peers),
                )
            }
            _ => unreachable!(),
        }
    }

    /// Reacts to an accepted connection closing (spec §4.D, peer-loss
    /// reaction): drop the lost rank from the registry and, if the lost rank
    /// is at least as high as the current `leader_rank`, re-derive a leader
    /// from the survivors and start a new election. `>=` rather than `==`
    /// also catches a higher-ranked candidate crashing mid-election, before
    /// it ever sends `ADMIRAL` — strict equality would miss that case and
    /// leave the reset to whatever `elect()` call happens to already be in
    /// flight.
    pub(crate) async fn handle_close(&self, last_sender: Option<(i64, String)>) {
        let Some((rank, address)) = last_sender else {
            return;
        };
        tracing::info!(rank, address, "connection closed");
        self.inner.registry.delete(rank).await;

        let lost_leader = rank >= self.inner.leader.lock().await.leader_rank;
        if lost_leader {
            self.reset_leader().await;
            self.elect().await;
        }
    }
}
