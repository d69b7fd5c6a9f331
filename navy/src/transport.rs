//! Dialing, retrying sends, and the accept loop (spec §4.C).
//!
//! Connections in this protocol are one-directional for the fire-and-forget
//! traffic that dominates it: the side that dials is the only side that ever
//! registers a long-lived peer entry and writes fire-and-forget frames to
//! it, while an accepted connection's decode loop only ever writes back when
//! answering a one-shot query on that same socket. Two members that both
//! want a registered outbound connection to each other therefore both end up
//! dialing — once directly (`connect`/`send`) and once via the `READY`
//! dial-back in `router.rs` — mirroring `original_source/pkg/navy/network.go`.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_util::codec::Framed;
use tracing_futures::Instrument;

use crate::error::{Error, Result};
use crate::member::Member;
use crate::message::{Message, MessageType, NavyCodec, PeerInfo};

impl Member {
    /// Opens a fresh outbound connection to `address`, filtered by the
    /// configured [`crate::config::Proto`] family.
    pub(crate) async fn dial(&self, address: &str) -> Result<TcpStream> {
        let mut last_err = None;
        for candidate in tokio::net::lookup_host(address)
            .await
            .map_err(|e| Error::ResolveFailure { addr: address.to_string(), source: e })?
        {
            if !self.inner.config.proto.accepts(&candidate) {
                continue;
            }
            match TcpStream::connect(candidate).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(Error::DialFailure {
            addr: address.parse().unwrap_or_else(|_| ([0, 0, 0, 0], 0).into()),
            source: last_err.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved")),
        })
    }

    /// Dials a fixed, pre-known set of peers up front, registering each one
    /// before returning. For topologies whose membership is pinned ahead of
    /// time rather than learned via [`Member::discover`] (spec §3,
    /// `static_peers`; `original_source/pkg/navy/network.go`'s `Connect`,
    /// invoked from `NewCaptain`). A peer that fails to dial is logged and
    /// skipped, not fatal — it can still reach this member by dialing in.
    pub async fn connect(&self, static_peers: &[PeerInfo]) -> Result<()> {
        for peer in static_peers {
            if peer.rank == self.inner.rank {
                continue;
            }
            match self.dial(&peer.address).await {
                Ok(stream) => {
                    let (_read, write) = stream.into_split();
                    self.inner.registry.add(peer.rank, peer.address.clone(), write).await;
                }
                Err(e) => {
                    tracing::warn!(rank = peer.rank, address = peer.address, error = %e, "failed to connect to static peer");
                }
            }
        }
        Ok(())
    }

    /// Sends a message to a registered peer, dialing (or re-dialing) as
    /// needed and retrying up to `max_retries` times. `builder` is invoked
    /// fresh on every attempt so a retry never re-sends a message built from
    /// state that's since moved on (spec §4.C).
    pub(crate) async fn send<F>(&self, rank: i64, address: &str, builder: F) -> Result<()>
    where
        F: Fn() -> Message,
    {
        let mut attempts = 0;
        loop {
            if !self.inner.registry.contains(rank).await {
                match self.dial(address).await {
                    Ok(stream) => {
                        let (_read, write) = stream.into_split();
                        self.inner.registry.add(rank, address.to_string(), write).await;
                    }
                    Err(e) => {
                        tracing::warn!(rank, address, error = %e, "dial failed");
                    }
                }
            }

            if self.inner.registry.contains(rank).await {
                match self.inner.registry.write(rank, builder()).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(rank, error = %e, "send failed, dropping stale connection");
                        self.inner.registry.delete(rank).await;
                    }
                }
            }

            attempts += 1;
            if attempts >= self.inner.config.max_retries {
                return Err(Error::SendExhausted { rank, attempts });
            }
            sleep(self.inner.config.send_retry_gap).await;
        }
    }

    /// Opens a dedicated, full-duplex connection for a single request/reply
    /// exchange (used by discovery for `WHOISLEADER`/`PEERS`): writes one
    /// `one_shot` frame, waits for the single reply, then sends `CLOSE` and
    /// tears the connection down (spec §4.C, §4.F).
    pub(crate) async fn send_one_shot(&self, address: &str, msg: Message) -> Result<Message> {
        let stream = self.dial(address).await?;
        let mut framed = Framed::new(stream, NavyCodec);
        framed.send(msg.one_shot()).await.map_err(|e| Error::EncodeFailure(e.to_string()))?;

        let reply = tokio::time::timeout(self.inner.config.election_timeout, framed.next())
            .await
            .map_err(|_| Error::DecodeFailure("one-shot reply timed out".into()))?
            .ok_or_else(|| Error::DecodeFailure("connection closed before a reply arrived".into()))??;

        let close = Message::new(MessageType::Close, self.inner.rank, self.inner.external_address.clone(), self.inner.callsign.clone());
        let _ = framed.send(close).await;

        Ok(reply)
    }

    /// Binds `address` and spawns the accept loop. Each accepted connection
    /// gets its own decoder task, kept full-duplex so it can answer one-shot
    /// queries on the socket they arrived on (spec §4.C).
    pub async fn listen(&self, address: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| Error::BindFailure { addr: address.to_string(), source: e })?;
        let local_addr = listener.local_addr().map_err(Error::Io)?;
        tracing::info!(address, "listening for fleet connections");

        let member = self.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!(peer = %peer_addr, "accepted connection");
                        let member = member.clone();
                        let span = tracing::info_span!("accepted_connection", peer = %peer_addr);
                        let task = tokio::spawn(async move { member.decode_loop(stream).await }.instrument(span));
                        member.inner.tasks.lock().await.push(task);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        });
        self.inner.tasks.lock().await.push(accept_task);

        Ok(local_addr)
    }

    /// Reads frames from one accepted connection until EOF, routing each to
    /// [`Member::dispatch`]. The same connection is kept full-duplex (rather
    /// than read-only) because one-shot queries (`WHOISLEADER`, `PEERS`)
    /// expect their reply on this socket, per spec §4.C/§4.F.
    ///
    /// `last_sender` retains the identity carried by the *last successfully
    /// decoded* frame, exactly like the stale `msg` variable in
    /// `original_source/pkg/navy/network.go`'s `receive` loop — on EOF this
    /// is the only way to know which peer just disappeared, since the
    /// TCP-level peer address of an accepted connection says nothing about
    /// the remote's fleet rank.
    async fn decode_loop(&self, stream: TcpStream) {
        let mut framed = Framed::new(stream, NavyCodec);
        let mut last_sender: Option<(i64, String)> = None;

        loop {
            match framed.next().await {
                Some(Ok(msg)) => {
                    last_sender = Some((msg.rank, msg.address.clone()));
                    if msg.one_shot {
                        if let Some(reply) = self.reply_for(&msg).await {
                            if let Err(e) = framed.send(reply).await {
                                tracing::warn!(error = %e, "failed to send one-shot reply");
                            }
                            continue;
                        }
                    }
                    self.dispatch(msg).await;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "dropping unparsable frame");
                }
                None => break,
            }
        }

        self.handle_close(last_sender).await;
    }
}
