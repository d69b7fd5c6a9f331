//! A single remote fleet member's registry-side state (spec §3, "Peer").

use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::codec::FramedWrite;

use crate::error::{Error, Result};
use crate::message::{Message, NavyCodec};

/// The registry's view of a peer: identity plus the outbound half of its TCP
/// connection.
///
/// `encoder` is the "outbound half of the TCP connection, wrapped so that
/// `write(msg)` is atomic" from spec §3 — a `FramedWrite` owns the write half
/// exclusively, so every `send` either fully buffers a frame or fails; there
/// is no way for two partial frames to interleave on the wire.
pub(crate) struct PeerEntry {
    pub rank: i64,
    pub address: String,
    pub ready: bool,
    encoder: FramedWrite<OwnedWriteHalf, NavyCodec>,
}

impl PeerEntry {
    pub(crate) fn new(rank: i64, address: String, writer: OwnedWriteHalf) -> Self {
        PeerEntry {
            rank,
            address,
            ready: true,
            encoder: FramedWrite::new(writer, NavyCodec),
        }
    }

    pub(crate) async fn write(&mut self, msg: Message) -> Result<()> {
        self.encoder
            .send(msg)
            .await
            .map_err(|e| Error::EncodeFailure(e.to_string()))
    }

    /// Closes the connection's write half; the peer's decoder task observes
    /// EOF on its read half once the remote also closes (spec §3, Peer
    /// lifecycle: "destroyed on stream close").
    pub(crate) async fn close(&mut self) {
        let _ = self.encoder.get_mut().shutdown().await;
    }
}
