//! Wire codec & message types (spec §4.A).
//!
//! Frames are self-delimiting: a one-byte tag, then fixed/length-prefixed
//! fields in a stable order, so [`NavyCodec`] can be driven incrementally off
//! a `tokio::net::TcpStream` via `tokio_util::codec::Framed` without any
//! out-of-band framing. Integer fields are little-endian, following the same
//! `byteorder` idiom zebra-network uses in `meta_addr.rs`/`inv.rs`.

use bytes::{Buf, BufMut, BytesMut};
use byteorder::{ByteOrder, LittleEndian};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;

/// The wire tag for each message type. Values are stable and assigned in the
/// order spec §4.A lists them — do not reorder, a peer running an older or
/// newer build of this crate must still parse these tags the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Election = 0,
    Ok = 1,
    Admiral = 2,
    WhoIsLeader = 3,
    Leader = 4,
    Peers = 5,
    PeerList = 6,
    Ready = 7,
    Unready = 8,
    Unknown = 9,
    Promotion = 10,
    Close = 11,
}

impl MessageType {
    fn from_tag(tag: u8) -> Result<Self, Error> {
        use MessageType::*;
        Ok(match tag {
            0 => Election,
            1 => Ok,
            2 => Admiral,
            3 => WhoIsLeader,
            4 => Leader,
            5 => Peers,
            6 => PeerList,
            7 => Ready,
            8 => Unready,
            9 => Unknown,
            10 => Promotion,
            11 => Close,
            other => return Err(Error::DecodeFailure(format!("unknown message tag {other}"))),
        })
    }
}

/// A peer's rank/address/readiness, as gossiped in a [`MessageType::PeerList`]
/// reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub rank: i64,
    pub address: String,
    pub ready: bool,
}

/// A decoded (or to-be-encoded) wire frame. See spec §4.A for the field
/// semantics per message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub rank: i64,
    pub address: String,
    pub callsign: String,
    pub one_shot: bool,
    /// Opaque leader-advertised bytes (spec's "Payload field" design note).
    pub payload: Option<Vec<u8>>,
    pub peers: Option<Vec<PeerInfo>>,
}

impl Message {
    /// Build a bare frame carrying only the sender's identity — the shape
    /// most message types use (`ELECTION`, `OK`, `ADMIRAL` without payload,
    /// `WHOISLEADER`, `PEERS`, `READY`, `UNREADY`, `UNKNOWN`, `CLOSE`).
    pub fn new(kind: MessageType, rank: i64, address: impl Into<String>, callsign: impl Into<String>) -> Self {
        Message {
            kind,
            rank,
            address: address.into(),
            callsign: callsign.into(),
            one_shot: false,
            payload: None,
            peers: None,
        }
    }

    pub fn with_payload(mut self, payload: Option<Vec<u8>>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_peers(mut self, peers: Vec<PeerInfo>) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }
}

fn write_string(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    buf.put_u16_le(bytes.len() as u16);
    buf.put_slice(bytes);
}

/// Returns `None` if `buf` doesn't yet hold a complete length-prefixed
/// string, advancing `pos` only on success.
fn try_read_string(buf: &[u8], pos: &mut usize) -> Option<String> {
    if buf.len() < *pos + 2 {
        return None;
    }
    let len = LittleEndian::read_u16(&buf[*pos..*pos + 2]) as usize;
    let start = *pos + 2;
    if buf.len() < start + len {
        return None;
    }
    let s = String::from_utf8_lossy(&buf[start..start + len]).into_owned();
    *pos = start + len;
    Some(s)
}

/// The stream codec for the engine's wire protocol.
///
/// Decoder state (none beyond the shared buffer) persists across messages on
/// one stream, so a `Framed<TcpStream, NavyCodec>` correctly pulls frames in
/// send order even if the kernel delivers them split across several reads.
#[derive(Debug, Default)]
pub struct NavyCodec;

impl Encoder<Message> for NavyCodec {
    type Error = Error;

    fn encode(&mut self, msg: Message, buf: &mut BytesMut) -> Result<(), Error> {
        buf.put_u8(msg.kind as u8);
        buf.put_i64_le(msg.rank);
        write_string(buf, &msg.address);
        write_string(buf, &msg.callsign);
        buf.put_u8(msg.one_shot as u8);

        match &msg.payload {
            Some(p) => {
                buf.put_u8(1);
                buf.put_u16_le(p.len() as u16);
                buf.put_slice(p);
            }
            None => buf.put_u8(0),
        }

        match &msg.peers {
            Some(peers) => {
                buf.put_u8(1);
                buf.put_u32_le(peers.len() as u32);
                for p in peers {
                    buf.put_i64_le(p.rank);
                    write_string(buf, &p.address);
                    buf.put_u8(p.ready as u8);
                }
            }
            None => buf.put_u8(0),
        }

        Ok(())
    }
}

impl Decoder for NavyCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, Error> {
        // A cursor-based, non-consuming parse: if any field is incomplete we
        // return Ok(None) and leave `buf` untouched for the next read.
        let mut pos = 0usize;

        if buf.len() < pos + 1 {
            return Ok(None);
        }
        let tag = buf[pos];
        pos += 1;
        let kind = MessageType::from_tag(tag)?;

        if buf.len() < pos + 8 {
            return Ok(None);
        }
        let rank = LittleEndian::read_i64(&buf[pos..pos + 8]);
        pos += 8;

        let address = match try_read_string(buf, &mut pos) {
            Some(s) => s,
            None => return Ok(None),
        };
        let callsign = match try_read_string(buf, &mut pos) {
            Some(s) => s,
            None => return Ok(None),
        };

        if buf.len() < pos + 1 {
            return Ok(None);
        }
        let one_shot = buf[pos] != 0;
        pos += 1;

        if buf.len() < pos + 1 {
            return Ok(None);
        }
        let has_payload = buf[pos] != 0;
        pos += 1;
        let payload = if has_payload {
            if buf.len() < pos + 2 {
                return Ok(None);
            }
            let len = LittleEndian::read_u16(&buf[pos..pos + 2]) as usize;
            pos += 2;
            if buf.len() < pos + len {
                return Ok(None);
            }
            let bytes = buf[pos..pos + len].to_vec();
            pos += len;
            Some(bytes)
        } else {
            None
        };

        if buf.len() < pos + 1 {
            return Ok(None);
        }
        let has_peers = buf[pos] != 0;
        pos += 1;
        let peers = if has_peers {
            if buf.len() < pos + 4 {
                return Ok(None);
            }
            let count = LittleEndian::read_u32(&buf[pos..pos + 4]) as usize;
            pos += 4;
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                if buf.len() < pos + 8 {
                    return Ok(None);
                }
                let rank = LittleEndian::read_i64(&buf[pos..pos + 8]);
                pos += 8;
                let address = match try_read_string(buf, &mut pos) {
                    Some(s) => s,
                    None => return Ok(None),
                };
                if buf.len() < pos + 1 {
                    return Ok(None);
                }
                let ready = buf[pos] != 0;
                pos += 1;
                out.push(PeerInfo { rank, address, ready });
            }
            Some(out)
        } else {
            None
        };

        buf.advance(pos);
        Ok(Some(Message {
            kind,
            rank,
            address,
            callsign,
            one_shot,
            payload,
            peers,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let mut codec = NavyCodec;
        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().expect("a full frame");
        assert_eq!(msg, decoded);
        assert!(buf.is_empty());
    }

    #[test]
    fn roundtrip_bare_election() {
        roundtrip(Message::new(MessageType::Election, 5, "127.0.0.1:9001", "alpha"));
    }

    #[test]
    fn roundtrip_admiral_with_payload() {
        roundtrip(
            Message::new(MessageType::Admiral, 9, "127.0.0.1:9009", "alpha")
                .with_payload(Some(b"vip=10.0.0.1".to_vec())),
        );
    }

    #[test]
    fn roundtrip_peerlist() {
        roundtrip(
            Message::new(MessageType::PeerList, 1, "127.0.0.1:9001", "alpha").with_peers(vec![
                PeerInfo {
                    rank: 2,
                    address: "127.0.0.1:9002".into(),
                    ready: true,
                },
                PeerInfo {
                    rank: 3,
                    address: "127.0.0.1:9003".into(),
                    ready: false,
                },
            ]),
        );
    }

    #[test]
    fn roundtrip_one_shot_whoisleader() {
        roundtrip(Message::new(MessageType::WhoIsLeader, 3, "127.0.0.1:9003", "alpha").one_shot());
    }

    #[test]
    fn every_message_type_roundtrips() {
        use MessageType::*;
        for kind in [
            Election, Ok, Admiral, WhoIsLeader, Leader, Peers, PeerList, Ready, Unready, Unknown,
            Promotion, Close,
        ] {
            roundtrip(Message::new(kind, 1, "127.0.0.1:9001", "alpha"));
        }
    }

    #[test]
    fn decode_returns_none_on_partial_frame() {
        let mut codec = NavyCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Message::new(MessageType::Election, 5, "127.0.0.1:9001", "alpha"), &mut buf)
            .unwrap();
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let mut codec = NavyCodec;
        let mut buf = BytesMut::new();
        buf.put_u8(200);
        buf.put_i64_le(0);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn decoder_persists_across_multiple_frames_in_one_buffer() {
        let mut codec = NavyCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Message::new(MessageType::Ok, 1, "a", "alpha"), &mut buf)
            .unwrap();
        codec
            .encode(Message::new(MessageType::Close, 1, "a", "alpha"), &mut buf)
            .unwrap();
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.kind, MessageType::Ok);
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.kind, MessageType::Close);
        assert!(buf.is_empty());
    }

    use proptest::prelude::*;

    fn arb_kind() -> impl Strategy<Value = MessageType> {
        use MessageType::*;
        prop_oneof![
            Just(Election),
            Just(Ok),
            Just(Admiral),
            Just(WhoIsLeader),
            Just(Leader),
            Just(Peers),
            Just(PeerList),
            Just(Ready),
            Just(Unready),
            Just(Unknown),
            Just(Promotion),
            Just(Close),
        ]
    }

    fn arb_peer() -> impl Strategy<Value = PeerInfo> {
        (any::<i64>(), "[a-z0-9.:]{1,32}", any::<bool>()).prop_map(|(rank, address, ready)| PeerInfo { rank, address, ready })
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        (
            arb_kind(),
            any::<i64>(),
            "[a-z0-9.:]{1,32}",
            "[a-z0-9-]{1,16}",
            any::<bool>(),
            proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
            proptest::option::of(proptest::collection::vec(arb_peer(), 0..8)),
        )
            .prop_map(|(kind, rank, address, callsign, one_shot, payload, peers)| Message {
                kind,
                rank,
                address,
                callsign,
                one_shot,
                payload,
                peers,
            })
    }

    proptest! {
        #[test]
        fn any_message_roundtrips_through_the_wire_codec(msg in arb_message()) {
            let mut codec = NavyCodec;
            let mut buf = BytesMut::new();
            codec.encode(msg.clone(), &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap().expect("a full frame decodes in one shot");
            prop_assert_eq!(msg, decoded);
            prop_assert!(buf.is_empty());
        }
    }
}
