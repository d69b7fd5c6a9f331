//! Error kinds surfaced by the engine, per the propagation policy in spec §7:
//! inbound decode failures are swallowed (the peer is just dropped), outbound
//! send failures are retried internally and only escalate as
//! [`Error::SendExhausted`], and discovery failures always reach the caller.

use std::net::SocketAddr;

/// The engine's error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind listener on {addr}: {source}")]
    BindFailure {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to resolve address {addr}: {source}")]
    ResolveFailure {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to dial {addr}: {source}")]
    DialFailure {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode message: {0}")]
    EncodeFailure(String),

    #[error("failed to decode message: {0}")]
    DecodeFailure(String),

    #[error("peer with rank {0} not found in registry")]
    PeerNotFound(i64),

    #[error("send to rank {rank} exhausted after {attempts} attempts")]
    SendExhausted { rank: i64, attempts: u32 },

    #[error("discovery requires a non-empty seed fleet")]
    DiscoveryNoSeed,

    #[error("discovery failed: every seed in the fleet was unreachable")]
    DiscoveryAllSeedsFailed,

    #[error("callsign mismatch: the remote fleet rejected our callsign")]
    CallsignMismatch,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
