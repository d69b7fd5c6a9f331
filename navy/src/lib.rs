//! A peer-to-peer Bully leader election engine over TCP.
//!
//! A [`Member`] dials and listens for other members, runs the election
//! protocol in [`election`], tracks the current leader in [`leader`], and
//! exposes join/resign and promotion/demotion hooks through the facade in
//! [`member`]. See each module's docs for the piece of the design it owns.

mod config;
mod discovery;
mod election;
mod error;
mod leader;
mod member;
mod message;
mod peer;
mod router;
mod registry;
mod transport;

pub use config::{Backoff, EngineConfig, Proto};
pub use error::{Error, Result};
pub use leader::{Callback, CompletionSignal};
pub use member::{Member, WorkFn};
pub use message::{Message, MessageType, PeerInfo};
