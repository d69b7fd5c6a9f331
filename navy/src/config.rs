//! Engine-level configuration (spec §6, "Configuration").

use std::time::Duration;

/// The address family restriction placed on listening/dialing, mirroring the
/// three values `original_source/pkg/navy/network.go` accepts as its `proto`
/// string (`tcp`, `tcp4`, `tcp6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Proto {
    /// No family restriction; the first address the resolver returns wins.
    #[default]
    Tcp,
    /// Only connect/bind using IPv4 addresses.
    Tcp4,
    /// Only connect/bind using IPv6 addresses.
    Tcp6,
}

impl Proto {
    /// Whether `addr` is acceptable under this family restriction.
    pub fn accepts(self, addr: &std::net::SocketAddr) -> bool {
        match self {
            Proto::Tcp => true,
            Proto::Tcp4 => addr.is_ipv4(),
            Proto::Tcp6 => addr.is_ipv6(),
        }
    }
}

/// Tunables the embedding host may override; defaults match spec §6.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub proto: Proto,
    /// Re-dial+write attempts for [`crate::member::Member::send`] before
    /// giving up with `SendExhausted`.
    pub max_retries: u32,
    /// Deadline for [`crate::member::Member::elect`] to collect an `OK`
    /// before declaring victory.
    pub election_timeout: Duration,
    /// Deadline for handing a decoded `OK` frame to a waiting `elect()` call;
    /// if nothing is draining the election channel within this window (no
    /// election in progress), the frame is dropped rather than stalling the
    /// connection's decode loop.
    pub ok_delivery_timeout: Duration,
    /// Sleep between re-dial+write attempts in [`crate::member::Member::send`].
    pub send_retry_gap: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            proto: Proto::default(),
            max_retries: 5,
            election_timeout: Duration::from_secs(1),
            ok_delivery_timeout: Duration::from_millis(200),
            send_retry_gap: Duration::from_millis(10),
        }
    }
}

/// Parameters for [`crate::member::Member::discover_with_backoff`].
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_retries: u32,
    pub base_delay: Duration,
}
