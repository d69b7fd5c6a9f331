//! Leader-transition dispatcher (spec §4.G).
//!
//! `set_leader` and `reset_leader` are the only two places that ever mutate
//! `(leader_rank, leader_address, leader_payload)`. Both run under the
//! member's single leader lock, and both invoke the user's promotion/demotion
//! callback *inside* that lock — `tokio::sync::Mutex` (not `std::sync`) is
//! required here specifically because the critical section spans an
//! `.await` on the callback's completion signal (spec §9, "Callback
//! blocking").

use tokio::sync::oneshot;

use crate::member::Member;

/// A handle a promotion/demotion callback must resolve (by calling
/// [`CompletionSignal::complete`], or simply by being dropped) before the
/// dispatcher proceeds.
pub struct CompletionSignal(oneshot::Sender<()>);

impl CompletionSignal {
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (CompletionSignal(tx), rx)
    }

    /// Signal that the handler's work is finished.
    pub fn complete(self) {
        let _ = self.0.send(());
    }
}

/// A user-supplied promotion/demotion handler. Opaque to the engine beyond
/// this signature (spec §1, "out of scope": "user-supplied promotion/
/// demotion callbacks ... treated as opaque handlers").
pub type Callback = std::sync::Arc<dyn Fn(CompletionSignal) + Send + Sync + 'static>;

impl Member {
    pub(crate) async fn invoke_promotion(&self) {
        let cb = self.inner.promoted.lock().await.clone();
        if let Some(cb) = cb {
            let (signal, done) = CompletionSignal::new();
            cb(signal);
            let _ = done.await;
        }
        tracing::info!(rank = self.inner.rank, "promoted to admiral");
    }

    pub(crate) async fn invoke_demotion(&self) {
        let cb = self.inner.demoted.lock().await.clone();
        if let Some(cb) = cb {
            let (signal, done) = CompletionSignal::new();
            cb(signal);
            let _ = done.await;
        }
        tracing::info!(rank = self.inner.rank, "demoted from admiral");
    }

    /// Monotonic leader update (spec §4.E "Tie-breaks", §4.G).
    ///
    /// Announcements with `rank <= leader_rank` are dropped outright. If the
    /// local member is losing leadership, the demotion callback runs (and is
    /// awaited) before state is updated; if the local member is the new
    /// leader, the promotion callback runs the same way.
    pub(crate) async fn set_leader(&self, address: String, payload: Option<Vec<u8>>, rank: i64) {
        let mut guard = self.inner.leader.lock().await;
        if rank <= guard.leader_rank {
            return;
        }

        if guard.leader_rank == self.inner.rank && rank > self.inner.rank {
            self.invoke_demotion().await;
        }
        if rank == self.inner.rank {
            self.invoke_promotion().await;
        }

        guard.leader_rank = rank;
        guard.leader_address = address;
        guard.leader_payload = payload;
    }

    /// Re-derives the leader from the surviving registry snapshot after the
    /// previous leader is confirmed lost (spec §4.G). This is the only
    /// operation permitted to lower `leader_rank`, because the previous
    /// leader is known dead rather than merely slow.
    pub(crate) async fn reset_leader(&self) {
        let mut guard = self.inner.leader.lock().await;

        let mut candidate_rank = self.inner.rank;
        let mut candidate_addr = self.inner.external_address.clone();
        for peer in self.inner.registry.snapshot().await {
            if peer.rank > candidate_rank {
                candidate_rank = peer.rank;
                candidate_addr = peer.address;
            }
        }

        if candidate_rank == self.inner.rank {
            self.invoke_promotion().await;
        }

        guard.leader_rank = candidate_rank;
        guard.leader_address = candidate_addr;
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::member::Member;

    fn member(rank: i64) -> Member {
        Member::new(rank, format!("127.0.0.1:{}", 10000 + rank), "alpha", EngineConfig::default())
    }

    #[tokio::test]
    async fn set_leader_ignores_announcements_at_or_below_the_current_rank() {
        let m = member(5);
        m.set_leader("127.0.0.1:1".into(), None, 9).await;
        assert_eq!(m.leader_rank().await, 9);

        m.set_leader("127.0.0.1:2".into(), None, 9).await;
        assert_eq!(m.leader_address().await, "127.0.0.1:1");

        m.set_leader("127.0.0.1:3".into(), None, 3).await;
        assert_eq!(m.leader_rank().await, 9, "a lower rank must never overwrite the leader");
    }

    #[tokio::test]
    async fn set_leader_promotes_self_when_its_own_rank_wins() {
        let m = member(7);
        m.set_payload(Some(b"payload".to_vec())).await;
        m.set_leader("127.0.0.1:10007".into(), Some(b"payload".to_vec()), 7).await;
        assert_eq!(m.leader_rank().await, 7);
        assert_eq!(m.get_leader_payload().await, Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn reset_leader_picks_the_highest_ranked_survivor() {
        let m = member(2);
        m.set_leader("127.0.0.1:10099".into(), None, 99).await;
        // No peers registered, so the only candidate is `m` itself.
        m.reset_leader().await;
        assert_eq!(m.leader_rank().await, 2);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn set_leader_is_monotonic_under_any_announcement_order(ranks in proptest::collection::vec(any::<i64>(), 0..32)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let m = member(0);
                let mut max_seen = i64::MIN;
                for (i, rank) in ranks.iter().enumerate() {
                    m.set_leader(format!("127.0.0.1:{}", 20000 + i), None, *rank).await;
                    max_seen = max_seen.max(*rank);
                    prop_assert_eq!(m.leader_rank().await, max_seen);
                }
                Ok(())
            })?;
        }
    }
}
