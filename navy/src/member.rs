//! The engine's public facade (spec §3, "Member"; §6).
//!
//! `Member` is a cheap `Arc`-backed handle — cloning it (as each accept-loop
//! and decoder task does) shares the same registry, leader state, and
//! channels. All the actual behavior lives in the sibling modules
//! (`election`, `discovery`, `router`, `transport`, `leader`); this module
//! just owns the shared state they all reach into through `self.inner`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::leader::Callback;
use crate::message::{Message, MessageType};
use crate::registry::PeerRegistry;

/// A host-supplied background task launched by [`Member::run`] for the
/// engine's lifetime (spec §5, "zero or more user-supplied work tasks").
pub type WorkFn = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The mutable slice of state `set_leader`/`reset_leader` own exclusively
/// (spec §4.G).
pub(crate) struct LeaderState {
    pub leader_rank: i64,
    pub leader_address: String,
    pub leader_payload: Option<Vec<u8>>,
    /// This member's own advertised payload, used when it wins an election
    /// (spec's "Payload field" design note — only the current leader's
    /// payload is ever meaningful, but a member must carry its own in case it
    /// becomes leader).
    pub local_payload: Option<Vec<u8>>,
}

pub(crate) struct Inner {
    pub rank: i64,
    pub external_address: String,
    pub callsign: String,
    pub config: EngineConfig,

    pub registry: PeerRegistry,
    pub leader: Mutex<LeaderState>,
    pub ready: AtomicBool,

    pub promoted: Mutex<Option<Callback>>,
    pub demoted: Mutex<Option<Callback>>,

    pub election_tx: mpsc::Sender<Message>,
    pub election_rx: Mutex<mpsc::Receiver<Message>>,

    /// Every decoded frame that isn't an `OK` reply or an in-place one-shot
    /// reply lands here; `Member::run`'s dispatch loop is the only consumer
    /// (spec §4.D, §5/§6's "main receive channel").
    pub main_tx: mpsc::Sender<Message>,
    pub main_rx: Mutex<mpsc::Receiver<Message>>,

    /// Wakes `run`'s dispatch loop so it can return once `resign` has been
    /// called. Buffers a single permit (`notify_one`) so a `resign` that
    /// races ahead of `run` starting its wait is never lost.
    pub shutdown: Notify,

    pub tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A handle to one fleet member. Cheap to clone; every clone refers to the
/// same underlying engine state.
#[derive(Clone)]
pub struct Member {
    pub(crate) inner: Arc<Inner>,
}

impl Member {
    /// Creates a member that has not yet listened, discovered, or joined
    /// anything. `rank` must be unique fleet-wide; `external_address` is the
    /// address other members should dial to reach this one (spec §3,
    /// "external_address vs. bind address").
    pub fn new(rank: i64, external_address: impl Into<String>, callsign: impl Into<String>, config: EngineConfig) -> Self {
        let (election_tx, election_rx) = mpsc::channel(32);
        let (main_tx, main_rx) = mpsc::channel(256);
        Member {
            inner: Arc::new(Inner {
                rank,
                external_address: external_address.into(),
                callsign: callsign.into(),
                config,
                registry: PeerRegistry::new(),
                leader: Mutex::new(LeaderState {
                    // No leader has been observed yet. Using a sentinel below
                    // any real rank (rather than `rank` itself) is what lets
                    // `set_leader`'s monotonic guard accept this member's own
                    // first victory announcement.
                    leader_rank: i64::MIN,
                    leader_address: String::new(),
                    leader_payload: None,
                    local_payload: None,
                }),
                ready: AtomicBool::new(false),
                promoted: Mutex::new(None),
                demoted: Mutex::new(None),
                election_tx,
                election_rx: Mutex::new(election_rx),
                main_tx,
                main_rx: Mutex::new(main_rx),
                shutdown: Notify::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn rank(&self) -> i64 {
        self.inner.rank
    }

    pub fn external_address(&self) -> &str {
        &self.inner.external_address
    }

    /// Spawns `work_fn` (if given) and then dispatches the main receive
    /// channel until [`Member::resign`] is called, mirroring
    /// `original_source/pkg/navy/engine.go`'s `Run`: a host-supplied
    /// goroutine alongside the `for msg := range c.receiveChan` loop.
    ///
    /// If this member hasn't already been marked ready by a prior
    /// [`Member::discover`]/[`Member::discover_with_backoff`] call, it is
    /// marked ready here and an initial election is run — this is the
    /// "solo-ready" bootstrap path (spec §8): with no peers registered,
    /// `elect`'s broadcast is a no-op and it wins immediately. A member that
    /// already discovered a leader before calling `run` skips this and goes
    /// straight to dispatching, since it already knows who's in charge.
    pub async fn run(&self, work_fn: Option<WorkFn>) -> Result<()> {
        if let Some(work_fn) = work_fn {
            let task = tokio::spawn(work_fn);
            self.inner.tasks.lock().await.push(task);
        }

        if !self.inner.ready.swap(true, Ordering::AcqRel) {
            self.elect().await;
        }

        let mut main_rx = self.inner.main_rx.lock().await;
        loop {
            tokio::select! {
                msg = main_rx.recv() => {
                    match msg {
                        Some(msg) => self.dispatch_main(msg).await,
                        None => break,
                    }
                }
                _ = self.inner.shutdown.notified() => break,
            }
        }

        Ok(())
    }

    /// The address other members believe is the current leader's, or the
    /// empty string before any leader has ever been set.
    pub async fn leader_address(&self) -> String {
        self.inner.leader.lock().await.leader_address.clone()
    }

    pub async fn leader_rank(&self) -> i64 {
        self.inner.leader.lock().await.leader_rank
    }

    pub async fn get_leader_payload(&self) -> Option<Vec<u8>> {
        self.inner.leader.lock().await.leader_payload.clone()
    }

    /// Sets the payload this member will advertise if and when it becomes
    /// leader. Does not itself trigger an announcement — the new payload is
    /// picked up the next time this member wins an election.
    pub async fn set_payload(&self, payload: Option<Vec<u8>>) {
        self.inner.leader.lock().await.local_payload = payload;
    }

    pub async fn on_promotion(&self, callback: Callback) {
        *self.inner.promoted.lock().await = Some(callback);
    }

    pub async fn on_demotion(&self, callback: Callback) {
        *self.inner.demoted.lock().await = Some(callback);
    }

    /// Leaves the fleet: best-effort `CLOSE` to every known peer, then tears
    /// down the registry and aborts the listener/decoder tasks (spec §4.C,
    /// "resign"; the exact ordering — notify peers, then close channels,
    /// then stop tasks — is this engine's Open Question resolution, chosen
    /// so peers never see this member's decode tasks vanish before its
    /// `CLOSE` frames arrive).
    pub async fn resign(&self) -> Result<()> {
        tracing::info!(rank = self.inner.rank, "resigning from fleet");
        let close = Message::new(MessageType::Close, self.inner.rank, self.inner.external_address.clone(), self.inner.callsign.clone());
        for peer in self.inner.registry.snapshot().await {
            let _ = self.inner.registry.write(peer.rank, close.clone()).await;
            self.inner.registry.delete(peer.rank).await;
        }

        self.inner.ready.store(false, Ordering::Release);
        self.inner.shutdown.notify_one();

        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }

        Ok(())
    }
}
