//! End-to-end scenarios over real loopback TCP (spec §8).

use std::time::Duration;

use navy::{EngineConfig, Member, PeerInfo};
use tokio::net::TcpListener;
use tokio::time::sleep;

/// A config with short timeouts so these tests don't sit around waiting on
/// the (generous) production defaults.
fn fast_config() -> EngineConfig {
    EngineConfig {
        max_retries: 3,
        election_timeout: Duration::from_millis(80),
        ok_delivery_timeout: Duration::from_millis(30),
        send_retry_gap: Duration::from_millis(5),
        ..EngineConfig::default()
    }
}

/// Grabs a free loopback port without holding the socket open, for use as
/// both a member's external address and its listen address.
async fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

#[tokio::test]
async fn solo_member_elects_itself() {
    let addr = free_addr().await;
    let member = Member::new(1, addr.clone(), "alpha", fast_config());
    member.listen(&addr).await.unwrap();
    let runner = member.clone();
    let run_task = tokio::spawn(async move { runner.run(None).await });
    sleep(Duration::from_millis(150)).await;

    assert_eq!(member.leader_rank().await, 1);
    assert_eq!(member.leader_address().await, addr);

    member.resign().await.unwrap();
    run_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn two_members_converge_on_the_same_leader() {
    let addr_a = free_addr().await;
    let addr_b = free_addr().await;

    let a = Member::new(5, addr_a.clone(), "alpha", fast_config());
    a.listen(&addr_a).await.unwrap();
    let a_runner = a.clone();
    tokio::spawn(async move { a_runner.run(None).await });
    sleep(Duration::from_millis(120)).await;

    let b = Member::new(3, addr_b.clone(), "alpha", fast_config());
    b.listen(&addr_b).await.unwrap();
    b.discover(&[addr_a.clone()]).await.unwrap();
    let b_runner = b.clone();
    tokio::spawn(async move { b_runner.run(None).await });

    sleep(Duration::from_millis(200)).await;

    assert_eq!(a.leader_rank().await, 5);
    assert_eq!(b.leader_rank().await, 5);
    assert_eq!(b.leader_address().await, addr_a);

    a.resign().await.unwrap();
    b.resign().await.unwrap();
}

#[tokio::test]
async fn discovery_rejects_a_mismatched_callsign() {
    let addr_a = free_addr().await;
    let addr_b = free_addr().await;

    let a = Member::new(1, addr_a.clone(), "fleet-alpha", fast_config());
    a.listen(&addr_a).await.unwrap();
    let a_runner = a.clone();
    tokio::spawn(async move { a_runner.run(None).await });
    sleep(Duration::from_millis(100)).await;

    let b = Member::new(2, addr_b.clone(), "fleet-bravo", fast_config());
    b.listen(&addr_b).await.unwrap();

    let err = b.discover(&[addr_a.clone()]).await.unwrap_err();
    assert!(matches!(err, navy::Error::CallsignMismatch));

    a.resign().await.unwrap();
}

#[tokio::test]
async fn losing_the_leader_triggers_reelection() {
    let addr_a = free_addr().await;
    let addr_b = free_addr().await;
    let addr_c = free_addr().await;

    let a = Member::new(5, addr_a.clone(), "alpha", fast_config());
    a.listen(&addr_a).await.unwrap();
    let a_runner = a.clone();
    tokio::spawn(async move { a_runner.run(None).await });
    sleep(Duration::from_millis(120)).await;

    let b = Member::new(3, addr_b.clone(), "alpha", fast_config());
    b.listen(&addr_b).await.unwrap();
    b.discover(&[addr_a.clone()]).await.unwrap();
    let b_runner = b.clone();
    tokio::spawn(async move { b_runner.run(None).await });
    sleep(Duration::from_millis(150)).await;

    let c = Member::new(1, addr_c.clone(), "alpha", fast_config());
    c.listen(&addr_c).await.unwrap();
    c.discover(&[addr_a.clone()]).await.unwrap();
    let c_runner = c.clone();
    tokio::spawn(async move { c_runner.run(None).await });
    sleep(Duration::from_millis(150)).await;

    assert_eq!(a.leader_rank().await, 5);
    assert_eq!(b.leader_rank().await, 5);
    assert_eq!(c.leader_rank().await, 5);

    a.resign().await.unwrap();
    sleep(Duration::from_millis(400)).await;

    assert_eq!(b.leader_rank().await, 3);
    assert_eq!(c.leader_rank().await, 3);

    b.resign().await.unwrap();
    c.resign().await.unwrap();
}

#[tokio::test]
async fn connect_dials_static_peers_up_front() {
    let addr_a = free_addr().await;
    let addr_b = free_addr().await;

    let a = Member::new(1, addr_a.clone(), "alpha", fast_config());
    a.listen(&addr_a).await.unwrap();
    let a_runner = a.clone();
    tokio::spawn(async move { a_runner.run(None).await });

    let b = Member::new(2, addr_b.clone(), "alpha", fast_config());
    b.listen(&addr_b).await.unwrap();

    // A self-entry must be skipped rather than B dialing itself.
    b.connect(&[
        PeerInfo { rank: 1, address: addr_a.clone(), ready: true },
        PeerInfo { rank: 2, address: addr_b.clone(), ready: true },
    ])
    .await
    .unwrap();

    // Proof the static connection actually landed in B's registry: B's
    // election broadcast reaches A and A ends up conceding the victory,
    // which is only possible over a connection `connect` established.
    let b_runner = b.clone();
    tokio::spawn(async move { b_runner.run(None).await });
    sleep(Duration::from_millis(220)).await;

    assert_eq!(b.leader_rank().await, 2);
    assert_eq!(a.leader_rank().await, 2);

    a.resign().await.unwrap();
    b.resign().await.unwrap();
}

#[tokio::test]
async fn a_member_can_set_and_advertise_a_payload() {
    let addr_a = free_addr().await;
    let addr_b = free_addr().await;

    let a = Member::new(9, addr_a.clone(), "alpha", fast_config());
    a.set_payload(Some(b"vip=10.0.0.9".to_vec())).await;
    a.listen(&addr_a).await.unwrap();
    let a_runner = a.clone();
    tokio::spawn(async move { a_runner.run(None).await });
    sleep(Duration::from_millis(120)).await;

    let b = Member::new(4, addr_b.clone(), "alpha", fast_config());
    b.listen(&addr_b).await.unwrap();
    b.discover(&[addr_a.clone()]).await.unwrap();

    sleep(Duration::from_millis(150)).await;
    assert_eq!(b.get_leader_payload().await, Some(b"vip=10.0.0.9".to_vec()));

    a.resign().await.unwrap();
}
