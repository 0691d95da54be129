use std::{net::SocketAddr, time::Duration};

use hopctl_common::{Direction, NodeId};
use hopctl_tc::{PlanMode, QueuePlan, ShapedInterface};
use hopctl_transport::{Inbox, Listener, Push, PushOptions, TcpPush, TransportError};
use hopctl_wire::{Envelope, MeasurementSnapshot, Payload};

fn plan(ceiling_kbps: u64) -> Payload {
    Payload::Plan(QueuePlan {
        owner: NodeId::new("n3"),
        direction: Direction::Downlink,
        mode: PlanMode::Update,
        interfaces: vec![ShapedInterface::new("eth0").with_shaping("ifb0")],
        ceiling_kbps,
        classes: vec![],
    })
}

fn fast_options() -> PushOptions {
    PushOptions {
        timeout: Duration::from_secs(2),
        retries: 2,
        backoff: Duration::from_millis(10),
    }
}

/// Waits until the inbox holds something, or gives up after a second.
async fn settle(inbox: &Inbox) {
    for _ in 0..100 {
        if !inbox.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn push_lands_in_inbox() {
    let _ = tracing_subscriber::fmt::try_init();

    let inbox = Inbox::new();
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), inbox.clone()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    listener.spawn();

    let push = TcpPush::new(fast_options());
    push.push(addr, &Envelope::new(NodeId::new("n0"), plan(1_000))).await.unwrap();

    settle(&inbox).await;
    let plans = inbox.take_plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].ceiling_kbps, 1_000);
    assert_eq!(plans[0].owner, NodeId::new("n3"));
}

#[tokio::test]
async fn stale_push_is_dropped_by_receiver() {
    let _ = tracing_subscriber::fmt::try_init();

    let inbox = Inbox::new();
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), inbox.clone()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    listener.spawn();

    let push = TcpPush::new(fast_options());
    let sender = NodeId::new("n0");
    push.push(addr, &Envelope::new(sender.clone(), plan(2_000)).with_sequence(200)).await.unwrap();
    settle(&inbox).await;

    // Delivered, but older than what the receiver already accepted.
    push.push(addr, &Envelope::new(sender, plan(1_000)).with_sequence(100)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let plans = inbox.take_plans();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].ceiling_kbps, 2_000);
}

#[tokio::test]
async fn snapshots_and_plans_are_kept_apart() {
    let _ = tracing_subscriber::fmt::try_init();

    let inbox = Inbox::new();
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), inbox.clone()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    listener.spawn();

    let push = TcpPush::new(fast_options());
    let snapshot = MeasurementSnapshot {
        node: NodeId::new("n3"),
        taken_at_micros: 5,
        counters: vec![],
    };
    push.push(addr, &Envelope::new(NodeId::new("n3"), Payload::Snapshot(snapshot.clone())))
        .await
        .unwrap();
    settle(&inbox).await;

    assert!(inbox.take_plans().is_empty());
    assert_eq!(inbox.take_snapshots(), vec![snapshot]);
}

#[tokio::test]
async fn unreachable_peer_exhausts_retries() {
    let _ = tracing_subscriber::fmt::try_init();

    // Bind and immediately drop to get a port nobody listens on.
    let addr: SocketAddr = {
        let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap()
    };

    let push = TcpPush::new(fast_options());
    let err = push.push(addr, &Envelope::new(NodeId::new("n0"), plan(1))).await.unwrap_err();

    match err {
        TransportError::Exhausted { peer, attempts, .. } => {
            assert_eq!(peer, addr);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}
