use std::collections::BTreeMap;

use hopctl_common::{Direction, NodeId};
use hopctl_control::{SyncProtocol, SyncState};
use hopctl_tc::{
    ClassId, ClassOp, Directive, PlanMode, QueuePlan, RateClass, RecordingBackend, ShapedInterface,
};
use hopctl_transport::Inbox;
use hopctl_wire::{Envelope, Payload};

use crate::RecordingPush;

fn plan(owner: &str, device: &str, mode: PlanMode, rate_kbps: u64) -> QueuePlan {
    QueuePlan {
        owner: NodeId::new(owner),
        direction: Direction::Uplink,
        mode,
        interfaces: vec![ShapedInterface::new(device)],
        ceiling_kbps: rate_kbps,
        classes: vec![RateClass {
            id: ClassId::for_index(0),
            node: NodeId::new("n1"),
            subnet: "10.1.0.0/24".parse().unwrap(),
            mark: 11,
            rate_kbps,
            ceil_kbps: rate_kbps,
        }],
    }
}

fn peers() -> BTreeMap<NodeId, std::net::SocketAddr> {
    let mut peers = BTreeMap::new();
    peers.insert(NodeId::new("n2"), "10.0.0.2:7600".parse().unwrap());
    peers.insert(NodeId::new("n3"), "10.0.0.3:7600".parse().unwrap());
    peers
}

#[tokio::test]
async fn uplink_edge_applies_owned_plans_and_pushes_the_rest() {
    let _ = tracing_subscriber::fmt::try_init();

    let push = RecordingPush::default();
    let mut sync =
        SyncProtocol::new(NodeId::new("n0"), RecordingBackend::new(), push.clone(), peers());

    sync.transition(SyncState::Computing).unwrap();
    let report = sync
        .distribute(vec![
            plan("n0", "eth0", PlanMode::Initialize, 500),
            plan("n3", "eth1", PlanMode::Initialize, 600),
            plan("n2", "eth2", PlanMode::Initialize, 700),
        ])
        .await
        .unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(report.pushed, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(sync.state(), SyncState::Idle);

    // Only the owned plan reached the local backend.
    assert!(sync.backend().directives().iter().all(|d| d.device() == "eth0"));
    assert!(sync.backend().directives().contains(&Directive::Reset { device: "eth0".into() }));

    let sent = push.sent();
    assert_eq!(sent.len(), 2);
    for (peer, envelope) in sent {
        assert_eq!(envelope.sender, NodeId::new("n0"));
        let Payload::Plan(plan) = envelope.payload else { panic!("expected a plan") };
        assert_eq!(Some(&peer), peers().get(&plan.owner));
    }
}

#[tokio::test]
async fn push_failure_does_not_abort_distribution() {
    let _ = tracing_subscriber::fmt::try_init();

    let push = RecordingPush::default().unreachable("10.0.0.3:7600".parse().unwrap());
    let mut sync =
        SyncProtocol::new(NodeId::new("n0"), RecordingBackend::new(), push.clone(), peers());

    sync.transition(SyncState::Computing).unwrap();
    let report = sync
        .distribute(vec![
            plan("n3", "eth1", PlanMode::Update, 600),
            plan("n2", "eth2", PlanMode::Update, 700),
            plan("n0", "eth0", PlanMode::Update, 500),
            plan("n9", "eth9", PlanMode::Update, 500),
        ])
        .await
        .unwrap();

    assert_eq!(report, hopctl_control::DistributeReport { applied: 1, pushed: 1, failed: 2 });
    assert_eq!(push.sent().len(), 1);
    assert_eq!(sync.state(), SyncState::Idle);
}

#[tokio::test]
async fn distribute_outside_computing_is_rejected() {
    let mut sync = SyncProtocol::new(
        NodeId::new("n0"),
        RecordingBackend::new(),
        RecordingPush::default(),
        peers(),
    );

    let err = sync.distribute(vec![plan("n0", "eth0", PlanMode::Update, 1)]).await.unwrap_err();
    assert_eq!(err.from, SyncState::Idle);
    assert_eq!(err.to, SyncState::Distributing);
    assert!(sync.backend().directives().is_empty());
}

#[test]
fn received_update_is_promoted_until_the_group_is_initialized() {
    let _ = tracing_subscriber::fmt::try_init();

    let inbox = Inbox::new();
    let mut sync = SyncProtocol::new(
        NodeId::new("n3"),
        RecordingBackend::new(),
        RecordingPush::default(),
        peers(),
    );

    let sender = NodeId::new("n0");
    inbox.deposit(
        Envelope::new(sender.clone(), Payload::Plan(plan("n3", "eth1", PlanMode::Update, 600)))
            .with_sequence(1),
    );

    let reports = sync.receive(&inbox).unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_complete());

    let first = sync.backend_mut().take();
    assert!(first.contains(&Directive::Reset { device: "eth1".into() }));
    assert!(first.iter().any(|d| matches!(d, Directive::BindMark { mark: 11, .. })));

    // Consumed: nothing is re-applied.
    assert!(sync.receive(&inbox).unwrap().is_empty());

    inbox.deposit(
        Envelope::new(sender, Payload::Plan(plan("n3", "eth1", PlanMode::Update, 800)))
            .with_sequence(2),
    );
    sync.receive(&inbox).unwrap();

    let second = sync.backend_mut().take();
    assert!(second.iter().all(|d| !d.is_scaffolding()));
    assert!(second.iter().any(|d| matches!(
        d,
        Directive::InstallClass { op: ClassOp::Change, rate_kbps: 800, .. }
    )));
    assert_eq!(sync.state(), SyncState::Idle);
}

#[test]
fn failed_initialization_is_retried() {
    let inbox = Inbox::new();
    let backend = RecordingBackend::new().fail_device("eth1");
    let mut sync = SyncProtocol::new(NodeId::new("n3"), backend, RecordingPush::default(), peers());

    let sender = NodeId::new("n0");
    for sequence in 1..=2 {
        inbox.deposit(
            Envelope::new(sender.clone(), Payload::Plan(plan("n3", "eth1", PlanMode::Update, 600)))
                .with_sequence(sequence),
        );
        let reports = sync.receive(&inbox).unwrap();

        // Reset, aggregate class, subnet class and mark binding: the full initialization.
        assert_eq!(reports[0].failed, 4);
        assert_eq!(reports[0].applied, 0);
    }

    assert!(sync.backend().directives().is_empty());
}

#[test]
fn plans_for_other_nodes_are_not_applied() {
    let inbox = Inbox::new();
    let mut sync = SyncProtocol::new(
        NodeId::new("n3"),
        RecordingBackend::new(),
        RecordingPush::default(),
        peers(),
    );

    inbox.deposit(Envelope::new(
        NodeId::new("n0"),
        Payload::Plan(plan("n2", "eth2", PlanMode::Initialize, 600)),
    ));

    assert!(sync.receive(&inbox).unwrap().is_empty());
    assert!(sync.backend().directives().is_empty());
}
