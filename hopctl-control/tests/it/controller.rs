use std::{future, net::SocketAddr};

use hopctl_common::{Direction, NodeId};
use hopctl_control::{Config, Controller, Entity, Metric, Topology};
use hopctl_tc::{PlanMode, QueuePlan, RecordingBackend};
use hopctl_transport::Inbox;
use hopctl_wire::{Envelope, InterfaceCounter, MeasurementSnapshot, Payload};

use crate::{FixedCounters, FixedReadings, RecordingPush};

const AUTHORITY: &str = r#"
node: n0
role: uplink-edge
authority: n0
stability: 2
floor_kbps: 10
peers:
  n3: 127.0.0.1:7603
links:
  - id: l0
    members:
      - { node: n1, direction: uplink }
      - { node: n2, direction: uplink }
nodes:
  - { id: n0, uplink_kbps: 0, downlink_kbps: 0 }
  - { id: n1, uplink_kbps: 300, downlink_kbps: 100 }
  - { id: n2, uplink_kbps: 700, downlink_kbps: 100 }
  - { id: n3, uplink_kbps: 0, downlink_kbps: 0 }
shaping:
  - owner: n3
    direction: uplink
    interfaces:
      - { device: eth1 }
    classes:
      - { node: n1, subnet: 10.1.0.0/24, mark: 11 }
      - { node: n2, subnet: 10.2.0.0/24, mark: 12 }
  - owner: n0
    direction: downlink
    interfaces:
      - { device: eth0, shaping: ifb0 }
    classes:
      - { node: n1, subnet: 10.1.0.0/24, mark: 21 }
      - { node: n2, subnet: 10.2.0.0/24, mark: 22 }
"#;

fn topology(raw: &str) -> Topology {
    Config::from_yaml(raw).unwrap().validate().unwrap()
}

type TestController = Controller<RecordingBackend, RecordingPush, FixedReadings, FixedCounters>;

fn controller(raw: &str) -> (TestController, RecordingPush, FixedReadings, FixedCounters, Inbox) {
    let push = RecordingPush::default();
    let readings = FixedReadings::default();
    let counters = FixedCounters::default();
    let inbox = Inbox::new();

    let controller = Controller::new(
        topology(raw),
        RecordingBackend::new(),
        push.clone(),
        readings.clone(),
        counters.clone(),
        inbox.clone(),
    )
    .unwrap();

    (controller, push, readings, counters, inbox)
}

fn pushed_plans(push: &RecordingPush) -> Vec<QueuePlan> {
    push.sent()
        .into_iter()
        .filter_map(|(_, envelope)| match envelope.payload {
            Payload::Plan(plan) => Some(plan),
            Payload::Snapshot(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn uplink_edge_bootstraps_then_admits() {
    let _ = tracing_subscriber::fmt::try_init();

    let (mut controller, push, readings, _, _) = controller(AUTHORITY);
    readings.set("l0", 1_000_000.0, 1_000_000.0);

    // First cycle: one capacity sample, not stable yet. Plans come from the guarantees.
    let report = controller.run_cycle().await;
    assert_eq!(report.admitted, 0);
    let distributed = report.distributed.unwrap();
    assert_eq!((distributed.applied, distributed.pushed, distributed.failed), (1, 1, 0));

    let plans = pushed_plans(&push);
    assert_eq!(plans[0].mode, PlanMode::Initialize);
    assert_eq!(plans[0].owner, NodeId::new("n3"));
    assert_eq!(plans[0].classes[0].rate_kbps, 300);
    assert_eq!(plans[0].classes[1].rate_kbps, 700);

    // Second cycle: C = 2000, margins 1000 / 2000, flux 300 / 700.
    let report = controller.run_cycle().await;
    assert_eq!(report.admitted, 2);

    let plans = pushed_plans(&push);
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[1].mode, PlanMode::Update);
    assert_eq!(plans[1].classes[0].rate_kbps, 600);
    assert_eq!(plans[1].classes[1].rate_kbps, 1_400);
    assert_eq!(plans[1].ceiling_kbps, 2_000);

    let n1 = Entity::Node(NodeId::new("n1"));
    assert_eq!(controller.register().last(Metric::Admitted(Direction::Uplink), &n1), 600.0);

    // The locally owned downlink group was initialized once, then only updated.
    let local = controller.sync().backend().directives();
    let scaffolding = local.iter().filter(|d| d.is_scaffolding()).count();
    // Redirect, reset, two class adds, aggregate add and two subnet matches on the ifb.
    assert_eq!(scaffolding, 7);
    assert!(local.iter().all(|d| d.device() == "eth0" || d.device() == "ifb0"));
}

#[tokio::test]
async fn missing_measurements_skip_allocation() {
    let _ = tracing_subscriber::fmt::try_init();

    let (mut controller, push, readings, _, _) = controller(AUTHORITY);

    // The bootstrap plans go out even though nothing could be measured.
    let report = controller.run_cycle().await;
    assert!(report.distributed.is_some());

    readings.set("l0", 1_000_000.0, 1_000_000.0);
    controller.run_cycle().await;
    readings.clear();

    let report = controller.run_cycle().await;
    assert_eq!(report.admitted, 0);
    assert!(report.distributed.is_none());
    assert_eq!(pushed_plans(&push).len(), 1);

    let l0 = Entity::Link(hopctl_common::LinkId::new("l0"));
    assert_eq!(controller.register().len(Metric::DynamicCapacity, &l0), 1);
}

#[tokio::test]
async fn downlink_edge_reports_counters_to_the_authority() {
    let _ = tracing_subscriber::fmt::try_init();

    let raw = r#"
node: n3
role: downlink-edge
authority: n0
peers:
  n0: 127.0.0.1:7600
counters:
  - { node: n1, direction: uplink, device: eth1, counter: rx }
"#;
    let (mut controller, push, _, counters, _) = controller(raw);
    counters.set("eth1", 4_096);

    let report = controller.run_cycle().await;
    assert!(report.reported);
    assert!(report.distributed.is_none());

    let sent = push.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "127.0.0.1:7600".parse::<SocketAddr>().unwrap());
    let Payload::Snapshot(ref snapshot) = sent[0].1.payload else { panic!("expected a snapshot") };
    assert_eq!(snapshot.node, NodeId::new("n3"));
    assert_eq!(snapshot.counters[0].bytes, 4_096);
}

#[tokio::test]
async fn authority_turns_reported_snapshots_into_observed_throughput() {
    let _ = tracing_subscriber::fmt::try_init();

    let raw = r#"
node: n0
role: uplink-edge
authority: n0
nodes:
  - { id: n1, uplink_kbps: 100, downlink_kbps: 100 }
"#;
    let (mut controller, _, _, _, inbox) = controller(raw);

    let snapshot = |at_secs: u64, bytes: u64| MeasurementSnapshot {
        node: NodeId::new("n3"),
        taken_at_micros: at_secs * 1_000_000,
        counters: vec![InterfaceCounter {
            node: NodeId::new("n1"),
            direction: Direction::Uplink,
            device: "eth1".to_owned(),
            bytes,
        }],
    };
    let sender = NodeId::new("n3");

    inbox.deposit(
        Envelope::new(sender.clone(), Payload::Snapshot(snapshot(100, 0))).with_sequence(1),
    );
    assert_eq!(controller.run_cycle().await.observed, 0);

    inbox.deposit(
        Envelope::new(sender, Payload::Snapshot(snapshot(110, 1_250_000))).with_sequence(2),
    );
    assert_eq!(controller.run_cycle().await.observed, 1);

    let n1 = Entity::Node(NodeId::new("n1"));
    assert_eq!(controller.register().last(Metric::Observed(Direction::Uplink), &n1), 1_000.0);
}

#[tokio::test]
async fn interior_node_applies_received_plans() {
    let _ = tracing_subscriber::fmt::try_init();

    let raw = r#"
node: n3
role: interior
authority: n0
"#;
    let (mut controller, push, _, _, inbox) = controller(raw);

    let (authority, _, _, _, _) = self::controller(AUTHORITY);
    let plan = hopctl_control::PlanBuilder::new(authority.topology())
        .from_register(authority.register(), PlanMode::Update)
        .into_iter()
        .find(|plan| plan.owner == NodeId::new("n3"))
        .unwrap();
    inbox.deposit(Envelope::new(NodeId::new("n0"), Payload::Plan(plan)));

    let report = controller.run_cycle().await;
    assert_eq!(report.received, 1);
    assert!(push.sent().is_empty());

    // Promoted to an initialization on first receipt.
    let directives = controller.sync().backend().directives();
    assert!(directives.iter().any(|d| d.is_scaffolding()));
    assert!(directives.iter().all(|d| d.device() == "eth1"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_is_observed_between_cycles() {
    let (mut controller, push, _, _, _) = controller(AUTHORITY);

    controller.run_until(future::ready(())).await;

    // Exactly one cycle ran: the bootstrap push.
    assert_eq!(pushed_plans(&push).len(), 1);
}
