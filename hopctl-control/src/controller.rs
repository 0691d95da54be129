use std::future::Future;

use hopctl_tc::{PlanMode, QueueBackend};
use hopctl_transport::{Inbox, Push};

use crate::{
    admission::AdmissionCalculator,
    config::{Role, Topology},
    estimator::{CapacityEstimator, MeasurementSource},
    plan::PlanBuilder,
    register::Register,
    sync::{DistributeReport, SyncProtocol, SyncState},
    throughput::{harvest, CounterSource, ThroughputTracker},
    Error,
};

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Plans received from peers and applied.
    pub received: usize,
    /// Snapshots turned into observed throughput.
    pub observed: usize,
    /// Whether a snapshot was harvested and reported to the authority.
    pub reported: bool,
    /// Node-directions admitted this cycle.
    pub admitted: usize,
    pub distributed: Option<DistributeReport>,
}

/// The per-node control loop.
///
/// Every role receives and applies plans from its peers. A node with local counters harvests
/// them every cycle. The uplink-edge additionally estimates capacity, admits rates and
/// distributes the resulting plans.
#[derive(Debug)]
pub struct Controller<B, P, S, C> {
    topology: Topology,
    register: Register,
    estimator: CapacityEstimator<S>,
    admission: AdmissionCalculator,
    tracker: ThroughputTracker,
    counters: C,
    sync: SyncProtocol<B, P>,
    inbox: Inbox,
    /// Whether the initial plans have been distributed.
    bootstrapped: bool,
}

impl<B, P, S, C> Controller<B, P, S, C>
where
    B: QueueBackend,
    P: Push,
    S: MeasurementSource,
    C: CounterSource,
{
    pub fn new(
        topology: Topology,
        backend: B,
        push: P,
        source: S,
        counters: C,
        inbox: Inbox,
    ) -> Result<Self, Error> {
        let register = Register::new(topology.stability)?;
        let sync = SyncProtocol::new(topology.node.clone(), backend, push, topology.peers.clone());

        Ok(Self {
            admission: AdmissionCalculator::from_topology(&topology),
            estimator: CapacityEstimator::new(source),
            tracker: ThroughputTracker::new(),
            register,
            counters,
            sync,
            inbox,
            topology,
            bootstrapped: false,
        })
    }

    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    pub const fn register(&self) -> &Register {
        &self.register
    }

    pub const fn sync(&self) -> &SyncProtocol<B, P> {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut SyncProtocol<B, P> {
        &mut self.sync
    }

    /// Run one full cycle. Every failure is contained within the cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.sync.receive(&self.inbox) {
            Ok(applied) => report.received = applied.len(),
            Err(e) => tracing::error!(error = %e, "failed to apply received plans"),
        }

        for snapshot in self.inbox.take_snapshots() {
            if !self.tracker.observe(snapshot, &mut self.register).is_empty() {
                report.observed += 1;
            }
        }

        if !self.topology.counters.is_empty() {
            let snapshot = harvest(&self.topology.node, &self.topology.counters, &self.counters);
            if self.topology.is_authority() {
                if !self.tracker.observe(snapshot, &mut self.register).is_empty() {
                    report.observed += 1;
                }
            } else {
                report.reported = self.sync.report(&self.topology.authority, snapshot).await;
            }
        }

        if self.topology.role == Role::UplinkEdge {
            self.compute(&mut report).await;
        }

        tracing::debug!(?report, "cycle complete");

        report
    }

    async fn compute(&mut self, report: &mut CycleReport) {
        if let Err(e) = self.sync.transition(SyncState::Computing) {
            tracing::error!(error = %e, "cannot start computing");
            return;
        }

        if let Err(e) = self.estimator.estimate(&self.topology.links, &mut self.register) {
            tracing::warn!(error = %e, "measurements not ready, skipping allocation");
        } else {
            report.admitted = self.admission.run(&self.topology, &mut self.register).len();
        }

        let builder = PlanBuilder::new(&self.topology);
        let plans = if !self.bootstrapped {
            builder.initial()
        } else if report.admitted > 0 {
            builder.from_register(&self.register, PlanMode::Update)
        } else {
            Vec::new()
        };

        if plans.is_empty() {
            // Nothing new to hand out.
            let _ = self.sync.transition(SyncState::Idle);
            return;
        }

        match self.sync.distribute(plans).await {
            Ok(distributed) => {
                self.bootstrapped = true;
                report.distributed = Some(distributed);
            }
            Err(e) => tracing::error!(error = %e, "failed to distribute plans"),
        }
    }

    /// Run cycles back to back, sleeping for the period in between, until `shutdown` resolves.
    ///
    /// Shutdown is only observed between cycles.
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);

        tracing::info!(
            node = %self.topology.node,
            role = ?self.topology.role,
            period = ?self.topology.period,
            "control loop started"
        );

        loop {
            self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.topology.period) => {}
                _ = &mut shutdown => {
                    tracing::info!("shutting down");
                    break;
                }
            }
        }
    }
}
