//! Cross-node plan synchronization.
//!
//! ```text
//!            compute        distribute         apply owned
//!   IDLE ───────────▶ COMPUTING ─────▶ DISTRIBUTING ─────▶ APPLYING
//!    ▲ ▲                  │                  │                 │
//!    │ └──────────────────┘ (skipped)        │ (nothing owned) │
//!    │ ◀─────────────────────────────────────┘                 │
//!    └─────────────────────────────────────────────────────────┘
//!
//!   IDLE ──▶ APPLYING ──▶ IDLE      (plans received from a peer)
//! ```

use std::{collections::BTreeMap, fmt, net::SocketAddr};

use hopctl_common::NodeId;
use hopctl_tc::{apply_plan, ApplyReport, PlanKey, PlanMode, QueueBackend, QueuePlan};
use hopctl_transport::{Inbox, Push};
use hopctl_wire::{Envelope, MeasurementSnapshot, Payload};
use rustc_hash::FxHashSet;

/// Phase of the synchronization protocol on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Waiting for the next cycle or for incoming plans.
    Idle,
    /// The authority is running admission and lowering plans.
    Computing,
    /// Plans are being pushed to their owners.
    Distributing,
    /// Owned plans are being applied to the local queues.
    Applying,
}

impl SyncState {
    /// Whether `self -> to` is a legal transition.
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::Computing | Self::Applying) |
                (Self::Computing, Self::Distributing | Self::Idle) |
                (Self::Distributing, Self::Applying | Self::Idle) |
                (Self::Applying, Self::Idle)
        )
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Computing => "COMPUTING",
            Self::Distributing => "DISTRIBUTING",
            Self::Applying => "APPLYING",
        };
        f.write_str(s)
    }
}

/// A transition rejected by [`SyncState::can_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal sync transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: SyncState,
    pub to: SyncState,
}

/// Outcome of one distribution round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributeReport {
    /// Plans applied on this node.
    pub applied: usize,
    /// Plans delivered to their owner.
    pub pushed: usize,
    /// Plans that could not be delivered.
    pub failed: usize,
}

/// Applies the plans this node owns, and hands every other plan to its owner.
#[derive(Debug)]
pub struct SyncProtocol<B, P> {
    node: NodeId,
    state: SyncState,
    backend: B,
    push: P,
    peers: BTreeMap<NodeId, SocketAddr>,
    /// Interface groups whose scaffolding has been fully established by this process.
    initialized: FxHashSet<PlanKey>,
}

impl<B, P> SyncProtocol<B, P>
where
    B: QueueBackend,
    P: Push,
{
    pub fn new(node: NodeId, backend: B, push: P, peers: BTreeMap<NodeId, SocketAddr>) -> Self {
        Self {
            node,
            state: SyncState::Idle,
            backend,
            push,
            peers,
            initialized: FxHashSet::default(),
        }
    }

    pub const fn state(&self) -> SyncState {
        self.state
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Move to `to`, or log and reject an illegal transition.
    pub fn transition(&mut self, to: SyncState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition(to) {
            let err = IllegalTransition { from: self.state, to };
            tracing::warn!(%err, "rejected sync transition");
            return Err(err);
        }

        tracing::trace!(from = %self.state, %to, "sync transition");
        self.state = to;

        Ok(())
    }

    /// Apply every plan waiting in `inbox` that this node owns.
    pub fn receive(&mut self, inbox: &Inbox) -> Result<Vec<ApplyReport>, IllegalTransition> {
        let plans = inbox.take_plans();
        if plans.is_empty() {
            return Ok(Vec::new());
        }

        self.transition(SyncState::Applying)?;

        let mut reports = Vec::with_capacity(plans.len());
        for plan in plans {
            if plan.owner != self.node {
                tracing::warn!(owner = %plan.owner, "ignoring plan addressed to another node");
                continue;
            }

            tracing::info!(direction = %plan.direction, mode = ?plan.mode, "applying plan");
            reports.push(self.apply_local(plan));
        }

        self.transition(SyncState::Idle)?;

        Ok(reports)
    }

    /// Push every plan owned by a peer, then apply the ones owned by this node.
    ///
    /// Must be called while [`SyncState::Computing`]. Leaves the protocol idle.
    pub async fn distribute(
        &mut self,
        plans: Vec<QueuePlan>,
    ) -> Result<DistributeReport, IllegalTransition> {
        self.transition(SyncState::Distributing)?;

        let (owned, remote): (Vec<_>, Vec<_>) =
            plans.into_iter().partition(|plan| plan.owner == self.node);

        let mut report = DistributeReport::default();
        for plan in remote {
            let owner = plan.owner.clone();
            let Some(peer) = self.peers.get(&owner).copied() else {
                tracing::error!(%owner, "no peer address, dropping plan");
                report.failed += 1;
                continue;
            };

            let envelope = Envelope::new(self.node.clone(), Payload::Plan(plan));
            match self.push.push(peer, &envelope).await {
                Ok(()) => {
                    tracing::info!(%owner, %peer, sequence = envelope.sequence, "pushed plan");
                    report.pushed += 1;
                }
                Err(e) => {
                    tracing::error!(%owner, %peer, error = %e, "failed to push plan, dropping");
                    report.failed += 1;
                }
            }
        }

        if !owned.is_empty() {
            self.transition(SyncState::Applying)?;
            for plan in owned {
                self.apply_local(plan);
                report.applied += 1;
            }
        }

        self.transition(SyncState::Idle)?;

        Ok(report)
    }

    /// Forward a measurement snapshot to `authority`. Failures are logged and dropped.
    pub async fn report(&self, authority: &NodeId, snapshot: MeasurementSnapshot) -> bool {
        let Some(peer) = self.peers.get(authority).copied() else {
            tracing::error!(%authority, "no peer address for the authority");
            return false;
        };

        let envelope = Envelope::new(self.node.clone(), Payload::Snapshot(snapshot));
        match self.push.push(peer, &envelope).await {
            Ok(()) => {
                tracing::debug!(%authority, sequence = envelope.sequence, "reported snapshot");
                true
            }
            Err(e) => {
                tracing::error!(%authority, error = %e, "failed to report snapshot");
                false
            }
        }
    }

    /// Apply a plan owned by this node. An update for a group that has not been initialized by
    /// this process is applied as an initialization.
    fn apply_local(&mut self, plan: QueuePlan) -> ApplyReport {
        let key = plan.key();
        let plan = if plan.mode == PlanMode::Update && !self.initialized.contains(&key) {
            tracing::info!(direction = %plan.direction, "promoting update to initialize");
            plan.with_mode(PlanMode::Initialize)
        } else {
            plan
        };

        let report = apply_plan(&mut self.backend, &plan);
        if plan.mode == PlanMode::Initialize {
            if report.is_complete() {
                self.initialized.insert(key);
            } else {
                // Retry the scaffolding with the next plan.
                self.initialized.remove(&key);
            }
        }

        report
    }
}
