use std::{collections::BTreeMap, sync::Arc};

use hopctl_common::NodeId;
use hopctl_tc::{PlanKey, QueuePlan};
use hopctl_wire::{Envelope, MeasurementSnapshot, Payload};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// What an envelope replaces when it is deposited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Slot {
    Plan { sender: NodeId, key: PlanKey },
    Snapshot { sender: NodeId },
}

impl Slot {
    fn of(envelope: &Envelope) -> Self {
        let sender = envelope.sender.clone();
        match envelope.payload {
            Payload::Plan(ref plan) => Self::Plan { sender, key: plan.key() },
            Payload::Snapshot(_) => Self::Snapshot { sender },
        }
    }
}

#[derive(Debug, Default)]
struct InboxState {
    /// Highest sequence accepted per slot. Survives draining so that late duplicates stay stale.
    accepted: FxHashMap<Slot, u64>,
    /// Envelopes not yet taken by the control loop. Last write wins per slot.
    pending: BTreeMap<Slot, Envelope>,
}

/// The local receiving end of the sync protocol.
///
/// Shared between the [`Listener`](crate::Listener) tasks that fill it and the control loop that
/// drains it.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    state: Arc<Mutex<InboxState>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposit an envelope. Returns `false` if it was dropped as stale, i.e. its sequence is not
    /// newer than the last envelope accepted for the same sender and target.
    pub fn deposit(&self, envelope: Envelope) -> bool {
        let slot = Slot::of(&envelope);
        let mut state = self.state.lock();

        if let Some(&last) = state.accepted.get(&slot) {
            if envelope.sequence <= last {
                tracing::debug!(
                    sender = %envelope.sender,
                    sequence = envelope.sequence,
                    last,
                    "dropping stale envelope"
                );
                return false;
            }
        }

        state.accepted.insert(slot.clone(), envelope.sequence);
        state.pending.insert(slot, envelope);

        true
    }

    /// Take every pending plan, removing it from the inbox.
    pub fn take_plans(&self) -> Vec<QueuePlan> {
        self.take(|payload| match payload {
            Payload::Plan(plan) => Ok(plan),
            other => Err(other),
        })
    }

    /// Take every pending measurement snapshot, removing it from the inbox.
    pub fn take_snapshots(&self) -> Vec<MeasurementSnapshot> {
        self.take(|payload| match payload {
            Payload::Snapshot(snapshot) => Ok(snapshot),
            other => Err(other),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    fn take<T>(&self, mut select: impl FnMut(Payload) -> Result<T, Payload>) -> Vec<T> {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending);

        let mut taken = Vec::new();
        for (slot, envelope) in pending {
            let Envelope { sender, sequence, payload } = envelope;
            match select(payload) {
                Ok(item) => taken.push(item),
                Err(payload) => {
                    state.pending.insert(slot, Envelope { sender, sequence, payload });
                }
            }
        }

        taken
    }
}
