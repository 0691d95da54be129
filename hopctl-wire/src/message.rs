use hopctl_common::{unix_micros, Direction, NodeId};
use hopctl_tc::QueuePlan;
use serde::{Deserialize, Serialize};

/// A raw interface byte counter, as harvested on the measuring node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCounter {
    /// The node whose aggregate traverses the device.
    pub node: NodeId,
    pub direction: Direction,
    pub device: String,
    /// Cumulative byte count since the device came up.
    pub bytes: u64,
}

/// A point-in-time harvest of a node's interface counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementSnapshot {
    pub node: NodeId,
    pub taken_at_micros: u64,
    pub counters: Vec<InterfaceCounter>,
}

/// The kind of a payload, also carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum PayloadKind {
    Plan = 1,
    Snapshot = 2,
}

impl PayloadKind {
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Plan),
            2 => Some(Self::Snapshot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "kebab-case")]
pub enum Payload {
    /// Apply this plan.
    Plan(QueuePlan),
    /// Here is a measurement snapshot.
    Snapshot(MeasurementSnapshot),
}

impl Payload {
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Self::Plan(_) => PayloadKind::Plan,
            Self::Snapshot(_) => PayloadKind::Snapshot,
        }
    }
}

/// A sequenced message from one peer to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: NodeId,
    /// Sender wall-clock time in microseconds. Receivers drop envelopes that are not newer than
    /// the last one accepted from the same sender for the same target.
    pub sequence: u64,
    pub payload: Payload,
}

impl Envelope {
    /// Creates a new envelope stamped with the current time.
    pub fn new(sender: NodeId, payload: Payload) -> Self {
        Self { sender, sequence: unix_micros(), payload }
    }

    /// Sets an explicit sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub const fn kind(&self) -> PayloadKind {
        self.payload.kind()
    }
}
