use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
};

use hopctl_common::{unix_micros, Kbps, NodeDirection, NodeId};
use hopctl_wire::{InterfaceCounter, MeasurementSnapshot};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    config::CounterConfig,
    register::{Entity, Metric, Register},
};

/// Which byte counter of a device to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CounterKind {
    Rx,
    Tx,
}

impl CounterKind {
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Rx => "rx_bytes",
            Self::Tx => "tx_bytes",
        }
    }
}

/// Reads cumulative byte counters of local devices.
pub trait CounterSource {
    fn read(&self, device: &str, kind: CounterKind) -> io::Result<u64>;
}

/// Reads counters from `/sys/class/net/<device>/statistics`.
#[derive(Debug, Clone)]
pub struct SysfsCounters {
    root: PathBuf,
}

impl Default for SysfsCounters {
    fn default() -> Self {
        Self::new("/sys/class/net")
    }
}

impl SysfsCounters {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
}

impl CounterSource for SysfsCounters {
    fn read(&self, device: &str, kind: CounterKind) -> io::Result<u64> {
        let path = self.root.join(device).join("statistics").join(kind.file_name());
        let raw = fs::read_to_string(&path)?;

        raw.trim().parse().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("{}: {e}", path.display()))
        })
    }
}

/// Harvest every configured counter into a snapshot.
///
/// Unreadable counters are left out of the snapshot.
pub fn harvest<C: CounterSource + ?Sized>(
    node: &NodeId,
    counters: &[CounterConfig],
    source: &C,
) -> MeasurementSnapshot {
    let counters = counters
        .iter()
        .filter_map(|counter| match source.read(&counter.device, counter.counter) {
            Ok(bytes) => Some(InterfaceCounter {
                node: counter.node.clone(),
                direction: counter.direction,
                device: counter.device.clone(),
                bytes,
            }),
            Err(e) => {
                tracing::warn!(device = %counter.device, error = %e, "failed to read counter");
                None
            }
        })
        .collect();

    MeasurementSnapshot { node: node.clone(), taken_at_micros: unix_micros(), counters }
}

/// Turns successive snapshots of the same reporter into observed throughput.
#[derive(Debug, Default)]
pub struct ThroughputTracker {
    previous: FxHashMap<NodeId, MeasurementSnapshot>,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the throughput between the previous snapshot of the same reporter and `snapshot`
    /// under [`Metric::Observed`], and return it.
    ///
    /// The first snapshot of a reporter only primes the tracker. Snapshots that are not newer
    /// than the previous one are ignored. A member with any counter that went backwards is left
    /// out of this snapshot.
    pub fn observe(
        &mut self,
        snapshot: MeasurementSnapshot,
        register: &mut Register,
    ) -> BTreeMap<NodeDirection, Kbps> {
        let mut observed = BTreeMap::new();

        let Some(previous) = self.previous.get(&snapshot.node) else {
            self.previous.insert(snapshot.node.clone(), snapshot);
            return observed;
        };

        if snapshot.taken_at_micros <= previous.taken_at_micros {
            tracing::debug!(reporter = %snapshot.node, "ignoring out-of-order snapshot");
            return observed;
        }

        let elapsed_secs = (snapshot.taken_at_micros - previous.taken_at_micros) as f64 / 1e6;

        let mut bytes: BTreeMap<NodeDirection, u64> = BTreeMap::new();
        let mut reset = BTreeSet::new();
        for counter in &snapshot.counters {
            let before = previous.counters.iter().find(|c| {
                c.node == counter.node &&
                    c.direction == counter.direction &&
                    c.device == counter.device
            });
            let Some(before) = before else { continue };

            let member = NodeDirection::new(counter.node.clone(), counter.direction);
            if counter.bytes >= before.bytes {
                *bytes.entry(member).or_default() += counter.bytes - before.bytes;
            } else {
                tracing::debug!(%member, device = %counter.device, "counter reset");
                reset.insert(member);
            }
        }

        for (member, delta) in bytes {
            if reset.contains(&member) {
                continue;
            }

            let kbps = delta as f64 * 8.0 / 1_000.0 / elapsed_secs;
            let node = Entity::Node(member.node.clone());
            register.add(Metric::Observed(member.direction), node, kbps);
            tracing::debug!(%member, kbps, "observed throughput");
            observed.insert(member, kbps);
        }

        self.previous.insert(snapshot.node.clone(), snapshot);

        observed
    }
}
