use std::{
    collections::VecDeque,
    fmt::{self, Display},
};

use hopctl_common::{Direction, LinkId, NodeId};
use rustc_hash::FxHashMap;

/// The quantities tracked over a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Estimated capacity of a link.
    DynamicCapacity,
    /// Rate most recently admitted for a node in one direction.
    Admitted(Direction),
    /// Throughput observed for a node in one direction.
    Observed(Direction),
}

impl Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DynamicCapacity => f.write_str("dynamic-capacity"),
            Self::Admitted(direction) => write!(f, "admitted-{direction}"),
            Self::Observed(direction) => write!(f, "observed-{direction}"),
        }
    }
}

/// What a series is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entity {
    /// A wireless link, for capacity series.
    Link(LinkId),
    /// A node, for per-direction rate series.
    Node(NodeId),
}

impl From<LinkId> for Entity {
    fn from(id: LinkId) -> Self {
        Self::Link(id)
    }
}

impl From<NodeId> for Entity {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(id) => write!(f, "link:{id}"),
            Self::Node(id) => write!(f, "node:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("stability window must hold at least one sample")]
    ZeroStability,
}

/// Bounded time series keyed by (metric, entity).
///
/// Every series holds at most `stability` samples; appending to a full series evicts the oldest
/// one. A series is *stable* once it is full, and stays stable from then on.
#[derive(Debug)]
pub struct Register {
    stability: usize,
    series: FxHashMap<Metric, FxHashMap<Entity, VecDeque<f64>>>,
}

impl Register {
    /// An empty register keeping `stability` samples per series. Fails if `stability` is 0.
    pub fn new(stability: usize) -> Result<Self, RegisterError> {
        if stability == 0 {
            return Err(RegisterError::ZeroStability);
        }

        Ok(Self { stability, series: FxHashMap::default() })
    }

    /// Samples kept per series.
    pub const fn stability(&self) -> usize {
        self.stability
    }

    /// Append `value`, evicting the oldest sample if the series is full.
    pub fn add(&mut self, metric: Metric, entity: Entity, value: f64) {
        let stability = self.stability;
        let series = self
            .series
            .entry(metric)
            .or_default()
            .entry(entity)
            .or_insert_with(|| VecDeque::with_capacity(stability));

        if series.len() == stability {
            series.pop_front();
        }
        series.push_back(value);
    }

    /// The most recent sample, or 0 if nothing has been recorded.
    pub fn last(&self, metric: Metric, entity: &Entity) -> f64 {
        self.get(metric, entity).and_then(|s| s.back().copied()).unwrap_or_default()
    }

    /// The mean of the held samples, or 0 if nothing has been recorded.
    pub fn average(&self, metric: Metric, entity: &Entity) -> f64 {
        match self.get(metric, entity) {
            Some(series) if !series.is_empty() => {
                series.iter().sum::<f64>() / series.len() as f64
            }
            _ => 0.0,
        }
    }

    /// Number of samples held, at most [`Register::stability`].
    pub fn len(&self, metric: Metric, entity: &Entity) -> usize {
        self.get(metric, entity).map_or(0, VecDeque::len)
    }

    /// Whether the series has filled up.
    pub fn is_stable(&self, metric: Metric, entity: &Entity) -> bool {
        self.len(metric, entity) == self.stability
    }

    fn get(&self, metric: Metric, entity: &Entity) -> Option<&VecDeque<f64>> {
        self.series.get(&metric)?.get(entity)
    }
}
