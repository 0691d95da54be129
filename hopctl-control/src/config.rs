//! Static configuration.
//!
//! The daemon reads one YAML document at startup. [`Config`] is its raw shape;
//! [`Config::validate`] checks every precondition the control loop relies on and produces the
//! [`Topology`] the rest of the crate works with.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use hopctl_common::{Direction, IpNet, Kbps, LinkId, NodeDirection, NodeId};
use hopctl_tc::{handle::ID_OFFSET, ShapedInterface};
use hopctl_transport::PushOptions;
use serde::{Deserialize, Serialize};

use crate::throughput::CounterKind;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("stability must be at least 1")]
    Stability,
    #[error("period must be at least one second")]
    Period,
    #[error("beta must be within [0, 1], got {0}")]
    Beta(f64),
    #[error("floor must be non-negative, got {0}")]
    Floor(Kbps),
    #[error("link {link}: scaling factor must be positive, got {k}")]
    Factor { link: LinkId, k: f64 },
    #[error("guarantee of {member} must be finite and non-negative, got {kbps}")]
    Guarantee { member: NodeDirection, kbps: Kbps },
    #[error("link {0}: guarantees of its members sum to zero")]
    NoGuarantee(LinkId),
    #[error("{member} is a member of both {first} and {second}")]
    SharedMember { member: NodeDirection, first: LinkId, second: LinkId },
    #[error("node {0} is referenced but not declared")]
    UnknownNode(NodeId),
    #[error("no peer address for node {0}")]
    MissingPeer(NodeId),
    #[error("an interior node does not report counters")]
    InteriorCounters,
    #[error("only the authority {authority} can run as uplink-edge")]
    Authority { authority: NodeId },
    #[error("shaping group of {owner}/{direction}: mark {mark} is used twice")]
    DuplicateMark { owner: NodeId, direction: Direction, mark: u32 },
    #[error("shaping group of {owner}/{direction}: too many classes ({count})")]
    TooManyClasses { owner: NodeId, direction: Direction, count: usize },
}

/// The role of this node in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Measures links, computes admissions and distributes plans.
    UplinkEdge,
    /// Reports throughput towards the authority, and applies the plans it receives.
    DownlinkEdge,
    /// Only applies the plans it receives.
    Interior,
}

/// Which admission formula to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Formula {
    #[default]
    Smoothed,
    /// The smoothed result, capped at the observed throughput.
    UsageCapped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub id: LinkId,
    /// Scaling factor applied to the measured throughput.
    #[serde(default = "default_k")]
    pub k: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// The node-directions sharing this link.
    pub members: Vec<NodeDirection>,
}

/// Static minimum guarantees of one node, in kbps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: NodeId,
    pub uplink_kbps: Kbps,
    pub downlink_kbps: Kbps,
}

impl NodeConfig {
    pub const fn guarantee(&self, direction: Direction) -> Kbps {
        match direction {
            Direction::Uplink => self.uplink_kbps,
            Direction::Downlink => self.downlink_kbps,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassConfig {
    /// The node whose aggregate this class carries.
    pub node: NodeId,
    pub subnet: IpNet,
    pub mark: u32,
}

/// One interface group that is shaped as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapingGroup {
    /// The node that applies the group's plan.
    pub owner: NodeId,
    pub direction: Direction,
    pub interfaces: Vec<ShapedInterface>,
    pub classes: Vec<ClassConfig>,
}

/// A local interface counter to harvest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterConfig {
    /// The node whose aggregate traverses the device.
    pub node: NodeId,
    pub direction: Direction,
    pub device: String,
    pub counter: CounterKind,
}

/// The configuration document, as written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeId,
    pub role: Role,
    /// The uplink-edge node that computes plans for the chain.
    pub authority: NodeId,
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_stability")]
    pub stability: usize,
    #[serde(default = "default_beta")]
    pub beta: f64,
    #[serde(default = "default_floor_kbps")]
    pub floor_kbps: Kbps,
    #[serde(default)]
    pub formula: Formula,
    #[serde(default = "default_measurement_dir")]
    pub measurement_dir: PathBuf,
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,
    #[serde(default = "default_push_retries")]
    pub push_retries: usize,
    #[serde(default = "default_push_backoff_ms")]
    pub push_backoff_ms: u64,
    #[serde(default)]
    pub peers: BTreeMap<NodeId, SocketAddr>,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub shaping: Vec<ShapingGroup>,
    #[serde(default)]
    pub counters: Vec<CounterConfig>,
}

const fn default_k() -> f64 {
    1.0
}

const fn default_period_secs() -> u64 {
    10
}

const fn default_stability() -> usize {
    5
}

const fn default_beta() -> f64 {
    0.5
}

const fn default_floor_kbps() -> Kbps {
    64.0
}

fn default_measurement_dir() -> PathBuf {
    PathBuf::from("/var/lib/hopctl/measurements")
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7600))
}

const fn default_push_timeout_ms() -> u64 {
    5_000
}

const fn default_push_retries() -> usize {
    3
}

const fn default_push_backoff_ms() -> u64 {
    200
}

/// A measured link and the node-directions sharing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub id: LinkId,
    pub k: f64,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub members: Vec<NodeDirection>,
}

/// A validated configuration.
#[derive(Debug, Clone)]
pub struct Topology {
    pub node: NodeId,
    pub role: Role,
    pub authority: NodeId,
    pub period: Duration,
    pub stability: usize,
    pub beta: f64,
    pub floor_kbps: Kbps,
    pub formula: Formula,
    pub measurement_dir: PathBuf,
    pub listen: SocketAddr,
    pub push: PushOptions,
    pub peers: BTreeMap<NodeId, SocketAddr>,
    pub links: Vec<Link>,
    /// Minimum guarantee of every declared node-direction.
    pub guarantees: BTreeMap<NodeDirection, Kbps>,
    pub shaping: Vec<ShapingGroup>,
    pub counters: Vec<CounterConfig>,
}

impl Topology {
    pub fn guarantee(&self, member: &NodeDirection) -> Kbps {
        self.guarantees.get(member).copied().unwrap_or_default()
    }

    pub fn peer(&self, node: &NodeId) -> Option<SocketAddr> {
        self.peers.get(node).copied()
    }

    pub fn is_authority(&self) -> bool {
        self.node == self.authority
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;

        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Check every precondition and resolve the configuration into a [`Topology`].
    pub fn validate(self) -> Result<Topology, ConfigError> {
        if self.stability == 0 {
            return Err(ConfigError::Stability);
        }
        if self.period_secs == 0 {
            return Err(ConfigError::Period);
        }
        if !(0.0..=1.0).contains(&self.beta) {
            return Err(ConfigError::Beta(self.beta));
        }
        if self.floor_kbps < 0.0 || self.floor_kbps.is_nan() {
            return Err(ConfigError::Floor(self.floor_kbps));
        }
        if self.role == Role::UplinkEdge && self.node != self.authority {
            return Err(ConfigError::Authority { authority: self.authority });
        }

        let mut guarantees = BTreeMap::new();
        for node in &self.nodes {
            for direction in Direction::ALL {
                let member = NodeDirection::new(node.id.clone(), direction);
                let kbps = node.guarantee(direction);
                if !(kbps.is_finite() && kbps >= 0.0) {
                    return Err(ConfigError::Guarantee { member, kbps });
                }
                guarantees.insert(member, kbps);
            }
        }
        let declared = |node: &NodeId| self.nodes.iter().any(|n| &n.id == node);

        let mut owners: BTreeMap<&NodeDirection, &LinkId> = BTreeMap::new();
        for link in &self.links {
            if link.k <= 0.0 || link.k.is_nan() {
                return Err(ConfigError::Factor { link: link.id.clone(), k: link.k });
            }

            let mut sum = 0.0;
            for member in &link.members {
                if !declared(&member.node) {
                    return Err(ConfigError::UnknownNode(member.node.clone()));
                }
                if let Some(first) = owners.insert(member, &link.id) {
                    return Err(ConfigError::SharedMember {
                        member: member.clone(),
                        first: first.clone(),
                        second: link.id.clone(),
                    });
                }
                sum += guarantees.get(member).copied().unwrap_or_default();
            }

            if sum <= 0.0 {
                return Err(ConfigError::NoGuarantee(link.id.clone()));
            }
        }

        let max_classes = usize::from(u16::MAX - ID_OFFSET) + 1;
        for group in &self.shaping {
            if !declared(&group.owner) {
                return Err(ConfigError::UnknownNode(group.owner.clone()));
            }
            if group.owner != self.node && !self.peers.contains_key(&group.owner) {
                return Err(ConfigError::MissingPeer(group.owner.clone()));
            }
            if group.classes.len() > max_classes {
                return Err(ConfigError::TooManyClasses {
                    owner: group.owner.clone(),
                    direction: group.direction,
                    count: group.classes.len(),
                });
            }

            let mut marks = BTreeSet::new();
            for class in &group.classes {
                if !declared(&class.node) {
                    return Err(ConfigError::UnknownNode(class.node.clone()));
                }
                if !marks.insert(class.mark) {
                    return Err(ConfigError::DuplicateMark {
                        owner: group.owner.clone(),
                        direction: group.direction,
                        mark: class.mark,
                    });
                }
            }
        }

        if !self.counters.is_empty() && self.role == Role::Interior {
            return Err(ConfigError::InteriorCounters);
        }
        // Snapshots harvested anywhere but on the authority are pushed to it.
        if !self.counters.is_empty() &&
            self.node != self.authority &&
            !self.peers.contains_key(&self.authority)
        {
            return Err(ConfigError::MissingPeer(self.authority));
        }

        let push = PushOptions {
            timeout: Duration::from_millis(self.push_timeout_ms),
            retries: self.push_retries,
            backoff: Duration::from_millis(self.push_backoff_ms),
        };

        let links = self
            .links
            .into_iter()
            .map(|link| Link {
                id: link.id,
                k: link.k,
                origin: link.origin,
                destination: link.destination,
                members: link.members,
            })
            .collect();

        Ok(Topology {
            node: self.node,
            role: self.role,
            authority: self.authority,
            period: Duration::from_secs(self.period_secs),
            stability: self.stability,
            beta: self.beta,
            floor_kbps: self.floor_kbps,
            formula: self.formula,
            measurement_dir: self.measurement_dir,
            listen: self.listen,
            push,
            peers: self.peers,
            links,
            guarantees,
            shaping: self.shaping,
            counters: self.counters,
        })
    }
}
