use hopctl_common::{Direction, IpNet, NodeId};
use serde::{Deserialize, Serialize};

use crate::{
    directive::{ClassOp, Directive, MatchOn},
    handle::ClassId,
};

/// How a plan is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanMode {
    /// First application: reset the devices and build the marking scaffolding.
    Initialize,
    /// Steady state: scaffolding is assumed present, only rates change.
    Update,
}

/// A device whose traffic is shaped, optionally through a paired shaping device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapedInterface {
    /// The ingress/egress device carrying the traffic.
    pub device: String,
    /// The paired shaping device (usually an `ifb`) that ingress traffic is redirected through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shaping: Option<String>,
}

impl ShapedInterface {
    pub fn new(device: impl Into<String>) -> Self {
        Self { device: device.into(), shaping: None }
    }

    pub fn with_shaping(mut self, shaping: impl Into<String>) -> Self {
        self.shaping = Some(shaping.into());
        self
    }

    /// The device the HTB tree is installed on.
    pub fn target(&self) -> &str {
        self.shaping.as_deref().unwrap_or(&self.device)
    }
}

/// One leaf class of a plan: the aggregate of a single subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateClass {
    pub id: ClassId,
    /// The node whose aggregate this class shapes.
    pub node: NodeId,
    pub subnet: IpNet,
    pub mark: u32,
    pub rate_kbps: u64,
    pub ceil_kbps: u64,
}

/// Identifies the interface group a plan targets, independently of its rates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlanKey {
    pub owner: NodeId,
    pub direction: Direction,
    pub devices: Vec<String>,
}

/// The shaping configuration that should exist on one interface group of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePlan {
    /// The node that applies this plan.
    pub owner: NodeId,
    pub direction: Direction,
    pub mode: PlanMode,
    pub interfaces: Vec<ShapedInterface>,
    /// Rate and ceiling of the aggregate class. Always the sum of the class rates.
    pub ceiling_kbps: u64,
    pub classes: Vec<RateClass>,
}

impl QueuePlan {
    pub fn key(&self) -> PlanKey {
        PlanKey {
            owner: self.owner.clone(),
            direction: self.direction,
            devices: self.interfaces.iter().map(|i| i.device.clone()).collect(),
        }
    }

    /// Returns a copy of this plan applied with `mode`.
    pub fn with_mode(mut self, mode: PlanMode) -> Self {
        self.mode = mode;
        self
    }

    /// Lower this plan into backend directives, in application order.
    ///
    /// Redirects come first so that the shaping device exists in the data path before its tree
    /// is rebuilt. Classification comes last, once the classes exist: by mark on a plain device,
    /// by address on a shaping device.
    pub fn directives(&self) -> Vec<Directive> {
        let initialize = self.mode == PlanMode::Initialize;
        let op = if initialize { ClassOp::Add } else { ClassOp::Change };
        let match_on = MatchOn::from(self.direction);

        let mut directives = Vec::new();
        for interface in &self.interfaces {
            let target = interface.target().to_owned();

            if initialize {
                if let Some(ref shaping) = interface.shaping {
                    directives.push(Directive::Redirect {
                        device: interface.device.clone(),
                        shaping: shaping.clone(),
                    });
                }
                directives.push(Directive::Reset { device: target.clone() });
            }

            directives.push(Directive::InstallClass {
                device: target.clone(),
                op,
                parent: ClassId::ROOT_QDISC,
                class: ClassId::AGGREGATE,
                rate_kbps: self.ceiling_kbps,
                ceil_kbps: self.ceiling_kbps,
            });

            directives.extend(self.classes.iter().map(|class| Directive::InstallClass {
                device: target.clone(),
                op,
                parent: ClassId::AGGREGATE,
                class: class.id,
                rate_kbps: class.rate_kbps,
                ceil_kbps: class.ceil_kbps,
            }));

            if initialize {
                let redirected = interface.shaping.is_some();
                directives.extend(self.classes.iter().map(|class| {
                    if redirected {
                        Directive::MatchSubnet {
                            device: target.clone(),
                            subnet: class.subnet,
                            match_on,
                            class: class.id,
                        }
                    } else {
                        Directive::BindMark {
                            device: target.clone(),
                            subnet: class.subnet,
                            match_on,
                            mark: class.mark,
                            class: class.id,
                        }
                    }
                }));
            }
        }

        directives
    }
}
