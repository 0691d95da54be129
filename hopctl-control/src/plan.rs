use std::collections::BTreeMap;

use hopctl_common::{Kbps, NodeDirection};
use hopctl_tc::{ClassId, PlanMode, QueuePlan, RateClass};

use crate::{
    config::{ShapingGroup, Topology},
    register::{Entity, Metric, Register},
};

/// Builds one [`QueuePlan`] per configured shaping group.
#[derive(Debug, Clone, Copy)]
pub struct PlanBuilder<'a> {
    topology: &'a Topology,
}

impl<'a> PlanBuilder<'a> {
    pub const fn new(topology: &'a Topology) -> Self {
        Self { topology }
    }

    /// Plans sized to the static guarantees, establishing the whole scaffolding.
    pub fn initial(&self) -> Vec<QueuePlan> {
        self.build(PlanMode::Initialize, &BTreeMap::new())
    }

    /// Plans sized to the latest admitted rates.
    pub fn from_register(&self, register: &Register, mode: PlanMode) -> Vec<QueuePlan> {
        let mut rates = BTreeMap::new();
        for member in self.topology.guarantees.keys() {
            let metric = Metric::Admitted(member.direction);
            let node = Entity::Node(member.node.clone());
            if register.len(metric, &node) > 0 {
                rates.insert(member.clone(), register.last(metric, &node));
            }
        }

        self.build(mode, &rates)
    }

    /// Plans for the given rates. Node-directions without a rate get their guarantee.
    pub fn build(&self, mode: PlanMode, rates: &BTreeMap<NodeDirection, Kbps>) -> Vec<QueuePlan> {
        self.topology.shaping.iter().map(|group| self.build_group(group, mode, rates)).collect()
    }

    fn build_group(
        &self,
        group: &ShapingGroup,
        mode: PlanMode,
        rates: &BTreeMap<NodeDirection, Kbps>,
    ) -> QueuePlan {
        let classes: Vec<RateClass> = group
            .classes
            .iter()
            .zip(0u16..)
            .map(|(class, index)| {
                let member = NodeDirection::new(class.node.clone(), group.direction);
                let rate = rates
                    .get(&member)
                    .copied()
                    .unwrap_or_else(|| self.topology.guarantee(&member))
                    .max(self.topology.floor_kbps);
                let rate_kbps = rate.round() as u64;

                RateClass {
                    id: ClassId::for_index(index),
                    node: class.node.clone(),
                    subnet: class.subnet,
                    mark: class.mark,
                    rate_kbps,
                    ceil_kbps: rate_kbps,
                }
            })
            .collect();

        QueuePlan {
            owner: group.owner.clone(),
            direction: group.direction,
            mode,
            interfaces: group.interfaces.clone(),
            ceiling_kbps: classes.iter().map(|c| c.rate_kbps).sum(),
            classes,
        }
    }
}
