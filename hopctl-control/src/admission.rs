//! Margin allocation and admission.
//!
//! For a link with capacity `C` shared by node-directions with guarantees `g_i` and last
//! admitted rates `a_i`:
//!
//! ```text
//! min_margin       = C - Σ g_i
//! effective_margin = C - Σ a_i
//! link_margin      = min(min_margin, effective_margin)
//! flux_i           = g_i / Σ g * link_margin
//! admitted_i       = max(a_i, g_i) + flux_i - max(β (a_i - g_i), 0)
//! ```
//!
//! The admitted rate is then clamped to the floor, so that no interface is ever starved.

use hopctl_common::{Kbps, LinkId, NodeDirection};

use crate::{
    config::{Formula, Link, Topology},
    register::{Entity, Metric, Register},
};

/// The margins of one link in one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    /// Capacity left over the guarantees.
    pub min: Kbps,
    /// Capacity left over the last admitted rates.
    pub effective: Kbps,
    /// The lesser of the two, shared out among the members.
    pub link: Kbps,
}

/// Margins of a link of `capacity`, given the guarantees and last admitted rates of its members.
pub fn link_margins(capacity: Kbps, guarantees: &[Kbps], admitted: &[Kbps]) -> Margins {
    let min = capacity - guarantees.iter().sum::<Kbps>();
    let effective = capacity - admitted.iter().sum::<Kbps>();

    Margins { min, effective, link: min.min(effective) }
}

/// Share `link_margin` out in proportion to the guarantees.
///
/// A zero guarantee sum is rejected at configuration time; here it yields no margin at all.
pub fn flux_margins(guarantees: &[Kbps], link_margin: Kbps) -> Vec<Kbps> {
    let total: Kbps = guarantees.iter().sum();
    if total <= 0.0 {
        return vec![0.0; guarantees.len()];
    }

    guarantees.iter().map(|g| g * link_margin / total).collect()
}

/// The smoothed admission formula.
pub fn smoothed_admission(last: Kbps, guarantee: Kbps, flux: Kbps, beta: f64) -> Kbps {
    last.max(guarantee) + flux - (beta * (last - guarantee)).max(0.0)
}

/// The smoothed admission, capped at what the node-direction actually uses.
///
/// The cap never goes below the guarantee, and does not apply before anything was observed.
pub fn usage_capped_admission(
    last: Kbps,
    guarantee: Kbps,
    flux: Kbps,
    beta: f64,
    observed: Option<Kbps>,
) -> Kbps {
    let admitted = smoothed_admission(last, guarantee, flux, beta);
    match observed {
        Some(observed) => admitted.min(observed.max(guarantee)),
        None => admitted,
    }
}

/// One admission decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub link: LinkId,
    pub member: NodeDirection,
    /// The member's share of the link margin.
    pub flux: Kbps,
    /// The new rate, after the floor.
    pub admitted: Kbps,
}

/// Runs the admission formulas over every stable link of a topology.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionCalculator {
    beta: f64,
    floor: Kbps,
    formula: Formula,
}

impl AdmissionCalculator {
    pub const fn new(beta: f64, floor: Kbps, formula: Formula) -> Self {
        Self { beta, floor, formula }
    }

    pub const fn from_topology(topology: &Topology) -> Self {
        Self::new(topology.beta, topology.floor_kbps, topology.formula)
    }

    /// Admit every member of every link whose capacity is stable, and record the new rates
    /// under [`Metric::Admitted`].
    pub fn run(&self, topology: &Topology, register: &mut Register) -> Vec<Admission> {
        let mut admissions = Vec::new();

        for link in &topology.links {
            let entity = Entity::Link(link.id.clone());
            if !register.is_stable(Metric::DynamicCapacity, &entity) {
                tracing::debug!(
                    link = %link.id,
                    samples = register.len(Metric::DynamicCapacity, &entity),
                    stability = register.stability(),
                    "capacity not stable yet"
                );
                continue;
            }

            let capacity = register.last(Metric::DynamicCapacity, &entity);
            admissions.extend(self.admit_link(link, capacity, topology, register));
        }

        admissions
    }

    fn admit_link(
        &self,
        link: &Link,
        capacity: Kbps,
        topology: &Topology,
        register: &mut Register,
    ) -> Vec<Admission> {
        let guarantees: Vec<Kbps> = link.members.iter().map(|m| topology.guarantee(m)).collect();
        let last: Vec<Kbps> = link
            .members
            .iter()
            .map(|m| register.last(Metric::Admitted(m.direction), &Entity::Node(m.node.clone())))
            .collect();

        let margins = link_margins(capacity, &guarantees, &last);
        let flux = flux_margins(&guarantees, margins.link);

        tracing::debug!(
            link = %link.id,
            capacity,
            min_margin = margins.min,
            effective_margin = margins.effective,
            link_margin = margins.link,
            "link margins"
        );

        let mut admissions = Vec::with_capacity(link.members.len());
        for (i, member) in link.members.iter().enumerate() {
            let node = Entity::Node(member.node.clone());

            let admitted = match self.formula {
                Formula::Smoothed => smoothed_admission(last[i], guarantees[i], flux[i], self.beta),
                Formula::UsageCapped => {
                    let metric = Metric::Observed(member.direction);
                    let observed =
                        (register.len(metric, &node) > 0).then(|| register.last(metric, &node));
                    usage_capped_admission(last[i], guarantees[i], flux[i], self.beta, observed)
                }
            };
            let admitted = admitted.max(self.floor);

            register.add(Metric::Admitted(member.direction), node, admitted);
            tracing::info!(link = %link.id, %member, flux = flux[i], admitted, "admitted");

            admissions.push(Admission {
                link: link.id.clone(),
                member: member.clone(),
                flux: flux[i],
                admitted,
            });
        }

        admissions
    }
}
