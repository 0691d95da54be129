use std::fmt::{self, Display};

use hopctl_common::{Direction, IpNet};
use serde::{Deserialize, Serialize};

use crate::handle::ClassId;

/// Which address of a packet a classification mark matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchOn {
    Source,
    Destination,
}

impl From<Direction> for MatchOn {
    /// Uplink aggregates are identified by where traffic comes from, downlink aggregates by where
    /// it goes.
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Uplink => Self::Source,
            Direction::Downlink => Self::Destination,
        }
    }
}

/// Whether a class directive creates the class or changes an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassOp {
    Add,
    Change,
}

impl ClassOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
        }
    }
}

/// A single instruction for a [`QueueBackend`](crate::QueueBackend).
///
/// Directives say what should exist, not how the OS is asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Ensure a clean state on `device`: drop whatever root qdisc is present and install an
    /// empty HTB root.
    Reset { device: String },
    /// Install (or change) an HTB class with the given rate and ceiling, in kbit/s.
    InstallClass {
        device: String,
        op: ClassOp,
        parent: ClassId,
        class: ClassId,
        rate_kbps: u64,
        ceil_kbps: u64,
    },
    /// Mark packets from/to `subnet` with `mark`, and classify `mark` into `class` on `device`.
    BindMark { device: String, subnet: IpNet, match_on: MatchOn, mark: u32, class: ClassId },
    /// Classify packets from/to `subnet` into `class` on `device` by address alone.
    ///
    /// Used on shaping devices: redirected ingress traffic reaches them before `mangle` runs, so
    /// it never carries a mark.
    MatchSubnet { device: String, subnet: IpNet, match_on: MatchOn, class: ClassId },
    /// Redirect ingress traffic of `device` through the shaping device `shaping`.
    Redirect { device: String, shaping: String },
}

impl Directive {
    /// The device this directive acts on.
    pub fn device(&self) -> &str {
        match self {
            Self::Reset { device } |
            Self::InstallClass { device, .. } |
            Self::BindMark { device, .. } |
            Self::MatchSubnet { device, .. } |
            Self::Redirect { device, .. } => device,
        }
    }

    /// Returns `true` for directives that build scaffolding rather than adjust rates.
    pub const fn is_scaffolding(&self) -> bool {
        match self {
            Self::Reset { .. } |
            Self::BindMark { .. } |
            Self::MatchSubnet { .. } |
            Self::Redirect { .. } => true,
            Self::InstallClass { op, .. } => matches!(op, ClassOp::Add),
        }
    }
}

impl Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reset { device } => write!(f, "reset {device}"),
            Self::InstallClass { device, op, class, rate_kbps, ceil_kbps, .. } => write!(
                f,
                "{} class {class} on {device} rate {rate_kbps}kbit ceil {ceil_kbps}kbit",
                op.as_str()
            ),
            Self::BindMark { device, subnet, mark, class, .. } => {
                write!(f, "bind mark {mark} ({subnet}) to {class} on {device}")
            }
            Self::MatchSubnet { device, subnet, class, .. } => {
                write!(f, "match {subnet} to {class} on {device}")
            }
            Self::Redirect { device, shaping } => {
                write!(f, "redirect {device} ingress to {shaping}")
            }
        }
    }
}
