#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Distributed bandwidth admission control for multi-hop wireless backhauls.
//!
//! The same daemon runs on every node of the chain. See [`Controller`] for the per-node loop.

pub use hopctl_common as common;
pub use hopctl_control::*;
pub use hopctl_tc as tc;
pub use hopctl_transport as transport;
pub use hopctl_wire as wire;
