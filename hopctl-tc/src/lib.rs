//! # Queue plans and traffic control
//!
//! This crate describes *what* shaping configuration should exist on a node (a [`QueuePlan`])
//! and lowers it into backend [`Directive`]s. A [`QueueBackend`] decides *how* each directive
//! reaches the kernel.
//!
//! ## Hierarchy
//!
//! Every shaped device carries the same HTB tree:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     HTB Root Qdisc (1:0)                      │
//! └───────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//!                ┌───────────────────────────────┐
//!                │  Class 1:1 (aggregate)        │
//!                │  rate = ceil = Σ child rates  │
//!                └───────────────────────────────┘
//!                                │
//!            ┌───────────────────┼───────────────────┐
//!            ▼                   ▼                   ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │  Class 1:10      │ │  Class 1:11      │ │  Class 1:12      │
//! │  subnet A        │ │  subnet B        │ │  subnet C        │
//! │  fw mark 11      │ │  fw mark 12      │ │  fw mark 13      │
//! │  rate = admitted │ │  rate = admitted │ │  rate = admitted │
//! └──────────────────┘ └──────────────────┘ └──────────────────┘
//! ```
//!
//! Packets are marked by subnet in the `mangle` table (source subnet for uplink traffic,
//! destination subnet for downlink traffic) and a `fw` filter moves each mark into its class.
//! When a device is paired with a shaping device (an `ifb`), its ingress traffic is redirected
//! there and the tree is installed on the shaping device instead. Redirection happens before
//! `mangle`, so on a shaping device `u32` filters classify by subnet directly.
//!
//! ## Modes
//!
//! - [`PlanMode::Initialize`] resets the device and installs the whole scaffolding.
//! - [`PlanMode::Update`] only changes class rates.

pub mod backend;
pub mod command;
pub mod commands;
pub mod directive;
pub mod handle;
pub mod plan;

pub use backend::{apply_plan, ApplyReport, BackendError, QueueBackend, RecordingBackend, TcBackend};
pub use directive::{ClassOp, Directive, MatchOn};
pub use handle::ClassId;
pub use plan::{PlanKey, PlanMode, QueuePlan, RateClass, ShapedInterface};
