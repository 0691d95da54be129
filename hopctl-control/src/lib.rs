#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! The hopctl admission-control loop.
//!
//! Each cycle, on the uplink-edge node:
//!
//! 1. the [`CapacityEstimator`] turns link measurements into capacity samples,
//! 2. the [`AdmissionCalculator`] shares the margin of every stable link among its members,
//! 3. the [`PlanBuilder`] turns the admitted rates into queue plans,
//! 4. the [`SyncProtocol`] applies the plans this node owns and pushes the others to their owners.
//!
//! Every node applies the plans it receives, and nodes with local counters report their
//! throughput to the uplink-edge.

pub mod admission;
pub mod config;
pub mod controller;
pub mod estimator;
pub mod plan;
pub mod register;
pub mod sync;
pub mod throughput;

pub use admission::{AdmissionCalculator, Margins};
pub use config::{Config, ConfigError, Formula, Role, Topology};
pub use controller::{Controller, CycleReport};
pub use estimator::{CapacityEstimator, EstimateError, Iperf3Results, MeasurementSource};
pub use plan::PlanBuilder;
pub use register::{Entity, Metric, Register, RegisterError};
pub use sync::{DistributeReport, IllegalTransition, SyncProtocol, SyncState};
pub use throughput::{CounterSource, SysfsCounters, ThroughputTracker};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Register(#[from] RegisterError),
}
