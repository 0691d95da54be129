use std::{
    fs, io,
    path::{Path, PathBuf},
};

use hopctl_common::{bps_to_kbps, Kbps, LinkId};
use serde::Deserialize;

use crate::{
    config::Link,
    register::{Entity, Metric, Register},
};

#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    #[error("measurement of link {link} unavailable: {source}")]
    Unavailable {
        link: LinkId,
        #[source]
        source: io::Error,
    },
    #[error("measurement of link {link} malformed: {source}")]
    Malformed {
        link: LinkId,
        #[source]
        source: serde_json::Error,
    },
    #[error("measurement of link {link} has no stream summary")]
    NoStream { link: LinkId },
    #[error("measurement of link {link} is not a valid rate")]
    InvalidRate { link: LinkId },
}

/// One throughput reading of a link, in bits per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkReading {
    pub sender_bps: f64,
    pub receiver_bps: f64,
}

/// Provides the latest throughput reading of a link.
pub trait MeasurementSource {
    fn read(&self, link: &LinkId) -> Result<LinkReading, EstimateError>;
}

/// Reads the JSON reports `iperf3 --json` leaves in a directory, one `<link>.json` per link.
#[derive(Debug, Clone)]
pub struct Iperf3Results {
    dir: PathBuf,
}

impl Iperf3Results {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }
}

#[derive(Deserialize)]
struct Report {
    end: End,
}

#[derive(Deserialize)]
struct End {
    #[serde(default)]
    streams: Vec<Stream>,
}

#[derive(Deserialize)]
struct Stream {
    sender: Summary,
    receiver: Summary,
}

#[derive(Deserialize)]
struct Summary {
    bits_per_second: f64,
}

impl MeasurementSource for Iperf3Results {
    fn read(&self, link: &LinkId) -> Result<LinkReading, EstimateError> {
        let path = self.dir.join(format!("{link}.json"));
        let raw = fs::read(&path)
            .map_err(|source| EstimateError::Unavailable { link: link.clone(), source })?;

        let report: Report = serde_json::from_slice(&raw)
            .map_err(|source| EstimateError::Malformed { link: link.clone(), source })?;

        let stream = report
            .end
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| EstimateError::NoStream { link: link.clone() })?;

        Ok(LinkReading {
            sender_bps: stream.sender.bits_per_second,
            receiver_bps: stream.receiver.bits_per_second,
        })
    }
}

/// Turns link readings into [`Metric::DynamicCapacity`] samples.
#[derive(Debug)]
pub struct CapacityEstimator<S> {
    source: S,
}

impl<S: MeasurementSource> CapacityEstimator<S> {
    pub const fn new(source: S) -> Self {
        Self { source }
    }

    /// Read every link and record its capacity.
    ///
    /// All links are read before anything is recorded: if any single reading fails, nothing is
    /// recorded for any link this cycle.
    pub fn estimate(
        &self,
        links: &[Link],
        register: &mut Register,
    ) -> Result<Vec<(LinkId, Kbps)>, EstimateError> {
        let mut capacities = Vec::with_capacity(links.len());

        for link in links {
            let reading = self.source.read(&link.id)?;
            let capacity = capacity_kbps(reading, link.k);
            if !capacity.is_finite() || capacity < 0.0 {
                return Err(EstimateError::InvalidRate { link: link.id.clone() });
            }

            tracing::info!(
                link = %link.id,
                origin = link.origin.as_deref().unwrap_or("-"),
                destination = link.destination.as_deref().unwrap_or("-"),
                sender_bps = reading.sender_bps,
                receiver_bps = reading.receiver_bps,
                capacity_kbps = capacity,
                "link reading"
            );

            capacities.push((link.id.clone(), capacity));
        }

        for (id, capacity) in &capacities {
            register.add(Metric::DynamicCapacity, Entity::Link(id.clone()), *capacity);
        }

        Ok(capacities)
    }
}

/// Sum both directions of a reading, scale it by `k` and convert it to kbps.
pub fn capacity_kbps(reading: LinkReading, k: f64) -> Kbps {
    bps_to_kbps(reading.sender_bps + reading.receiver_bps) * k
}
