use std::{collections::BTreeMap, io, net::SocketAddr, sync::Arc};

use hopctl_common::LinkId;
use hopctl_control::{
    estimator::{EstimateError, LinkReading, MeasurementSource},
    throughput::{CounterKind, CounterSource},
};
use hopctl_transport::{Push, TransportError};
use hopctl_wire::Envelope;
use parking_lot::Mutex;

mod controller;
mod sync;

/// Records every pushed envelope, and fails pushes to selected peers.
#[derive(Debug, Clone, Default)]
pub struct RecordingPush {
    sent: Arc<Mutex<Vec<(SocketAddr, Envelope)>>>,
    unreachable: Arc<Mutex<Vec<SocketAddr>>>,
}

impl RecordingPush {
    pub fn unreachable(self, peer: SocketAddr) -> Self {
        self.unreachable.lock().push(peer);
        self
    }

    pub fn sent(&self) -> Vec<(SocketAddr, Envelope)> {
        self.sent.lock().clone()
    }
}

#[async_trait::async_trait]
impl Push for RecordingPush {
    async fn push(&self, peer: SocketAddr, envelope: &Envelope) -> Result<(), TransportError> {
        if self.unreachable.lock().contains(&peer) {
            return Err(TransportError::Io(io::ErrorKind::ConnectionRefused.into()));
        }

        self.sent.lock().push((peer, envelope.clone()));
        Ok(())
    }
}

/// Serves fixed link readings. Links without a reading are unavailable.
#[derive(Debug, Clone, Default)]
pub struct FixedReadings {
    readings: Arc<Mutex<BTreeMap<LinkId, LinkReading>>>,
}

impl FixedReadings {
    pub fn set(&self, link: &str, sender_bps: f64, receiver_bps: f64) {
        self.readings.lock().insert(LinkId::new(link), LinkReading { sender_bps, receiver_bps });
    }

    pub fn clear(&self) {
        self.readings.lock().clear();
    }
}

impl MeasurementSource for FixedReadings {
    fn read(&self, link: &LinkId) -> Result<LinkReading, EstimateError> {
        self.readings.lock().get(link).copied().ok_or_else(|| EstimateError::Unavailable {
            link: link.clone(),
            source: io::ErrorKind::NotFound.into(),
        })
    }
}

/// Serves settable byte counters.
#[derive(Debug, Clone, Default)]
pub struct FixedCounters {
    bytes: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl FixedCounters {
    pub fn set(&self, device: &str, bytes: u64) {
        self.bytes.lock().insert(device.to_owned(), bytes);
    }
}

impl CounterSource for FixedCounters {
    fn read(&self, device: &str, _kind: CounterKind) -> io::Result<u64> {
        self.bytes.lock().get(device).copied().ok_or_else(|| io::ErrorKind::NotFound.into())
    }
}
